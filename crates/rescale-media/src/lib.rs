//! FFmpeg CLI wrapper for the rescale transcoder.
//!
//! This crate provides:
//! - Type-safe FFmpeg command building
//! - Progress parsing from `-progress pipe:2` and a monotonic progress monitor
//! - Cancellation and timeouts via tokio
//! - FFprobe source inspection
//! - Streaming HTTP source download
//!
//! [`Prober`] and [`Encoder`] are the seams the worker depends on; the
//! `ffprobe`/`ffmpeg` implementations live here.

pub mod command;
pub mod download;
pub mod encode;
pub mod error;
pub mod fs_utils;
pub mod probe;
pub mod progress;

pub use command::{check_ffmpeg, check_ffprobe, FfmpegCommand, FfmpegRunner};
pub use download::{is_remote, HttpDownloader};
pub use encode::{EncodeRequest, Encoder, FfmpegEncoder};
pub use error::{MediaError, MediaResult};
pub use fs_utils::{ensure_writable_dir, TempFileGuard};
pub use probe::{probe_video, FfprobeProber, Prober, VideoInfo};
pub use progress::{FfmpegProgress, ProgressCallback, ProgressMonitor};
