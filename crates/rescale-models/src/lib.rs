//! Shared data models for the rescale transcoding service.
//!
//! This crate provides Serde-serializable types for:
//! - Jobs and their per-resolution conversions
//! - The resolution catalog
//! - Encoding configuration
//! - Submission requests and status responses

pub mod conversion;
pub mod encoding;
pub mod job;
pub mod request;
pub mod resolution;
pub mod timestamp;

// Re-export common types
pub use conversion::{ConversionState, ConversionStatus, PROGRESS_CEILING};
pub use encoding::EncodingConfig;
pub use job::{is_safe_segment, InvalidTransition, Job, JobData, JobId, JobStatus};
pub use request::{JobsPage, QueueStatus, SubmitJob, SubmitResponse};
pub use resolution::{Dimensions, Resolution, FALLBACK_DIMENSIONS};
