//! Object storage for transcoded outputs.
//!
//! This crate provides:
//! - The [`ObjectStore`] contract (upload, fetchable URL, delete, exists)
//! - An S3-compatible client with presigned URLs
//! - A local filesystem store
//! - Output key layout (`processed/{job_id}/{resolution}.mp4`)

pub mod client;
pub mod config;
pub mod error;
pub mod local;
pub mod operations;
pub mod store;

pub use client::{S3Client, S3Config};
pub use config::StorageConfig;
pub use error::{StorageError, StorageResult};
pub use local::LocalStore;
pub use operations::{output_key, publish_output, DEFAULT_URL_TTL};
pub use store::{validate_key, ObjectStore};
