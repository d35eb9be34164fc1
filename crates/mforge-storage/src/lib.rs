//! Blob storage for MediaForge.
//!
//! This crate provides:
//! - The `BlobStore` contract (get/put/delete/presigned URL)
//! - A Cloudflare R2 (S3-compatible) implementation
//! - An in-memory implementation for tests and local runs
//! - Key layout for promoted uploads and published outputs

pub mod blob;
pub mod client;
pub mod error;
pub mod memory;
pub mod operations;

pub use blob::{validate_key, BlobStore};
pub use client::{R2Client, R2Config};
pub use error::{StorageError, StorageResult};
pub use memory::MemoryBlobStore;
pub use operations::{output_key, upload_key};
