//! Task and file persistence.
//!
//! This crate provides:
//! - The `JobStore` and `FileRepository` contracts used by the worker
//! - A Redis implementation with compare-and-set record updates and an
//!   atomic remote-file promotion
//! - An in-memory implementation for tests and local runs

pub mod error;
pub mod memory;
pub mod redis_store;
pub mod repos;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use redis_store::{RedisStore, RedisStoreConfig};
pub use repos::{FileRepository, JobStore};
