//! # Arkiv Storage
//!
//! Snapshot store trait and implementations for Arkiv.
//!
//! This crate provides the lowest-level storage abstraction for Arkiv.
//! Snapshot stores are **opaque blob stores** keyed by file name - they do
//! not interpret the data they hold.
//!
//! ## Design Principles
//!
//! - Stores hold named blobs in a flat namespace (read, write, rename, list)
//! - Every write replaces the whole blob atomically
//! - No knowledge of Arkiv file formats, segments, or indexes
//! - Must be `Send + Sync` for concurrent access
//! - Arkiv owns all file format interpretation
//!
//! ## Available Stores
//!
//! - [`MemoryStore`] - For testing and ephemeral engines
//! - [`DirStore`] - For persistent storage backed by one directory
//!
//! ## Example
//!
//! ```rust
//! use arkiv_storage::{MemoryStore, SnapshotStore};
//!
//! let store = MemoryStore::new();
//! store.write("meta.json", b"{}").unwrap();
//! let data = store.read("meta.json").unwrap();
//! assert_eq!(&data, b"{}");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod dir;
mod error;
mod memory;
mod store;

pub use dir::DirStore;
pub use error::{StorageError, StorageResult};
pub use memory::MemoryStore;
pub use store::SnapshotStore;
