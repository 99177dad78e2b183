//! Snapshot store trait definition.

use crate::error::StorageResult;

/// A low-level snapshot store for Arkiv.
///
/// Snapshot stores are **opaque blob stores**: a flat namespace of named
/// blobs, each replaced wholesale on every write. Arkiv owns all file format
/// interpretation - stores do not understand segments, indexes, or the
/// catalog.
///
/// # Invariants
///
/// - `write` replaces the full blob atomically: a concurrent crash leaves
///   either the previous content or the new content, never a mix
/// - `read` returns exactly the bytes of the last completed `write`
/// - `rename` atomically moves a blob to a new name, replacing any blob
///   already at the destination
/// - Stores must be `Send + Sync` for concurrent access
///
/// # Implementors
///
/// - [`super::MemoryStore`] - For testing
/// - [`super::DirStore`] - For persistent storage
pub trait SnapshotStore: Send + Sync {
    /// Reads the full content of the named blob.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::NotFound`] if the blob does not exist,
    /// or an I/O error.
    fn read(&self, name: &str) -> StorageResult<Vec<u8>>;

    /// Atomically replaces the named blob with `data`.
    ///
    /// After this returns successfully, the new content is durable.
    ///
    /// # Errors
    ///
    /// Returns an error if the write cannot be completed.
    fn write(&self, name: &str, data: &[u8]) -> StorageResult<()>;

    /// Atomically renames a blob, replacing any blob at the destination.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::NotFound`] if the source does not
    /// exist, or an I/O error.
    fn rename(&self, from: &str, to: &str) -> StorageResult<()>;

    /// Returns whether the named blob exists.
    ///
    /// # Errors
    ///
    /// Returns an error if existence cannot be determined.
    fn exists(&self, name: &str) -> StorageResult<bool>;

    /// Lists all blob names in the store, in unspecified order.
    ///
    /// Internal bookkeeping entries (lock files, temporaries) are excluded.
    ///
    /// # Errors
    ///
    /// Returns an error if the listing fails.
    fn list(&self) -> StorageResult<Vec<String>>;
}
