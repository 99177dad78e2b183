//! In-memory snapshot store for testing.

use crate::error::{StorageError, StorageResult};
use crate::store::SnapshotStore;
use parking_lot::RwLock;
use std::collections::HashMap;

/// An in-memory snapshot store.
///
/// This store keeps all blobs in a `HashMap` and is suitable for:
/// - Unit tests
/// - Ephemeral engines that don't need persistence
///
/// # Thread Safety
///
/// This store is thread-safe and can be shared across threads. Tests that
/// exercise restart behavior can keep an `Arc<MemoryStore>` and hand clones
/// of it to successive engine instances.
#[derive(Debug, Default)]
pub struct MemoryStore {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    /// Creates a new empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of blobs held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.blobs.read().len()
    }

    /// Returns whether the store holds no blobs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blobs.read().is_empty()
    }
}

impl SnapshotStore for MemoryStore {
    fn read(&self, name: &str) -> StorageResult<Vec<u8>> {
        self.blobs
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| StorageError::not_found(name))
    }

    fn write(&self, name: &str, data: &[u8]) -> StorageResult<()> {
        if name.is_empty() {
            return Err(StorageError::invalid_name(name));
        }
        self.blobs.write().insert(name.to_string(), data.to_vec());
        Ok(())
    }

    fn rename(&self, from: &str, to: &str) -> StorageResult<()> {
        if to.is_empty() {
            return Err(StorageError::invalid_name(to));
        }
        let mut blobs = self.blobs.write();
        let data = blobs
            .remove(from)
            .ok_or_else(|| StorageError::not_found(from))?;
        blobs.insert(to.to_string(), data);
        Ok(())
    }

    fn exists(&self, name: &str) -> StorageResult<bool> {
        Ok(self.blobs.read().contains_key(name))
    }

    fn list(&self) -> StorageResult<Vec<String>> {
        Ok(self.blobs.read().keys().cloned().collect())
    }
}
