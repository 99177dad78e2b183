//! Segment store: the active segment, sealed segments, and rotation.
//!
//! On disk the engine is one flat directory:
//!
//! ```text
//! <database_path>/
//! ├─ LOCK                      # advisory lock (owned by the store layer)
//! ├─ 1722945600000.json        # active segment: JSON array, newest-first
//! ├─ seg_1722940000000.json    # sealed segments: prefix + original name
//! ├─ index.json                # primary index snapshot
//! ├─ rindex.json               # order index snapshot
//! └─ meta.json                 # catalog snapshot
//! ```
//!
//! The active segment is named by its creation timestamp; sealing renames
//! it under the configured prefix, keeping the timestamp. All snapshots are
//! full rewrites through the store's atomic write path.

use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::index::IndexManager;
use crate::types::SegmentId;
use arkiv_storage::{SnapshotStore, StorageError};
use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Primary index snapshot file.
pub(crate) const INDEX_FILE: &str = "index.json";
/// Order index snapshot file.
pub(crate) const RINDEX_FILE: &str = "rindex.json";
/// Catalog snapshot file.
pub(crate) const META_FILE: &str = "meta.json";
/// Extension shared by active and sealed segment files.
const SEGMENT_EXT: &str = ".json";

/// Durable storage of the active segment and sealed segments.
pub(crate) struct SegmentStore {
    store: Arc<dyn SnapshotStore>,
    file_prefix: String,
    rotate_size_bytes: u64,
    rotate_age: Duration,
    active_id: SegmentId,
    /// segment id → item count, one entry per sealed segment.
    catalog: BTreeMap<u64, usize>,
}

impl SegmentStore {
    /// Opens the segment store: loads the catalog, discovers the active
    /// segment on disk, and creates a fresh one if none exists.
    ///
    /// More than one active candidate on disk is corruption - the engine
    /// must have exactly one mutable segment.
    pub(crate) fn open(
        store: Arc<dyn SnapshotStore>,
        config: &Config,
        now_ms: u64,
    ) -> CoreResult<Self> {
        let catalog = match store.read(META_FILE) {
            Ok(data) => serde_json::from_slice(&data)
                .map_err(|e| CoreError::corrupt_state(format!("unreadable catalog: {e}")))?,
            Err(StorageError::NotFound { .. }) => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };

        let mut this = Self {
            store,
            file_prefix: config.file_prefix.clone(),
            rotate_size_bytes: config.rotate_size_bytes(),
            rotate_age: config.rotate_age(),
            active_id: SegmentId::new(0),
            catalog,
        };

        let mut actives = Vec::new();
        for name in this.store.list()? {
            if let Some(id) = this.parse_active_name(&name) {
                actives.push(id);
            }
        }
        match actives.as_slice() {
            [] => {
                this.create_active(now_ms)?;
            }
            [id] => this.active_id = *id,
            many => {
                return Err(CoreError::corrupt_state(format!(
                    "found {} active segment files, expected exactly one",
                    many.len()
                )));
            }
        }

        Ok(this)
    }

    /// Identifier of the current active segment.
    pub(crate) fn active_id(&self) -> SegmentId {
        self.active_id
    }

    /// The catalog: segment id → item count, oldest first.
    pub(crate) fn catalog(&self) -> &BTreeMap<u64, usize> {
        &self.catalog
    }

    /// Total number of archived items across all sealed segments.
    pub(crate) fn catalog_total(&self) -> usize {
        self.catalog.values().sum()
    }

    /// Item count of one sealed segment.
    pub(crate) fn item_count(&self, id: SegmentId) -> Option<usize> {
        self.catalog.get(&id.as_u64()).copied()
    }

    /// Number of items archived in segments sealed strictly before `id`.
    pub(crate) fn items_before(&self, id: SegmentId) -> usize {
        self.catalog.range(..id.as_u64()).map(|(_, &n)| n).sum()
    }

    /// Sealed segment identifiers, most recently created first.
    pub(crate) fn sealed_ids_newest_first(&self) -> Vec<SegmentId> {
        self.catalog.keys().rev().map(|&id| SegmentId::new(id)).collect()
    }

    /// Allocates a new empty active segment named by the current timestamp.
    ///
    /// The empty file is durably created before the identifier is handed
    /// out, so no write can be acknowledged against a segment that does not
    /// exist on disk. Identifiers stay strictly monotonic even when two
    /// rotations land in the same millisecond.
    pub(crate) fn create_active(&mut self, now_ms: u64) -> CoreResult<SegmentId> {
        let floor = self
            .catalog
            .keys()
            .next_back()
            .copied()
            .unwrap_or(0)
            .max(self.active_id.as_u64());
        let id = if now_ms > floor {
            SegmentId::new(now_ms)
        } else {
            SegmentId::new(floor + 1)
        };
        self.store
            .write(&Self::active_name(id), b"[]")?;
        self.active_id = id;
        Ok(id)
    }

    /// Writes the four snapshots: active segment content, primary index,
    /// order index, and catalog.
    ///
    /// Each file individually lands atomically; a crash between files is the
    /// recognized inconsistency window caught by the startup checks. Does
    /// not alter in-memory state. Returns the serialized size of the active
    /// segment so the caller can evaluate rotation.
    pub(crate) fn checkpoint(&self, index: &IndexManager) -> CoreResult<u64> {
        let active = serde_json::to_vec(index.cache())?;
        let active_len = active.len() as u64;
        self.store.write(&Self::active_name(self.active_id), &active)?;
        self.store
            .write(INDEX_FILE, &serde_json::to_vec(index.primary())?)?;
        self.store
            .write(RINDEX_FILE, &serde_json::to_vec(index.order())?)?;
        self.persist_catalog()?;
        Ok(active_len)
    }

    /// Seals the active segment if a rotation threshold is met.
    ///
    /// Sealing renames the active file under the sealed prefix, records its
    /// item count in the catalog, persists the catalog, clears the cache,
    /// and starts a fresh active segment. Returns whether rotation occurred
    /// so the caller can reset the rotation clock.
    pub(crate) fn maybe_rotate(
        &mut self,
        index: &mut IndexManager,
        active_bytes: u64,
        elapsed: Duration,
        now_ms: u64,
    ) -> CoreResult<bool> {
        if index.cache_len() == 0 {
            return Ok(false);
        }
        if active_bytes < self.rotate_size_bytes && elapsed < self.rotate_age {
            return Ok(false);
        }

        let sealed_id = self.active_id;
        let item_count = index.cache_len();

        // The file must hold the full cache before it is renamed away.
        self.store.write(
            &Self::active_name(sealed_id),
            &serde_json::to_vec(index.cache())?,
        )?;
        self.store
            .rename(&Self::active_name(sealed_id), &self.sealed_name(sealed_id))?;
        self.catalog.insert(sealed_id.as_u64(), item_count);
        self.persist_catalog()?;

        index.clear_cache();
        self.create_active(now_ms)?;

        info!(
            sealed = sealed_id.as_u64(),
            items = item_count,
            active = self.active_id.as_u64(),
            "sealed segment"
        );
        Ok(true)
    }

    /// Loads one sealed segment fully into memory (read-through, no cache).
    pub(crate) fn read_sealed(&self, id: SegmentId) -> CoreResult<Vec<Value>> {
        let name = self.sealed_name(id);
        let data = self.store.read(&name).map_err(|e| match e {
            StorageError::NotFound { .. } => {
                CoreError::corrupt_state(format!("sealed segment file missing: {name}"))
            }
            other => other.into(),
        })?;
        serde_json::from_slice(&data)
            .map_err(|e| CoreError::corrupt_state(format!("unreadable sealed segment {name}: {e}")))
    }

    /// In-place point update of one slot in a sealed segment.
    ///
    /// `position_from_newest` indexes the stored newest-first array. The
    /// whole segment is rewritten atomically; sealed segments are otherwise
    /// immutable.
    pub(crate) fn update_sealed_at(
        &self,
        id: SegmentId,
        position_from_newest: usize,
        value: Value,
    ) -> CoreResult<()> {
        let mut values = self.read_sealed(id)?;
        let slot = values.get_mut(position_from_newest).ok_or_else(|| {
            CoreError::corrupt_state(format!(
                "position {position_from_newest} out of bounds for {id}"
            ))
        })?;
        *slot = value;
        self.store
            .write(&self.sealed_name(id), &serde_json::to_vec(&values)?)?;
        Ok(())
    }

    /// Loads the active segment's content from disk.
    pub(crate) fn load_active(&self) -> CoreResult<VecDeque<Value>> {
        let name = Self::active_name(self.active_id);
        let data = self.store.read(&name)?;
        serde_json::from_slice(&data)
            .map_err(|e| CoreError::corrupt_state(format!("unreadable active segment {name}: {e}")))
    }

    /// Sealed segment files actually present on disk.
    pub(crate) fn sealed_ids_on_disk(&self) -> CoreResult<Vec<SegmentId>> {
        let mut ids = Vec::new();
        for name in self.store.list()? {
            if let Some(id) = self.parse_sealed_name(&name) {
                ids.push(id);
            }
        }
        Ok(ids)
    }

    fn persist_catalog(&self) -> CoreResult<()> {
        self.store
            .write(META_FILE, &serde_json::to_vec(&self.catalog)?)?;
        Ok(())
    }

    fn active_name(id: SegmentId) -> String {
        format!("{}{}", id.as_u64(), SEGMENT_EXT)
    }

    fn sealed_name(&self, id: SegmentId) -> String {
        format!("{}{}{}", self.file_prefix, id.as_u64(), SEGMENT_EXT)
    }

    /// Parses `<millis>.json` (no prefix) into an active segment id.
    fn parse_active_name(&self, name: &str) -> Option<SegmentId> {
        if name.starts_with(&self.file_prefix) {
            return None;
        }
        let stem = name.strip_suffix(SEGMENT_EXT)?;
        stem.parse().ok().map(SegmentId::new)
    }

    /// Parses `<prefix><millis>.json` into a sealed segment id.
    fn parse_sealed_name(&self, name: &str) -> Option<SegmentId> {
        let stem = name
            .strip_prefix(&self.file_prefix)?
            .strip_suffix(SEGMENT_EXT)?;
        stem.parse().ok().map(SegmentId::new)
    }
}

impl std::fmt::Debug for SegmentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentStore")
            .field("active_id", &self.active_id)
            .field("sealed_segments", &self.catalog.len())
            .finish_non_exhaustive()
    }
}
