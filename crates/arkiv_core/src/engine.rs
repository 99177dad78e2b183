//! Engine facade: the public entry point tying the components together.
//!
//! ## Concurrency model
//!
//! One blocking mutex around the engine core serializes every operation:
//! `put`, `get`, range queries, `scan`/`filter`, checkpoint, and rotation.
//! Callers suspend until the lock is released - a checkpoint in flight
//! stalls operations for its (bounded, local-disk) duration, and there is
//! no lock timeout. The background flush thread and the close path contend
//! for the same lock.

use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::index::IndexManager;
use crate::lifecycle::{self, EngineState, FlushTimer, ShutdownHandle};
use crate::segment::{SegmentStore, INDEX_FILE, RINDEX_FILE};
use crate::types::{now_ms, Location};
use arkiv_storage::{DirStore, SnapshotStore, StorageError};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Engine internals guarded by the exclusion lock.
pub(crate) struct Core {
    pub(crate) config: Config,
    pub(crate) index: IndexManager,
    pub(crate) segments: SegmentStore,
    pub(crate) state: EngineState,
    /// Rotation clock: reset whenever a segment is sealed.
    pub(crate) last_rotation: Instant,
}

impl Core {
    pub(crate) fn ensure_running(&self) -> CoreResult<()> {
        match self.state {
            EngineState::Running => Ok(()),
            _ => Err(CoreError::EngineClosed),
        }
    }

    /// Rejects keys with the wrong shape before any state is touched.
    pub(crate) fn validate_key(&self, key: &str) -> CoreResult<()> {
        if key.is_empty() {
            return Err(CoreError::invalid_key("key must not be empty"));
        }
        if key.len() > self.config.max_key_size_bytes {
            return Err(CoreError::invalid_key(format!(
                "key is {} bytes, limit is {}",
                key.len(),
                self.config.max_key_size_bytes
            )));
        }
        Ok(())
    }

    /// Inserts or overwrites one key.
    ///
    /// New keys get the next sequence number, the current active segment,
    /// and the current timestamp, and land at the front of the cache.
    /// Existing keys keep seq, segment, and created_at; only the value is
    /// replaced - in the cache if still resident, else in place inside the
    /// owning sealed segment.
    pub(crate) fn put_value(&mut self, key: &str, value: Value) -> CoreResult<()> {
        self.validate_key(key)?;
        let serialized = serde_json::to_vec(&value)
            .map_err(|e| CoreError::invalid_value(format!("value is not serializable: {e}")))?;
        if serialized.len() > self.config.max_value_size_bytes {
            return Err(CoreError::invalid_value(format!(
                "value serializes to {} bytes, limit is {}",
                serialized.len(),
                self.config.max_value_size_bytes
            )));
        }

        match self.index.locate(key).copied() {
            Some(loc) => self.overwrite(loc, value),
            None => {
                self.index
                    .insert_new(key.to_string(), value, self.segments.active_id(), now_ms());
                Ok(())
            }
        }
    }

    /// Overwrites the value at an existing location.
    fn overwrite(&mut self, loc: Location, value: Value) -> CoreResult<()> {
        if let Some(pos) = self.index.cache_offset(loc.seq) {
            self.index.overwrite_cached(pos, value);
            return Ok(());
        }

        let segment_len = self.segments.item_count(loc.segment_id).ok_or_else(|| {
            CoreError::corrupt_state(format!(
                "{} points at {} which has no catalog entry",
                loc.seq, loc.segment_id
            ))
        })?;
        let pos = self.sealed_position(loc.seq, loc.segment_id, segment_len)?;
        self.segments.update_sealed_at(loc.segment_id, pos, value)
    }

    /// Writes the four snapshots; in-memory state is untouched.
    ///
    /// Returns the serialized active segment size for the rotation
    /// decision. A failure leaves in-memory state as-is; the next attempt
    /// retries with current state.
    pub(crate) fn checkpoint(&mut self) -> CoreResult<u64> {
        let active_bytes = self.segments.checkpoint(&self.index)?;
        debug!(
            active_bytes,
            entries = self.index.len(),
            cached = self.index.cache_len(),
            "checkpoint written"
        );
        Ok(active_bytes)
    }

    /// One flush-thread tick: checkpoint, then the rotation decision.
    pub(crate) fn flush_tick(&mut self) -> CoreResult<()> {
        let active_bytes = self.checkpoint()?;
        let elapsed = self.last_rotation.elapsed();
        if self
            .segments
            .maybe_rotate(&mut self.index, active_bytes, elapsed, now_ms())?
        {
            self.last_rotation = Instant::now();
        }
        Ok(())
    }
}

/// State shared between the engine handle, the flush thread, and shutdown
/// handles.
pub(crate) struct Shared {
    pub(crate) core: Mutex<Core>,
    pub(crate) flusher: Mutex<Option<FlushTimer>>,
}

/// The embedded storage engine.
///
/// Recent writes stay in an in-memory cache; a background thread
/// checkpoints them periodically and archives full segments into immutable
/// files. See the crate docs for a usage example.
pub struct Engine {
    shared: Arc<Shared>,
}

impl Engine {
    /// Opens or creates an engine at `config.database_path`.
    ///
    /// # Errors
    ///
    /// - [`CoreError::InvalidConfig`] if an option is out of range
    /// - [`CoreError::Storage`] if another process holds the directory lock
    /// - [`CoreError::CorruptState`] if a startup consistency check fails
    pub fn open(config: Config) -> CoreResult<Self> {
        config.validate()?;
        let store = Arc::new(DirStore::open(&config.database_path)?);
        Self::open_with_store(config, store)
    }

    /// Opens an engine against a pre-built snapshot store.
    ///
    /// This is the lower-level constructor used with
    /// [`arkiv_storage::MemoryStore`] for tests and ephemeral engines; for
    /// most use cases prefer [`Engine::open`].
    pub fn open_with_store(config: Config, store: Arc<dyn SnapshotStore>) -> CoreResult<Self> {
        config.validate()?;

        let segments = SegmentStore::open(Arc::clone(&store), &config, now_ms())?;
        let primary = load_snapshot::<BTreeMap<String, Location>>(&*store, INDEX_FILE)?;
        let order = load_snapshot::<BTreeMap<u64, String>>(&*store, RINDEX_FILE)?;
        let cache = segments.load_active()?;
        let index = IndexManager::from_parts(primary, order, cache);

        let mut core = Core {
            config,
            index,
            segments,
            state: EngineState::Initializing,
            last_rotation: Instant::now(),
        };
        lifecycle::verify_startup(&core.index, &core.segments)?;
        core.state = EngineState::Running;

        info!(
            entries = core.index.len(),
            cached = core.index.cache_len(),
            sealed = core.segments.catalog().len(),
            "engine opened"
        );

        let flush_interval = core.config.flush_interval;
        let shared = Arc::new(Shared {
            core: Mutex::new(core),
            flusher: Mutex::new(None),
        });
        let timer = FlushTimer::spawn(flush_interval, Arc::downgrade(&shared))?;
        *shared.flusher.lock() = Some(timer);

        Ok(Self { shared })
    }

    /// Inserts or overwrites a key.
    ///
    /// Re-inserting an existing key replaces its value in place without
    /// changing its sequence number, segment, or insertion timestamp.
    ///
    /// # Errors
    ///
    /// [`CoreError::InvalidKey`] or [`CoreError::InvalidValue`] on
    /// validation failure (no state is mutated), [`CoreError::EngineClosed`]
    /// after close.
    pub fn put(&self, key: &str, value: Value) -> CoreResult<()> {
        let mut core = self.shared.core.lock();
        core.ensure_running()?;
        core.put_value(key, value)
    }

    /// Looks up a key, transparently loading its sealed segment if the
    /// entry has been archived.
    pub fn get(&self, key: &str) -> CoreResult<Option<Value>> {
        let core = self.shared.core.lock();
        core.ensure_running()?;
        core.get_value(key)
    }

    /// Values in logical positions `[start, end)`, newest first.
    ///
    /// Position 0 is the most recent insertion overall; `end` is clamped to
    /// [`Engine::index_size`]; `start >= end` yields an empty result.
    pub fn range_by_position(&self, start: usize, end: usize) -> CoreResult<Vec<Value>> {
        let core = self.shared.core.lock();
        core.ensure_running()?;
        core.range_by_position(start, end)
    }

    /// Values inserted within `[t0, t1)` (Unix millis), newest first.
    pub fn range_by_time(&self, t0: u64, t1: u64) -> CoreResult<Vec<Value>> {
        let core = self.shared.core.lock();
        core.ensure_running()?;
        core.range_by_time(t0, t1)
    }

    /// Applies each visitor to the cache content, then to each sealed
    /// segment newest-first, visiting at most `limit` values in total.
    ///
    /// Visitors receive shared slices and cannot mutate the engine.
    pub fn scan(
        &self,
        visitors: &mut [&mut dyn FnMut(&[Value])],
        limit: usize,
    ) -> CoreResult<()> {
        let core = self.shared.core.lock();
        core.ensure_running()?;
        core.scan_batches(visitors, limit)
    }

    /// Selects values matching `predicate` in newest-first traversal
    /// order, examining at most `limit` values.
    pub fn filter<P>(&self, predicate: P, limit: usize) -> CoreResult<Vec<Value>>
    where
        P: Fn(&Value) -> bool,
    {
        let core = self.shared.core.lock();
        core.ensure_running()?;
        core.filter_values(&predicate, limit)
    }

    /// Number of distinct keys ever inserted.
    pub fn index_size(&self) -> usize {
        self.shared.core.lock().index.len()
    }

    /// Number of values still resident in the active cache.
    pub fn cache_size(&self) -> usize {
        self.shared.core.lock().index.cache_len()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> EngineState {
        self.shared.core.lock().state
    }

    /// Writes a full durable snapshot of the active segment, both indexes,
    /// and the catalog. Does not rotate.
    ///
    /// # Errors
    ///
    /// Surfaces the underlying I/O failure; in-memory state is untouched
    /// and the next checkpoint retries with current state.
    pub fn checkpoint(&self) -> CoreResult<()> {
        let mut core = self.shared.core.lock();
        core.ensure_running()?;
        core.checkpoint().map(|_| ())
    }

    /// Returns a cloneable handle the host can wire to OS signals.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Closes the engine: cancels the flush thread, writes one final
    /// checkpoint, and transitions to `Closed`. Idempotent.
    pub fn close(&self) -> CoreResult<()> {
        lifecycle::close_shared(&self.shared)
    }

    /// Seals the active segment unconditionally. Test hook.
    #[cfg(test)]
    pub(crate) fn force_rotate(&self) -> CoreResult<bool> {
        let mut core = self.shared.core.lock();
        core.ensure_running()?;
        let core = &mut *core;
        let rotated =
            core.segments
                .maybe_rotate(&mut core.index, u64::MAX, std::time::Duration::ZERO, now_ms())?;
        if rotated {
            core.last_rotation = Instant::now();
        }
        Ok(rotated)
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let core = self.shared.core.lock();
        f.debug_struct("Engine")
            .field("state", &core.state)
            .field("entries", &core.index.len())
            .field("cached", &core.index.cache_len())
            .finish_non_exhaustive()
    }
}

/// Loads a JSON snapshot, treating an absent file as empty state.
fn load_snapshot<T>(store: &dyn SnapshotStore, name: &str) -> CoreResult<T>
where
    T: serde::de::DeserializeOwned + Default,
{
    match store.read(name) {
        Ok(data) => serde_json::from_slice(&data)
            .map_err(|e| CoreError::corrupt_state(format!("unreadable snapshot {name}: {e}"))),
        Err(StorageError::NotFound { .. }) => Ok(T::default()),
        Err(e) => Err(e.into()),
    }
}
