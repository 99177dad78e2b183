//! Lifecycle control: startup validation, periodic flushing, shutdown.
//!
//! The engine moves through `Initializing → Running → Closing → Closed`.
//! While running, a background flush thread checkpoints every
//! `flush_interval` and evaluates the rotation decision after each
//! checkpoint. Closing cancels the thread (waiting out an in-flight
//! checkpoint), performs one final checkpoint, and is idempotent.

use crate::engine::Shared;
use crate::error::CoreResult;
use crate::index::IndexManager;
use crate::segment::SegmentStore;
use crate::types::SegmentId;
use crate::CoreError;
use parking_lot::{Condvar, Mutex};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{info, warn};

/// Lifecycle state of an engine instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Loading state from disk and running consistency checks.
    Initializing,
    /// Serving operations; the flush thread is ticking.
    Running,
    /// A close request is in flight; the final checkpoint is being written.
    Closing,
    /// The engine no longer serves operations.
    Closed,
}

/// Startup consistency checks, each fatal on failure.
///
/// Verifies that the loaded indexes, cache, catalog, and the segment files
/// actually on disk agree with each other before the engine starts serving.
pub(crate) fn verify_startup(index: &IndexManager, segments: &SegmentStore) -> CoreResult<()> {
    // Index-internal invariants: matching sizes, contiguous order keys,
    // cache length arithmetic against the catalog total.
    index.check_invariants(segments.catalog_total())?;

    let on_disk = segments.sealed_ids_on_disk()?;
    for id in &on_disk {
        if segments.item_count(*id).is_none() {
            return Err(CoreError::corrupt_state(format!(
                "sealed segment {id} exists on disk but has no catalog entry"
            )));
        }
    }
    if on_disk.len() != segments.catalog().len() {
        let missing: Vec<SegmentId> = segments
            .sealed_ids_newest_first()
            .into_iter()
            .filter(|id| !on_disk.contains(id))
            .collect();
        return Err(CoreError::corrupt_state(format!(
            "catalog references segments with no file on disk: {missing:?}"
        )));
    }

    // Each sealed file must hold exactly the item count the catalog
    // recorded for it.
    for id in segments.sealed_ids_newest_first() {
        let actual = segments.read_sealed(id)?.len();
        let recorded = segments.item_count(id).unwrap_or(0);
        if actual != recorded {
            return Err(CoreError::corrupt_state(format!(
                "{id} holds {actual} items but the catalog records {recorded}"
            )));
        }
    }

    Ok(())
}

/// Owned handle to the background flush thread.
///
/// The thread sleeps on a condition variable, so cancellation is immediate
/// and deterministic; there is no polling loop anywhere.
pub(crate) struct FlushTimer {
    stop: Arc<(Mutex<bool>, Condvar)>,
    handle: Option<JoinHandle<()>>,
}

impl FlushTimer {
    /// Spawns the flush thread.
    ///
    /// The thread holds only a weak reference to the engine internals: if
    /// the engine is dropped without a close, the thread exits on its next
    /// tick instead of keeping the engine alive.
    pub(crate) fn spawn(interval: Duration, shared: Weak<Shared>) -> CoreResult<Self> {
        let stop = Arc::new((Mutex::new(false), Condvar::new()));
        let thread_stop = Arc::clone(&stop);

        let handle = std::thread::Builder::new()
            .name("arkiv-flush".to_string())
            .spawn(move || {
                let (lock, cvar) = &*thread_stop;
                loop {
                    let mut stopped = lock.lock();
                    if *stopped {
                        break;
                    }
                    let _ = cvar.wait_for(&mut stopped, interval);
                    if *stopped {
                        break;
                    }
                    drop(stopped);

                    let Some(shared) = shared.upgrade() else {
                        break;
                    };
                    let mut core = shared.core.lock();
                    if core.state != EngineState::Running {
                        continue;
                    }
                    if let Err(e) = core.flush_tick() {
                        warn!(error = %e, "periodic checkpoint failed");
                    }
                }
            })?;

        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    /// Stops the thread and waits for it to finish.
    ///
    /// An in-flight checkpoint completes before the join returns.
    pub(crate) fn stop(mut self) {
        let (lock, cvar) = &*self.stop;
        *lock.lock() = true;
        cvar.notify_all();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Closes the engine behind a shared handle.
///
/// Cancels the flush thread first so at most the final checkpoint runs
/// after this point, then writes that checkpoint and transitions to
/// `Closed`. Safe to call any number of times from any handle.
pub(crate) fn close_shared(shared: &Shared) -> CoreResult<()> {
    let timer = shared.flusher.lock().take();
    if let Some(timer) = timer {
        timer.stop();
    }

    let mut core = shared.core.lock();
    if core.state == EngineState::Closed {
        return Ok(());
    }
    core.state = EngineState::Closing;
    let result = core.segments.checkpoint(&core.index).map(|_| ());
    core.state = EngineState::Closed;
    info!(entries = core.index.len(), "engine closed");
    result
}

/// Cloneable shutdown hook for the host application.
///
/// The engine never installs process-wide signal handlers; instead the host
/// obtains a handle via [`crate::Engine::shutdown_handle`] and wires it to
/// OS signals itself. Calling [`ShutdownHandle::shutdown`] is equivalent to
/// [`crate::Engine::close`] and is idempotent across repeated signals; once
/// the engine is gone the handle degrades to a no-op.
#[derive(Clone)]
pub struct ShutdownHandle {
    pub(crate) shared: Weak<Shared>,
}

impl ShutdownHandle {
    /// Performs a graceful close of the engine, if it is still alive.
    ///
    /// # Errors
    ///
    /// Surfaces the final checkpoint's I/O error, if any.
    pub fn shutdown(&self) -> CoreResult<()> {
        match self.shared.upgrade() {
            Some(shared) => close_shared(&shared),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for ShutdownHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownHandle").finish_non_exhaustive()
    }
}
