use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, unbounded};
use lodstream_common::{CoordLimits, TilePos};
use lodstream_persist::TileStore;
use parking_lot::{Condvar, Mutex};

use crate::generator::ExactGenerator;
use crate::scaler::Scaler;
use crate::scheduler::{Priority, Scheduler, SchedulerCounts};
use crate::tile::{Tile, TilePayload};
use crate::worker::{Counters, Shared, worker_loop};

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("{0} is outside the coordinate limits")]
    OutsideLimits(TilePos),
    #[error("{0} was not requested")]
    NotRequested(TilePos),
    #[error("provider has been shut down")]
    ShutDown,
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// A finished tile for a position with at least one outstanding request.
#[derive(Debug, Clone)]
pub struct Completion<T> {
    pub pos: TilePos,
    pub tile: Arc<Tile<T>>,
}

#[derive(Clone)]
pub struct ProviderOptions {
    /// Worker thread count, at least one.
    pub threads: usize,
    /// Cache consulted before producing a tile and written after.
    pub store: Option<Arc<dyn TileStore>>,
}

impl Default for ProviderOptions {
    fn default() -> Self {
        Self {
            threads: 1,
            store: None,
        }
    }
}

/// Snapshot of provider activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProviderStats {
    pub graph: SchedulerCounts,
    pub generated: u64,
    pub scaled: u64,
    pub store_hits: u64,
    pub store_errors: u64,
    pub failures: u64,
}

/// Produces tiles on a worker pool: level 0 by exact generation, coarser
/// levels by scaling finer ones.
///
/// Requests are refcounted per position. A tile is published on
/// [`TileProvider::completions`] when it finishes while still requested.
pub struct TileProvider<T: TilePayload> {
    shared: Arc<Shared<T>>,
    workers: Vec<JoinHandle<()>>,
    completions: Receiver<Completion<T>>,
    limits: CoordLimits,
}

impl<T: TilePayload> TileProvider<T> {
    pub fn new<G, S>(
        generator: G,
        scaler: S,
        limits: CoordLimits,
        options: ProviderOptions,
    ) -> Result<Self, ProviderError>
    where
        G: ExactGenerator<Tile = T>,
        S: Scaler<Tile = T>,
    {
        let scaler: Arc<dyn Scaler<Tile = T>> = Arc::new(scaler);
        let (tx, rx) = unbounded();
        let shared = Arc::new(Shared {
            sched: Mutex::new(Scheduler::new(Arc::clone(&scaler), limits.clone())),
            work: Condvar::new(),
            shutdown: AtomicBool::new(false),
            generator: Arc::new(generator),
            scaler,
            store: options.store,
            completions: tx,
            counters: Counters::default(),
        });

        let threads = options.threads.max(1);
        let mut provider = Self {
            shared,
            workers: Vec::with_capacity(threads),
            completions: rx,
            limits,
        };
        for index in 0..threads {
            let shared = Arc::clone(&provider.shared);
            let handle = std::thread::Builder::new()
                .name(format!("lodstream-gen-{index}"))
                .spawn(move || worker_loop(shared, index))?;
            provider.workers.push(handle);
        }
        tracing::info!(threads, "tile provider started");
        Ok(provider)
    }

    pub fn limits(&self) -> &CoordLimits {
        &self.limits
    }

    fn check_running(&self) -> Result<(), ProviderError> {
        if self.shared.shutdown.load(Ordering::Acquire) {
            return Err(ProviderError::ShutDown);
        }
        Ok(())
    }

    /// Adds a request for `pos`. Returns the tile immediately when it is
    /// already built; otherwise it arrives later as a [`Completion`].
    pub fn request(&self, pos: TilePos, priority: Priority) -> Result<Option<Arc<Tile<T>>>, ProviderError> {
        self.check_running()?;
        if !self.limits.contains(&pos) {
            return Err(ProviderError::OutsideLimits(pos));
        }
        let ready = self.shared.sched.lock().request(pos, priority);
        if ready.is_none() {
            self.shared.work.notify_one();
        }
        Ok(ready)
    }

    /// Sets the priority requesters of `pos` now ask for. It may be more or
    /// less urgent than before; work feeding other tiles keeps the most
    /// urgent priority among them.
    pub fn prioritize(&self, pos: TilePos, priority: Priority) {
        self.shared.sched.lock().prioritize(pos, priority);
    }

    /// Scheduling priority of `pos`, if it is in the graph.
    pub fn priority(&self, pos: &TilePos) -> Option<Priority> {
        self.shared.sched.lock().priority(pos)
    }

    /// Drops one request for `pos`. Unwanted work is cancelled; a task
    /// already running finishes and its result is discarded.
    pub fn release(&self, pos: TilePos) -> Result<(), ProviderError> {
        if self.shared.sched.lock().release(pos) {
            Ok(())
        } else {
            Err(ProviderError::NotRequested(pos))
        }
    }

    /// Rebuilds the tiles at `positions` and every tile built from them.
    /// Stored copies are removed so later requests do not see stale data.
    /// Returns the number of live tiles scheduled for rebuilding.
    pub fn invalidate(&self, positions: &[TilePos]) -> Result<usize, ProviderError> {
        self.check_running()?;
        let reset = {
            let mut sched = self.shared.sched.lock();
            if let Some(store) = &self.shared.store {
                for pos in sched.affected(positions) {
                    if let Err(e) = store.remove(&pos) {
                        tracing::warn!(%pos, error = %e, "failed to drop stored tile");
                    }
                }
            }
            sched.invalidate(positions)
        };
        tracing::debug!(positions = positions.len(), reset, "tiles invalidated");
        self.shared.work.notify_all();
        Ok(reset)
    }

    /// Discards every built tile and rebuilds everything still requested,
    /// bypassing the store.
    pub fn drop_all(&self) -> Result<usize, ProviderError> {
        self.check_running()?;
        let reset = self.shared.sched.lock().reset_all();
        tracing::info!(reset, "dropped all tiles");
        self.shared.work.notify_all();
        Ok(reset)
    }

    /// Finished tiles. Drain this from the world-update context.
    pub fn completions(&self) -> &Receiver<Completion<T>> {
        &self.completions
    }

    /// The built tile at `pos`, if it is currently held.
    pub fn tile(&self, pos: &TilePos) -> Option<Arc<Tile<T>>> {
        self.shared.sched.lock().tile(pos)
    }

    pub fn request_count(&self, pos: &TilePos) -> u32 {
        self.shared.sched.lock().external_count(pos)
    }

    pub fn stats(&self) -> ProviderStats {
        let c = &self.shared.counters;
        ProviderStats {
            graph: self.shared.sched.lock().counts(),
            generated: c.generated.load(Ordering::Relaxed),
            scaled: c.scaled.load(Ordering::Relaxed),
            store_hits: c.store_hits.load(Ordering::Relaxed),
            store_errors: c.store_errors.load(Ordering::Relaxed),
            failures: c.failures.load(Ordering::Relaxed),
        }
    }

    /// Stops the workers and waits for them. Queued work is abandoned.
    pub fn shutdown(&mut self) {
        {
            let _sched = self.shared.sched.lock();
            self.shared.shutdown.store(true, Ordering::Release);
        }
        self.shared.work.notify_all();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                tracing::warn!("tile worker panicked");
            }
        }
    }
}

impl<T: TilePayload> Drop for TileProvider<T> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
