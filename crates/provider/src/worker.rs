use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crossbeam_channel::Sender;
use lodstream_common::TilePos;
use lodstream_persist::{TileStore, decode_tile, encode_tile};
use parking_lot::{Condvar, Mutex};

use crate::generator::ExactGenerator;
use crate::provider::Completion;
use crate::scaler::Scaler;
use crate::scheduler::{Outcome, Scheduler, Task, TaskKind};
use crate::tile::{Tile, TilePayload};

#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub generated: AtomicU64,
    pub scaled: AtomicU64,
    pub store_hits: AtomicU64,
    pub store_errors: AtomicU64,
    pub failures: AtomicU64,
}

/// State shared by the provider handle and its workers.
pub(crate) struct Shared<T: TilePayload> {
    pub sched: Mutex<Scheduler<T>>,
    pub work: Condvar,
    pub shutdown: AtomicBool,
    pub generator: Arc<dyn ExactGenerator<Tile = T>>,
    pub scaler: Arc<dyn Scaler<Tile = T>>,
    pub store: Option<Arc<dyn TileStore>>,
    pub completions: Sender<Completion<T>>,
    pub counters: Counters,
}

pub(crate) fn worker_loop<T: TilePayload>(shared: Arc<Shared<T>>, index: usize) {
    tracing::debug!(worker = index, "tile worker started");
    loop {
        let task = {
            let mut sched = shared.sched.lock();
            loop {
                if shared.shutdown.load(Ordering::Acquire) {
                    tracing::debug!(worker = index, "tile worker stopping");
                    return;
                }
                if let Some(task) = sched.pop_task() {
                    break task;
                }
                shared.work.wait(&mut sched);
            }
        };

        let span = tracing::info_span!("tile_task", pos = %task.pos, worker = index);
        let outcome = span.in_scope(|| run_task(&shared, &task));

        let published = shared.sched.lock().finish(task.key, task.epoch, outcome);
        // finishing may have made dependents runnable
        shared.work.notify_all();
        if let Some(tile) = published {
            tracing::debug!(pos = %task.pos, "tile ready");
            if shared.completions.send(Completion { pos: task.pos, tile }).is_err() {
                tracing::trace!("completion receiver dropped");
            }
        }
    }
}

fn run_task<T: TilePayload>(shared: &Shared<T>, task: &Task<T>) -> Outcome<T> {
    match &task.kind {
        TaskKind::Probe => {
            if let Some(tile) = fill(shared, task.pos) {
                return Outcome::Ready(tile);
            }
            if task.pos.level == 0 {
                Outcome::Ready(generate(shared, task.pos))
            } else {
                Outcome::NeedInputs
            }
        }
        TaskKind::Generate => Outcome::Ready(generate(shared, task.pos)),
        TaskKind::Scale(inputs) => Outcome::Ready(scale(shared, task.pos, inputs)),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}

fn failed<T: TilePayload>(shared: &Shared<T>, pos: TilePos, error: &dyn std::fmt::Display) -> Tile<T> {
    shared.counters.failures.fetch_add(1, Ordering::Relaxed);
    tracing::warn!(%pos, %error, "tile production failed, publishing placeholder");
    Tile::placeholder(pos)
}

fn generate<T: TilePayload>(shared: &Shared<T>, pos: TilePos) -> Tile<T> {
    match catch_unwind(AssertUnwindSafe(|| shared.generator.generate(pos))) {
        Ok(Ok((data, extra))) => {
            shared.counters.generated.fetch_add(1, Ordering::Relaxed);
            spill(shared, pos, extra, &data);
            Tile::generated(pos, data, extra)
        }
        Ok(Err(e)) => failed(shared, pos, &e),
        Err(panic) => failed(shared, pos, &format!("generator panicked: {}", panic_message(&*panic))),
    }
}

fn scale<T: TilePayload>(shared: &Shared<T>, pos: TilePos, inputs: &[Option<Arc<Tile<T>>>]) -> Tile<T> {
    let srcs: Vec<Option<&T>> = inputs
        .iter()
        .map(|t| t.as_deref().map(|t| &t.data))
        .collect();
    let scaled = catch_unwind(AssertUnwindSafe(|| {
        let mut data = T::default();
        let extra = shared.scaler.scale(&srcs, &mut data);
        (data, extra)
    }));
    match scaled {
        Ok((data, extra)) => {
            shared.counters.scaled.fetch_add(1, Ordering::Relaxed);
            spill(shared, pos, extra, &data);
            Tile::generated(pos, data, extra)
        }
        Err(panic) => failed(shared, pos, &format!("scaler panicked: {}", panic_message(&*panic))),
    }
}

fn fill<T: TilePayload>(shared: &Shared<T>, pos: TilePos) -> Option<Tile<T>> {
    let store = shared.store.as_ref()?;
    let bytes = match store.get(&pos) {
        Ok(Some(bytes)) => bytes,
        Ok(None) => return None,
        Err(e) => {
            shared.counters.store_errors.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(%pos, error = %e, "store read failed, regenerating");
            return None;
        }
    };
    match decode_tile::<T>(pos, &bytes) {
        Ok(record) => {
            shared.counters.store_hits.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(%pos, "tile filled from store");
            Some(Tile::generated(pos, record.data, record.extra))
        }
        Err(e) => {
            shared.counters.store_errors.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(%pos, error = %e, "stored tile unreadable, regenerating");
            None
        }
    }
}

fn spill<T: TilePayload>(shared: &Shared<T>, pos: TilePos, extra: i64, data: &T) {
    let Some(store) = shared.store.as_ref() else {
        return;
    };
    let result = encode_tile(pos, extra, data).and_then(|bytes| store.put(&pos, &bytes));
    if let Err(e) = result {
        shared.counters.store_errors.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(%pos, error = %e, "store write failed");
    }
}
