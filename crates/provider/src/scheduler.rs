//! Dependency graph of tiles being produced.
//!
//! Each wanted tile is a node. A coarse node whose store lookup misses
//! declares its inputs, creating nodes for them as needed, and waits with a
//! counter of unfinished inputs. It reaches the ready queue only once the
//! counter hits zero, so workers never wait on each other.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::Arc;

use lodstream_common::{CoordLimits, TileKey, TilePos};
use serde::{Deserialize, Serialize};

use crate::scaler::Scaler;
use crate::tile::{Tile, TilePayload};

/// Scheduling key. Lower is more urgent: finer levels first, then nearer
/// tiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Priority {
    pub level: u8,
    pub distance: u64,
}

impl Priority {
    /// Least urgent priority.
    pub const IDLE: Priority = Priority {
        level: u8::MAX,
        distance: u64::MAX,
    };

    pub const fn new(level: u8, distance: u64) -> Self {
        Self { level, distance }
    }

    /// Priority a dependency at `input_level` inherits from this node.
    pub fn for_input(&self, input_level: u8) -> Priority {
        Priority {
            level: input_level,
            distance: self.distance.saturating_mul(2),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Look in the store first.
    Probe,
    /// Produce from scratch.
    Build,
}

enum Status<T> {
    Queued,
    Waiting { remaining: usize },
    Running,
    Done(Arc<Tile<T>>),
}

struct Node<T> {
    pos: TilePos,
    external: u32,
    /// Nodes holding this one as an input; one entry per hold.
    dependents: Vec<TileKey>,
    /// Parallel to `Scaler::inputs(pos)`; `None` for inputs outside the limits.
    inputs: Vec<Option<TileKey>>,
    /// What external requesters currently ask for; ignored without any.
    requested: Priority,
    /// Most urgent of `requested` and what each dependent passes down.
    priority: Priority,
    phase: Phase,
    epoch: u64,
    status: Status<T>,
}

impl<T> Node<T> {
    fn unreferenced(&self) -> bool {
        self.external == 0 && self.dependents.is_empty()
    }

    fn done(&self) -> Option<&Arc<Tile<T>>> {
        match &self.status {
            Status::Done(tile) => Some(tile),
            _ => None,
        }
    }
}

pub(crate) enum TaskKind<T> {
    /// Try the store; level 0 falls through to generation.
    Probe,
    Generate,
    /// Inputs in `Scaler::inputs` order. Placeholders are passed as `None`.
    Scale(Vec<Option<Arc<Tile<T>>>>),
}

pub(crate) struct Task<T> {
    pub key: TileKey,
    pub pos: TilePos,
    pub epoch: u64,
    pub kind: TaskKind<T>,
}

pub(crate) enum Outcome<T> {
    Ready(Tile<T>),
    NeedInputs,
}

struct HeapEntry {
    priority: Priority,
    seq: u64,
    key: TileKey,
    epoch: u64,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    // max-heap: most urgent (lowest) priority first, then oldest
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Node counts by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerCounts {
    pub nodes: usize,
    pub queued: usize,
    pub waiting: usize,
    pub running: usize,
    pub done: usize,
}

pub(crate) struct Scheduler<T: TilePayload> {
    nodes: HashMap<TileKey, Node<T>>,
    heap: BinaryHeap<HeapEntry>,
    scaler: Arc<dyn Scaler<Tile = T>>,
    limits: CoordLimits,
    next_epoch: u64,
    next_seq: u64,
}

impl<T: TilePayload> Scheduler<T> {
    pub fn new(scaler: Arc<dyn Scaler<Tile = T>>, limits: CoordLimits) -> Self {
        Self {
            nodes: HashMap::new(),
            heap: BinaryHeap::new(),
            scaler,
            limits,
            next_epoch: 0,
            next_seq: 0,
        }
    }

    fn epoch(&mut self) -> u64 {
        self.next_epoch += 1;
        self.next_epoch
    }

    fn insert_node(&mut self, pos: TilePos, priority: Priority, external: u32, dependent: Option<TileKey>) {
        let epoch = self.epoch();
        let key = pos.key();
        self.nodes.insert(
            key,
            Node {
                pos,
                external,
                dependents: dependent.into_iter().collect(),
                inputs: Vec::new(),
                requested: if external > 0 { priority } else { Priority::IDLE },
                priority,
                phase: Phase::Probe,
                epoch,
                status: Status::Queued,
            },
        );
        self.enqueue(key);
    }

    fn enqueue(&mut self, key: TileKey) {
        let Some(node) = self.nodes.get_mut(&key) else {
            return;
        };
        node.status = Status::Queued;
        self.next_seq += 1;
        self.heap.push(HeapEntry {
            priority: node.priority,
            seq: self.next_seq,
            key,
            epoch: node.epoch,
        });
    }

    /// Adds an external request. Returns the tile if it is already done.
    pub fn request(&mut self, pos: TilePos, priority: Priority) -> Option<Arc<Tile<T>>> {
        let key = pos.key();
        match self.nodes.get_mut(&key) {
            Some(node) => {
                node.requested = if node.external == 0 {
                    priority
                } else {
                    node.requested.min(priority)
                };
                node.external += 1;
                let done = node.done().cloned();
                self.refresh(key);
                done
            }
            None => {
                tracing::trace!(%pos, ?priority, "tile requested");
                self.insert_node(pos, priority, 1, None);
                None
            }
        }
    }

    /// Replaces the priority external requesters ask for at `pos`, in either
    /// direction. No effect on positions without an external request.
    pub fn prioritize(&mut self, pos: TilePos, priority: Priority) {
        let key = pos.key();
        let Some(node) = self.nodes.get_mut(&key) else {
            return;
        };
        if node.external == 0 {
            return;
        }
        node.requested = priority;
        self.refresh(key);
    }

    /// Current scheduling priority of `pos`.
    pub fn priority(&self, pos: &TilePos) -> Option<Priority> {
        self.nodes.get(&pos.key()).map(|n| n.priority)
    }

    /// Drops an external request. Returns false if there was none.
    pub fn release(&mut self, pos: TilePos) -> bool {
        let key = pos.key();
        let Some(node) = self.nodes.get_mut(&key) else {
            return false;
        };
        if node.external == 0 {
            return false;
        }
        node.external -= 1;
        if node.unreferenced() {
            self.remove(key);
        } else if node.external == 0 {
            self.refresh(key);
        }
        true
    }

    fn remove(&mut self, key: TileKey) {
        let Some(node) = self.nodes.remove(&key) else {
            return;
        };
        tracing::trace!(pos = %node.pos, "tile node dropped");
        for input in node.inputs.into_iter().flatten() {
            self.release_dependency(input, key);
        }
    }

    fn release_dependency(&mut self, input: TileKey, parent: TileKey) {
        let Some(node) = self.nodes.get_mut(&input) else {
            return;
        };
        if let Some(i) = node.dependents.iter().position(|k| *k == parent) {
            node.dependents.swap_remove(i);
        }
        if node.unreferenced() {
            self.remove(input);
        } else {
            self.refresh(input);
        }
    }

    /// Recomputes the priority of `key` from its live holders, requeueing it
    /// and propagating to the inputs it is waiting on when it changes.
    fn refresh(&mut self, key: TileKey) {
        let Some(node) = self.nodes.get(&key) else {
            return;
        };
        let level = node.pos.level;
        let own = if node.external > 0 {
            node.requested
        } else {
            Priority::IDLE
        };
        let priority = node
            .dependents
            .iter()
            .filter_map(|d| self.nodes.get(d))
            .map(|d| d.priority.for_input(level))
            .fold(own, Priority::min);

        let Some(node) = self.nodes.get_mut(&key) else {
            return;
        };
        if node.priority == priority {
            return;
        }
        node.priority = priority;
        let inputs: Vec<TileKey> = match node.status {
            Status::Queued => {
                self.enqueue(key);
                return;
            }
            Status::Waiting { .. } => node.inputs.iter().flatten().copied().collect(),
            Status::Running | Status::Done(_) => return,
        };
        for input in inputs {
            self.refresh(input);
        }
    }

    /// Pops the most urgent runnable task, skipping stale heap entries.
    pub fn pop_task(&mut self) -> Option<Task<T>> {
        while let Some(entry) = self.heap.pop() {
            let Some(node) = self.nodes.get(&entry.key) else {
                continue;
            };
            if !matches!(node.status, Status::Queued)
                || node.epoch != entry.epoch
                || node.priority != entry.priority
            {
                continue;
            }
            let pos = node.pos;
            let kind = match (node.phase, pos.level) {
                (Phase::Probe, _) => TaskKind::Probe,
                (Phase::Build, 0) => TaskKind::Generate,
                (Phase::Build, _) => TaskKind::Scale(self.input_tiles(&node.inputs)),
            };
            let node = self.nodes.get_mut(&entry.key)?;
            node.status = Status::Running;
            return Some(Task {
                key: entry.key,
                pos,
                epoch: entry.epoch,
                kind,
            });
        }
        None
    }

    fn input_tiles(&self, inputs: &[Option<TileKey>]) -> Vec<Option<Arc<Tile<T>>>> {
        inputs
            .iter()
            .map(|key| {
                key.and_then(|k| self.nodes.get(&k))
                    .and_then(|n| n.done())
                    .filter(|t| !t.is_placeholder())
                    .cloned()
            })
            .collect()
    }

    /// Records a task's outcome. Returns the tile when it should be published
    /// to requesters; results from superseded runs are dropped.
    pub fn finish(&mut self, key: TileKey, epoch: u64, outcome: Outcome<T>) -> Option<Arc<Tile<T>>> {
        let node = self.nodes.get_mut(&key)?;
        if node.epoch != epoch || !matches!(node.status, Status::Running) {
            tracing::debug!(pos = %node.pos, "discarding superseded result");
            return None;
        }
        match outcome {
            Outcome::NeedInputs => {
                node.phase = Phase::Build;
                self.acquire_inputs(key);
                None
            }
            Outcome::Ready(tile) => {
                let tile = Arc::new(tile);
                node.status = Status::Done(Arc::clone(&tile));
                let inputs = std::mem::take(&mut node.inputs);
                let dependents = node.dependents.clone();
                let publish = node.external > 0;
                for input in inputs.into_iter().flatten() {
                    self.release_dependency(input, key);
                }
                for dependent in dependents {
                    self.input_done(dependent);
                }
                publish.then_some(tile)
            }
        }
    }

    fn input_done(&mut self, key: TileKey) {
        let Some(node) = self.nodes.get_mut(&key) else {
            return;
        };
        if let Status::Waiting { remaining } = &mut node.status {
            *remaining = remaining.saturating_sub(1);
            if *remaining == 0 {
                self.enqueue(key);
            }
        }
    }

    /// Points `key` at a fresh set of inputs and waits for the unfinished
    /// ones. Old inputs are released after the new ones are held so shared
    /// inputs survive.
    fn acquire_inputs(&mut self, key: TileKey) {
        let Some(node) = self.nodes.get(&key) else {
            return;
        };
        let (pos, priority) = (node.pos, node.priority);

        let inputs = self.scaler.inputs(pos);
        let mut keys = Vec::with_capacity(inputs.len());
        let mut remaining = 0;
        for input in inputs {
            if !self.limits.contains(&input) {
                keys.push(None);
                continue;
            }
            let ikey = input.key();
            let inherited = priority.for_input(input.level);
            match self.nodes.get_mut(&ikey) {
                Some(n) => {
                    n.dependents.push(key);
                    if n.done().is_none() {
                        remaining += 1;
                    }
                    self.refresh(ikey);
                }
                None => {
                    self.insert_node(input, inherited, 0, Some(key));
                    remaining += 1;
                }
            }
            keys.push(Some(ikey));
        }

        let Some(node) = self.nodes.get_mut(&key) else {
            return;
        };
        let old = std::mem::replace(&mut node.inputs, keys);
        if remaining == 0 {
            self.enqueue(key);
        } else {
            node.status = Status::Waiting { remaining };
        }
        for input in old.into_iter().flatten() {
            self.release_dependency(input, key);
        }
    }

    /// Rebuilds `key` from scratch, bypassing the store.
    fn reset(&mut self, key: TileKey) {
        let epoch = self.epoch();
        let Some(node) = self.nodes.get_mut(&key) else {
            return;
        };
        let was_done = node.done().is_some();
        node.epoch = epoch;
        node.phase = Phase::Build;
        let level = node.pos.level;
        let dependents = node.dependents.clone();

        if level == 0 {
            self.enqueue(key);
        } else {
            self.acquire_inputs(key);
        }
        if was_done {
            for dependent in dependents {
                if let Some(Node {
                    status: Status::Waiting { remaining },
                    ..
                }) = self.nodes.get_mut(&dependent)
                {
                    *remaining += 1;
                }
            }
        }
    }

    fn reset_in_level_order(&mut self, mut keys: Vec<TileKey>) -> usize {
        keys.sort_by_key(|k| k.pos());
        keys.dedup();
        let mut count = 0;
        for key in keys {
            if self.nodes.contains_key(&key) {
                self.reset(key);
                count += 1;
            }
        }
        count
    }

    /// Rebuilds every node at `positions` and every node depending on them
    /// through `Scaler::outputs`. Returns the number of nodes reset.
    pub fn invalidate(&mut self, positions: &[TilePos]) -> usize {
        let affected = self.affected(positions);
        let keys = affected
            .into_iter()
            .map(|p| p.key())
            .filter(|k| self.nodes.contains_key(k))
            .collect();
        self.reset_in_level_order(keys)
    }

    /// `positions` and all their `outputs` ancestors within the limits.
    pub fn affected(&self, positions: &[TilePos]) -> HashSet<TilePos> {
        let mut seen = HashSet::new();
        let mut stack: Vec<TilePos> = positions.to_vec();
        while let Some(pos) = stack.pop() {
            if !self.limits.contains(&pos) || !seen.insert(pos) {
                continue;
            }
            stack.extend(self.scaler.outputs(pos));
        }
        seen
    }

    /// Rebuilds every node. Returns the number of nodes reset.
    pub fn reset_all(&mut self) -> usize {
        let keys = self.nodes.keys().copied().collect();
        self.reset_in_level_order(keys)
    }

    pub fn counts(&self) -> SchedulerCounts {
        let mut c = SchedulerCounts {
            nodes: self.nodes.len(),
            ..Default::default()
        };
        for node in self.nodes.values() {
            match node.status {
                Status::Queued => c.queued += 1,
                Status::Waiting { .. } => c.waiting += 1,
                Status::Running => c.running += 1,
                Status::Done(_) => c.done += 1,
            }
        }
        c
    }

    pub fn tile(&self, pos: &TilePos) -> Option<Arc<Tile<T>>> {
        self.nodes.get(&pos.key()).and_then(|n| n.done().cloned())
    }

    pub fn external_count(&self, pos: &TilePos) -> u32 {
        self.nodes.get(&pos.key()).map_or(0, |n| n.external)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heightmap::{HeightmapScaler, HeightmapTile};
    use lodstream_common::{Axes, WorldBounds};

    fn scheduler() -> Scheduler<HeightmapTile> {
        let bounds = WorldBounds::centered(256, 256).unwrap();
        let limits = CoordLimits::new(&bounds, Axes::Xz, 4, 3);
        Scheduler::new(Arc::new(HeightmapScaler), limits)
    }

    fn ready(pos: TilePos) -> Outcome<HeightmapTile> {
        Outcome::Ready(Tile::generated(pos, HeightmapTile::default(), 0))
    }

    /// Run every queued task to completion, level 0 from scratch.
    fn drain(s: &mut Scheduler<HeightmapTile>) -> Vec<TilePos> {
        let mut published = Vec::new();
        while let Some(task) = s.pop_task() {
            let outcome = match task.kind {
                TaskKind::Probe if task.pos.level > 0 => Outcome::NeedInputs,
                _ => ready(task.pos),
            };
            if let Some(tile) = s.finish(task.key, task.epoch, outcome) {
                published.push(tile.pos);
            }
        }
        published
    }

    #[test]
    fn priority_order_is_level_then_distance() {
        assert!(Priority::new(0, 100) < Priority::new(1, 0));
        assert!(Priority::new(1, 2) < Priority::new(1, 3));
        assert_eq!(Priority::new(2, 5).for_input(1), Priority::new(1, 10));
    }

    #[test]
    fn pops_most_urgent_first_fifo_within_priority() {
        let mut s = scheduler();
        s.request(TilePos::xz(0, 3, 0), Priority::new(0, 3));
        s.request(TilePos::xz(0, 1, 0), Priority::new(0, 1));
        s.request(TilePos::xz(0, 2, 0), Priority::new(0, 1));
        let order: Vec<i32> = std::iter::from_fn(|| s.pop_task()).map(|t| t.pos.x).collect();
        assert_eq!(order, vec![1, 2, 3]);
    }

    #[test]
    fn coarse_tile_waits_for_inputs() {
        let mut s = scheduler();
        let parent = TilePos::xz(1, 0, 0);
        assert!(s.request(parent, Priority::new(1, 0)).is_none());

        let probe = s.pop_task().unwrap();
        assert!(matches!(probe.kind, TaskKind::Probe));
        assert!(s.finish(probe.key, probe.epoch, Outcome::NeedInputs).is_none());
        assert_eq!(s.counts().waiting, 1);
        assert_eq!(s.counts().nodes, 5);

        let published = drain(&mut s);
        assert_eq!(published, vec![parent]);
        // inputs are released once the parent is built
        assert_eq!(s.counts().nodes, 1);
        assert!(s.tile(&parent).is_some());
    }

    #[test]
    fn scale_task_receives_inputs_in_order() {
        let mut s = scheduler();
        let parent = TilePos::xz(1, 0, 0);
        s.request(parent, Priority::new(1, 0));
        let t = s.pop_task().unwrap();
        s.finish(t.key, t.epoch, Outcome::NeedInputs);
        for _ in 0..4 {
            let t = s.pop_task().unwrap();
            s.finish(t.key, t.epoch, ready(t.pos));
        }
        let t = s.pop_task().unwrap();
        let TaskKind::Scale(inputs) = t.kind else {
            panic!("expected scale task");
        };
        let got: Vec<TilePos> = inputs.iter().map(|t| t.as_ref().unwrap().pos).collect();
        assert_eq!(got, parent.children(Axes::Xz).unwrap());
    }

    #[test]
    fn inputs_outside_limits_are_empty() {
        // level 0 spans x in [-7, 7), level 1 spans [-4, 4)
        let bounds = WorldBounds::new(
            glam::I64Vec3::new(-100, 0, -100),
            glam::I64Vec3::new(100, 256, 100),
        )
        .unwrap();
        let limits = CoordLimits::new(&bounds, Axes::Xz, 4, 2);
        let mut s: Scheduler<HeightmapTile> = Scheduler::new(Arc::new(HeightmapScaler), limits);

        let edge = TilePos::xz(1, 3, 0);
        s.request(edge, Priority::new(1, 0));
        let t = s.pop_task().unwrap();
        s.finish(t.key, t.epoch, Outcome::NeedInputs);
        assert_eq!(s.counts().nodes, 3);

        for _ in 0..2 {
            let t = s.pop_task().unwrap();
            s.finish(t.key, t.epoch, ready(t.pos));
        }
        let t = s.pop_task().unwrap();
        let TaskKind::Scale(inputs) = t.kind else {
            panic!("expected scale task");
        };
        let present: Vec<bool> = inputs.iter().map(Option::is_some).collect();
        assert_eq!(present, vec![true, false, true, false]);
    }

    #[test]
    fn release_cancels_waiting_subtree() {
        let mut s = scheduler();
        let parent = TilePos::xz(2, 0, 0);
        s.request(parent, Priority::new(2, 0));
        let t = s.pop_task().unwrap();
        s.finish(t.key, t.epoch, Outcome::NeedInputs);
        assert_eq!(s.counts().nodes, 5);
        assert!(s.release(parent));
        assert_eq!(s.counts().nodes, 0);
        assert!(s.pop_task().is_none());
        assert!(!s.release(parent));
    }

    #[test]
    fn running_result_after_release_is_discarded() {
        let mut s = scheduler();
        let pos = TilePos::xz(0, 0, 0);
        s.request(pos, Priority::new(0, 0));
        let t = s.pop_task().unwrap();
        s.release(pos);
        s.request(pos, Priority::new(0, 0));
        assert!(s.finish(t.key, t.epoch, ready(pos)).is_none());
        assert_eq!(drain(&mut s), vec![pos]);
    }

    #[test]
    fn shared_input_survives_one_release() {
        let mut s = scheduler();
        let child = TilePos::xz(0, 0, 0);
        let parent = TilePos::xz(1, 0, 0);
        s.request(child, Priority::new(0, 0));
        s.request(parent, Priority::new(1, 0));
        drain(&mut s);
        assert!(s.release(parent));
        assert!(s.tile(&child).is_some());
        assert_eq!(s.external_count(&child), 1);
    }

    #[test]
    fn request_of_done_tile_returns_it() {
        let mut s = scheduler();
        let pos = TilePos::xz(0, 1, 1);
        s.request(pos, Priority::new(0, 0));
        drain(&mut s);
        assert!(s.request(pos, Priority::new(0, 0)).is_some());
        assert_eq!(s.external_count(&pos), 2);
    }

    #[test]
    fn priority_upgrade_reorders_queue() {
        let mut s = scheduler();
        s.request(TilePos::xz(0, 1, 0), Priority::new(0, 1));
        s.request(TilePos::xz(0, 9, 0), Priority::new(0, 9));
        s.request(TilePos::xz(0, 9, 0), Priority::new(0, 0));
        assert_eq!(s.pop_task().unwrap().pos.x, 9);
        assert_eq!(s.pop_task().unwrap().pos.x, 1);
        assert!(s.pop_task().is_none());
    }

    #[test]
    fn priority_can_be_lowered() {
        let mut s = scheduler();
        let near = TilePos::xz(0, 1, 0);
        s.request(near, Priority::new(0, 1));
        s.request(TilePos::xz(0, 5, 0), Priority::new(0, 5));
        s.prioritize(near, Priority::new(0, 9));
        assert_eq!(s.priority(&near), Some(Priority::new(0, 9)));
        assert_eq!(s.pop_task().unwrap().pos.x, 5);
        assert_eq!(s.pop_task().unwrap().pos.x, 1);
        assert!(s.pop_task().is_none());
    }

    #[test]
    fn input_priority_falls_back_when_dependent_goes() {
        let mut s = scheduler();
        let parent = TilePos::xz(1, 0, 0);
        let child = TilePos::xz(0, 0, 0);
        s.request(parent, Priority::new(1, 0));
        let t = s.pop_task().unwrap();
        s.finish(t.key, t.epoch, Outcome::NeedInputs);

        s.request(child, Priority::new(0, 40));
        assert_eq!(s.priority(&child), Some(Priority::new(0, 0)));
        s.request(TilePos::xz(0, 5, 5), Priority::new(0, 20));

        assert!(s.release(parent));
        assert_eq!(s.counts().nodes, 2);
        assert_eq!(s.priority(&child), Some(Priority::new(0, 40)));
        assert_eq!(s.pop_task().unwrap().pos, TilePos::xz(0, 5, 5));
        assert_eq!(s.pop_task().unwrap().pos, child);
    }

    #[test]
    fn invalidate_rebuilds_ancestors() {
        let mut s = scheduler();
        let child = TilePos::xz(0, 0, 0);
        let parent = TilePos::xz(1, 0, 0);
        s.request(child, Priority::new(0, 0));
        s.request(parent, Priority::new(1, 0));
        drain(&mut s);

        assert_eq!(s.invalidate(&[child]), 2);
        let rebuilt = drain(&mut s);
        assert!(rebuilt.contains(&child));
        assert!(rebuilt.contains(&parent));
    }

    #[test]
    fn reset_all_republishes_requested_tiles() {
        let mut s = scheduler();
        let a = TilePos::xz(0, 2, 2);
        let b = TilePos::xz(2, 0, 0);
        s.request(a, Priority::new(0, 0));
        s.request(b, Priority::new(2, 0));
        drain(&mut s);
        assert_eq!(s.reset_all(), 2);
        let mut rebuilt = drain(&mut s);
        rebuilt.sort();
        assert_eq!(rebuilt, vec![a, b]);
    }
}
