use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use lodstream_common::{TilePos, ViewerId};
use lodstream_provider::{Tile, TilePayload};
use tracing::{debug, info_span, trace, warn};

use crate::error::TrackerError;
use crate::manager::{Notification, TrackerManager, ViewerInbox};
use crate::mode::LodMode;
use crate::session::SessionSink;
use crate::state::TrackingState;
use crate::stats::{TrackerStats, UpdateTimer};

const TIMER_HISTORY: usize = 64;

enum Outgoing<T> {
    Tile(Arc<Tile<T>>),
    Unload(TilePos),
    UnloadMany(Vec<TilePos>),
}

/// One viewer's view of the world: which tiles it should see and which it
/// has been given.
///
/// All methods run on the world-update context. Tiles arrive through the
/// viewer's inbox and reach the client only when [`Tracker::poll`] is called.
pub struct Tracker<M: LodMode, T: TilePayload> {
    viewer: ViewerId,
    mode: M,
    manager: Arc<TrackerManager<T>>,
    inbox: ViewerInbox<T>,
    state: Option<TrackingState>,
    visible: HashSet<TilePos>,
    loaded: HashMap<TilePos, Arc<Tile<T>>>,
    outbox: VecDeque<Outgoing<T>>,
    timer: UpdateTimer,
    updates: u64,
}

impl<M: LodMode, T: TilePayload> Tracker<M, T> {
    pub fn new(mode: M, manager: Arc<TrackerManager<T>>, viewer: ViewerId) -> Result<Self, TrackerError> {
        let inbox = manager.register_viewer(viewer)?;
        Ok(Self {
            viewer,
            mode,
            manager,
            inbox,
            state: None,
            visible: HashSet::new(),
            loaded: HashMap::new(),
            outbox: VecDeque::new(),
            timer: UpdateTimer::new(TIMER_HISTORY),
            updates: 0,
        })
    }

    pub fn viewer(&self) -> ViewerId {
        self.viewer
    }

    pub fn mode(&self) -> &M {
        &self.mode
    }

    pub fn manager(&self) -> &Arc<TrackerManager<T>> {
        &self.manager
    }

    pub fn state(&self) -> Option<&TrackingState> {
        self.state.as_ref()
    }

    pub fn is_active(&self) -> bool {
        self.state.is_some()
    }

    pub fn is_visible(&self, pos: &TilePos) -> bool {
        self.visible.contains(pos)
    }

    pub fn is_loaded(&self, pos: &TilePos) -> bool {
        self.loaded.contains_key(pos)
    }

    /// Starts tracking at `initial`, registering interest in every visible
    /// position, nearest first.
    pub fn activate(&mut self, initial: TrackingState) -> Result<(), TrackerError> {
        if self.state.is_some() {
            return Err(TrackerError::AlreadyActive);
        }
        let _span = info_span!("tracker_activate", viewer = %self.viewer).entered();
        let start = Instant::now();

        let mut positions = Vec::new();
        self.mode
            .all_positions(&initial, self.manager.limits(), &mut |p| positions.push(p));
        if let Err(e) = self.add_sorted(&initial, positions) {
            self.drop_interests();
            return Err(e);
        }
        self.state = Some(initial);
        self.record(start);
        debug!(visible = self.visible.len(), "tracker activated");
        Ok(())
    }

    /// Moves the viewer. Returns whether the visible set was recomputed; small
    /// moves with unchanged settings are ignored and do not replace the
    /// stored state.
    ///
    /// On error the tracker is left as it was before the call.
    pub fn update(&mut self, new: TrackingState) -> Result<bool, TrackerError> {
        let Some(old) = self.state else {
            return Err(TrackerError::Inactive);
        };
        if !self.mode.should_trigger_update(&old, &new) {
            return Ok(false);
        }
        let _span = info_span!("tracker_update", viewer = %self.viewer).entered();
        let start = Instant::now();

        let (mut added, mut removed) = (Vec::new(), Vec::new());
        self.mode
            .delta_positions(&old, &new, self.manager.limits(), &mut added, &mut removed);

        let mut dropped = Vec::with_capacity(removed.len());
        if let Err(e) = self.apply_delta(&new, &added, &removed, &mut dropped) {
            self.roll_back(&old, &added, &dropped);
            return Err(e);
        }
        self.state = Some(new);
        for pos in &removed {
            if self.loaded.remove(pos).is_some() {
                self.outbox.push_back(Outgoing::Unload(*pos));
            }
        }
        self.reprioritize(&new, &added);

        self.record(start);
        trace!(added = added.len(), removed = removed.len(), "tracker updated");
        Ok(true)
    }

    /// Stops tracking. Every visible position is released and delivered
    /// tiles are unloaded with a single event.
    pub fn deactivate(&mut self) -> Result<(), TrackerError> {
        if self.state.take().is_none() {
            return Err(TrackerError::Inactive);
        }
        let _span = info_span!("tracker_deactivate", viewer = %self.viewer).entered();
        self.drop_interests();
        let mut unloaded: Vec<TilePos> = self.loaded.drain().map(|(pos, _)| pos).collect();
        if !unloaded.is_empty() {
            unloaded.sort_unstable();
            self.outbox.push_back(Outgoing::UnloadMany(unloaded));
        }
        debug!("tracker deactivated");
        Ok(())
    }

    /// Takes delivered tiles from the inbox and forwards them, along with
    /// pending unloads, to `sink`. Tiles for positions no longer visible are
    /// dropped. Returns the number of events forwarded.
    pub fn poll(&mut self, sink: &mut impl SessionSink<T>) -> usize {
        for note in self.inbox.drain() {
            let tile = note.tile();
            if !self.visible.contains(&tile.pos) {
                trace!(pos = %tile.pos, "stale tile dropped");
                continue;
            }
            if let Notification::Updated(_) = &note {
                trace!(pos = %tile.pos, "tile replaced");
            }
            self.loaded.insert(tile.pos, Arc::clone(tile));
            self.outbox.push_back(Outgoing::Tile(Arc::clone(tile)));
        }

        let forwarded = self.outbox.len();
        for out in self.outbox.drain(..) {
            match out {
                Outgoing::Tile(tile) => sink.send_tile(&tile),
                Outgoing::Unload(pos) => sink.send_tile_unload(pos),
                Outgoing::UnloadMany(positions) => sink.send_multi_tile_unload(&positions),
            }
        }
        forwarded
    }

    pub fn stats(&self) -> TrackerStats {
        let visible = self.visible.len();
        let loaded = self.loaded.len();
        TrackerStats {
            visible,
            loaded,
            waiting: visible.saturating_sub(loaded),
            updates: self.updates,
            last_update: self.timer.last(),
            average_update: self.timer.average(),
            max_update: self.timer.max(),
        }
    }

    fn add_sorted(&mut self, state: &TrackingState, mut positions: Vec<TilePos>) -> Result<(), TrackerError> {
        let order = self.mode.comparator_for(state);
        positions.sort_by(|a, b| order.compare(a, b));
        for pos in positions {
            self.manager.add_interest(self.viewer, pos, order.priority(&pos))?;
            self.visible.insert(pos);
        }
        Ok(())
    }

    fn apply_delta(
        &mut self,
        new: &TrackingState,
        added: &[TilePos],
        removed: &[TilePos],
        dropped: &mut Vec<TilePos>,
    ) -> Result<(), TrackerError> {
        for pos in removed {
            self.manager.remove_interest(self.viewer, *pos)?;
            self.visible.remove(pos);
            dropped.push(*pos);
        }
        self.add_sorted(new, added.to_vec())
    }

    /// Undoes a partly applied delta so `visible` matches `old` again.
    fn roll_back(&mut self, old: &TrackingState, added: &[TilePos], dropped: &[TilePos]) {
        for pos in added {
            if self.visible.remove(pos) {
                if let Err(e) = self.manager.remove_interest(self.viewer, *pos) {
                    warn!(viewer = %self.viewer, %pos, error = %e, "failed to undo interest");
                }
            }
        }
        let order = self.mode.comparator_for(old);
        for pos in dropped {
            match self.manager.add_interest(self.viewer, *pos, order.priority(pos)) {
                Ok(()) => {
                    self.visible.insert(*pos);
                }
                Err(e) => warn!(viewer = %self.viewer, %pos, error = %e, "failed to restore interest"),
            }
        }
        debug!(added = added.len(), dropped = dropped.len(), "tracker update rolled back");
    }

    /// Re-ranks positions still waiting for a tile against the new position.
    fn reprioritize(&self, new: &TrackingState, added: &[TilePos]) {
        let fresh: HashSet<TilePos> = added.iter().copied().collect();
        let order = self.mode.comparator_for(new);
        for pos in &self.visible {
            if self.loaded.contains_key(pos) || fresh.contains(pos) {
                continue;
            }
            if let Err(e) = self.manager.prioritize(self.viewer, *pos, order.priority(pos)) {
                warn!(viewer = %self.viewer, %pos, error = %e, "failed to reprioritize");
            }
        }
    }

    fn drop_interests(&mut self) {
        for pos in self.visible.drain() {
            if let Err(e) = self.manager.remove_interest(self.viewer, pos) {
                warn!(viewer = %self.viewer, %pos, error = %e, "failed to drop interest");
            }
        }
    }

    fn record(&mut self, start: Instant) {
        self.timer.record(start.elapsed());
        self.updates += 1;
    }
}

impl<M: LodMode, T: TilePayload> Drop for Tracker<M, T> {
    fn drop(&mut self) {
        self.visible.clear();
        self.manager.unregister_viewer(self.viewer);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::error::ManagerError;
    use crate::mode::Heightmap;
    use glam::DVec3;
    use lodstream_common::{Axes, CoordLimits, WorldBounds};
    use lodstream_provider::{
        FnGenerator, GenerateError, HEIGHTMAP_SHIFT, HeightmapScaler, HeightmapTile, Priority,
        ProviderOptions, TileProvider,
    };

    #[derive(Default)]
    struct Recorder {
        tiles: Vec<TilePos>,
        unloads: Vec<TilePos>,
        multi: Vec<Vec<TilePos>>,
    }

    impl SessionSink<HeightmapTile> for Recorder {
        fn send_tile(&mut self, tile: &Arc<Tile<HeightmapTile>>) {
            self.tiles.push(tile.pos);
        }

        fn send_tile_unload(&mut self, pos: TilePos) {
            self.unloads.push(pos);
        }

        fn send_multi_tile_unload(&mut self, positions: &[TilePos]) {
            self.multi.push(positions.to_vec());
        }
    }

    fn manager() -> Arc<TrackerManager<HeightmapTile>> {
        let bounds = WorldBounds::centered(4096, 256).unwrap();
        let limits = CoordLimits::new(&bounds, Axes::Xz, HEIGHTMAP_SHIFT, 3);
        let generator = FnGenerator::new(|_pos| Ok::<_, GenerateError>((HeightmapTile::default(), 0)));
        let options = ProviderOptions {
            threads: 2,
            store: None,
        };
        let provider = TileProvider::new(generator, HeightmapScaler, limits, options).unwrap();
        Arc::new(TrackerManager::new(provider, 0))
    }

    fn at(x: f64, z: f64) -> TrackingState {
        TrackingState::new(DVec3::new(x, 64.0, z), 2, 0, 1).unwrap()
    }

    fn settle(tracker: &mut Tracker<Heightmap, HeightmapTile>, sink: &mut Recorder) {
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            tracker.manager().process_completions();
            tracker.poll(sink);
            if tracker.stats().waiting == 0 {
                return;
            }
            assert!(Instant::now() < deadline, "tiles never arrived");
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn lifecycle_errors() {
        let m = manager();
        let mut t = Tracker::new(Heightmap::default(), Arc::clone(&m), ViewerId::new()).unwrap();
        assert!(matches!(t.update(at(0.0, 0.0)), Err(TrackerError::Inactive)));
        assert!(matches!(t.deactivate(), Err(TrackerError::Inactive)));
        t.activate(at(0.0, 0.0)).unwrap();
        assert!(matches!(t.activate(at(0.0, 0.0)), Err(TrackerError::AlreadyActive)));
        t.deactivate().unwrap();
        assert!(matches!(t.deactivate(), Err(TrackerError::Inactive)));
    }

    #[test]
    fn activation_registers_window() {
        let m = manager();
        let mut t = Tracker::new(Heightmap::default(), Arc::clone(&m), ViewerId::new()).unwrap();
        t.activate(at(0.0, 0.0)).unwrap();
        assert_eq!(t.stats().visible, 25);
        assert_eq!(m.tracked_count(), 25);

        let mut sink = Recorder::default();
        settle(&mut t, &mut sink);
        assert_eq!(sink.tiles.len(), 25);
        assert!(t.is_loaded(&TilePos::xz(0, -2, 2)));
    }

    #[test]
    fn small_moves_do_not_replace_state() {
        let m = manager();
        let mut t = Tracker::new(Heightmap::default(), m, ViewerId::new()).unwrap();
        t.activate(at(0.0, 0.0)).unwrap();
        assert!(!t.update(at(5.0, 5.0)).unwrap());
        assert!(!t.update(at(-5.0, 5.0)).unwrap());
        assert_eq!(t.state().unwrap().x, 0.0);
        assert!(t.update(at(17.0, 0.0)).unwrap());
        assert_eq!(t.state().unwrap().x, 17.0);
    }

    #[test]
    fn moving_unloads_delivered_tiles() {
        let m = manager();
        let mut t = Tracker::new(Heightmap::default(), Arc::clone(&m), ViewerId::new()).unwrap();
        let mut sink = Recorder::default();
        t.activate(at(0.0, 0.0)).unwrap();
        settle(&mut t, &mut sink);

        assert!(t.update(at(17.0, 0.0)).unwrap());
        settle(&mut t, &mut sink);
        sink.unloads.sort_unstable();
        assert_eq!(sink.unloads, (-2..=2).map(|z| TilePos::xz(0, -2, z)).collect::<Vec<_>>());
        assert_eq!(sink.tiles.len(), 30);
        assert!(t.is_loaded(&TilePos::xz(0, 3, 0)));
        assert!(!t.is_visible(&TilePos::xz(0, -2, 0)));
        assert_eq!(m.refcount(&TilePos::xz(0, -2, 0)), 0);
    }

    #[test]
    fn failed_update_leaves_tracker_unchanged() {
        let m = manager();
        let viewer = ViewerId::new();
        let mut t = Tracker::new(Heightmap::default(), Arc::clone(&m), viewer).unwrap();
        t.activate(at(0.0, 0.0)).unwrap();
        let before: Vec<TilePos> = (-2..=2)
            .flat_map(|x| (-2..=2).map(move |z| TilePos::xz(0, x, z)))
            .collect();

        // an interest the tracker does not know about makes the move fail
        // after some of the new column was added
        let blocker = TilePos::xz(0, 3, 1);
        m.add_interest(viewer, blocker, Priority::new(0, 0)).unwrap();
        assert!(matches!(
            t.update(at(17.0, 0.0)),
            Err(TrackerError::Manager(ManagerError::DuplicateInterest { .. }))
        ));
        assert_eq!(t.state().unwrap().x, 0.0);
        assert_eq!(t.stats().visible, 25);
        for pos in &before {
            assert!(t.is_visible(pos), "{pos} lost");
            assert!(m.is_interested(viewer, pos), "{pos} released");
        }
        assert!(!m.is_interested(viewer, &TilePos::xz(0, 3, 0)));
        assert_eq!(m.tracked_count(), 26);

        m.remove_interest(viewer, blocker).unwrap();
        assert!(t.update(at(17.0, 0.0)).unwrap());
        assert_eq!(t.stats().visible, 25);
        assert!(t.is_visible(&blocker));
        assert!(!t.is_visible(&TilePos::xz(0, -2, 0)));
        assert_eq!(m.tracked_count(), 25);
    }

    #[test]
    fn pending_tiles_follow_the_viewer() {
        let (generated_tx, generated) = crossbeam_channel::unbounded();
        let (gate, gate_rx) = crossbeam_channel::bounded::<()>(0);
        // the first tile blocks the only worker until the gate closes
        let generator = FnGenerator::new(move |pos: TilePos| {
            let _ = generated_tx.send(pos);
            let _ = gate_rx.recv();
            Ok::<_, GenerateError>((HeightmapTile::default(), 0))
        });
        let bounds = WorldBounds::centered(4096, 256).unwrap();
        let limits = CoordLimits::new(&bounds, Axes::Xz, HEIGHTMAP_SHIFT, 3);
        let provider =
            TileProvider::new(generator, HeightmapScaler, limits, ProviderOptions::default()).unwrap();
        let m = Arc::new(TrackerManager::new(provider, 0));
        let mut t = Tracker::new(Heightmap::default(), Arc::clone(&m), ViewerId::new()).unwrap();

        t.activate(at(0.0, 0.0)).unwrap();
        let timeout = Duration::from_secs(10);
        assert_eq!(generated.recv_timeout(timeout).unwrap(), TilePos::xz(0, 0, 0));

        // two tiles east: x = 2 was at the edge and is now the nearest
        assert!(t.update(at(32.0, 0.0)).unwrap());
        assert_eq!(
            m.provider().priority(&TilePos::xz(0, 2, 0)),
            Some(Priority::new(0, 0))
        );
        assert_eq!(
            m.provider().priority(&TilePos::xz(0, 0, 2)),
            Some(Priority::new(0, 4))
        );
        drop(gate);
        assert_eq!(generated.recv_timeout(timeout).unwrap(), TilePos::xz(0, 2, 0));
    }

    #[test]
    fn deactivate_sends_one_multi_unload() {
        let m = manager();
        let mut t = Tracker::new(Heightmap::default(), Arc::clone(&m), ViewerId::new()).unwrap();
        let mut sink = Recorder::default();
        t.activate(at(0.0, 0.0)).unwrap();
        settle(&mut t, &mut sink);

        t.deactivate().unwrap();
        t.poll(&mut sink);
        assert_eq!(sink.multi.len(), 1);
        assert_eq!(sink.multi[0].len(), 25);
        assert_eq!(m.tracked_count(), 0);
    }

    #[test]
    fn stale_notifications_are_dropped() {
        let m = manager();
        let mut t = Tracker::new(Heightmap::default(), Arc::clone(&m), ViewerId::new()).unwrap();
        let mut sink = Recorder::default();
        t.activate(at(0.0, 0.0)).unwrap();
        // move far away before any tile is delivered
        assert!(t.update(at(800.0, 800.0)).unwrap());
        settle(&mut t, &mut sink);
        assert!(sink.tiles.iter().all(|p| p.x >= 48 && p.z >= 48));
        assert!(sink.unloads.is_empty());
    }

    #[test]
    fn drop_unregisters_viewer() {
        let m = manager();
        let viewer = ViewerId::new();
        {
            let mut t = Tracker::new(Heightmap::default(), Arc::clone(&m), viewer).unwrap();
            t.activate(at(0.0, 0.0)).unwrap();
        }
        assert_eq!(m.tracked_count(), 0);
        assert!(Tracker::new(Heightmap::default(), m, viewer).is_ok());
    }
}
