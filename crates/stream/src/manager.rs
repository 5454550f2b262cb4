//! Shared, refcounted tile interest.
//!
//! Every viewer that can see a position, plus any anonymous hold on it,
//! counts as one reference. The first reference requests the tile from the
//! provider; the last one releases it, either at once or after a grace
//! period measured in [`TrackerManager::tick`] calls.
//!
//! Each reference carries its own priority; the provider is asked for the
//! most urgent one still held.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender, unbounded};
use dashmap::DashMap;
use dashmap::mapref::entry::{Entry, OccupiedEntry};
use lodstream_common::{CoordLimits, TileKey, TilePos, ViewerId};
use lodstream_provider::{Priority, Tile, TilePayload, TileProvider};
use tracing::{debug, trace, warn};

use crate::error::ManagerError;

/// A tile delivered to a viewer's inbox.
#[derive(Debug, Clone)]
pub enum Notification<T> {
    /// First tile for a position the viewer was waiting on.
    Ready(Arc<Tile<T>>),
    /// A rebuilt tile replacing one the viewer already received.
    Updated(Arc<Tile<T>>),
}

impl<T> Notification<T> {
    pub fn tile(&self) -> &Arc<Tile<T>> {
        match self {
            Notification::Ready(tile) | Notification::Updated(tile) => tile,
        }
    }
}

/// Receiving end of a viewer's notifications. Drained by its tracker.
pub struct ViewerInbox<T> {
    viewer: ViewerId,
    rx: Receiver<Notification<T>>,
}

impl<T> ViewerInbox<T> {
    pub fn viewer(&self) -> ViewerId {
        self.viewer
    }

    /// Pending notifications, without blocking.
    pub fn drain(&self) -> impl Iterator<Item = Notification<T>> + '_ {
        self.rx.try_iter()
    }
}

struct TileEntry<T> {
    pos: TilePos,
    anonymous: u32,
    /// Most urgent priority among the anonymous holds.
    hold_priority: Priority,
    viewers: HashMap<ViewerId, Priority>,
    /// Viewers not yet notified of the current tile.
    waiters: HashSet<ViewerId>,
    tile: Option<Arc<Tile<T>>>,
    /// Ticks left before an unreferenced entry is evicted.
    retained: Option<u32>,
    /// Last priority handed to the provider.
    priority: Priority,
}

impl<T> TileEntry<T> {
    fn new(pos: TilePos, tile: Option<Arc<Tile<T>>>, priority: Priority) -> Self {
        Self {
            pos,
            anonymous: 0,
            hold_priority: Priority::IDLE,
            viewers: HashMap::new(),
            waiters: HashSet::new(),
            tile,
            retained: None,
            priority,
        }
    }

    fn refcount(&self) -> u32 {
        self.anonymous + self.viewers.len() as u32
    }

    fn wanted(&self) -> Priority {
        let holds = if self.anonymous > 0 {
            self.hold_priority
        } else {
            Priority::IDLE
        };
        self.viewers.values().copied().fold(holds, Priority::min)
    }
}

pub struct TrackerManager<T: TilePayload> {
    provider: TileProvider<T>,
    entries: DashMap<TileKey, TileEntry<T>>,
    viewers: DashMap<ViewerId, Sender<Notification<T>>>,
    eviction_grace: u32,
}

impl<T: TilePayload> TrackerManager<T> {
    pub fn new(provider: TileProvider<T>, eviction_grace: u32) -> Self {
        Self {
            provider,
            entries: DashMap::new(),
            viewers: DashMap::new(),
            eviction_grace,
        }
    }

    pub fn provider(&self) -> &TileProvider<T> {
        &self.provider
    }

    pub fn limits(&self) -> &CoordLimits {
        self.provider.limits()
    }

    pub fn register_viewer(&self, viewer: ViewerId) -> Result<ViewerInbox<T>, ManagerError> {
        match self.viewers.entry(viewer) {
            Entry::Occupied(_) => Err(ManagerError::ViewerExists(viewer)),
            Entry::Vacant(slot) => {
                let (tx, rx) = unbounded();
                slot.insert(tx);
                debug!(%viewer, "viewer registered");
                Ok(ViewerInbox { viewer, rx })
            }
        }
    }

    /// Forgets `viewer`, dropping any interest it still holds. Returns the
    /// number of interests dropped.
    pub fn unregister_viewer(&self, viewer: ViewerId) -> usize {
        self.viewers.remove(&viewer);
        let leftover: Vec<TilePos> = self
            .entries
            .iter()
            .filter(|e| e.viewers.contains_key(&viewer))
            .map(|e| e.pos)
            .collect();
        for pos in &leftover {
            if let Err(e) = self.remove_interest(viewer, *pos) {
                warn!(%viewer, %pos, error = %e, "failed to drop leftover interest");
            }
        }
        debug!(%viewer, leftover = leftover.len(), "viewer unregistered");
        leftover.len()
    }

    /// Registers `viewer`'s interest in `pos`. The viewer is notified once the
    /// tile is ready, immediately if it already is.
    pub fn add_interest(&self, viewer: ViewerId, pos: TilePos, priority: Priority) -> Result<(), ManagerError> {
        let ready = {
            let mut entry = self.acquire(pos, priority)?;
            if entry.viewers.contains_key(&viewer) {
                return Err(ManagerError::DuplicateInterest { viewer, pos });
            }
            entry.viewers.insert(viewer, priority);
            self.sync_priority(&mut entry);
            match &entry.tile {
                Some(tile) => Some(Arc::clone(tile)),
                None => {
                    entry.waiters.insert(viewer);
                    None
                }
            }
        };
        if let Some(tile) = ready {
            self.notify(viewer, Notification::Ready(tile));
        }
        Ok(())
    }

    pub fn remove_interest(&self, viewer: ViewerId, pos: TilePos) -> Result<(), ManagerError> {
        let Entry::Occupied(mut slot) = self.entries.entry(pos.key()) else {
            return Err(ManagerError::NotInterested { viewer, pos });
        };
        let entry = slot.get_mut();
        if entry.viewers.remove(&viewer).is_none() {
            return Err(ManagerError::NotInterested { viewer, pos });
        }
        entry.waiters.remove(&viewer);
        if entry.refcount() == 0 {
            self.unreferenced(slot)?;
        } else {
            self.sync_priority(entry);
        }
        Ok(())
    }

    /// Changes the priority `viewer` wants `pos` produced at.
    pub fn prioritize(&self, viewer: ViewerId, pos: TilePos, priority: Priority) -> Result<(), ManagerError> {
        let mut entry = self
            .entries
            .get_mut(&pos.key())
            .ok_or(ManagerError::NotInterested { viewer, pos })?;
        let wanted = entry
            .viewers
            .get_mut(&viewer)
            .ok_or(ManagerError::NotInterested { viewer, pos })?;
        *wanted = priority;
        self.sync_priority(&mut entry);
        Ok(())
    }

    /// Holds `pos` loaded without a viewer.
    pub fn retain(&self, pos: TilePos, priority: Priority) -> Result<(), ManagerError> {
        let mut entry = self.acquire(pos, priority)?;
        entry.hold_priority = if entry.anonymous == 0 {
            priority
        } else {
            entry.hold_priority.min(priority)
        };
        entry.anonymous += 1;
        self.sync_priority(&mut entry);
        Ok(())
    }

    /// Drops one hold taken by [`TrackerManager::retain`].
    pub fn release(&self, pos: TilePos) -> Result<(), ManagerError> {
        let Entry::Occupied(mut slot) = self.entries.entry(pos.key()) else {
            return Err(ManagerError::NotRetained(pos));
        };
        let entry = slot.get_mut();
        if entry.anonymous == 0 {
            return Err(ManagerError::NotRetained(pos));
        }
        entry.anonymous -= 1;
        if entry.anonymous == 0 {
            entry.hold_priority = Priority::IDLE;
        }
        if entry.refcount() == 0 {
            self.unreferenced(slot)?;
        } else {
            self.sync_priority(entry);
        }
        Ok(())
    }

    /// Entry for a new reference to `pos`, requesting the tile on the first
    /// one. The caller must add the reference and sync the priority before
    /// dropping the guard.
    fn acquire(
        &self,
        pos: TilePos,
        priority: Priority,
    ) -> Result<dashmap::mapref::one::RefMut<'_, TileKey, TileEntry<T>>, ManagerError> {
        match self.entries.entry(pos.key()) {
            Entry::Occupied(slot) => {
                let mut entry = slot.into_ref();
                if entry.retained.take().is_some() {
                    debug!(%pos, "retained tile reused");
                }
                Ok(entry)
            }
            Entry::Vacant(slot) => {
                let tile = self.provider.request(pos, priority)?;
                debug!(%pos, ready = tile.is_some(), "tile requested");
                Ok(slot.insert(TileEntry::new(pos, tile, priority)))
            }
        }
    }

    /// Hands the provider the most urgent priority still held on `entry`.
    fn sync_priority(&self, entry: &mut TileEntry<T>) {
        let wanted = entry.wanted();
        if wanted != entry.priority {
            trace!(pos = %entry.pos, ?wanted, "tile reprioritized");
            entry.priority = wanted;
            self.provider.prioritize(entry.pos, wanted);
        }
    }

    fn unreferenced(&self, slot: OccupiedEntry<'_, TileKey, TileEntry<T>>) -> Result<(), ManagerError> {
        if self.eviction_grace > 0 {
            let pos = slot.get().pos;
            let mut entry = slot.into_ref();
            entry.retained = Some(self.eviction_grace);
            entry.waiters.clear();
            debug!(%pos, ticks = self.eviction_grace, "tile retained");
            return Ok(());
        }
        let (_, entry) = slot.remove_entry();
        assert_eq!(entry.refcount(), 0, "evicting referenced tile {}", entry.pos);
        self.provider.release(entry.pos)?;
        debug!(pos = %entry.pos, "tile evicted");
        Ok(())
    }

    /// Advances retention timers and evicts entries whose grace ran out.
    /// Returns the number evicted.
    pub fn tick(&self) -> usize {
        let mut expired = Vec::new();
        for mut entry in self.entries.iter_mut() {
            if let Some(left) = entry.retained.as_mut() {
                *left = left.saturating_sub(1);
                if *left == 0 {
                    expired.push(*entry.key());
                }
            }
        }
        let mut evicted = 0;
        for key in expired {
            let removed = self
                .entries
                .remove_if(&key, |_, e| e.retained == Some(0) && e.refcount() == 0);
            if let Some((_, entry)) = removed {
                if let Err(e) = self.provider.release(entry.pos) {
                    warn!(pos = %entry.pos, error = %e, "failed to release evicted tile");
                }
                debug!(pos = %entry.pos, "retained tile evicted");
                evicted += 1;
            }
        }
        evicted
    }

    /// Hands finished tiles to interested viewers. Tiles nobody wants any
    /// more are dropped. Returns the number of completions consumed.
    pub fn process_completions(&self) -> usize {
        let mut outgoing = Vec::new();
        let mut consumed = 0;
        for done in self.provider.completions().try_iter() {
            consumed += 1;
            let Some(mut entry) = self.entries.get_mut(&done.pos.key()) else {
                trace!(pos = %done.pos, "completion discarded");
                continue;
            };
            let first = entry.tile.is_none();
            entry.tile = Some(Arc::clone(&done.tile));
            if first {
                for viewer in entry.waiters.drain() {
                    outgoing.push((viewer, Notification::Ready(Arc::clone(&done.tile))));
                }
            } else {
                entry.waiters.clear();
                for viewer in entry.viewers.keys() {
                    outgoing.push((*viewer, Notification::Updated(Arc::clone(&done.tile))));
                }
            }
            debug!(pos = %done.pos, first, "tile ready");
        }
        for (viewer, note) in outgoing {
            self.notify(viewer, note);
        }
        consumed
    }

    fn notify(&self, viewer: ViewerId, note: Notification<T>) {
        let Some(tx) = self.viewers.get(&viewer) else {
            trace!(%viewer, "notification for unknown viewer");
            return;
        };
        if tx.send(note).is_err() {
            trace!(%viewer, "viewer inbox closed");
        }
    }

    /// Throws away every built tile and rebuilds whatever is still wanted.
    /// Interested viewers are notified again when their tiles come back.
    pub fn drop_all_tiles(&self) -> Result<usize, ManagerError> {
        for mut entry in self.entries.iter_mut() {
            entry.tile = None;
            let viewers = entry.viewers.keys().copied().collect();
            entry.waiters = viewers;
        }
        let reset = self.provider.drop_all()?;
        debug!(entries = self.entries.len(), reset, "all tiles dropped");
        Ok(reset)
    }

    /// Rebuilds the tiles at `positions` and those derived from them.
    /// Viewers receive [`Notification::Updated`] for the replacements.
    pub fn invalidate(&self, positions: &[TilePos]) -> Result<usize, ManagerError> {
        Ok(self.provider.invalidate(positions)?)
    }

    pub fn tracked_count(&self) -> usize {
        self.entries.len()
    }

    pub fn refcount(&self, pos: &TilePos) -> u32 {
        self.entries.get(&pos.key()).map_or(0, |e| e.refcount())
    }

    pub fn is_ready(&self, pos: &TilePos) -> bool {
        self.entries.get(&pos.key()).is_some_and(|e| e.tile.is_some())
    }

    pub fn is_interested(&self, viewer: ViewerId, pos: &TilePos) -> bool {
        self.entries
            .get(&pos.key())
            .is_some_and(|e| e.viewers.contains_key(&viewer))
    }
}
