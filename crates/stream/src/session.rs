use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender, unbounded};
use glam::DVec3;
use lodstream_common::TilePos;
use lodstream_provider::{Tile, TilePayload};
use tracing::{debug, trace};

use crate::config::ViewerConfig;
use crate::error::StreamError;
use crate::mode::LodMode;
use crate::state::TrackingState;
use crate::tracker::Tracker;

/// Where a viewer's tiles go: usually a network connection.
pub trait SessionSink<T> {
    fn send_tile(&mut self, tile: &Arc<Tile<T>>);
    fn send_tile_unload(&mut self, pos: TilePos);
    fn send_multi_tile_unload(&mut self, positions: &[TilePos]);
}

/// Acknowledges received tiles from any thread.
#[derive(Debug, Clone)]
pub struct AckSender {
    tx: Sender<TilePos>,
}

impl AckSender {
    pub fn ack(&self, pos: TilePos) {
        // a closed session no longer cares
        let _ = self.tx.send(pos);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub queued_tiles: usize,
    pub in_flight: usize,
    pub tiles_sent: u64,
    pub unloads_sent: u64,
}

/// Tiles waiting to go out. Collects the tracker's output between flushes.
struct SendQueue<T> {
    tiles: HashMap<TilePos, Arc<Tile<T>>>,
    unloads: Vec<TilePos>,
    /// Positions the client currently holds.
    held: HashSet<TilePos>,
}

impl<T> SendQueue<T> {
    fn new() -> Self {
        Self {
            tiles: HashMap::new(),
            unloads: Vec::new(),
            held: HashSet::new(),
        }
    }

    fn unload(&mut self, pos: TilePos) {
        self.tiles.remove(&pos);
        if self.held.remove(&pos) {
            self.unloads.push(pos);
        }
    }
}

impl<T> SessionSink<T> for SendQueue<T> {
    fn send_tile(&mut self, tile: &Arc<Tile<T>>) {
        self.tiles.insert(tile.pos, Arc::clone(tile));
    }

    fn send_tile_unload(&mut self, pos: TilePos) {
        self.unload(pos);
    }

    fn send_multi_tile_unload(&mut self, positions: &[TilePos]) {
        for pos in positions {
            self.unload(*pos);
        }
    }
}

/// A viewer connection: its tracker plus an outgoing queue with flow
/// control.
///
/// Queued tiles go out nearest first, never more than `max_in_flight`
/// unacknowledged at once. A tile that is unloaded before it was sent is
/// never sent. Only the first ack of a sent tile opens the window.
pub struct Session<M: LodMode, T: TilePayload, S: SessionSink<T>> {
    tracker: Tracker<M, T>,
    sink: S,
    server: ViewerConfig,
    client: ViewerConfig,
    pending_config: Option<ViewerConfig>,
    queue: SendQueue<T>,
    max_in_flight: usize,
    /// Sent and not yet acknowledged.
    in_flight: HashSet<TilePos>,
    acks_tx: Sender<TilePos>,
    acks: Receiver<TilePos>,
    tiles_sent: u64,
    unloads_sent: u64,
}

impl<M: LodMode, T: TilePayload, S: SessionSink<T>> Session<M, T, S> {
    pub fn new(
        tracker: Tracker<M, T>,
        sink: S,
        server: ViewerConfig,
        client: ViewerConfig,
        max_in_flight: usize,
    ) -> Self {
        let (acks_tx, acks) = unbounded();
        Self {
            tracker,
            sink,
            server,
            client,
            pending_config: None,
            queue: SendQueue::new(),
            max_in_flight: max_in_flight.max(1),
            in_flight: HashSet::new(),
            acks_tx,
            acks,
            tiles_sent: 0,
            unloads_sent: 0,
        }
    }

    pub fn tracker(&self) -> &Tracker<M, T> {
        &self.tracker
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    /// The view settings in effect: the client's request capped by the
    /// server.
    pub fn effective_config(&self) -> ViewerConfig {
        ViewerConfig::merge(&self.server, &self.client)
    }

    pub fn ack_sender(&self) -> AckSender {
        AckSender {
            tx: self.acks_tx.clone(),
        }
    }

    pub fn ack(&mut self, pos: TilePos) {
        if self.in_flight.remove(&pos) {
            trace!(%pos, "tile acknowledged");
        } else {
            trace!(%pos, "ignoring ack for a tile not in flight");
        }
    }

    fn state_at(&self, position: DVec3) -> Result<TrackingState, StreamError> {
        let shift = self.tracker.mode().shift();
        Ok(TrackingState::from_config(position, &self.effective_config(), shift)?)
    }

    pub fn activate(&mut self, position: DVec3) -> Result<(), StreamError> {
        let state = self.state_at(position)?;
        self.tracker.activate(state)?;
        Ok(())
    }

    /// Moves the viewer, applying any pending config change first. Returns
    /// whether the visible set changed.
    pub fn update(&mut self, position: DVec3) -> Result<bool, StreamError> {
        if let Some(config) = self.pending_config.take() {
            debug!(viewer = %self.tracker.viewer(), ?config, "viewer config applied");
            self.client = config;
        }
        let state = self.state_at(position)?;
        Ok(self.tracker.update(state)?)
    }

    /// Records new client settings, applied on the next [`Session::update`].
    pub fn notify_config_change(&mut self, config: ViewerConfig) {
        self.pending_config = Some(config);
    }

    /// Sends what can be sent: pending unloads first, then queued tiles in
    /// view order up to the in-flight window. Returns the tiles sent.
    pub fn flush(&mut self) -> usize {
        let acked: Vec<TilePos> = self.acks.try_iter().collect();
        for pos in acked {
            self.ack(pos);
        }
        self.tracker.poll(&mut self.queue);

        match self.queue.unloads.len() {
            0 => {}
            1 => self.sink.send_tile_unload(self.queue.unloads[0]),
            _ => self.sink.send_multi_tile_unload(&self.queue.unloads),
        }
        self.unloads_sent += self.queue.unloads.len() as u64;
        self.queue.unloads.clear();

        let window = self.max_in_flight.saturating_sub(self.in_flight.len());
        if window == 0 || self.queue.tiles.is_empty() {
            return 0;
        }
        let mut next: Vec<TilePos> = self.queue.tiles.keys().copied().collect();
        if let Some(state) = self.tracker.state() {
            let order = self.tracker.mode().comparator_for(state);
            next.sort_by(|a, b| order.compare(a, b));
        } else {
            next.sort_unstable();
        }
        next.truncate(window);

        for pos in &next {
            if let Some(tile) = self.queue.tiles.remove(pos) {
                self.sink.send_tile(&tile);
                self.queue.held.insert(*pos);
                self.in_flight.insert(*pos);
            }
        }
        self.tiles_sent += next.len() as u64;
        trace!(sent = next.len(), queued = self.queue.tiles.len(), "session flushed");
        next.len()
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            queued_tiles: self.queue.tiles.len(),
            in_flight: self.in_flight.len(),
            tiles_sent: self.tiles_sent,
            unloads_sent: self.unloads_sent,
        }
    }

    /// Ends the session: the tracker is deactivated, the client told to drop
    /// everything, and the sink handed back.
    pub fn close(mut self) -> Result<S, StreamError> {
        if self.tracker.is_active() {
            self.tracker.deactivate()?;
        }
        self.flush();
        debug!(viewer = %self.tracker.viewer(), "session closed");
        Ok(self.sink)
    }
}
