use std::sync::Arc;

use lodstream_common::{CoordLimits, ViewerId, WorldBounds};
use lodstream_persist::TileStore;
use lodstream_provider::{ExactGenerator, ProviderOptions, Scaler, TilePayload, TileProvider};
use tracing::{info, trace};

use crate::config::{StreamConfig, ViewerConfig};
use crate::error::StreamError;
use crate::manager::TrackerManager;
use crate::mode::LodMode;
use crate::session::{Session, SessionSink};
use crate::tracker::Tracker;

/// Work done by one [`LodServer::tick`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub completions: usize,
    pub evicted: usize,
}

/// Entry point for one LOD mode of one world.
///
/// Nothing can be streamed until the world's bounds are known; after
/// [`LodServer::resolve_bounds`] the coordinate limits are fixed for the
/// server's lifetime.
pub struct LodServer<M: LodMode, T: TilePayload> {
    mode: M,
    config: StreamConfig,
    manager: Option<Arc<TrackerManager<T>>>,
}

impl<M: LodMode, T: TilePayload> LodServer<M, T> {
    pub fn new(mode: M, config: StreamConfig) -> Result<Self, StreamError> {
        config.validate()?;
        Ok(Self {
            mode,
            config,
            manager: None,
        })
    }

    pub fn mode(&self) -> &M {
        &self.mode
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub fn is_resolved(&self) -> bool {
        self.manager.is_some()
    }

    /// Fixes the world bounds and starts tile production.
    pub fn resolve_bounds<G, S>(
        &mut self,
        bounds: &WorldBounds,
        generator: G,
        scaler: S,
        store: Option<Arc<dyn TileStore>>,
    ) -> Result<&Arc<TrackerManager<T>>, StreamError>
    where
        G: ExactGenerator<Tile = T>,
        S: Scaler<Tile = T>,
    {
        if self.manager.is_some() {
            return Err(StreamError::BoundsAlreadyResolved);
        }
        if scaler.axes() != self.mode.axes() {
            return Err(StreamError::InvalidConfig(format!(
                "scaler axes {:?} do not match {} mode",
                scaler.axes(),
                self.mode.name()
            )));
        }
        let limits = CoordLimits::new(bounds, self.mode.axes(), self.mode.shift(), self.config.max_levels);
        let options = ProviderOptions {
            threads: self.config.generation_threads,
            store,
        };
        let provider = TileProvider::new(generator, scaler, limits, options)?;
        info!(
            mode = self.mode.name(),
            levels = self.config.max_levels,
            min = ?bounds.min,
            max = ?bounds.max,
            "world bounds resolved"
        );
        self.manager = Some(Arc::new(TrackerManager::new(provider, self.config.eviction_grace)));
        self.manager()
    }

    pub fn manager(&self) -> Result<&Arc<TrackerManager<T>>, StreamError> {
        self.manager.as_ref().ok_or(StreamError::BoundsUnresolved)
    }

    /// A session for a newly connected viewer. The client's settings are
    /// capped by the server's.
    pub fn open_session<S: SessionSink<T>>(
        &self,
        viewer: ViewerId,
        sink: S,
        client: ViewerConfig,
    ) -> Result<Session<M, T, S>, StreamError> {
        let manager = Arc::clone(self.manager()?);
        let tracker = Tracker::new(self.mode.clone(), manager, viewer)?;
        Ok(Session::new(
            tracker,
            sink,
            self.config.viewer_limits(),
            client,
            self.config.max_in_flight,
        ))
    }

    /// Delivers finished tiles and advances eviction timers. Call once per
    /// world update, before flushing sessions.
    pub fn tick(&self) -> TickReport {
        let Some(manager) = &self.manager else {
            return TickReport::default();
        };
        let report = TickReport {
            completions: manager.process_completions(),
            evicted: manager.tick(),
        };
        trace!(?report, tracked = manager.tracked_count(), "server tick");
        report
    }
}
