use lodstream_common::MAX_LODS;
use serde::{Deserialize, Serialize};

use crate::error::StreamError;

/// Server-side streaming configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// View distance in blocks.
    pub cutoff_distance: u32,
    /// Number of detail levels served, level 0 included.
    pub max_levels: u8,
    /// Tile generation worker threads.
    pub generation_threads: usize,
    /// Tiles a session may have sent but not yet acknowledged.
    pub max_in_flight: usize,
    /// Ticks an unreferenced tile is kept before eviction. 0 evicts at once.
    pub eviction_grace: u32,
}

impl Default for StreamConfig {
    fn default() -> Self {
        let cpus = num_cpus::get();
        Self {
            cutoff_distance: 256,
            max_levels: 3,
            generation_threads: (cpus / 2 + cpus / 4).max(1),
            max_in_flight: 64,
            eviction_grace: 0,
        }
    }
}

impl StreamConfig {
    pub fn validate(&self) -> Result<(), StreamError> {
        if self.max_levels > MAX_LODS {
            return Err(StreamError::InvalidConfig(format!(
                "max_levels {} exceeds {MAX_LODS}",
                self.max_levels
            )));
        }
        if self.generation_threads == 0 {
            return Err(StreamError::InvalidConfig("generation_threads must be at least 1".into()));
        }
        if self.max_in_flight == 0 {
            return Err(StreamError::InvalidConfig("max_in_flight must be at least 1".into()));
        }
        Ok(())
    }

    /// The limits this server imposes on every viewer.
    pub fn viewer_limits(&self) -> ViewerConfig {
        ViewerConfig {
            cutoff_distance: self.cutoff_distance,
            max_levels: self.max_levels,
        }
    }
}

/// Per-viewer view settings, as requested by a client or capped by a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    pub cutoff_distance: u32,
    pub max_levels: u8,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            cutoff_distance: 256,
            max_levels: 3,
        }
    }
}

impl ViewerConfig {
    /// Effective settings: the smaller of the server's and the client's.
    pub fn merge(server: &ViewerConfig, client: &ViewerConfig) -> ViewerConfig {
        ViewerConfig {
            cutoff_distance: server.cutoff_distance.min(client.cutoff_distance),
            max_levels: server.max_levels.min(client.max_levels),
        }
    }
}
