use glam::DVec3;
use lodstream_common::{MAX_LODS, asr_round};
use serde::{Deserialize, Serialize};

use crate::config::ViewerConfig;
use crate::error::StateError;

/// Where a viewer is and how much it may see.
///
/// `cutoff` is the window half-width in tiles; levels `[min_level,
/// max_level)` are tracked.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrackingState {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub cutoff: u32,
    pub min_level: u8,
    pub max_level: u8,
}

impl TrackingState {
    pub fn new(
        position: DVec3,
        cutoff: u32,
        min_level: u8,
        max_level: u8,
    ) -> Result<Self, StateError> {
        if min_level > max_level || max_level > MAX_LODS {
            return Err(StateError::LevelRange {
                min: min_level,
                max: max_level,
                limit: MAX_LODS,
            });
        }
        Ok(Self {
            x: position.x,
            y: position.y,
            z: position.z,
            cutoff,
            min_level,
            max_level,
        })
    }

    /// State for a viewer at `position` using `config`, with tiles `2^shift`
    /// blocks wide at level 0.
    pub fn from_config(position: DVec3, config: &ViewerConfig, shift: u32) -> Result<Self, StateError> {
        let cutoff = asr_round(i64::from(config.cutoff_distance), shift);
        Self::new(position, cutoff as u32, 0, config.max_levels)
    }

    pub fn position(&self) -> DVec3 {
        DVec3::new(self.x, self.y, self.z)
    }

    pub fn with_position(&self, position: DVec3) -> Self {
        Self {
            x: position.x,
            y: position.y,
            z: position.z,
            ..*self
        }
    }

    pub fn has_level(&self, level: u8) -> bool {
        (self.min_level..self.max_level).contains(&level)
    }
}
