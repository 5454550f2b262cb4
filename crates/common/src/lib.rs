//! Shared tile coordinate model: positions, packed keys, per-level limits.
//!
//! # Invariants
//! - A tile at level L covers `2^(L + shift)` world units per axis.
//! - Parent/child mapping and per-level limits agree: a level's limits are the
//!   previous level's limits halved, rounding outward.
//! - Positions are plain values; nothing here is ever mutated in place.

mod error;
mod limits;
mod math;
mod pos;
mod types;

pub use error::CoordError;
pub use limits::{CoordLimits, LevelBox, WorldBounds};
pub use math::{asr_round, floor_i};
pub use pos::{MAX_LODS, TileAabb, TileKey, TilePos};
pub use types::{Axes, ViewerId};
