//! Tile generation pipeline: exact generation at level 0, scaling above it,
//! scheduled as an explicit dependency graph on a worker pool.
//!
//! # Invariants
//! - A node lives while it has an external request or a dependent holding it
//!   as an input; dropping the last hold cancels it and its own inputs.
//! - A coarse node is queued only once every input is built, so workers never
//!   block on one another.
//! - Results from a superseded run (released, invalidated, reset) are
//!   discarded, never published.
//! - Published tiles are immutable; a rebuild publishes a new `Arc`.

mod generator;
mod heightmap;
mod provider;
mod scaler;
mod scheduler;
mod tile;
mod worker;

pub use generator::{ExactGenerator, FnGenerator, GenerateError};
pub use heightmap::{HEIGHTMAP_SHIFT, HEIGHTMAP_SIZE, HeightSample, HeightmapScaler, HeightmapTile};
pub use provider::{Completion, ProviderError, ProviderOptions, ProviderStats, TileProvider};
pub use scaler::Scaler;
pub use scheduler::{Priority, SchedulerCounts};
pub use tile::{Tile, TilePayload, TileState};
