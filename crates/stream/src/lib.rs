//! Per-viewer LOD streaming: which tiles each viewer sees, shared interest
//! across viewers, and flow-controlled delivery.
//!
//! # Invariants
//! - A tile is requested from the provider while at least one viewer or
//!   anonymous hold references it, and released when the last one goes.
//! - A tracker's visible set always equals `all_positions` of its stored
//!   state; deltas move it there exactly.
//! - A viewer never receives an unload for a tile it was not sent, nor a tile
//!   for a position it no longer sees.
//! - Refcounts, trackers and sessions are touched only from the world-update
//!   context; only tile production runs elsewhere.

mod config;
mod error;
mod manager;
mod mode;
mod server;
mod session;
mod state;
mod stats;
mod tracker;
mod window;

pub use config::{StreamConfig, ViewerConfig};
pub use error::{ManagerError, StateError, StreamError, TrackerError};
pub use manager::{Notification, TrackerManager, ViewerInbox};
pub use mode::{Heightmap, LodMode, Voxel};
pub use server::{LodServer, TickReport};
pub use session::{AckSender, Session, SessionSink, SessionStats};
pub use state::TrackingState;
pub use stats::{TrackerStats, UpdateTimer};
pub use tracker::Tracker;
pub use window::{Grid, TileOrder};
