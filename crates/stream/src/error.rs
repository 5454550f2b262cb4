use lodstream_common::{TilePos, ViewerId};
use lodstream_provider::ProviderError;

/// Invalid tracking state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateError {
    #[error("level range [{min}, {max}) must satisfy 0 <= min <= max <= {limit}")]
    LevelRange { min: u8, max: u8, limit: u8 },
}

#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error("viewer {viewer} is already interested in {pos}")]
    DuplicateInterest { viewer: ViewerId, pos: TilePos },
    #[error("viewer {viewer} is not interested in {pos}")]
    NotInterested { viewer: ViewerId, pos: TilePos },
    #[error("{0} has no anonymous hold to release")]
    NotRetained(TilePos),
    #[error("viewer {0} is already registered")]
    ViewerExists(ViewerId),
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("tracker is already active")]
    AlreadyActive,
    #[error("tracker is not active")]
    Inactive,
    #[error(transparent)]
    Manager(#[from] ManagerError),
}

/// Errors surfaced to whoever drives a streaming server.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("world bounds have not been resolved")]
    BoundsUnresolved,
    #[error("world bounds are already resolved")]
    BoundsAlreadyResolved,
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Tracker(#[from] TrackerError),
    #[error(transparent)]
    Manager(#[from] ManagerError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
}
