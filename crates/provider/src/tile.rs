use lodstream_common::TilePos;
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Data carried by a tile. Implemented for every type with the required
/// bounds; the default value is the placeholder payload.
pub trait TilePayload: Default + Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> TilePayload for T where T: Default + Serialize + DeserializeOwned + Send + Sync + 'static {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileState {
    Generated,
    /// Generation failed; the payload is the default value.
    Placeholder,
}

/// A finished tile. Shared as `Arc<Tile<T>>` and never mutated after
/// publication; regeneration publishes a new `Arc`.
#[derive(Debug, Clone, PartialEq)]
pub struct Tile<T> {
    pub pos: TilePos,
    pub data: T,
    pub extra: i64,
    pub state: TileState,
}

impl<T: TilePayload> Tile<T> {
    pub fn generated(pos: TilePos, data: T, extra: i64) -> Self {
        Self {
            pos,
            data,
            extra,
            state: TileState::Generated,
        }
    }

    pub fn placeholder(pos: TilePos) -> Self {
        Self {
            pos,
            data: T::default(),
            extra: 0,
            state: TileState::Placeholder,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.state == TileState::Placeholder
    }
}
