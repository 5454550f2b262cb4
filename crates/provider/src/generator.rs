use std::marker::PhantomData;

use lodstream_common::TilePos;

use crate::tile::TilePayload;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GenerateError {
    #[error("no source data for {0}")]
    Missing(TilePos),
    #[error("generation failed for {pos}: {reason}")]
    Failed { pos: TilePos, reason: String },
}

/// Produces level-0 tiles from raw world data.
pub trait ExactGenerator: Send + Sync + 'static {
    type Tile: TilePayload;

    /// Returns the payload and the tile's `extra` value.
    fn generate(&self, pos: TilePos) -> Result<(Self::Tile, i64), GenerateError>;
}

/// Adapts a closure into an [`ExactGenerator`].
pub struct FnGenerator<F, T> {
    f: F,
    _tile: PhantomData<fn() -> T>,
}

impl<F, T> FnGenerator<F, T>
where
    F: Fn(TilePos) -> Result<(T, i64), GenerateError> + Send + Sync + 'static,
    T: TilePayload,
{
    pub fn new(f: F) -> Self {
        Self { f, _tile: PhantomData }
    }
}

impl<F, T> ExactGenerator for FnGenerator<F, T>
where
    F: Fn(TilePos) -> Result<(T, i64), GenerateError> + Send + Sync + 'static,
    T: TilePayload,
{
    type Tile = T;

    fn generate(&self, pos: TilePos) -> Result<(T, i64), GenerateError> {
        (self.f)(pos)
    }
}
