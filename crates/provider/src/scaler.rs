use lodstream_common::{Axes, TilePos};

use crate::tile::TilePayload;

/// Builds a tile one level coarser from the tiles beneath it.
pub trait Scaler: Send + Sync + 'static {
    type Tile: TilePayload;

    /// Axes the scaler subdivides; drives the default input/output mapping.
    fn axes(&self) -> Axes;

    /// Tiles whose content depends on `src`.
    fn outputs(&self, src: TilePos) -> Vec<TilePos> {
        src.parent().map(|p| vec![p]).unwrap_or_default()
    }

    /// Tiles `dst` is built from, in the order `scale` receives them.
    fn inputs(&self, dst: TilePos) -> Vec<TilePos> {
        dst.children(self.axes()).unwrap_or_default()
    }

    /// Merge `srcs` (parallel to `inputs(dst)`, `None` for an empty input)
    /// into `dst`. Returns the value stored in the tile's `extra` field.
    fn scale(&self, srcs: &[Option<&Self::Tile>], dst: &mut Self::Tile) -> i64;
}
