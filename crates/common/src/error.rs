use crate::pos::TilePos;

/// Errors from tile coordinate arithmetic.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoordError {
    #[error("level {level} has no parent below the maximum of {max}")]
    LevelOverflow { level: u8, max: u8 },
    #[error("level 0 tile {0} has no children")]
    NoChildren(TilePos),
    #[error("coordinates of {0} overflow when moved to level {1}")]
    CoordinateOverflow(TilePos, u8),
    #[error("tile {pos} is too large to express in world space with shift {shift}")]
    ShiftOverflow { pos: TilePos, shift: u32 },
    #[error("target level {target} is on the wrong side of {pos}")]
    WrongDirection { pos: TilePos, target: u8 },
    #[error("encoded tile key must be {expected} bytes, got {actual}")]
    BadKeyLength { expected: usize, actual: usize },
    #[error("world bounds are empty on at least one axis")]
    EmptyBounds,
}
