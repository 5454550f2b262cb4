use std::fmt;

use glam::{I64Vec3, IVec3};
use serde::{Deserialize, Serialize};

use crate::error::CoordError;
use crate::types::Axes;

/// Number of detail levels a position may address. Level `MAX_LODS - 1` is
/// the coarsest.
pub const MAX_LODS: u8 = 32;

const KEY_BITS: u32 = 19;
const KEY_MASK: u64 = (1 << KEY_BITS) - 1;
const KEY_MIN: i32 = -(1 << (KEY_BITS - 1));
const KEY_MAX: i32 = (1 << (KEY_BITS - 1)) - 1;

/// Position of a tile: a detail level plus integer coordinates in units of
/// that level's tile width.
///
/// Ordering is (level, x, y, z), which is also the byte order of
/// [`TilePos::to_bytes`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct TilePos {
    pub level: u8,
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

/// World-space box covered by a tile, max exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileAabb {
    pub min: I64Vec3,
    pub max: I64Vec3,
}

impl TilePos {
    pub const fn new(level: u8, x: i32, y: i32, z: i32) -> Self {
        Self { level, x, y, z }
    }

    /// Column position for heightmap tiles; y is always 0.
    pub const fn xz(level: u8, x: i32, z: i32) -> Self {
        Self { level, x, y: 0, z }
    }

    pub fn coords(&self) -> IVec3 {
        IVec3::new(self.x, self.y, self.z)
    }

    pub fn from_coords(level: u8, c: IVec3) -> Self {
        Self::new(level, c.x, c.y, c.z)
    }

    /// The tile one level coarser that contains this one.
    pub fn parent(&self) -> Result<TilePos, CoordError> {
        let level = self
            .level
            .checked_add(1)
            .filter(|l| *l < MAX_LODS)
            .ok_or(CoordError::LevelOverflow {
                level: self.level,
                max: MAX_LODS - 1,
            })?;
        Ok(Self::new(level, self.x >> 1, self.y >> 1, self.z >> 1))
    }

    /// The tiles one level finer that make up this one.
    ///
    /// Child `i` has offset `dx = i & 1`, `dz = (i >> 1) & 1` for [`Axes::Xz`]
    /// and `dx = i & 1`, `dy = (i >> 1) & 1`, `dz = (i >> 2) & 1` for
    /// [`Axes::Xyz`].
    pub fn children(&self, axes: Axes) -> Result<Vec<TilePos>, CoordError> {
        if self.level == 0 {
            return Err(CoordError::NoChildren(*self));
        }
        let overflow = || CoordError::CoordinateOverflow(*self, self.level - 1);
        let double = |v: i32| v.checked_mul(2).ok_or_else(overflow);
        let bx = double(self.x)?;
        let bz = double(self.z)?;
        // x*2+1 cannot overflow once x*2 succeeded
        let level = self.level - 1;
        let out = match axes {
            Axes::Xz => {
                let mut out = Vec::with_capacity(4);
                for dz in 0..2 {
                    for dx in 0..2 {
                        out.push(Self::new(level, bx + dx, 0, bz + dz));
                    }
                }
                out
            }
            Axes::Xyz => {
                let by = double(self.y)?;
                let mut out = Vec::with_capacity(8);
                for dz in 0..2 {
                    for dy in 0..2 {
                        for dx in 0..2 {
                            out.push(Self::new(level, bx + dx, by + dy, bz + dz));
                        }
                    }
                }
                out
            }
        };
        Ok(out)
    }

    /// The ancestor at `level`, which must not be finer than this one.
    pub fn up_to(&self, level: u8) -> Result<TilePos, CoordError> {
        if level < self.level {
            return Err(CoordError::WrongDirection { pos: *self, target: level });
        }
        if level >= MAX_LODS {
            return Err(CoordError::LevelOverflow { level, max: MAX_LODS - 1 });
        }
        let d = u32::from(level - self.level);
        Ok(Self::new(level, self.x >> d, self.y >> d, self.z >> d))
    }

    /// The minimum-corner descendant at `level`, which must not be coarser
    /// than this one.
    pub fn down_to(&self, level: u8) -> Result<TilePos, CoordError> {
        if level > self.level {
            return Err(CoordError::WrongDirection { pos: *self, target: level });
        }
        let d = u32::from(self.level - level);
        let shift = |v: i32| -> Result<i32, CoordError> {
            let wide = i64::from(v) << d;
            i32::try_from(wide).map_err(|_| CoordError::CoordinateOverflow(*self, level))
        };
        Ok(Self::new(level, shift(self.x)?, shift(self.y)?, shift(self.z)?))
    }

    /// World-space corners of this tile for a mode with tile shift `shift`.
    pub fn to_world_bounds(&self, shift: u32) -> Result<TileAabb, CoordError> {
        let total = u32::from(self.level) + shift;
        let err = || CoordError::ShiftOverflow { pos: *self, shift };
        if total > 62 {
            return Err(err());
        }
        let width = 1i64 << total;
        let corner = |v: i32| i64::from(v).checked_mul(width).ok_or_else(err);
        let min = I64Vec3::new(corner(self.x)?, corner(self.y)?, corner(self.z)?);
        let max = I64Vec3::new(
            min.x.checked_add(width).ok_or_else(err)?,
            min.y.checked_add(width).ok_or_else(err)?,
            min.z.checked_add(width).ok_or_else(err)?,
        );
        Ok(TileAabb { min, max })
    }

    /// Manhattan distance in units of the finer of the two levels.
    ///
    /// Positions on different levels are compared at the coarser level and
    /// the per-axis difference is scaled back by the level gap.
    pub fn manhattan_distance(&self, other: &TilePos) -> u64 {
        let l0 = i32::from(self.level);
        let l1 = i32::from(other.level);
        let s0 = (l1 - l0).max(0) as u32;
        let s1 = (l0 - l1).max(0) as u32;
        let s2 = s0.max(s1);
        let axis = |a: i32, b: i32| -> u64 {
            let d = (i64::from(a >> s0) - i64::from(b >> s1)).unsigned_abs();
            d << s2
        };
        axis(self.x, other.x) + axis(self.y, other.y) + axis(self.z, other.z)
    }

    /// Chebyshev distance between two positions on the same level.
    pub fn chebyshev_distance(&self, other: &TilePos) -> u64 {
        let dx = (i64::from(self.x) - i64::from(other.x)).unsigned_abs();
        let dy = (i64::from(self.y) - i64::from(other.y)).unsigned_abs();
        let dz = (i64::from(self.z) - i64::from(other.z)).unsigned_abs();
        dx.max(dy).max(dz)
    }

    /// Hot-path map key.
    pub fn key(&self) -> TileKey {
        TileKey::from(*self)
    }

    /// Fixed-width byte key whose lexicographic order matches `Ord`.
    pub fn to_bytes(&self) -> [u8; 13] {
        let mut out = [0u8; 13];
        out[0] = self.level;
        out[1..5].copy_from_slice(&flip(self.x).to_be_bytes());
        out[5..9].copy_from_slice(&flip(self.y).to_be_bytes());
        out[9..13].copy_from_slice(&flip(self.z).to_be_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<TilePos, CoordError> {
        let bytes: &[u8; 13] = bytes.try_into().map_err(|_| CoordError::BadKeyLength {
            expected: 13,
            actual: bytes.len(),
        })?;
        let word = |i: usize| {
            let raw = u32::from_be_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]);
            (raw ^ 0x8000_0000) as i32
        };
        Ok(Self::new(bytes[0], word(1), word(5), word(9)))
    }
}

fn flip(v: i32) -> u32 {
    (v as u32) ^ 0x8000_0000
}

impl fmt::Display for TilePos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}({}, {}, {})", self.level, self.x, self.y, self.z)
    }
}

/// Compact identity of a tile for hash maps.
///
/// Positions whose coordinates fit in 19 signed bits are packed into a
/// single `u64`; anything else keeps the full position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TileKey {
    Packed(u64),
    Wide(TilePos),
}

impl TileKey {
    pub fn pos(&self) -> TilePos {
        match *self {
            Self::Packed(bits) => {
                let level = (bits >> (3 * KEY_BITS)) as u8;
                TilePos::new(
                    level,
                    unpack(bits >> (2 * KEY_BITS)),
                    unpack(bits >> KEY_BITS),
                    unpack(bits),
                )
            }
            Self::Wide(pos) => pos,
        }
    }
}

fn fits(v: i32) -> bool {
    (KEY_MIN..=KEY_MAX).contains(&v)
}

fn unpack(bits: u64) -> i32 {
    let raw = (bits & KEY_MASK) as i32;
    // sign-extend from KEY_BITS
    (raw << (32 - KEY_BITS)) >> (32 - KEY_BITS)
}

impl From<TilePos> for TileKey {
    fn from(pos: TilePos) -> Self {
        if pos.level < MAX_LODS && fits(pos.x) && fits(pos.y) && fits(pos.z) {
            let bits = (u64::from(pos.level) << (3 * KEY_BITS))
                | ((pos.x as u64 & KEY_MASK) << (2 * KEY_BITS))
                | ((pos.y as u64 & KEY_MASK) << KEY_BITS)
                | (pos.z as u64 & KEY_MASK);
            Self::Packed(bits)
        } else {
            Self::Wide(pos)
        }
    }
}
