use glam::{I64Vec3, IVec3};
use serde::{Deserialize, Serialize};

use crate::error::CoordError;
use crate::pos::{MAX_LODS, TilePos};
use crate::types::Axes;

/// World-space block bounds of a world, max exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorldBounds {
    pub min: I64Vec3,
    pub max: I64Vec3,
}

impl WorldBounds {
    pub fn new(min: I64Vec3, max: I64Vec3) -> Result<Self, CoordError> {
        if min.x >= max.x || min.y >= max.y || min.z >= max.z {
            return Err(CoordError::EmptyBounds);
        }
        Ok(Self { min, max })
    }

    /// A cube centered on the origin with half-extent `radius` blocks.
    pub fn centered(radius: i64, height: i64) -> Result<Self, CoordError> {
        Self::new(
            I64Vec3::new(-radius, 0, -radius),
            I64Vec3::new(radius, height, radius),
        )
    }
}

/// Tile-coordinate box for one level, max exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelBox {
    pub min: IVec3,
    pub max: IVec3,
}

impl LevelBox {
    pub fn contains(&self, c: IVec3) -> bool {
        c.cmpge(self.min).all() && c.cmplt(self.max).all()
    }

    pub fn is_empty(&self) -> bool {
        self.min.cmpge(self.max).any()
    }

    /// Number of tile positions in the box.
    pub fn volume(&self) -> u64 {
        if self.is_empty() {
            return 0;
        }
        let d = (self.max - self.min).as_i64vec3();
        (d.x * d.y * d.z) as u64
    }
}

/// Per-level tile coordinate limits, fixed once the world bounds are known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordLimits {
    axes: Axes,
    shift: u32,
    levels: Vec<LevelBox>,
}

impl CoordLimits {
    /// Computes limits for `levels` detail levels of tiles that are
    /// `2^shift` blocks wide at level 0.
    pub fn new(bounds: &WorldBounds, axes: Axes, shift: u32, levels: u8) -> Self {
        let levels = levels.min(MAX_LODS);
        let floor = |v: i64| clamp_i32(v >> shift);
        let ceil = |v: i64| clamp_i32(ceil_shift(v, shift));
        let mut min = IVec3::new(floor(bounds.min.x), floor(bounds.min.y), floor(bounds.min.z));
        let mut max = IVec3::new(ceil(bounds.max.x), ceil(bounds.max.y), ceil(bounds.max.z));
        if !axes.has_y() {
            min.y = 0;
            max.y = 1;
        }

        let mut out = Vec::with_capacity(usize::from(levels));
        for _ in 0..levels {
            out.push(LevelBox { min, max });
            min = IVec3::new(min.x >> 1, min.y >> 1, min.z >> 1);
            max = IVec3::new(half_up(max.x), half_up(max.y), half_up(max.z));
            if !axes.has_y() {
                min.y = 0;
                max.y = 1;
            }
        }
        Self { axes, shift, levels: out }
    }

    pub fn axes(&self) -> Axes {
        self.axes
    }

    pub fn shift(&self) -> u32 {
        self.shift
    }

    pub fn level_count(&self) -> u8 {
        self.levels.len() as u8
    }

    /// Limits for `level`, or `None` beyond the configured level count.
    pub fn level(&self, level: u8) -> Option<&LevelBox> {
        self.levels.get(usize::from(level))
    }

    pub fn min(&self, level: u8) -> Option<IVec3> {
        self.level(level).map(|b| b.min)
    }

    pub fn max(&self, level: u8) -> Option<IVec3> {
        self.level(level).map(|b| b.max)
    }

    pub fn contains(&self, pos: &TilePos) -> bool {
        self.level(pos.level)
            .is_some_and(|b| b.contains(pos.coords()))
    }
}

fn ceil_shift(v: i64, shift: u32) -> i64 {
    if shift == 0 {
        return v;
    }
    let mask = (1i64 << shift) - 1;
    (v >> shift) + i64::from(v & mask != 0)
}

fn half_up(v: i32) -> i32 {
    ((i64::from(v) + 1) >> 1) as i32
}

fn clamp_i32(v: i64) -> i32 {
    v.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
}
