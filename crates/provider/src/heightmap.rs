use lodstream_common::Axes;
use serde::{Deserialize, Serialize};

use crate::scaler::Scaler;

/// Samples per tile edge.
pub const HEIGHTMAP_SIZE: usize = 16;
/// Block width of a level-0 heightmap tile is `1 << HEIGHTMAP_SHIFT`.
pub const HEIGHTMAP_SHIFT: u32 = 4;

const SAMPLES: usize = HEIGHTMAP_SIZE * HEIGHTMAP_SIZE;

/// One column of terrain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeightSample {
    pub height: i32,
    pub block: u32,
    pub light: u8,
}

/// 16x16 grid of optional samples, row-major by z then x.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeightmapTile {
    samples: Vec<Option<HeightSample>>,
}

impl Default for HeightmapTile {
    fn default() -> Self {
        Self {
            samples: vec![None; SAMPLES],
        }
    }
}

impl HeightmapTile {
    fn index(x: usize, z: usize) -> usize {
        z * HEIGHTMAP_SIZE + x
    }

    pub fn get(&self, x: usize, z: usize) -> Option<HeightSample> {
        if x >= HEIGHTMAP_SIZE || z >= HEIGHTMAP_SIZE {
            return None;
        }
        self.samples.get(Self::index(x, z)).copied().flatten()
    }

    pub fn set(&mut self, x: usize, z: usize, sample: Option<HeightSample>) {
        if x >= HEIGHTMAP_SIZE || z >= HEIGHTMAP_SIZE {
            return;
        }
        if self.samples.len() != SAMPLES {
            self.samples.resize(SAMPLES, None);
        }
        self.samples[Self::index(x, z)] = sample;
    }

    pub fn present_count(&self) -> usize {
        self.samples.iter().filter(|s| s.is_some()).count()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
        self.samples.resize(SAMPLES, None);
    }
}

/// Merges four heightmap tiles into their parent.
///
/// Each output sample covers a 2x2 footprint of one child. The chosen
/// sample is the present one whose height is furthest from the footprint's
/// mean, keeping ridges and pits visible at distance. Ties go to the first
/// corner in (0,0), (1,0), (0,1), (1,1) order.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeightmapScaler;

impl Scaler for HeightmapScaler {
    type Tile = HeightmapTile;

    fn axes(&self) -> Axes {
        Axes::Xz
    }

    /// Returns the number of samples set in `dst`.
    fn scale(&self, srcs: &[Option<&HeightmapTile>], dst: &mut HeightmapTile) -> i64 {
        const HALF: usize = HEIGHTMAP_SIZE / 2;
        dst.clear();
        for oz in 0..HEIGHTMAP_SIZE {
            for ox in 0..HEIGHTMAP_SIZE {
                let child = (ox / HALF) | ((oz / HALF) << 1);
                let Some(Some(src)) = srcs.get(child) else {
                    continue;
                };
                let fx = (ox % HALF) * 2;
                let fz = (oz % HALF) * 2;
                let footprint = [
                    src.get(fx, fz),
                    src.get(fx + 1, fz),
                    src.get(fx, fz + 1),
                    src.get(fx + 1, fz + 1),
                ];
                dst.set(ox, oz, most_deviant(&footprint));
            }
        }
        dst.present_count() as i64
    }
}

fn most_deviant(footprint: &[Option<HeightSample>; 4]) -> Option<HeightSample> {
    let present: Vec<HeightSample> = footprint.iter().flatten().copied().collect();
    let n = present.len() as i64;
    let sum: i64 = present.iter().map(|s| i64::from(s.height)).sum();

    // compare |h - sum/n| scaled by n to stay in integers
    let mut best: Option<(i64, HeightSample)> = None;
    for s in present {
        let dev = (i64::from(s.height) * n - sum).abs();
        if best.is_none_or(|(d, _)| dev > d) {
            best = Some((dev, s));
        }
    }
    best.map(|(_, s)| s)
}
