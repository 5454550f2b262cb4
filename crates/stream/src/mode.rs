use lodstream_common::{Axes, CoordLimits, TilePos};
use lodstream_provider::Priority;

use crate::state::TrackingState;
use crate::window::{Grid, TileOrder};

/// A family of LOD tiles: how tile positions subdivide the world and which
/// of them a viewer sees.
///
/// The provided methods implement box-window visibility; a mode only has to
/// name its grid.
pub trait LodMode: Clone + Send + Sync + 'static {
    fn name(&self) -> &'static str;

    fn axes(&self) -> Axes;

    /// Log2 of the level-0 tile width in blocks.
    fn shift(&self) -> u32;

    fn grid(&self) -> Grid {
        Grid::new(self.axes(), self.shift())
    }

    fn all_positions(&self, state: &TrackingState, limits: &CoordLimits, visit: &mut dyn FnMut(TilePos)) {
        self.grid().all_positions(state, limits, visit);
    }

    fn delta_positions(
        &self,
        old: &TrackingState,
        new: &TrackingState,
        limits: &CoordLimits,
        added: &mut Vec<TilePos>,
        removed: &mut Vec<TilePos>,
    ) {
        self.grid()
            .delta_positions(old, new, limits, |p| added.push(p), |p| removed.push(p));
    }

    fn is_visible(&self, state: &TrackingState, limits: &CoordLimits, pos: &TilePos) -> bool {
        self.grid().is_visible(state, limits, pos)
    }

    fn should_trigger_update(&self, old: &TrackingState, new: &TrackingState) -> bool {
        self.grid().should_trigger_update(old, new)
    }

    fn comparator_for(&self, state: &TrackingState) -> TileOrder {
        self.grid().order_for(state)
    }

    fn priority_for(&self, state: &TrackingState, pos: &TilePos) -> Priority {
        self.comparator_for(state).priority(pos)
    }
}

/// Column heightmaps: tiles subdivide in x and z only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Heightmap {
    pub shift: u32,
}

impl Default for Heightmap {
    fn default() -> Self {
        Self { shift: 4 }
    }
}

impl LodMode for Heightmap {
    fn name(&self) -> &'static str {
        "heightmap"
    }

    fn axes(&self) -> Axes {
        Axes::Xz
    }

    fn shift(&self) -> u32 {
        self.shift
    }
}

/// Voxel volumes: tiles subdivide on all three axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Voxel {
    pub shift: u32,
}

impl Default for Voxel {
    fn default() -> Self {
        Self { shift: 4 }
    }
}

impl LodMode for Voxel {
    fn name(&self) -> &'static str {
        "voxel"
    }

    fn axes(&self) -> Axes {
        Axes::Xyz
    }

    fn shift(&self) -> u32 {
        self.shift
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::DVec3;
    use lodstream_common::WorldBounds;

    #[test]
    fn modes_name_their_grid() {
        let hm = Heightmap::default();
        let vx = Voxel::default();
        assert_eq!(hm.name(), "heightmap");
        assert_eq!(hm.grid(), Grid::new(Axes::Xz, 4));
        assert_eq!(vx.name(), "voxel");
        assert_eq!(vx.grid(), Grid::new(Axes::Xyz, 4));
    }

    #[test]
    fn delta_fills_vectors() {
        let mode = Heightmap::default();
        let bounds = WorldBounds::centered(4096, 256).unwrap();
        let limits = CoordLimits::new(&bounds, mode.axes(), mode.shift(), 3);
        let old = TrackingState::new(DVec3::ZERO, 1, 0, 1).unwrap();
        let new = old.with_position(DVec3::new(0.0, 0.0, 40.0));
        let (mut added, mut removed) = (Vec::new(), Vec::new());
        mode.delta_positions(&old, &new, &limits, &mut added, &mut removed);
        // 40 >> 4 rounds to 3: the window moves past its old extent entirely
        assert_eq!(added.len(), 9);
        assert_eq!(removed.len(), 9);

        let mut all = 0;
        mode.all_positions(&new, &limits, &mut |_| all += 1);
        assert_eq!(all, 9);
    }
}
