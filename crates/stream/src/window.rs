//! Box-window visibility shared by every LOD mode.
//!
//! At each tracked level a viewer sees the box of half-width `cutoff` tiles
//! around its base tile, clipped to the level's limits. The base tile is the
//! viewer's block position shifted down with rounding to nearest, so the
//! window recenters halfway across a tile rather than at its edge.

use std::cmp::Ordering;

use glam::IVec3;
use lodstream_common::{Axes, CoordLimits, LevelBox, TilePos, asr_round, floor_i};
use lodstream_provider::Priority;

use crate::state::TrackingState;

/// Tile grid of a mode: which axes subdivide and the level-0 tile shift.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Grid {
    pub axes: Axes,
    pub shift: u32,
}

fn to_i32(v: i64) -> i32 {
    v.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
}

impl Grid {
    pub const fn new(axes: Axes, shift: u32) -> Self {
        Self { axes, shift }
    }

    /// The viewer's tile at `level`.
    pub fn base(&self, state: &TrackingState, level: u8) -> IVec3 {
        let s = self.shift.saturating_add(u32::from(level)).min(63);
        let axis = |v: f64| to_i32(asr_round(floor_i(v), s));
        let y = if self.axes.has_y() { axis(state.y) } else { 0 };
        IVec3::new(axis(state.x), y, axis(state.z))
    }

    /// The visible box at `level`, or `None` if the level is not tracked or
    /// has no limits. The box may be empty.
    pub fn window(&self, state: &TrackingState, limits: &CoordLimits, level: u8) -> Option<LevelBox> {
        if !state.has_level(level) {
            return None;
        }
        let lim = limits.level(level)?;
        let base = self.base(state, level).as_i64vec3();
        let c = i64::from(state.cutoff);
        let lo = |b: i64, l: i32| to_i32((b - c).max(i64::from(l)));
        let hi = |b: i64, l: i32| to_i32((b + c + 1).min(i64::from(l)));
        let mut min = IVec3::new(lo(base.x, lim.min.x), lo(base.y, lim.min.y), lo(base.z, lim.min.z));
        let mut max = IVec3::new(hi(base.x, lim.max.x), hi(base.y, lim.max.y), hi(base.z, lim.max.z));
        if !self.axes.has_y() {
            min.y = 0;
            max.y = 1;
        }
        Some(LevelBox { min, max })
    }

    /// Every position visible in `state`.
    pub fn all_positions(&self, state: &TrackingState, limits: &CoordLimits, mut visit: impl FnMut(TilePos)) {
        for level in state.min_level..state.max_level {
            if let Some(w) = self.window(state, limits, level) {
                for_each_in(&w, level, &mut visit);
            }
        }
    }

    /// Positions leaving and entering view when moving from `old` to `new`.
    ///
    /// Applying `removed` then `added` to `all_positions(old)` yields exactly
    /// `all_positions(new)`, and the two sets are disjoint.
    pub fn delta_positions(
        &self,
        old: &TrackingState,
        new: &TrackingState,
        limits: &CoordLimits,
        mut added: impl FnMut(TilePos),
        mut removed: impl FnMut(TilePos),
    ) {
        let lo = old.min_level.min(new.min_level);
        let hi = old.max_level.max(new.max_level);
        for level in lo..hi {
            let old_has = old.has_level(level);
            let new_has = new.has_level(level);
            if old_has
                && new_has
                && old.cutoff == new.cutoff
                && self.base(old, level) == self.base(new, level)
            {
                continue;
            }
            let ow = self.window(old, limits, level);
            let nw = self.window(new, limits, level);
            if let Some(ow) = &ow {
                for_each_in(ow, level, &mut |p: TilePos| {
                    if !nw.is_some_and(|w| w.contains(p.coords())) {
                        removed(p);
                    }
                });
            }
            if let Some(nw) = &nw {
                for_each_in(nw, level, &mut |p: TilePos| {
                    if !ow.is_some_and(|w| w.contains(p.coords())) {
                        added(p);
                    }
                });
            }
        }
    }

    pub fn is_visible(&self, state: &TrackingState, limits: &CoordLimits, pos: &TilePos) -> bool {
        self.window(state, limits, pos.level)
            .is_some_and(|w| w.contains(pos.coords()))
    }

    /// Whether a viewer moving from `old` to `new` needs its tile set
    /// recomputed: any setting changed, or it moved at least half a level-0
    /// tile.
    pub fn should_trigger_update(&self, old: &TrackingState, new: &TrackingState) -> bool {
        if old.cutoff != new.cutoff || old.min_level != new.min_level || old.max_level != new.max_level {
            return true;
        }
        let half = f64::from(self.shift).exp2() / 2.0;
        let sq = |v: f64| v * v;
        let mut d = sq(old.x - new.x) + sq(old.z - new.z);
        if self.axes.has_y() {
            d += sq(old.y - new.y);
        }
        d >= sq(half)
    }

    /// Ordering of tiles for a viewer: coarse detail last, near tiles first.
    pub fn order_for(&self, state: &TrackingState) -> TileOrder {
        TileOrder {
            origin: TilePos::from_coords(0, self.base(state, 0)),
        }
    }
}

fn for_each_in(w: &LevelBox, level: u8, visit: &mut impl FnMut(TilePos)) {
    for x in w.min.x..w.max.x {
        for y in w.min.y..w.max.y {
            for z in w.min.z..w.max.z {
                visit(TilePos::new(level, x, y, z));
            }
        }
    }
}

/// Tile ordering relative to one viewer: level ascending, then Manhattan
/// distance from the viewer's level-0 tile, then position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileOrder {
    origin: TilePos,
}

impl TileOrder {
    pub fn distance(&self, pos: &TilePos) -> u64 {
        self.origin.manhattan_distance(pos)
    }

    pub fn compare(&self, a: &TilePos, b: &TilePos) -> Ordering {
        a.level
            .cmp(&b.level)
            .then_with(|| self.distance(a).cmp(&self.distance(b)))
            .then_with(|| a.cmp(b))
    }

    /// Scheduling priority of `pos`; agrees with [`TileOrder::compare`].
    pub fn priority(&self, pos: &TilePos) -> Priority {
        Priority::new(pos.level, self.distance(pos))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use glam::DVec3;
    use lodstream_common::WorldBounds;
    use proptest::prelude::*;

    const HM: Grid = Grid::new(Axes::Xz, 4);
    const VX: Grid = Grid::new(Axes::Xyz, 4);

    fn limits(grid: Grid) -> CoordLimits {
        let bounds = WorldBounds::centered(1 << 16, 1 << 12).unwrap();
        CoordLimits::new(&bounds, grid.axes, grid.shift, 8)
    }

    fn state(x: f64, z: f64, cutoff: u32, min: u8, max: u8) -> TrackingState {
        TrackingState::new(DVec3::new(x, 0.0, z), cutoff, min, max).unwrap()
    }

    fn all(grid: Grid, s: &TrackingState, l: &CoordLimits) -> HashSet<TilePos> {
        let mut out = HashSet::new();
        grid.all_positions(s, l, |p| {
            out.insert(p);
        });
        out
    }

    fn delta(grid: Grid, a: &TrackingState, b: &TrackingState, l: &CoordLimits) -> (Vec<TilePos>, Vec<TilePos>) {
        let (mut added, mut removed) = (Vec::new(), Vec::new());
        grid.delta_positions(a, b, l, |p| added.push(p), |p| removed.push(p));
        (added, removed)
    }

    #[test]
    fn origin_window_is_five_by_five() {
        let l = limits(HM);
        let s = state(0.0, 0.0, 2, 0, 1);
        let got = all(HM, &s, &l);
        assert_eq!(got.len(), 25);
        assert!(got.contains(&TilePos::xz(0, -2, -2)));
        assert!(got.contains(&TilePos::xz(0, 2, 2)));
    }

    #[test]
    fn move_shifts_window_by_one_column() {
        let l = limits(HM);
        let a = state(0.0, 0.0, 2, 0, 1);
        let b = state(17.0, 0.0, 2, 0, 1);
        let (added, removed) = delta(HM, &a, &b, &l);
        assert_eq!(removed.len(), 5);
        assert!(removed.iter().all(|p| p.x == -2));
        assert_eq!(added.len(), 5);
        assert!(added.iter().all(|p| p.x == 3));
    }

    #[test]
    fn raising_max_level_adds_only_new_level() {
        let l = limits(HM);
        let a = state(0.0, 0.0, 2, 0, 1);
        let b = state(0.0, 0.0, 2, 0, 2);
        let (added, removed) = delta(HM, &a, &b, &l);
        assert!(removed.is_empty());
        assert_eq!(added.len(), 25);
        assert!(added.iter().all(|p| p.level == 1));
    }

    #[test]
    fn window_clipped_to_limits() {
        let bounds = WorldBounds::centered(32, 256).unwrap();
        let l = CoordLimits::new(&bounds, Axes::Xz, 4, 1);
        let s = state(0.0, 0.0, 5, 0, 1);
        // level 0 spans [-2, 2) on both axes
        assert_eq!(all(HM, &s, &l).len(), 16);
        assert!(!HM.is_visible(&s, &l, &TilePos::xz(0, 2, 0)));
        assert!(HM.is_visible(&s, &l, &TilePos::xz(0, -2, 1)));
    }

    #[test]
    fn voxel_window_is_a_cube() {
        let l = limits(VX);
        let s = TrackingState::new(DVec3::new(0.0, 40.0, 0.0), 1, 0, 1).unwrap();
        let got = all(VX, &s, &l);
        assert_eq!(got.len(), 27);
        // 40 >> 4 rounds to 3
        assert!(got.contains(&TilePos::new(0, 0, 3, 0)));
        assert!(got.contains(&TilePos::new(0, 1, 4, -1)));
    }

    #[test]
    fn trigger_threshold_is_half_a_tile() {
        let a = state(0.0, 0.0, 2, 0, 1);
        assert!(!HM.should_trigger_update(&a, &state(7.9, 0.0, 2, 0, 1)));
        assert!(HM.should_trigger_update(&a, &state(8.0, 0.0, 2, 0, 1)));
        assert!(!HM.should_trigger_update(&a, &state(5.0, 6.0, 2, 0, 1)));
        assert!(HM.should_trigger_update(&a, &state(0.0, 0.0, 3, 0, 1)));
        assert!(HM.should_trigger_update(&a, &state(0.0, 0.0, 2, 0, 2)));
        // vertical movement only matters in 3D
        let up = TrackingState::new(DVec3::new(0.0, 9.0, 0.0), 2, 0, 1).unwrap();
        assert!(!HM.should_trigger_update(&a, &up));
        assert!(VX.should_trigger_update(&a, &up));
    }

    #[test]
    fn wide_tiles_do_not_overflow() {
        let wide = Grid::new(Axes::Xz, 40);
        let a = state(0.0, 0.0, 2, 0, 1);
        assert!(!wide.should_trigger_update(&a, &state(1.0e6, 0.0, 2, 0, 1)));
        assert!(wide.should_trigger_update(&a, &state(2.0f64.powi(39), 0.0, 2, 0, 1)));
        assert_eq!(wide.base(&state(1.0e9, -1.0e9, 2, 0, 1), 30), IVec3::ZERO);
    }

    #[test]
    fn order_is_level_then_distance() {
        let order = HM.order_for(&state(0.0, 0.0, 2, 0, 3));
        let mut tiles = vec![
            TilePos::xz(1, 0, 0),
            TilePos::xz(0, 2, 0),
            TilePos::xz(0, 0, 0),
            TilePos::xz(0, -1, 0),
        ];
        tiles.sort_by(|a, b| order.compare(a, b));
        assert_eq!(
            tiles,
            vec![
                TilePos::xz(0, 0, 0),
                TilePos::xz(0, -1, 0),
                TilePos::xz(0, 2, 0),
                TilePos::xz(1, 0, 0),
            ]
        );
        assert!(order.priority(&tiles[1]) < order.priority(&tiles[2]));
    }

    fn arb_state() -> impl Strategy<Value = TrackingState> {
        (-300.0f64..300.0, -300.0f64..300.0, -40.0f64..300.0, 0u32..4, 0u8..3, 0u8..3).prop_map(
            |(x, z, y, cutoff, a, b)| {
                TrackingState::new(DVec3::new(x, y, z), cutoff, a.min(b), a.max(b)).unwrap()
            },
        )
    }

    proptest! {
        #[test]
        fn delta_transforms_old_set_into_new(a in arb_state(), b in arb_state()) {
            for grid in [HM, VX] {
                let l = limits(grid);
                let (added, removed) = delta(grid, &a, &b, &l);
                let added: HashSet<_> = added.into_iter().collect();
                let removed: HashSet<_> = removed.into_iter().collect();
                prop_assert!(added.is_disjoint(&removed));

                let mut set = all(grid, &a, &l);
                prop_assert!(removed.is_subset(&set));
                for p in &removed {
                    set.remove(p);
                }
                for p in &added {
                    prop_assert!(set.insert(*p));
                }
                prop_assert_eq!(set, all(grid, &b, &l));
            }
        }

        #[test]
        fn visibility_agrees_with_enumeration(s in arb_state(), x in -30i32..30, y in -5i32..25, z in -30i32..30, level in 0u8..4) {
            for grid in [HM, VX] {
                let l = limits(grid);
                let set = all(grid, &s, &l);
                let y = if grid.axes.has_y() { y } else { 0 };
                let pos = TilePos::new(level, x, y, z);
                prop_assert_eq!(grid.is_visible(&s, &l, &pos), set.contains(&pos));
            }
        }

        #[test]
        fn unchanged_state_yields_no_delta(s in arb_state()) {
            let l = limits(HM);
            let (added, removed) = delta(HM, &s, &s, &l);
            prop_assert!(added.is_empty() && removed.is_empty());
        }

        #[test]
        fn order_is_total_and_consistent(
            s in arb_state(),
            a in (0u8..3, -20i32..20, -20i32..20),
            b in (0u8..3, -20i32..20, -20i32..20),
        ) {
            let order = HM.order_for(&s);
            let a = TilePos::xz(a.0, a.1, a.2);
            let b = TilePos::xz(b.0, b.1, b.2);
            prop_assert_eq!(order.compare(&a, &b), order.compare(&b, &a).reverse());
            prop_assert_eq!(order.compare(&a, &b) == Ordering::Equal, a == b);
            if a.level == b.level {
                prop_assert_eq!(
                    order.priority(&a).cmp(&order.priority(&b)),
                    order.distance(&a).cmp(&order.distance(&b)),
                );
            }
        }
    }
}
