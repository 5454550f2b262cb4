/// Arithmetic shift right, rounding to the nearest result instead of toward
/// negative infinity.
///
/// Used to compute a viewer's base tile so that the window recenters halfway
/// across a tile rather than at its edge.
pub fn asr_round(value: i64, shift: u32) -> i64 {
    if shift == 0 {
        value
    } else {
        (value >> shift) + ((value >> (shift - 1)) & 1)
    }
}

/// Floor a world-space coordinate to an integer block coordinate.
pub fn floor_i(value: f64) -> i64 {
    value.floor() as i64
}
