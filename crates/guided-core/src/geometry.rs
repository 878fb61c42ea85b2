//! Launch-geometry helpers shared by the pipeline stages.

/// Number of work-groups per scan row: `ceil(width / (8 * wgm))`,
/// rounded up to a multiple of 4 when more than one group is needed
/// (the sums row is itself scanned with vectorized loads).
pub fn scan_group_count(width: u32, wgm: u32) -> u32 {
    let mut n = width.div_ceil(8 * wgm);
    if n != 1 && n % 4 != 0 {
        n += 4 - n % 4;
    }
    n
}

/// Side of the square transpose tile: the largest power of two `<= 16`
/// dividing both `width / 4` and `height / 4`. 1 always qualifies.
pub fn transpose_tile_side(width: u32, height: u32) -> u32 {
    let xn = width / 4;
    let yn = height / 4;
    let mut side = 16;
    while side > 1 && (xn % side != 0 || yn % side != 0) {
        side >>= 1;
    }
    side
}
