//! Specimen brightness maps for simulated FLIM tiles.
//!
//! Each stage position sees a fixed arrangement of bright "cells" on a dim
//! background, so neighbouring tiles look different but re-visiting a
//! position reproduces the same specimen. The map holds the mean photon
//! counts per pixel per frame; [`MockRng::fill_counts`](crate::MockRng::fill_counts)
//! turns it into noisy counts.

use tilescan_core::Position;

/// Mean counts per frame away from any cell.
const BACKGROUND_COUNTS: f64 = 2.0;

/// Extra mean counts at the centre of a cell.
const CELL_PEAK_COUNTS: f64 = 24.0;

/// glibc-style LCG so the layout is identical on every platform.
#[inline]
fn prng(seed: u64) -> u64 {
    seed.wrapping_mul(1103515245).wrapping_add(12345) & 0x7fffffff
}

/// Stable seed for a stage position, quantised to 0.1 µm.
fn position_seed(position: &Position) -> u64 {
    let qx = (position.x * 10.0).round() as i64 as u64;
    let qy = (position.y * 10.0).round() as i64 as u64;
    qx.wrapping_mul(0x9E37_79B9_7F4A_7C15) ^ qy.wrapping_mul(0xC2B2_AE3D_27D4_EB4F)
}

/// Mean photon counts per pixel for the tile at `position`, row-major.
pub fn specimen_brightness(width: u32, height: u32, position: &Position) -> Vec<u16> {
    let w = width as usize;
    let h = height as usize;
    let mut map = vec![BACKGROUND_COUNTS; w * h];

    let mut seed = prng(position_seed(position));
    let cell_count = 4 + (seed % 8) as usize;
    let radius = (width.min(height) as f64 / 12.0).max(1.0);

    for _ in 0..cell_count {
        seed = prng(seed);
        let cx = (seed % width.max(1) as u64) as f64;
        seed = prng(seed);
        let cy = (seed % height.max(1) as u64) as f64;

        for (idx, value) in map.iter_mut().enumerate() {
            let dx = (idx % w) as f64 - cx;
            let dy = (idx / w) as f64 - cy;
            let falloff = (-(dx * dx + dy * dy) / (2.0 * radius * radius)).exp();
            *value += CELL_PEAK_COUNTS * falloff;
        }
    }

    map.into_iter()
        .map(|v| v.round().clamp(1.0, f64::from(u16::MAX)) as u16)
        .collect()
}
