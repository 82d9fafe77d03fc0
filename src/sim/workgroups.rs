//! Workgroup count derivation
//!
//! Counts always round up so the last partial tile is still dispatched;
//! programs bounds-check their global id against the resource size.

use crate::error::{malformed, SimResult};
use crate::gpu::resources::descriptor::TextureDesc;

/// Default per-dimension dispatch limit of WebGPU devices
pub const MAX_WORKGROUPS_PER_DIMENSION: u32 = 65_535;

/// `ceil(value / divisor)`
///
/// # Panics
///
/// Panics if `divisor` is zero, like integer division.
pub const fn ceil_div(value: u32, divisor: u32) -> u32 {
    value.div_ceil(divisor)
}

/// Workgroups covering a `width` x `height` grid with `tile`-sized groups
pub fn for_extent(width: u32, height: u32, tile: [u32; 2]) -> SimResult<[u32; 3]> {
    if tile[0] == 0 || tile[1] == 0 {
        return Err(malformed("tile", format!("tile size {:?} has a zero dimension", tile)));
    }
    checked([ceil_div(width, tile[0]), ceil_div(height, tile[1]), 1])
}

/// Workgroups covering every texel of one layer of `texture`
pub fn for_texture(texture: &TextureDesc, tile: [u32; 2]) -> SimResult<[u32; 3]> {
    for_extent(texture.width, texture.height, tile)
}

/// Workgroups covering `count` flat records with `batch` records per group
pub fn for_records(count: u32, batch: u32) -> SimResult<[u32; 3]> {
    if batch == 0 {
        return Err(malformed("batch", "record batch size is zero"));
    }
    checked([ceil_div(count, batch), 1, 1])
}

fn checked(counts: [u32; 3]) -> SimResult<[u32; 3]> {
    if counts.iter().any(|c| *c > MAX_WORKGROUPS_PER_DIMENSION) {
        return Err(malformed(
            "workgroups",
            format!(
                "{:?} exceeds {} workgroups per dimension",
                counts, MAX_WORKGROUPS_PER_DIMENSION
            ),
        ));
    }
    Ok(counts)
}
