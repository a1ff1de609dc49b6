//! Overzoom resolution: serving zoom levels beyond a store's native
//! maximum by cropping stored tiles.
//!
//! A store downloaded up to zoom N can still answer a request for zoom
//! N+k: the request maps to its ancestor tile at zoom N plus a crop
//! rectangle selecting the quadrant-of-quadrants the requested tile
//! occupies. Resolution is pure arithmetic on the tile address; the
//! caller fetches the source tile and applies the crop when rendering.

use thiserror::Error;

use crate::coord::TileAddress;

/// Overzoom resolution failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum OverzoomError {
    /// The store's native maximum zoom is unknown, so no substitution
    /// can be computed.
    #[error("native maximum zoom is unknown; cannot resolve an overzoom source")]
    NoCoverage,
}

/// Normalized crop rectangle within a source tile.
///
/// `x` and `y` are the top-left corner as fractions of the tile's edge
/// (`0.0` = left/top), and `size` is the edge length of the square
/// region. [`CropRect::FULL`] selects the entire tile.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CropRect {
    pub x: f64,
    pub y: f64,
    pub size: f64,
}

impl CropRect {
    /// The whole tile: no cropping required.
    pub const FULL: CropRect = CropRect {
        x: 0.0,
        y: 0.0,
        size: 1.0,
    };

    /// Whether this rectangle covers the entire tile.
    pub fn is_full(&self) -> bool {
        *self == Self::FULL
    }
}

/// Resolves a tile request against a store with native coverage up to
/// `native_max_z`.
///
/// Requests at or below the native maximum resolve to themselves with a
/// full crop. Requests above it resolve to the ancestor tile at the
/// native maximum plus the crop rectangle covering the requested tile's
/// footprint within it: with `delta = requested.z - native_max_z`, the
/// source address drops the low `delta` bits of `x` and `y`, and those
/// dropped bits select the crop cell (x bits count columns left to
/// right, y bits count rows top to bottom).
///
/// # Errors
///
/// Returns [`OverzoomError::NoCoverage`] when `native_max_z` is `None`,
/// which happens for stores whose downloads never completed.
pub fn resolve(
    requested: TileAddress,
    native_max_z: Option<u8>,
) -> Result<(TileAddress, CropRect), OverzoomError> {
    let max_z = match native_max_z {
        Some(z) => z,
        None => return Err(OverzoomError::NoCoverage),
    };

    if requested.z <= max_z {
        return Ok((requested, CropRect::FULL));
    }

    let delta = requested.z - max_z;
    let source = TileAddress {
        z: max_z,
        x: requested.x >> delta,
        y: requested.y >> delta,
        scale: requested.scale,
    };

    // Addresses are validated to MAX_ZOOM (22), so delta < 32 and the
    // shifts below cannot overflow.
    let cells = 1u64 << delta;
    let size = 1.0 / cells as f64;
    let mask = cells - 1;
    let crop = CropRect {
        x: (u64::from(requested.x) & mask) as f64 * size,
        y: (u64::from(requested.y) & mask) as f64 * size,
        size,
    };

    Ok((source, crop))
}
