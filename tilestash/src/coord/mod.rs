//! Coordinate conversion and region enumeration.
//!
//! Converts between geographic coordinates (latitude/longitude) and
//! Web Mercator tile addresses, and enumerates every tile covering a
//! [`MapRegion`] across a zoom range. Enumeration is fully deterministic:
//! the same region and zoom range always produce the same addresses in
//! the same order, and [`count_region_tiles`] predicts the total without
//! iterating.

mod types;

pub use types::{
    CoordError, MapRegion, TileAddress, TileScale, MAX_LAT, MAX_LON, MAX_ZOOM, MIN_LAT, MIN_LON,
    MIN_ZOOM,
};

use std::f64::consts::PI;

/// Converts geographic coordinates to the containing tile address.
///
/// # Arguments
///
/// * `lat` - Latitude in degrees, within the Web Mercator range
/// * `lon` - Longitude in degrees, `-180.0` to `180.0`
/// * `z` - Zoom level, `0` to [`MAX_ZOOM`]
///
/// # Errors
///
/// Returns a [`CoordError`] when any input is outside its valid range.
#[inline]
pub fn lat_lon_to_tile(lat: f64, lon: f64, z: u8) -> Result<TileAddress, CoordError> {
    if !(MIN_LAT..=MAX_LAT).contains(&lat) {
        return Err(CoordError::InvalidLatitude(lat));
    }
    if !(MIN_LON..=MAX_LON).contains(&lon) {
        return Err(CoordError::InvalidLongitude(lon));
    }
    if z > MAX_ZOOM {
        return Err(CoordError::InvalidZoom(z));
    }

    let x = clamped_col(lon, z);
    let y = clamped_row(lat, z);
    TileAddress::new(z, x, y)
}

/// Converts a tile address back to geographic coordinates.
///
/// Returns the latitude/longitude of the tile's northwest corner.
#[inline]
pub fn tile_to_lat_lon(address: &TileAddress) -> (f64, f64) {
    let n = 2.0_f64.powi(i32::from(address.z));

    let lon = f64::from(address.x) / n * 360.0 - 180.0;

    // Inverse Web Mercator for the row fraction
    let y = f64::from(address.y) / n;
    let lat = (PI * (1.0 - 2.0 * y)).sinh().atan().to_degrees();

    (lat, lon)
}

/// Tile column containing a longitude, clamped to the grid at zoom `z`.
fn clamped_col(lon: f64, z: u8) -> u32 {
    let n = 2.0_f64.powi(i32::from(z));
    let col = ((lon + 180.0) / 360.0 * n) as u32;
    col.min(last_index(z))
}

/// Tile row containing a latitude, clamped to the grid at zoom `z`.
///
/// Latitudes beyond the Web Mercator range map to the edge rows.
fn clamped_row(lat: f64, z: u8) -> u32 {
    let n = 2.0_f64.powi(i32::from(z));
    let lat_rad = lat.clamp(MIN_LAT, MAX_LAT).to_radians();
    let row = ((1.0 - lat_rad.tan().asinh() / PI) / 2.0 * n) as u32;
    row.min(last_index(z))
}

/// Largest valid column/row index at zoom `z`.
fn last_index(z: u8) -> u32 {
    // z is validated to MAX_ZOOM (22) everywhere, so the shift cannot overflow
    (1u32 << z) - 1
}

/// Grid coverage of a region at one zoom level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ZoomBounds {
    /// First (northernmost) row, inclusive.
    row_start: u32,
    /// Last (southernmost) row, inclusive.
    row_end: u32,
    /// One or two inclusive column spans, in emission order.
    spans: [(u32, u32); 2],
    span_count: usize,
}

fn zoom_bounds(region: &MapRegion, z: u8) -> ZoomBounds {
    let row_start = clamped_row(region.north, z);
    let row_end = clamped_row(region.south, z);
    let west_col = clamped_col(region.west, z);
    let east_col = clamped_col(region.east, z);
    let last = last_index(z);

    let (spans, span_count) = if region.crosses_antimeridian() {
        if west_col <= east_col {
            // Both edges land in overlapping columns at this zoom, so the
            // two spans would cover every column anyway. Emit one span to
            // keep the enumeration free of duplicates.
            ([(0, last), (0, 0)], 1)
        } else {
            // West of the antimeridian first, then the wrapped-around part
            ([(west_col, last), (0, east_col)], 2)
        }
    } else {
        ([(west_col, east_col), (0, 0)], 1)
    };

    ZoomBounds {
        row_start,
        row_end,
        spans,
        span_count,
    }
}

/// Computes the number of tiles [`RegionTiles`] would yield, without
/// iterating.
///
/// The count is derived from the same per-zoom grid bounds the iterator
/// uses, so it always matches the iterator exactly. Callers use it to
/// size a download before any work starts.
pub fn count_region_tiles(region: &MapRegion, min_z: u8, max_z: u8) -> Result<u64, CoordError> {
    validate_zoom_range(min_z, max_z)?;

    let mut total = 0u64;
    for z in min_z..=max_z {
        let bounds = zoom_bounds(region, z);
        let rows = u64::from(bounds.row_end - bounds.row_start) + 1;
        let mut cols = 0u64;
        for (lo, hi) in &bounds.spans[..bounds.span_count] {
            cols += u64::from(hi - lo) + 1;
        }
        total += rows * cols;
    }
    Ok(total)
}

fn validate_zoom_range(min_z: u8, max_z: u8) -> Result<(), CoordError> {
    if max_z > MAX_ZOOM {
        return Err(CoordError::InvalidZoom(max_z));
    }
    if min_z > max_z {
        return Err(CoordError::InvalidZoomRange { min_z, max_z });
    }
    Ok(())
}

/// Deterministic iterator over every tile covering a region across a
/// zoom range.
///
/// Emission order: ascending zoom; within a zoom, rows north to south;
/// within a row, columns west to east. A region crossing the
/// antimeridian emits the columns west of the crossing before the
/// wrapped-around columns on each row.
#[derive(Debug, Clone)]
pub struct RegionTiles {
    region: MapRegion,
    max_z: u8,
    scale: TileScale,
    z: u8,
    bounds: ZoomBounds,
    row: u32,
    span: usize,
    col: u32,
    exhausted: bool,
}

impl RegionTiles {
    /// Creates an enumeration of `region` over `min_z..=max_z`.
    pub fn new(region: MapRegion, min_z: u8, max_z: u8) -> Result<Self, CoordError> {
        validate_zoom_range(min_z, max_z)?;
        let bounds = zoom_bounds(&region, min_z);
        Ok(Self {
            region,
            max_z,
            scale: TileScale::Standard,
            z: min_z,
            row: bounds.row_start,
            span: 0,
            col: bounds.spans[0].0,
            bounds,
            exhausted: false,
        })
    }

    /// Emits addresses with the given scale variant.
    pub fn with_scale(mut self, scale: TileScale) -> Self {
        self.scale = scale;
        self
    }

    fn advance(&mut self) {
        let (_, hi) = self.bounds.spans[self.span];
        if self.col < hi {
            self.col += 1;
            return;
        }

        self.span += 1;
        if self.span < self.bounds.span_count {
            self.col = self.bounds.spans[self.span].0;
            return;
        }

        self.span = 0;
        if self.row < self.bounds.row_end {
            self.row += 1;
            self.col = self.bounds.spans[0].0;
            return;
        }

        if self.z >= self.max_z {
            self.exhausted = true;
            return;
        }
        self.z += 1;
        self.bounds = zoom_bounds(&self.region, self.z);
        self.row = self.bounds.row_start;
        self.col = self.bounds.spans[0].0;
    }
}

impl Iterator for RegionTiles {
    type Item = TileAddress;

    fn next(&mut self) -> Option<TileAddress> {
        if self.exhausted {
            return None;
        }
        let address = TileAddress {
            z: self.z,
            x: self.col,
            y: self.row,
            scale: self.scale,
        };
        self.advance();
        Some(address)
    }
}
