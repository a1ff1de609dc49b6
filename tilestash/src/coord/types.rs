//! Core types for tile addressing and geographic regions.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Minimum latitude representable in the Web Mercator projection.
pub const MIN_LAT: f64 = -85.05112878;

/// Maximum latitude representable in the Web Mercator projection.
pub const MAX_LAT: f64 = 85.05112878;

/// Minimum longitude in degrees.
pub const MIN_LON: f64 = -180.0;

/// Maximum longitude in degrees.
pub const MAX_LON: f64 = 180.0;

/// Minimum supported zoom level.
pub const MIN_ZOOM: u8 = 0;

/// Maximum supported zoom level.
pub const MAX_ZOOM: u8 = 22;

/// Errors from coordinate validation and region enumeration.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CoordError {
    /// Latitude outside the valid geographic range.
    #[error("invalid latitude {0} (must be within [-90, 90])")]
    InvalidLatitude(f64),

    /// Longitude outside the valid geographic range.
    #[error("invalid longitude {0} (must be within [-180, 180])")]
    InvalidLongitude(f64),

    /// Zoom level beyond the supported maximum.
    #[error("invalid zoom level {0} (maximum is {MAX_ZOOM})")]
    InvalidZoom(u8),

    /// Zoom range with minimum above maximum.
    #[error("invalid zoom range {min_z}..={max_z}")]
    InvalidZoomRange { min_z: u8, max_z: u8 },

    /// Tile column or row outside the grid at the given zoom.
    #[error("tile ({x}, {y}) out of range at zoom {z}")]
    TileOutOfRange { z: u8, x: u32, y: u32 },

    /// Region bounds that do not describe a valid bounding box.
    #[error("invalid region: {0}")]
    InvalidRegion(String),
}

/// Device scale factor for raster tiles.
///
/// Tile services serve each address in a standard and a high-density
/// (`@2x`) variant; the variant is part of the tile URL and of the
/// on-disk key, so it is carried on [`TileAddress`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum TileScale {
    /// Standard-resolution tiles.
    #[default]
    Standard,
    /// High-density tiles, served with an `@2x` suffix.
    Retina,
}

impl TileScale {
    /// Suffix appended to the tile path in URLs and storage keys.
    pub fn suffix(&self) -> &'static str {
        match self {
            TileScale::Standard => "",
            TileScale::Retina => "@2x",
        }
    }
}

/// Address of a single raster tile in the standard XYZ grid.
///
/// `x` counts columns west to east, `y` counts rows north to south,
/// both in `0..2^z`. [`TileAddress::new`] enforces that invariant;
/// the fields stay public for pattern matching and display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileAddress {
    /// Zoom level.
    pub z: u8,
    /// Column, west to east.
    pub x: u32,
    /// Row, north to south.
    pub y: u32,
    /// Device scale variant.
    pub scale: TileScale,
}

impl TileAddress {
    /// Creates a validated standard-scale tile address.
    pub fn new(z: u8, x: u32, y: u32) -> Result<Self, CoordError> {
        if z > MAX_ZOOM {
            return Err(CoordError::InvalidZoom(z));
        }
        let side = 1u64 << z;
        if u64::from(x) >= side || u64::from(y) >= side {
            return Err(CoordError::TileOutOfRange { z, x, y });
        }
        Ok(Self {
            z,
            x,
            y,
            scale: TileScale::Standard,
        })
    }

    /// Returns the same address with a different scale variant.
    pub fn with_scale(mut self, scale: TileScale) -> Self {
        self.scale = scale;
        self
    }
}

impl fmt::Display for TileAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}{}", self.z, self.x, self.y, self.scale.suffix())
    }
}

/// Geographic bounding box in degrees.
///
/// `west` greater than `east` means the region crosses the antimeridian.
/// Latitudes may extend beyond the Web Mercator range; enumeration
/// clamps them to the tile grid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MapRegion {
    pub north: f64,
    pub south: f64,
    pub east: f64,
    pub west: f64,
}

impl MapRegion {
    /// The whole-world region.
    pub const WORLD: MapRegion = MapRegion {
        north: 90.0,
        south: -90.0,
        east: 180.0,
        west: -180.0,
    };

    /// Creates a validated region.
    ///
    /// Requires `south < north`; longitudes must lie in `[-180, 180]`
    /// but `west > east` is legal and denotes an antimeridian crossing.
    pub fn new(north: f64, south: f64, east: f64, west: f64) -> Result<Self, CoordError> {
        for lat in [north, south] {
            if !(-90.0..=90.0).contains(&lat) {
                return Err(CoordError::InvalidLatitude(lat));
            }
        }
        for lon in [east, west] {
            if !(MIN_LON..=MAX_LON).contains(&lon) {
                return Err(CoordError::InvalidLongitude(lon));
            }
        }
        if south >= north {
            return Err(CoordError::InvalidRegion(format!(
                "south ({}) must be below north ({})",
                south, north
            )));
        }
        Ok(Self {
            north,
            south,
            east,
            west,
        })
    }

    /// Whether the region wraps across the antimeridian.
    pub fn crosses_antimeridian(&self) -> bool {
        self.west > self.east
    }
}

impl fmt::Display for MapRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{:.4}, {:.4}] x [{:.4}, {:.4}]",
            self.south, self.north, self.west, self.east
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tile_address_valid() {
        let addr = TileAddress::new(3, 7, 0).unwrap();
        assert_eq!(addr.z, 3);
        assert_eq!(addr.x, 7);
        assert_eq!(addr.y, 0);
        assert_eq!(addr.scale, TileScale::Standard);
    }

    #[test]
    fn test_tile_address_rejects_out_of_range() {
        let result = TileAddress::new(3, 8, 0);
        assert!(matches!(
            result,
            Err(CoordError::TileOutOfRange { z: 3, x: 8, y: 0 })
        ));
    }

    #[test]
    fn test_tile_address_rejects_excess_zoom() {
        let result = TileAddress::new(MAX_ZOOM + 1, 0, 0);
        assert!(matches!(result, Err(CoordError::InvalidZoom(_))));
    }

    #[test]
    fn test_tile_address_zoom_zero_single_tile() {
        assert!(TileAddress::new(0, 0, 0).is_ok());
        assert!(TileAddress::new(0, 1, 0).is_err());
        assert!(TileAddress::new(0, 0, 1).is_err());
    }

    #[test]
    fn test_tile_address_display() {
        let addr = TileAddress::new(5, 12, 9).unwrap();
        assert_eq!(addr.to_string(), "5/12/9");
        assert_eq!(addr.with_scale(TileScale::Retina).to_string(), "5/12/9@2x");
    }

    #[test]
    fn test_scale_suffix() {
        assert_eq!(TileScale::Standard.suffix(), "");
        assert_eq!(TileScale::Retina.suffix(), "@2x");
    }

    #[test]
    fn test_region_valid() {
        let region = MapRegion::new(48.0, 47.0, 9.0, 8.0).unwrap();
        assert!(!region.crosses_antimeridian());
    }

    #[test]
    fn test_region_antimeridian() {
        // Fiji area: west of the antimeridian to east of it
        let region = MapRegion::new(-15.0, -20.0, -178.0, 177.0).unwrap();
        assert!(region.crosses_antimeridian());
    }

    #[test]
    fn test_region_rejects_inverted_latitudes() {
        let result = MapRegion::new(10.0, 20.0, 5.0, 0.0);
        assert!(matches!(result, Err(CoordError::InvalidRegion(_))));
    }

    #[test]
    fn test_region_rejects_bad_longitude() {
        let result = MapRegion::new(10.0, 0.0, 200.0, 0.0);
        assert!(matches!(result, Err(CoordError::InvalidLongitude(_))));
    }

    #[test]
    fn test_world_region_is_valid() {
        let world = MapRegion::WORLD;
        assert!(MapRegion::new(world.north, world.south, world.east, world.west).is_ok());
    }
}
