//! Store header: the JSON document describing what a store holds.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::coord::{MapRegion, TileScale};
use crate::source::ImageQuality;

/// Descriptor persisted as `store.json` in every store directory.
///
/// Written when a download job creates the store and finalized when the
/// job completes. `complete` stays `false` for the whole download, so a
/// crash mid-job leaves a directory that discovery skips.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreHeader {
    /// Hosted map identifier the store was downloaded from.
    pub map_id: String,
    /// Geographic region the download covered.
    pub region: MapRegion,
    /// Lowest downloaded zoom level.
    pub min_z: u8,
    /// Highest downloaded zoom level.
    pub max_z: u8,
    /// Raster format of the stored tiles.
    pub quality: ImageQuality,
    /// Scale variant of the stored tiles.
    pub tile_scale: TileScale,
    /// Whether the job fetched the map's TileJSON metadata.
    pub include_metadata: bool,
    /// Whether the job fetched the marker overlay and its icons.
    pub include_markers: bool,
    /// When the store was created.
    pub created_at: DateTime<Utc>,
    /// Highest zoom actually covered, set on completion. Requests above
    /// it are answered by overzooming; `None` means the download never
    /// finished and overzoom cannot be resolved.
    #[serde(default)]
    pub native_max_z: Option<u8>,
    /// Whether the download ran to completion.
    #[serde(default)]
    pub complete: bool,
    /// Resources the job expected to fetch.
    #[serde(default)]
    pub total_expected: u64,
    /// Resources actually written.
    #[serde(default)]
    pub total_written: u64,
}

impl StoreHeader {
    /// Creates the header for a freshly started download.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        map_id: &str,
        region: MapRegion,
        min_z: u8,
        max_z: u8,
        quality: ImageQuality,
        tile_scale: TileScale,
        include_metadata: bool,
        include_markers: bool,
    ) -> Self {
        Self {
            map_id: map_id.to_string(),
            region,
            min_z,
            max_z,
            quality,
            tile_scale,
            include_metadata,
            include_markers,
            created_at: Utc::now(),
            native_max_z: None,
            complete: false,
            total_expected: 0,
            total_written: 0,
        }
    }
}
