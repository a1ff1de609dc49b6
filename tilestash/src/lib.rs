//! Offline tile stores with deterministic region downloads and
//! overzoom reads.
//!
//! An [`OfflineMapDownloader`] runs at most one batch download job at a
//! time: it enumerates every tile covering a [`MapRegion`] across a
//! zoom range (the total is fixed before any network activity), pulls
//! the fetches through a bounded worker pool, and writes each resource
//! durably into a per-job store directory. A completed store becomes a
//! discoverable [`OfflineMap`] that answers tile reads with no network
//! at all — including requests beyond the downloaded zoom range, which
//! resolve to a stored ancestor tile plus an exact crop rectangle.
//!
//! ```text
//!  MapRegion + zoom range
//!        │ enumerate (deterministic, counted up front)
//!        ▼
//!  OfflineMapDownloader ──▶ worker pool ──▶ DiskTileStore
//!        │ begin/suspend/resume/cancel         │ complete
//!        ▼                                     ▼
//!  DownloadEvent channel                  OfflineMap ──▶ read_tile
//!  (state, total, progress,                              (overzoom
//!   errors, completion)                                   crop)
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use tilestash::{
//!     DownloadEvent, DownloaderConfig, HttpTileSource, ImageQuality, JobSpec, MapRegion,
//!     OfflineMapDownloader, TileScale,
//! };
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let source = HttpTileSource::new(
//!     "https://tiles.example.com/v4",
//!     "examples.map-pgygbwdm",
//!     ImageQuality::Full,
//!     Duration::from_secs(30),
//!     "my-app/1.0",
//! )?;
//! let (downloader, mut events) =
//!     OfflineMapDownloader::start(DownloaderConfig::default(), Arc::new(source)).await?;
//!
//! downloader
//!     .begin(JobSpec {
//!         map_id: "examples.map-pgygbwdm".into(),
//!         region: MapRegion::new(47.9, 47.4, 9.8, 8.9)?,
//!         min_z: 0,
//!         max_z: 12,
//!         quality: ImageQuality::Full,
//!         tile_scale: TileScale::Standard,
//!         include_metadata: true,
//!         include_markers: false,
//!     })
//!     .await?;
//!
//! while let Some(event) = events.recv().await {
//!     if let DownloadEvent::Completed(result) = event {
//!         let map = result?;
//!         println!("downloaded {} tiles", map.tile_count().await?);
//!         break;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod backup;
pub mod config;
pub mod coord;
pub mod downloader;
pub mod logging;
pub mod overzoom;
pub mod source;
pub mod store;

pub use config::DownloaderConfig;
pub use coord::{count_region_tiles, MapRegion, RegionTiles, TileAddress, TileScale};
pub use downloader::{
    BeginError, DownloadError, DownloadEvent, DownloadState, JobSpec, OfflineMap,
    OfflineMapDownloader, ProgressSnapshot, RecoverableError, TileRead, TileReadError,
};
pub use overzoom::{CropRect, OverzoomError};
pub use source::{FetchError, HttpTileSource, ImageQuality, TileSource};
pub use store::{DiskTileStore, ResourceKind, StoreError, StoreHeader};

/// Library version, from the crate manifest.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
