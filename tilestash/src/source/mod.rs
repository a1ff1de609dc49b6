//! Remote tile sources.
//!
//! A [`TileSource`] hands the downloader the bytes for tiles, map
//! metadata, and marker resources. The trait is object-safe so the
//! downloader can run against the bundled HTTP implementation or an
//! in-process fake in tests.

mod http;

pub use http::HttpTileSource;

use bytes::Bytes;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::coord::TileAddress;

/// Raster format and quality variant for fetched tiles.
///
/// The variant selects the file extension used both in request URLs
/// and in the on-disk store layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageQuality {
    /// Full-quality PNG.
    #[default]
    Full,
    /// 32-color indexed PNG.
    Png32,
    /// 64-color indexed PNG.
    Png64,
    /// 128-color indexed PNG.
    Png128,
    /// 256-color indexed PNG.
    Png256,
    /// JPEG at 70% quality.
    Jpeg70,
    /// JPEG at 80% quality.
    Jpeg80,
    /// JPEG at 90% quality.
    Jpeg90,
}

impl ImageQuality {
    /// File extension for this quality, without the leading dot.
    pub fn file_extension(&self) -> &'static str {
        match self {
            ImageQuality::Full => "png",
            ImageQuality::Png32 => "png32",
            ImageQuality::Png64 => "png64",
            ImageQuality::Png128 => "png128",
            ImageQuality::Png256 => "png256",
            ImageQuality::Jpeg70 => "jpg70",
            ImageQuality::Jpeg80 => "jpg80",
            ImageQuality::Jpeg90 => "jpg90",
        }
    }
}

/// Failure fetching a resource from a tile source.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The server answered with a non-success status.
    #[error("HTTP {status} for {url}")]
    Http { status: u16, url: String },

    /// The request timed out.
    #[error("request timed out: {url}")]
    Timeout { url: String },

    /// The connection could not be established or broke down.
    #[error("connection failed: {0}")]
    Connect(String),

    /// The response body could not be interpreted.
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl FetchError {
    /// Whether a download job should keep going after this error.
    ///
    /// Per-resource failures (bad status, timeout, unparseable body)
    /// are recoverable: the job records them and moves on. Connection
    /// failures indicate the network itself is gone and abort the job.
    pub fn is_recoverable(&self) -> bool {
        match self {
            FetchError::Http { .. } | FetchError::Timeout { .. } | FetchError::Malformed(_) => true,
            FetchError::Connect(_) => false,
        }
    }
}

/// Source of tile and map resources.
///
/// All methods return boxed futures so the trait stays object-safe;
/// the downloader holds sources as `Arc<dyn TileSource>`.
pub trait TileSource: Send + Sync {
    /// Fetches the raster tile at `address`.
    fn fetch_tile<'a>(&'a self, address: TileAddress) -> BoxFuture<'a, Result<Bytes, FetchError>>;

    /// Fetches the map's TileJSON metadata document.
    fn fetch_metadata<'a>(&'a self) -> BoxFuture<'a, Result<Bytes, FetchError>>;

    /// Fetches the map's marker overlay as simplestyle GeoJSON.
    fn fetch_marker_index<'a>(&'a self) -> BoxFuture<'a, Result<Bytes, FetchError>>;

    /// Fetches a marker icon image by its resolved file name.
    fn fetch_marker_icon<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<Bytes, FetchError>>;
}
