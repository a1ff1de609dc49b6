//! Durable offline tile stores.
//!
//! A store is one directory holding everything downloaded for a map
//! region: tiles, optional TileJSON metadata, and optional marker
//! resources, described by a header document. Stores are created by
//! download jobs, discovered on startup, and read through
//! [`crate::downloader::OfflineMap`] handles.

mod disk;
mod header;

pub use disk::{discover_stores, DiskTileStore};
pub use header::StoreHeader;

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Key under which a store's metadata document is filed.
pub const METADATA_KEY: &str = "metadata";

/// Key under which a store's marker overlay is filed.
pub const MARKER_INDEX_KEY: &str = "markers";

/// The categories of resource a store holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// A raster map tile.
    Tile,
    /// The map's TileJSON metadata document.
    Metadata,
    /// The marker overlay (simplestyle GeoJSON).
    MarkerIndex,
    /// A marker icon image.
    MarkerIcon,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResourceKind::Tile => "tile",
            ResourceKind::Metadata => "metadata",
            ResourceKind::MarkerIndex => "marker index",
            ResourceKind::MarkerIcon => "marker icon",
        };
        write!(f, "{}", name)
    }
}

/// Store operation failure.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store was invalidated; no further reads or writes are
    /// possible through any handle.
    #[error("store {store_id} has been invalidated")]
    Invalid { store_id: String },

    /// The requested resource is not in the store.
    #[error("{kind} not found: {key}")]
    NotFound { kind: ResourceKind, key: String },

    /// An underlying filesystem operation failed.
    #[error("store I/O failed at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A store header exists but cannot be parsed.
    #[error("unreadable store header at {}: {reason}", path.display())]
    CorruptHeader { path: PathBuf, reason: String },
}

impl StoreError {
    pub(crate) fn io(path: &Path, source: io::Error) -> Self {
        StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}
