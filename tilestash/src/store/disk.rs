//! Disk-backed tile store with durable writes.
//!
//! Layout of one store directory:
//!
//! ```text
//! <data_dir>/<store_id>/
//!   store.json                  header (see [`StoreHeader`])
//!   metadata.json               TileJSON metadata, if downloaded
//!   markers.geojson             marker overlay, if downloaded
//!   markers/<icon>.png          marker icon images
//!   tiles/<z>/<x>/<y>[@2x].<ext>
//! ```
//!
//! Every write lands in a sibling `.part` file, is fsynced, then
//! renamed into place, so a resource either exists completely or not at
//! all. Only the download job writes to a store, and it writes each key
//! exactly once.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use rand::Rng;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use super::header::StoreHeader;
use super::{ResourceKind, StoreError};
use crate::coord::{TileAddress, TileScale};
use crate::source::ImageQuality;

const HEADER_FILE: &str = "store.json";
const TILES_DIR: &str = "tiles";
const MARKERS_DIR: &str = "markers";
const METADATA_FILE: &str = "metadata.json";
const MARKER_INDEX_FILE: &str = "markers.geojson";

/// Handle to one store directory.
///
/// Cheap to clone; all clones share the invalidation flag, so
/// invalidating any handle fails every other handle's next operation.
#[derive(Debug, Clone)]
pub struct DiskTileStore {
    inner: Arc<StoreInner>,
}

#[derive(Debug)]
struct StoreInner {
    id: String,
    dir: PathBuf,
    quality: ImageQuality,
    tile_scale: TileScale,
    invalid: AtomicBool,
}

impl DiskTileStore {
    /// Creates a new store directory under `root` and persists `header`.
    pub async fn create(root: &Path, header: &StoreHeader) -> Result<Self, StoreError> {
        let id = generate_store_id();
        let dir = root.join(&id);
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| StoreError::io(&dir, e))?;

        let store = Self {
            inner: Arc::new(StoreInner {
                id,
                dir,
                quality: header.quality,
                tile_scale: header.tile_scale,
                invalid: AtomicBool::new(false),
            }),
        };
        store.write_header(header).await?;
        debug!(store_id = %store.id(), dir = %store.dir().display(), "created store");
        Ok(store)
    }

    /// Opens an existing store directory.
    pub async fn open(dir: &Path) -> Result<(Self, StoreHeader), StoreError> {
        let header = load_header(&dir.join(HEADER_FILE)).await?;
        let id = match dir.file_name().and_then(|n| n.to_str()) {
            Some(name) => name.to_string(),
            None => {
                return Err(StoreError::CorruptHeader {
                    path: dir.to_path_buf(),
                    reason: "store directory has no usable name".into(),
                })
            }
        };

        let store = Self {
            inner: Arc::new(StoreInner {
                id,
                dir: dir.to_path_buf(),
                quality: header.quality,
                tile_scale: header.tile_scale,
                invalid: AtomicBool::new(false),
            }),
        };
        Ok((store, header))
    }

    /// The store's unique identifier (its directory name).
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Absolute path of the store directory.
    pub fn dir(&self) -> &Path {
        &self.inner.dir
    }

    /// Whether this store has been invalidated.
    pub fn is_invalid(&self) -> bool {
        self.inner.invalid.load(Ordering::SeqCst)
    }

    /// Marks the store invalid. Idempotent and safe to call from any
    /// thread; every subsequent operation on any handle fails with
    /// [`StoreError::Invalid`].
    pub fn invalidate(&self) {
        if !self.inner.invalid.swap(true, Ordering::SeqCst) {
            debug!(store_id = %self.inner.id, "store invalidated");
        }
    }

    /// Invalidates the store and deletes its directory.
    ///
    /// Succeeds when the directory is already gone, so concurrent or
    /// repeated removal is safe.
    pub async fn remove(&self) -> Result<(), StoreError> {
        self.invalidate();
        match fs::remove_dir_all(&self.inner.dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::io(&self.inner.dir, e)),
        }
    }

    /// Writes one resource durably.
    ///
    /// The data is flushed to its `.part` sibling, fsynced, and renamed
    /// into place before this returns, so a success means the bytes
    /// survive a crash.
    pub async fn put(&self, kind: ResourceKind, key: &str, data: &[u8]) -> Result<(), StoreError> {
        self.check_valid()?;
        let path = self.entry_path(kind, key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| self.map_io(parent, e))?;
        }

        let tmp = path.with_extension("part");
        let mut file = fs::File::create(&tmp)
            .await
            .map_err(|e| self.map_io(&tmp, e))?;
        file.write_all(data).await.map_err(|e| self.map_io(&tmp, e))?;
        file.sync_all().await.map_err(|e| self.map_io(&tmp, e))?;
        drop(file);

        fs::rename(&tmp, &path)
            .await
            .map_err(|e| self.map_io(&path, e))
    }

    /// Reads one resource.
    pub async fn get(&self, kind: ResourceKind, key: &str) -> Result<Bytes, StoreError> {
        self.check_valid()?;
        let path = self.entry_path(kind, key);
        match fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                // The whole directory may have vanished under us after
                // an invalidation; report that rather than a miss.
                if self.is_invalid() {
                    Err(self.invalid_error())
                } else {
                    Err(StoreError::NotFound {
                        kind,
                        key: key.to_string(),
                    })
                }
            }
            Err(e) => Err(self.map_io(&path, e)),
        }
    }

    /// Whether a resource exists, without reading it.
    pub async fn contains(&self, kind: ResourceKind, key: &str) -> Result<bool, StoreError> {
        self.check_valid()?;
        let path = self.entry_path(kind, key);
        fs::try_exists(&path).await.map_err(|e| self.map_io(&path, e))
    }

    /// Writes the tile at `address` under the store's tile layout.
    pub async fn put_tile(&self, address: &TileAddress, data: &[u8]) -> Result<(), StoreError> {
        self.put(ResourceKind::Tile, &self.tile_key(address), data)
            .await
    }

    /// Reads the tile at `address`.
    pub async fn get_tile(&self, address: &TileAddress) -> Result<Bytes, StoreError> {
        self.get(ResourceKind::Tile, &self.tile_key(address)).await
    }

    /// Counts the tiles currently on disk.
    pub async fn tile_count(&self) -> Result<u64, StoreError> {
        self.check_valid()?;
        let mut stack = vec![self.inner.dir.join(TILES_DIR)];
        let mut count = 0u64;

        while let Some(dir) = stack.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(self.map_io(&dir, e)),
            };
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| self.map_io(&dir, e))?
            {
                let path = entry.path();
                let file_type = entry.file_type().await.map_err(|e| self.map_io(&path, e))?;
                if file_type.is_dir() {
                    stack.push(path);
                } else if path.extension().map_or(true, |ext| ext != "part") {
                    count += 1;
                }
            }
        }
        Ok(count)
    }

    /// Re-reads the persisted header.
    pub async fn read_header(&self) -> Result<StoreHeader, StoreError> {
        load_header(&self.inner.dir.join(HEADER_FILE)).await
    }

    /// Finalizes the header after a completed download.
    pub(crate) async fn mark_complete(
        &self,
        native_max_z: u8,
        total_expected: u64,
        total_written: u64,
    ) -> Result<StoreHeader, StoreError> {
        let mut header = self.read_header().await?;
        header.native_max_z = Some(native_max_z);
        header.complete = true;
        header.total_expected = total_expected;
        header.total_written = total_written;
        self.write_header(&header).await?;
        Ok(header)
    }

    /// Records progress totals without marking the store complete. Used
    /// when a job aborts but the store is retained.
    pub(crate) async fn record_totals(
        &self,
        total_expected: u64,
        total_written: u64,
    ) -> Result<(), StoreError> {
        let mut header = self.read_header().await?;
        header.total_expected = total_expected;
        header.total_written = total_written;
        self.write_header(&header).await
    }

    async fn write_header(&self, header: &StoreHeader) -> Result<(), StoreError> {
        let path = self.inner.dir.join(HEADER_FILE);
        let raw = serde_json::to_vec_pretty(header)
            .map_err(|e| StoreError::io(&path, io::Error::new(io::ErrorKind::InvalidData, e)))?;

        let tmp = path.with_extension("part");
        let mut file = fs::File::create(&tmp)
            .await
            .map_err(|e| StoreError::io(&tmp, e))?;
        file.write_all(&raw)
            .await
            .map_err(|e| StoreError::io(&tmp, e))?;
        file.sync_all().await.map_err(|e| StoreError::io(&tmp, e))?;
        drop(file);

        fs::rename(&tmp, &path)
            .await
            .map_err(|e| StoreError::io(&path, e))
    }

    /// Relative tile key for an address, using the store's own scale.
    fn tile_key(&self, address: &TileAddress) -> String {
        format!(
            "{}/{}/{}{}",
            address.z,
            address.x,
            address.y,
            self.inner.tile_scale.suffix()
        )
    }

    fn entry_path(&self, kind: ResourceKind, key: &str) -> PathBuf {
        match kind {
            ResourceKind::Tile => self
                .inner
                .dir
                .join(TILES_DIR)
                .join(format!("{}.{}", key, self.inner.quality.file_extension())),
            ResourceKind::Metadata => self.inner.dir.join(METADATA_FILE),
            ResourceKind::MarkerIndex => self.inner.dir.join(MARKER_INDEX_FILE),
            ResourceKind::MarkerIcon => self.inner.dir.join(MARKERS_DIR).join(key),
        }
    }

    fn check_valid(&self) -> Result<(), StoreError> {
        if self.is_invalid() {
            Err(self.invalid_error())
        } else {
            Ok(())
        }
    }

    fn invalid_error(&self) -> StoreError {
        StoreError::Invalid {
            store_id: self.inner.id.clone(),
        }
    }

    /// Wraps an I/O failure, preferring the invalidation error when the
    /// store was invalidated while the operation was in flight.
    fn map_io(&self, path: &Path, error: io::Error) -> StoreError {
        if self.is_invalid() {
            self.invalid_error()
        } else {
            StoreError::io(path, error)
        }
    }
}

async fn load_header(path: &Path) -> Result<StoreHeader, StoreError> {
    let raw = fs::read(path).await.map_err(|e| StoreError::io(path, e))?;
    serde_json::from_slice(&raw).map_err(|e| StoreError::CorruptHeader {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Scans `root` for complete stores.
///
/// Unreadable directories are logged and skipped; incomplete stores
/// (downloads that never finished) are skipped silently. Results are
/// ordered by creation time, oldest first.
pub async fn discover_stores(root: &Path) -> Result<Vec<(DiskTileStore, StoreHeader)>, StoreError> {
    let mut entries = match fs::read_dir(root).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(StoreError::io(root, e)),
    };

    let mut found = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| StoreError::io(root, e))?
    {
        let path = entry.path();
        let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
        if !is_dir {
            continue;
        }
        match DiskTileStore::open(&path).await {
            Ok((store, header)) => {
                if header.complete {
                    found.push((store, header));
                } else {
                    debug!(path = %path.display(), "skipping incomplete store");
                }
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "skipping unreadable store directory");
            }
        }
    }

    found.sort_by(|a, b| a.1.created_at.cmp(&b.1.created_at));
    Ok(found)
}

fn generate_store_id() -> String {
    format!("{:032x}", rand::rng().random::<u128>())
}
