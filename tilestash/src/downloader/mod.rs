//! Offline map downloading.
//!
//! The coordinator owns a single job slot and the set of discoverable
//! offline maps:
//!
//! ```text
//!   OfflineMapDownloader ──── begin/suspend/resume/cancel
//!        │                           │ watch::channel(JobControl)
//!        │ slot (at most one)        ▼
//!        │                      JobDriver ──── JoinSet worker pool
//!        │                           │              │ fetch + put
//!        │ discoverable maps         ▼              ▼
//!        └── OfflineMap ◀─────── JobOutcome     DiskTileStore
//! ```
//!
//! Control calls return immediately; outcomes and progress arrive on
//! one notification channel in a fixed order (state change before
//! totals, totals before progress, completion last).

mod events;
mod job;
mod markers;
mod progress;
mod state;

pub use events::{DownloadEvent, RecoverableError};
pub use job::JobSpec;
pub use progress::{ProgressCounters, ProgressSnapshot};
pub use state::DownloadState;

use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use events::EventSender;
use job::{JobControl, JobDriver, JobOutcome};

use crate::backup;
use crate::config::DownloaderConfig;
use crate::coord::{CoordError, TileAddress};
use crate::overzoom::{self, CropRect, OverzoomError};
use crate::source::{FetchError, TileSource};
use crate::store::{
    discover_stores, DiskTileStore, ResourceKind, StoreError, StoreHeader, MARKER_INDEX_KEY,
    METADATA_KEY,
};

/// Terminal failure of a download job.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// The job was canceled; its partial store was deleted.
    #[error("download canceled")]
    Canceled,

    /// The network became unreachable; the partial store is retained.
    #[error("network failure: {0}")]
    Network(#[from] FetchError),

    /// The store could not be written or finalized; the partial store
    /// is retained.
    #[error("store failure: {0}")]
    Store(#[from] StoreError),

    /// A download worker failed unexpectedly.
    #[error("{0}")]
    Internal(String),
}

/// Rejection of a [`OfflineMapDownloader::begin`] call.
#[derive(Debug, Error)]
pub enum BeginError {
    /// Another job occupies the slot; the running job is unaffected.
    #[error("a download job is already {0}")]
    Busy(DownloadState),

    /// The region or zoom range is unusable.
    #[error(transparent)]
    InvalidSpec(#[from] CoordError),

    /// The job's store could not be created.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Failure reading a tile from an [`OfflineMap`].
#[derive(Debug, Error)]
pub enum TileReadError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Overzoom(#[from] OverzoomError),
}

/// Coordinator for offline map downloads.
///
/// Owns at most one active [`JobSpec`] at a time and the set of
/// discoverable (complete) stores under the configured data directory.
/// Cheap to clone; clones share the job slot and map set.
#[derive(Clone)]
pub struct OfflineMapDownloader {
    inner: Arc<DownloaderInner>,
}

struct DownloaderInner {
    config: DownloaderConfig,
    source: Arc<dyn TileSource>,
    events: EventSender,
    slot: Mutex<ActiveSlot>,
    maps: DashMap<String, OfflineMap>,
}

#[derive(Default)]
struct ActiveSlot {
    state: DownloadState,
    control: Option<watch::Sender<JobControl>>,
    progress: Option<Arc<ProgressCounters>>,
}

impl OfflineMapDownloader {
    /// Creates a downloader, prepares the data directory, and scans it
    /// for existing complete stores.
    ///
    /// Returns the coordinator and the notification channel every job
    /// and state event is delivered on.
    pub async fn start(
        config: DownloaderConfig,
        source: Arc<dyn TileSource>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<DownloadEvent>), StoreError> {
        tokio::fs::create_dir_all(&config.data_dir)
            .await
            .map_err(|e| StoreError::io(&config.data_dir, e))?;

        if let Err(e) = backup::apply(&config.data_dir, config.exclude_from_backup).await {
            warn!(error = %e, "failed to update backup-exclusion tag");
        }

        let (events, receiver) = EventSender::new();
        let maps = DashMap::new();
        for (store, header) in discover_stores(&config.data_dir).await? {
            maps.insert(store.id().to_string(), OfflineMap { header, store });
        }
        info!(
            data_dir = %config.data_dir.display(),
            maps = maps.len(),
            "offline map downloader started"
        );

        let downloader = Self {
            inner: Arc::new(DownloaderInner {
                config,
                source,
                events,
                slot: Mutex::new(ActiveSlot::default()),
                maps,
            }),
        };
        Ok((downloader, receiver))
    }

    /// Begins a download job.
    ///
    /// Work items are enumerated and counted before any I/O, the job's
    /// store is created, and `StateChanged(Running)` followed by
    /// `TotalExpected` are emitted before this returns. Fetch progress
    /// then arrives asynchronously on the event channel, ending with
    /// one `Completed` event.
    pub async fn begin(&self, spec: JobSpec) -> Result<(), BeginError> {
        {
            let slot = self.inner.slot.lock();
            if !slot.state.can_begin() {
                debug!(state = %slot.state, "begin rejected; a job is already active");
                return Err(BeginError::Busy(slot.state));
            }
        }

        // The expected total is fixed here, before any network activity
        let items = spec.work_items()?;
        let expected = items.len() as u64;

        let store = DiskTileStore::create(&self.inner.config.data_dir, &spec.header()).await?;

        let (control_tx, control_rx) = watch::channel(JobControl::Run);
        let progress = ProgressCounters::new();
        progress.set_expected(expected);

        {
            let mut slot = self.inner.slot.lock();
            if !slot.state.can_begin() {
                // Lost a begin race while creating the store
                let state = slot.state;
                drop(slot);
                debug!(store_id = %store.id(), "begin raced; discarding fresh store");
                if let Err(e) = store.remove().await {
                    warn!(error = %e, "failed to remove store of raced begin");
                }
                return Err(BeginError::Busy(state));
            }
            slot.state = DownloadState::Running;
            slot.control = Some(control_tx);
            slot.progress = Some(Arc::clone(&progress));

            // Emitted under the slot lock so no later event overtakes
            // the state change or the total.
            self.inner
                .events
                .send(DownloadEvent::StateChanged(DownloadState::Running));
            self.inner.events.send(DownloadEvent::TotalExpected(expected));
        }

        let driver = JobDriver {
            spec,
            items,
            store,
            source: Arc::clone(&self.inner.source),
            events: self.inner.events.clone(),
            progress,
            control: control_rx,
            worker_count: self.inner.config.worker_count,
        };
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let outcome = driver.run().await;
            inner.finalize(outcome).await;
        });
        Ok(())
    }

    /// Suspends the active job: no new fetches are dispatched, fetches
    /// already in flight finish and are still written. No-op unless a
    /// job is running.
    pub fn suspend(&self) {
        let mut slot = self.inner.slot.lock();
        if !slot.state.can_suspend() {
            debug!(state = %slot.state, "suspend ignored");
            return;
        }
        if let Some(control) = &slot.control {
            let _ = control.send(JobControl::Pause);
        }
        slot.state = DownloadState::Suspended;
        self.inner
            .events
            .send(DownloadEvent::StateChanged(DownloadState::Suspended));
    }

    /// Resumes a suspended job. No-op unless a job is suspended.
    pub fn resume(&self) {
        let mut slot = self.inner.slot.lock();
        if !slot.state.can_resume() {
            debug!(state = %slot.state, "resume ignored");
            return;
        }
        if let Some(control) = &slot.control {
            let _ = control.send(JobControl::Run);
        }
        slot.state = DownloadState::Running;
        self.inner
            .events
            .send(DownloadEvent::StateChanged(DownloadState::Running));
    }

    /// Cancels the active job: in-flight fetches drain, their results
    /// are discarded, and the partial store is deleted. No-op unless a
    /// job is running or suspended.
    pub fn cancel(&self) {
        let mut slot = self.inner.slot.lock();
        if !slot.state.can_cancel() {
            debug!(state = %slot.state, "cancel ignored");
            return;
        }
        if let Some(control) = &slot.control {
            let _ = control.send(JobControl::Cancel);
        }
        slot.state = DownloadState::Canceling;
        self.inner
            .events
            .send(DownloadEvent::StateChanged(DownloadState::Canceling));
    }

    /// Current state of the job slot.
    pub fn state(&self) -> DownloadState {
        self.inner.slot.lock().state
    }

    /// Progress of the active job, if any.
    pub fn progress(&self) -> Option<ProgressSnapshot> {
        self.inner
            .slot
            .lock()
            .progress
            .as_ref()
            .map(|p| p.snapshot())
    }

    /// The discoverable offline maps, oldest first.
    pub fn offline_maps(&self) -> Vec<OfflineMap> {
        let mut maps: Vec<OfflineMap> = self
            .inner
            .maps
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        maps.sort_by(|a, b| a.header.created_at.cmp(&b.header.created_at));
        maps
    }

    /// Looks up a discoverable map by store ID.
    pub fn offline_map(&self, store_id: &str) -> Option<OfflineMap> {
        self.inner.maps.get(store_id).map(|entry| entry.value().clone())
    }

    /// Deletes a discoverable offline map.
    ///
    /// The store is invalidated and its directory removed before the
    /// map leaves the discoverable set, so handles obtained through
    /// this coordinator observe invalidation, never half-deleted data.
    /// Unknown IDs are a no-op.
    pub async fn remove_offline_map(&self, store_id: &str) -> Result<(), StoreError> {
        let map = match self.offline_map(store_id) {
            Some(map) => map,
            None => {
                debug!(store_id, "remove ignored; unknown store");
                return Ok(());
            }
        };
        map.store.remove().await?;
        self.inner.maps.remove(store_id);
        info!(store_id, "offline map removed");
        Ok(())
    }
}

impl DownloaderInner {
    /// Runs once per job, after the driver settles: finalizes or cleans
    /// up the store, then releases the slot and emits the closing
    /// events.
    async fn finalize(&self, outcome: JobOutcome) {
        let result = match outcome {
            JobOutcome::Completed {
                store,
                native_max_z,
                written,
                expected,
            } => match store.mark_complete(native_max_z, expected, written).await {
                Ok(header) => {
                    let map = OfflineMap { header, store };
                    self.maps.insert(map.store_id().to_string(), map.clone());
                    Ok(map)
                }
                Err(e) => Err(DownloadError::Store(e)),
            },
            JobOutcome::Canceled { store } => {
                if let Err(e) = store.remove().await {
                    warn!(store_id = %store.id(), error = %e, "failed to delete canceled store");
                }
                Err(DownloadError::Canceled)
            }
            JobOutcome::Failed {
                store,
                error,
                written,
                expected,
            } => {
                // The partial store stays on disk for inspection;
                // record how far the job got.
                if let Err(e) = store.record_totals(expected, written).await {
                    warn!(store_id = %store.id(), error = %e, "failed to record progress totals");
                }
                Err(error)
            }
        };

        let mut slot = self.slot.lock();
        slot.state = DownloadState::Available;
        slot.control = None;
        slot.progress = None;
        self.events
            .send(DownloadEvent::StateChanged(DownloadState::Available));
        self.events.send(DownloadEvent::Completed(result));
    }
}

/// Read handle to one offline store.
///
/// Handles are cheap to clone and read without locking: complete stores
/// are logically read-only, and blobs are whole files renamed into
/// place.
#[derive(Debug, Clone)]
pub struct OfflineMap {
    header: StoreHeader,
    store: DiskTileStore,
}

/// A resolved tile read: the stored blob plus the crop to apply when
/// the request overzoomed past native coverage.
#[derive(Debug, Clone)]
pub struct TileRead {
    /// Raster bytes of the source tile.
    pub data: Bytes,
    /// Address the bytes were stored under.
    pub source: TileAddress,
    /// Sub-square of the source covering the requested tile;
    /// [`CropRect::FULL`] when no overzoom was needed.
    pub crop: CropRect,
}

impl OfflineMap {
    /// The store's unique ID.
    pub fn store_id(&self) -> &str {
        self.store.id()
    }

    /// The header describing what was downloaded.
    pub fn header(&self) -> &StoreHeader {
        &self.header
    }

    /// Reads the tile covering `address`.
    ///
    /// Requests beyond the store's native maximum zoom resolve to the
    /// stored ancestor tile plus a crop rectangle; the caller upsamples
    /// the crop when rendering.
    pub async fn read_tile(&self, address: TileAddress) -> Result<TileRead, TileReadError> {
        let (source, crop) = overzoom::resolve(address, self.header.native_max_z)?;
        let data = self.store.get_tile(&source).await?;
        Ok(TileRead { data, source, crop })
    }

    /// The stored TileJSON metadata, if the download included it.
    pub async fn metadata(&self) -> Result<Bytes, StoreError> {
        self.store.get(ResourceKind::Metadata, METADATA_KEY).await
    }

    /// The stored marker overlay, if the download included it.
    pub async fn marker_index(&self) -> Result<Bytes, StoreError> {
        self.store
            .get(ResourceKind::MarkerIndex, MARKER_INDEX_KEY)
            .await
    }

    /// A stored marker icon by file name.
    pub async fn marker_icon(&self, name: &str) -> Result<Bytes, StoreError> {
        self.store.get(ResourceKind::MarkerIcon, name).await
    }

    /// Number of tiles currently on disk.
    pub async fn tile_count(&self) -> Result<u64, StoreError> {
        self.store.tile_count().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coord::{MapRegion, TileScale};
    use crate::source::ImageQuality;
    use tempfile::TempDir;

    async fn completed_map(root: &std::path::Path, native_max_z: u8) -> OfflineMap {
        let header = StoreHeader::new(
            "examples.map-pgygbwdm",
            MapRegion::WORLD,
            0,
            native_max_z,
            ImageQuality::Full,
            TileScale::Standard,
            false,
            false,
        );
        let store = DiskTileStore::create(root, &header).await.unwrap();
        for z in 0..=native_max_z {
            let side = 1u32 << z;
            for y in 0..side {
                for x in 0..side {
                    let address = TileAddress::new(z, x, y).unwrap();
                    store.put_tile(&address, b"tile").await.unwrap();
                }
            }
        }
        let header = store.mark_complete(native_max_z, 5, 5).await.unwrap();
        OfflineMap { header, store }
    }

    #[tokio::test]
    async fn test_read_tile_at_native_zoom() {
        let root = TempDir::new().unwrap();
        let map = completed_map(root.path(), 1).await;

        let read = map
            .read_tile(TileAddress::new(1, 1, 0).unwrap())
            .await
            .unwrap();
        assert_eq!(read.source, TileAddress::new(1, 1, 0).unwrap());
        assert!(read.crop.is_full());
        assert_eq!(&read.data[..], b"tile");
    }

    #[tokio::test]
    async fn test_read_tile_overzoomed() {
        let root = TempDir::new().unwrap();
        let map = completed_map(root.path(), 1).await;

        // zoom 3 against native max 1: delta 2
        let read = map
            .read_tile(TileAddress::new(3, 5, 6).unwrap())
            .await
            .unwrap();
        assert_eq!(read.source, TileAddress::new(1, 1, 1).unwrap());
        assert_eq!(read.crop.size, 0.25);
        assert_eq!(read.crop.x, 0.25);
        assert_eq!(read.crop.y, 0.5);
    }

    #[tokio::test]
    async fn test_read_tile_without_native_zoom_is_no_coverage() {
        let root = TempDir::new().unwrap();
        let header = StoreHeader::new(
            "examples.map-pgygbwdm",
            MapRegion::WORLD,
            0,
            1,
            ImageQuality::Full,
            TileScale::Standard,
            false,
            false,
        );
        let store = DiskTileStore::create(root.path(), &header).await.unwrap();
        let map = OfflineMap { header, store };

        let result = map.read_tile(TileAddress::new(5, 1, 1).unwrap()).await;
        assert!(matches!(
            result,
            Err(TileReadError::Overzoom(OverzoomError::NoCoverage))
        ));
    }

    #[tokio::test]
    async fn test_read_tile_after_removal_is_invalid() {
        let root = TempDir::new().unwrap();
        let map = completed_map(root.path(), 1).await;
        let held = map.clone();

        map.store.remove().await.unwrap();

        let result = held.read_tile(TileAddress::new(0, 0, 0).unwrap()).await;
        assert!(matches!(
            result,
            Err(TileReadError::Store(StoreError::Invalid { .. }))
        ));
    }
}
