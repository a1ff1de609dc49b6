//! Batch download job driver.
//!
//! One job pulls its work items through a bounded worker pool, writing
//! each fetched resource durably to the job's store. The driver owns
//! the lifecycle between dispatch and settlement:
//!
//! - pause stops dispatch; in-flight fetches finish and are written
//! - cancel stops dispatch; in-flight fetches finish and are discarded
//! - a recoverable fetch failure settles its item and the job goes on
//! - a fatal failure stops dispatch and drains, keeping the partial
//!   store on disk
//!
//! The driver never touches the downloader's state machine; it reports
//! a [`JobOutcome`] and the coordinator finalizes from there.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::events::{DownloadEvent, EventSender, RecoverableError};
use super::markers;
use super::progress::ProgressCounters;
use super::DownloadError;
use crate::coord::{CoordError, MapRegion, RegionTiles, TileAddress, TileScale};
use crate::source::{FetchError, ImageQuality, TileSource};
use crate::store::{
    DiskTileStore, ResourceKind, StoreError, StoreHeader, MARKER_INDEX_KEY, METADATA_KEY,
};

/// Parameters of one batch download.
#[derive(Debug, Clone)]
pub struct JobSpec {
    /// Hosted map identifier to download from.
    pub map_id: String,
    /// Region to cover.
    pub region: MapRegion,
    /// Lowest zoom level to fetch.
    pub min_z: u8,
    /// Highest zoom level to fetch.
    pub max_z: u8,
    /// Raster quality variant.
    pub quality: ImageQuality,
    /// Tile scale variant.
    pub tile_scale: TileScale,
    /// Also fetch the map's TileJSON metadata.
    pub include_metadata: bool,
    /// Also fetch the marker overlay and its icons.
    pub include_markers: bool,
}

impl JobSpec {
    /// Enumerates the job's work items in dispatch order: tiles in
    /// region-enumeration order, then metadata, then markers. The
    /// length of the result is the job's expected total, fixed before
    /// any network activity.
    pub(crate) fn work_items(&self) -> Result<Vec<WorkItem>, CoordError> {
        let tiles = RegionTiles::new(self.region, self.min_z, self.max_z)?
            .with_scale(self.tile_scale);
        let mut items: Vec<WorkItem> = tiles.map(WorkItem::Tile).collect();
        if self.include_metadata {
            items.push(WorkItem::Metadata);
        }
        if self.include_markers {
            items.push(WorkItem::Markers);
        }
        Ok(items)
    }

    /// Builds the store header describing this job.
    pub(crate) fn header(&self) -> StoreHeader {
        StoreHeader::new(
            &self.map_id,
            self.region,
            self.min_z,
            self.max_z,
            self.quality,
            self.tile_scale,
            self.include_metadata,
            self.include_markers,
        )
    }
}

/// Control signal the coordinator sends to the running job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum JobControl {
    Run,
    Pause,
    Cancel,
}

/// One unit of fetch-and-store work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WorkItem {
    Tile(TileAddress),
    Metadata,
    Markers,
}

/// Terminal result of a job, handed to the coordinator for cleanup.
#[derive(Debug)]
pub(crate) enum JobOutcome {
    /// Every work item settled and the job was not canceled.
    Completed {
        store: DiskTileStore,
        native_max_z: u8,
        written: u64,
        expected: u64,
    },
    /// The job was canceled; the partial store must be deleted.
    Canceled { store: DiskTileStore },
    /// A fatal failure aborted the job; the partial store is retained.
    Failed {
        store: DiskTileStore,
        error: DownloadError,
        written: u64,
        expected: u64,
    },
}

/// Everything a job needs to run, assembled by the coordinator.
pub(crate) struct JobDriver {
    pub(crate) spec: JobSpec,
    pub(crate) items: Vec<WorkItem>,
    pub(crate) store: DiskTileStore,
    pub(crate) source: Arc<dyn TileSource>,
    pub(crate) events: EventSender,
    pub(crate) progress: Arc<ProgressCounters>,
    pub(crate) control: watch::Receiver<JobControl>,
    pub(crate) worker_count: usize,
}

impl JobDriver {
    pub(crate) async fn run(self) -> JobOutcome {
        let JobDriver {
            spec,
            items,
            store,
            source,
            events,
            progress,
            mut control,
            worker_count,
        } = self;

        let expected = items.len() as u64;
        let mut queue: VecDeque<WorkItem> = items.into();
        let mut in_flight: JoinSet<ItemResult> = JoinSet::new();
        let cancel_token = CancellationToken::new();

        let mut canceled = false;
        let mut controller_gone = false;
        let mut fatal: Option<DownloadError> = None;

        info!(
            map_id = %spec.map_id,
            store_id = %store.id(),
            expected,
            workers = worker_count,
            "download job started"
        );

        loop {
            let ctl = *control.borrow();
            if ctl == JobControl::Cancel && !canceled {
                canceled = true;
                cancel_token.cancel();
                debug!(store_id = %store.id(), "cancel observed; draining in-flight fetches");
            }

            if ctl == JobControl::Run && !canceled && fatal.is_none() {
                while in_flight.len() < worker_count {
                    let item = match queue.pop_front() {
                        Some(item) => item,
                        None => break,
                    };
                    in_flight.spawn(fetch_item(
                        item,
                        Arc::clone(&source),
                        store.clone(),
                        cancel_token.clone(),
                    ));
                }
            }

            if in_flight.is_empty() && (canceled || fatal.is_some() || queue.is_empty()) {
                break;
            }

            tokio::select! {
                biased;

                changed = control.changed(), if !controller_gone => {
                    if changed.is_err() {
                        // The coordinator dropped the control channel;
                        // treat it as a cancel so the partial store
                        // never outlives its owner.
                        controller_gone = true;
                        if !canceled {
                            canceled = true;
                            cancel_token.cancel();
                        }
                    }
                }

                Some(result) = in_flight.join_next(), if !in_flight.is_empty() => {
                    match result {
                        Ok(_) if canceled => {
                            debug!("discarding fetch result after cancel");
                        }
                        Ok(item_result) => {
                            for icon_error in item_result.icon_errors {
                                warn!(error = %icon_error, "marker icon failed; continuing");
                                events.send(DownloadEvent::RecoverableError(icon_error));
                            }
                            match item_result.outcome {
                                ItemOutcome::Written => {
                                    let written = progress.record_written();
                                    events.send(DownloadEvent::Progress { written, expected });
                                }
                                ItemOutcome::Discarded => {
                                    debug!("discarding fetch result after cancel");
                                }
                                ItemOutcome::Recoverable(error) => {
                                    warn!(error = %error, "resource failed; continuing");
                                    progress.record_failed();
                                    events.send(DownloadEvent::RecoverableError(error));
                                }
                                ItemOutcome::Fatal(error) => {
                                    if fatal.is_none() {
                                        warn!(error = %error, "fatal failure; aborting job");
                                        fatal = Some(error);
                                    }
                                }
                            }
                        }
                        Err(join_error) => {
                            if fatal.is_none() {
                                fatal = Some(DownloadError::Internal(format!(
                                    "download worker panicked: {}",
                                    join_error
                                )));
                            }
                        }
                    }
                }
            }
        }

        let written = progress.snapshot().written;
        if canceled {
            info!(store_id = %store.id(), "download job canceled");
            JobOutcome::Canceled { store }
        } else if let Some(error) = fatal {
            warn!(
                store_id = %store.id(),
                written,
                expected,
                error = %error,
                "download job failed"
            );
            JobOutcome::Failed {
                store,
                error,
                written,
                expected,
            }
        } else {
            info!(store_id = %store.id(), written, expected, "download job completed");
            JobOutcome::Completed {
                store,
                native_max_z: spec.max_z,
                written,
                expected,
            }
        }
    }
}

/// Per-item result reported back to the driver.
struct ItemResult {
    outcome: ItemOutcome,
    /// Recoverable per-icon failures from a markers item; the item
    /// itself still settles once.
    icon_errors: Vec<RecoverableError>,
}

enum ItemOutcome {
    /// Fetched and written durably.
    Written,
    /// Finished after a cancel; nothing was written.
    Discarded,
    /// Failed recoverably; the job continues without this resource.
    Recoverable(RecoverableError),
    /// The job must abort.
    Fatal(DownloadError),
}

impl ItemResult {
    fn written() -> Self {
        Self {
            outcome: ItemOutcome::Written,
            icon_errors: Vec::new(),
        }
    }

    fn discarded() -> Self {
        Self {
            outcome: ItemOutcome::Discarded,
            icon_errors: Vec::new(),
        }
    }

    fn store_failure(error: StoreError) -> Self {
        Self {
            outcome: ItemOutcome::Fatal(DownloadError::Store(error)),
            icon_errors: Vec::new(),
        }
    }

    /// Settles a failed fetch: recoverable errors settle the item,
    /// connect-level errors abort the job.
    fn fetch_failure(kind: ResourceKind, key: String, error: FetchError) -> Self {
        let outcome = if error.is_recoverable() {
            ItemOutcome::Recoverable(RecoverableError { kind, key, error })
        } else {
            ItemOutcome::Fatal(DownloadError::Network(error))
        };
        Self {
            outcome,
            icon_errors: Vec::new(),
        }
    }
}

async fn fetch_item(
    item: WorkItem,
    source: Arc<dyn TileSource>,
    store: DiskTileStore,
    cancel: CancellationToken,
) -> ItemResult {
    match item {
        WorkItem::Tile(address) => fetch_tile(address, source.as_ref(), &store, &cancel).await,
        WorkItem::Metadata => fetch_metadata(source.as_ref(), &store, &cancel).await,
        WorkItem::Markers => fetch_markers(source.as_ref(), &store, &cancel).await,
    }
}

async fn fetch_tile(
    address: TileAddress,
    source: &dyn TileSource,
    store: &DiskTileStore,
    cancel: &CancellationToken,
) -> ItemResult {
    let data = match source.fetch_tile(address).await {
        Ok(data) => data,
        Err(e) => return ItemResult::fetch_failure(ResourceKind::Tile, address.to_string(), e),
    };
    if cancel.is_cancelled() {
        return ItemResult::discarded();
    }
    match store.put_tile(&address, &data).await {
        Ok(()) => ItemResult::written(),
        Err(e) => ItemResult::store_failure(e),
    }
}

async fn fetch_metadata(
    source: &dyn TileSource,
    store: &DiskTileStore,
    cancel: &CancellationToken,
) -> ItemResult {
    let data = match source.fetch_metadata().await {
        Ok(data) => data,
        Err(e) => {
            return ItemResult::fetch_failure(ResourceKind::Metadata, METADATA_KEY.to_string(), e)
        }
    };
    if cancel.is_cancelled() {
        return ItemResult::discarded();
    }
    match store.put(ResourceKind::Metadata, METADATA_KEY, &data).await {
        Ok(()) => ItemResult::written(),
        Err(e) => ItemResult::store_failure(e),
    }
}

/// The markers work item: index plus every referenced icon.
async fn fetch_markers(
    source: &dyn TileSource,
    store: &DiskTileStore,
    cancel: &CancellationToken,
) -> ItemResult {
    let index = match source.fetch_marker_index().await {
        Ok(data) => data,
        Err(e) => {
            return ItemResult::fetch_failure(
                ResourceKind::MarkerIndex,
                MARKER_INDEX_KEY.to_string(),
                e,
            )
        }
    };

    // A malformed overlay is recoverable, like any bad single resource
    let icons = match markers::icon_names(&index) {
        Ok(icons) => icons,
        Err(e) => {
            return ItemResult::fetch_failure(
                ResourceKind::MarkerIndex,
                MARKER_INDEX_KEY.to_string(),
                e,
            )
        }
    };

    if cancel.is_cancelled() {
        return ItemResult::discarded();
    }
    if let Err(e) = store.put(ResourceKind::MarkerIndex, MARKER_INDEX_KEY, &index).await {
        return ItemResult::store_failure(e);
    }

    let mut icon_errors = Vec::new();
    for icon in icons {
        if cancel.is_cancelled() {
            return ItemResult {
                outcome: ItemOutcome::Discarded,
                icon_errors,
            };
        }
        let data = match source.fetch_marker_icon(&icon).await {
            Ok(data) => data,
            Err(e) if e.is_recoverable() => {
                icon_errors.push(RecoverableError {
                    kind: ResourceKind::MarkerIcon,
                    key: icon,
                    error: e,
                });
                continue;
            }
            Err(e) => {
                return ItemResult {
                    outcome: ItemOutcome::Fatal(DownloadError::Network(e)),
                    icon_errors,
                }
            }
        };
        if cancel.is_cancelled() {
            return ItemResult {
                outcome: ItemOutcome::Discarded,
                icon_errors,
            };
        }
        if let Err(e) = store.put(ResourceKind::MarkerIcon, &icon, &data).await {
            return ItemResult {
                outcome: ItemOutcome::Fatal(DownloadError::Store(e)),
                icon_errors,
            };
        }
    }

    ItemResult {
        outcome: ItemOutcome::Written,
        icon_errors,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(include_metadata: bool, include_markers: bool) -> JobSpec {
        JobSpec {
            map_id: "examples.map-pgygbwdm".into(),
            region: MapRegion::WORLD,
            min_z: 0,
            max_z: 1,
            quality: ImageQuality::Full,
            tile_scale: TileScale::Standard,
            include_metadata,
            include_markers,
        }
    }

    #[test]
    fn test_work_items_tiles_only() {
        let items = spec(false, false).work_items().unwrap();
        // world: 1 tile at z0 + 4 at z1
        assert_eq!(items.len(), 5);
        assert!(items.iter().all(|i| matches!(i, WorkItem::Tile(_))));
    }

    #[test]
    fn test_work_items_auxiliaries_come_last_in_order() {
        let items = spec(true, true).work_items().unwrap();
        assert_eq!(items.len(), 7);
        assert_eq!(items[5], WorkItem::Metadata);
        assert_eq!(items[6], WorkItem::Markers);
    }

    #[test]
    fn test_work_items_carry_tile_scale() {
        let mut s = spec(false, false);
        s.tile_scale = TileScale::Retina;
        let items = s.work_items().unwrap();
        match items[0] {
            WorkItem::Tile(address) => assert_eq!(address.scale, TileScale::Retina),
            _ => panic!("expected a tile item"),
        }
    }

    #[test]
    fn test_work_items_rejects_bad_zoom_range() {
        let mut s = spec(false, false);
        s.min_z = 5;
        s.max_z = 3;
        assert!(s.work_items().is_err());
    }

    #[test]
    fn test_header_mirrors_spec() {
        let header = spec(true, false).header();
        assert_eq!(header.map_id, "examples.map-pgygbwdm");
        assert_eq!((header.min_z, header.max_z), (0, 1));
        assert!(header.include_metadata);
        assert!(!header.include_markers);
        assert!(!header.complete);
    }
}
