//! Integration tests for the offline map downloader.
//!
//! These tests drive the public coordinator API end to end against a
//! scripted in-memory tile source:
//! - job lifecycle and the notification ordering guarantees
//! - recoverable versus fatal fetch failures
//! - cancel and suspend/resume control flow
//! - store discovery and removal
//!
//! Run with: `cargo test --test downloader_integration`

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::Semaphore;
use tokio::time::{timeout, Instant};

use tilestash::store::discover_stores;
use tilestash::{
    BeginError, DownloadError, DownloadEvent, DownloadState, DownloaderConfig, FetchError,
    ImageQuality, JobSpec, MapRegion, OfflineMapDownloader, ResourceKind, StoreError, TileAddress,
    TileReadError, TileScale, TileSource,
};

// ============================================================================
// Scripted Tile Source
// ============================================================================

const TILE_BYTES: &[u8] = b"\x89PNG\r\n\x1a\ntile";
const METADATA_BYTES: &[u8] = br#"{"tilejson":"2.1.0","minzoom":0,"maxzoom":1}"#;
const ICON_BYTES: &[u8] = b"\x89PNG\r\n\x1a\nicon";
const MARKER_INDEX_BYTES: &[u8] = br##"{"type":"FeatureCollection","features":[{"type":"Feature","properties":{"marker-size":"medium","marker-symbol":"star","marker-color":"#ff0000"}},{"type":"Feature","properties":{"marker-size":"large"}}]}"##;

/// How a scripted address should fail.
#[derive(Debug, Clone, Copy)]
enum TileReply {
    /// HTTP 404: recoverable, the job continues.
    NotFound,
    /// Connection refused: fatal, the job aborts.
    ConnectRefused,
}

/// In-memory [`TileSource`] with per-address failure scripting, a fetch
/// counter, and an optional gate that holds every fetch until the test
/// releases permits.
struct ScriptedSource {
    failures: HashMap<TileAddress, TileReply>,
    fetches: AtomicUsize,
    gate: Option<Arc<Semaphore>>,
}

impl ScriptedSource {
    fn ok() -> Self {
        Self {
            failures: HashMap::new(),
            fetches: AtomicUsize::new(0),
            gate: None,
        }
    }

    fn failing(address: TileAddress, reply: TileReply) -> Self {
        let mut source = Self::ok();
        source.failures.insert(address, reply);
        source
    }

    fn gated(gate: Arc<Semaphore>) -> Self {
        let mut source = Self::ok();
        source.gate = Some(gate);
        source
    }

    /// Fetch calls started so far, gated or not.
    fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    async fn enter_fetch(&self) {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            let _permit = gate.acquire().await.expect("gate semaphore closed");
        }
    }
}

impl TileSource for ScriptedSource {
    fn fetch_tile<'a>(&'a self, address: TileAddress) -> BoxFuture<'a, Result<Bytes, FetchError>> {
        Box::pin(async move {
            self.enter_fetch().await;
            match self.failures.get(&address) {
                Some(TileReply::NotFound) => Err(FetchError::Http {
                    status: 404,
                    url: format!("mock://tiles/{}", address),
                }),
                Some(TileReply::ConnectRefused) => {
                    Err(FetchError::Connect("connection refused".to_string()))
                }
                None => Ok(Bytes::from_static(TILE_BYTES)),
            }
        })
    }

    fn fetch_metadata<'a>(&'a self) -> BoxFuture<'a, Result<Bytes, FetchError>> {
        Box::pin(async move {
            self.enter_fetch().await;
            Ok(Bytes::from_static(METADATA_BYTES))
        })
    }

    fn fetch_marker_index<'a>(&'a self) -> BoxFuture<'a, Result<Bytes, FetchError>> {
        Box::pin(async move {
            self.enter_fetch().await;
            Ok(Bytes::from_static(MARKER_INDEX_BYTES))
        })
    }

    fn fetch_marker_icon<'a>(&'a self, _name: &'a str) -> BoxFuture<'a, Result<Bytes, FetchError>> {
        Box::pin(async move {
            self.enter_fetch().await;
            Ok(Bytes::from_static(ICON_BYTES))
        })
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// A world-covering job spec from zoom 0 to `max_z`: 5 tiles at
/// `max_z = 1`, 1 tile at `max_z = 0`.
fn world_spec(max_z: u8) -> JobSpec {
    JobSpec {
        map_id: "examples.map-pgygbwdm".to_string(),
        region: MapRegion::WORLD,
        min_z: 0,
        max_z,
        quality: ImageQuality::Full,
        tile_scale: TileScale::Standard,
        include_metadata: false,
        include_markers: false,
    }
}

fn config_for(dir: &TempDir) -> DownloaderConfig {
    DownloaderConfig::default().with_data_dir(dir.path())
}

/// Receives events until the terminal `Completed` arrives, returning
/// everything received in order.
async fn collect_until_complete(events: &mut UnboundedReceiver<DownloadEvent>) -> Vec<DownloadEvent> {
    let mut seen = Vec::new();
    loop {
        let event = timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("timed out waiting for download events")
            .expect("event channel closed before completion");
        let done = matches!(event, DownloadEvent::Completed(_));
        seen.push(event);
        if done {
            return seen;
        }
    }
}

/// The `written` values of all progress events, in arrival order.
fn progress_values(events: &[DownloadEvent]) -> Vec<u64> {
    events
        .iter()
        .filter_map(|e| match e {
            DownloadEvent::Progress { written, .. } => Some(*written),
            _ => None,
        })
        .collect()
}

/// Polls `probe` until it holds; panics after five seconds.
async fn wait_for(mut probe: impl FnMut() -> bool, what: &str) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !probe() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Number of store directories under the data directory (the
/// backup-exclusion tag file does not count).
async fn store_dir_count(dir: &TempDir) -> usize {
    let mut entries = tokio::fs::read_dir(dir.path()).await.unwrap();
    let mut count = 0;
    while let Some(entry) = entries.next_entry().await.unwrap() {
        if entry.file_type().await.unwrap().is_dir() {
            count += 1;
        }
    }
    count
}

// ============================================================================
// Integration Tests
// ============================================================================

/// A clean run delivers events in the documented order: state change,
/// expected total, monotonic progress, state change back to available,
/// and completion last.
#[tokio::test]
async fn test_successful_download_event_order() {
    let dir = TempDir::new().unwrap();
    let (downloader, mut events) =
        OfflineMapDownloader::start(config_for(&dir), Arc::new(ScriptedSource::ok()))
            .await
            .unwrap();

    downloader.begin(world_spec(1)).await.unwrap();
    let seen = collect_until_complete(&mut events).await;

    assert!(
        matches!(seen[0], DownloadEvent::StateChanged(DownloadState::Running)),
        "first event should be the running state change, got {:?}",
        seen[0]
    );
    assert!(
        matches!(seen[1], DownloadEvent::TotalExpected(5)),
        "expected total should arrive before any progress, got {:?}",
        seen[1]
    );
    assert_eq!(
        progress_values(&seen),
        vec![1, 2, 3, 4, 5],
        "progress should tick once per written resource"
    );
    assert!(
        seen[2..seen.len() - 2]
            .iter()
            .all(|e| matches!(e, DownloadEvent::Progress { .. })),
        "a clean run should emit nothing but progress in between"
    );
    assert!(
        matches!(
            seen[seen.len() - 2],
            DownloadEvent::StateChanged(DownloadState::Available)
        ),
        "the slot should be released before completion is reported"
    );

    let map = match seen.into_iter().last().unwrap() {
        DownloadEvent::Completed(Ok(map)) => map,
        other => panic!("expected successful completion, got {:?}", other),
    };
    assert!(map.header().complete);
    assert_eq!(map.header().total_written, 5);
    assert_eq!(map.header().total_expected, 5);
    assert_eq!(map.header().native_max_z, Some(1));

    // The finished map is discoverable and readable
    assert_eq!(downloader.state(), DownloadState::Available);
    assert_eq!(downloader.offline_maps().len(), 1);
    let read = map
        .read_tile(TileAddress::new(1, 1, 0).unwrap())
        .await
        .unwrap();
    assert_eq!(&read.data[..], TILE_BYTES);
    assert!(read.crop.is_full());
}

/// One missing tile out of five: the job still completes, reports the
/// miss as a recoverable error, and records 4 of 5 written.
#[tokio::test]
async fn test_missing_tile_is_recoverable() {
    let dir = TempDir::new().unwrap();
    let missing = TileAddress::new(1, 1, 1).unwrap();
    let source = ScriptedSource::failing(missing, TileReply::NotFound);
    let (downloader, mut events) = OfflineMapDownloader::start(config_for(&dir), Arc::new(source))
        .await
        .unwrap();

    downloader.begin(world_spec(1)).await.unwrap();
    let seen = collect_until_complete(&mut events).await;

    let recoverable: Vec<_> = seen
        .iter()
        .filter_map(|e| match e {
            DownloadEvent::RecoverableError(err) => Some(err),
            _ => None,
        })
        .collect();
    assert_eq!(recoverable.len(), 1, "exactly one resource failed");
    assert_eq!(recoverable[0].kind, ResourceKind::Tile);
    assert_eq!(recoverable[0].key, "1/1/1");
    assert!(matches!(
        recoverable[0].error,
        FetchError::Http { status: 404, .. }
    ));

    let map = match seen.last().unwrap() {
        DownloadEvent::Completed(Ok(map)) => map.clone(),
        other => panic!("a 404 must not fail the job, got {:?}", other),
    };
    assert!(map.header().complete);
    assert_eq!(map.header().total_written, 4);
    assert_eq!(map.header().total_expected, 5);

    // The other tiles are present; the missing one reads as not found
    assert_eq!(map.tile_count().await.unwrap(), 4);
    let result = map.read_tile(missing).await;
    assert!(matches!(
        result,
        Err(TileReadError::Store(StoreError::NotFound { .. }))
    ));
}

/// A connection-level failure aborts the job. The partial store stays
/// on disk but is not discoverable, and the slot frees up again.
#[tokio::test]
async fn test_connect_failure_is_fatal_and_keeps_store() {
    let dir = TempDir::new().unwrap();
    let source = ScriptedSource::failing(
        TileAddress::new(1, 0, 1).unwrap(),
        TileReply::ConnectRefused,
    );
    let (downloader, mut events) = OfflineMapDownloader::start(config_for(&dir), Arc::new(source))
        .await
        .unwrap();

    downloader.begin(world_spec(1)).await.unwrap();
    let seen = collect_until_complete(&mut events).await;

    match seen.last().unwrap() {
        DownloadEvent::Completed(Err(DownloadError::Network(FetchError::Connect(_)))) => {}
        other => panic!("expected a fatal network failure, got {:?}", other),
    }

    assert_eq!(downloader.state(), DownloadState::Available);
    assert_eq!(store_dir_count(&dir).await, 1, "partial store is retained");
    assert!(
        downloader.offline_maps().is_empty(),
        "an aborted store must not be discoverable"
    );
    assert!(
        discover_stores(dir.path()).await.unwrap().is_empty(),
        "a rescan must skip the incomplete store"
    );
}

/// Cancel drains in-flight fetches, discards their results, deletes the
/// partial store, and reports `Canceled` as the job outcome.
#[tokio::test]
async fn test_cancel_deletes_partial_store() {
    let dir = TempDir::new().unwrap();
    let gate = Arc::new(Semaphore::new(0));
    let (downloader, mut events) =
        OfflineMapDownloader::start(config_for(&dir), Arc::new(ScriptedSource::gated(gate.clone())))
            .await
            .unwrap();

    downloader.begin(world_spec(1)).await.unwrap();

    // Workers are parked at the gate; cancel, then let them drain
    downloader.cancel();
    gate.add_permits(16);

    let seen = collect_until_complete(&mut events).await;
    assert!(
        seen.iter()
            .any(|e| matches!(e, DownloadEvent::StateChanged(DownloadState::Canceling))),
        "the canceling state should be observable"
    );
    assert!(
        progress_values(&seen).is_empty(),
        "results drained after cancel must not count as progress"
    );
    match seen.last().unwrap() {
        DownloadEvent::Completed(Err(DownloadError::Canceled)) => {}
        other => panic!("expected cancellation outcome, got {:?}", other),
    }

    assert_eq!(downloader.state(), DownloadState::Available);
    assert_eq!(store_dir_count(&dir).await, 0, "canceled store is deleted");
    assert!(downloader.offline_maps().is_empty());
}

/// Suspend stops dispatch while in-flight work still lands; resume
/// picks the queue back up and the job completes fully.
#[tokio::test]
async fn test_suspend_halts_dispatch_and_resume_continues() {
    let dir = TempDir::new().unwrap();
    let gate = Arc::new(Semaphore::new(0));
    let source = Arc::new(ScriptedSource::gated(gate.clone()));
    let config = config_for(&dir).with_worker_count(1);
    let shared: Arc<dyn TileSource> = source.clone();
    let (downloader, mut events) = OfflineMapDownloader::start(config, shared).await.unwrap();

    downloader.begin(world_spec(1)).await.unwrap();

    // One worker, parked in its first fetch
    wait_for(|| source.fetch_count() == 1, "the first fetch to start").await;
    downloader.suspend();

    // Release the in-flight fetch; it must still be written
    gate.add_permits(1);
    wait_for(
        || downloader.progress().map(|p| p.written) == Some(1),
        "the in-flight fetch to land",
    )
    .await;

    // Suspended: nothing new is dispatched
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(
        source.fetch_count(),
        1,
        "no new fetches may start while suspended"
    );

    downloader.resume();
    gate.add_permits(16);
    let seen = collect_until_complete(&mut events).await;

    let states: Vec<DownloadState> = seen
        .iter()
        .filter_map(|e| match e {
            DownloadEvent::StateChanged(state) => Some(*state),
            _ => None,
        })
        .collect();
    assert_eq!(
        states,
        vec![
            DownloadState::Running,
            DownloadState::Suspended,
            DownloadState::Running,
            DownloadState::Available,
        ],
        "suspend and resume should both be observable, in order"
    );
    assert_eq!(progress_values(&seen), vec![1, 2, 3, 4, 5]);

    match seen.last().unwrap() {
        DownloadEvent::Completed(Ok(map)) => {
            assert_eq!(map.header().total_written, 5);
        }
        other => panic!("expected successful completion, got {:?}", other),
    }
}

/// Metadata and marker resources ride the same pipeline: one work item
/// each, stored and readable through the finished map.
#[tokio::test]
async fn test_marker_and_metadata_resources_stored() {
    let dir = TempDir::new().unwrap();
    let (downloader, mut events) =
        OfflineMapDownloader::start(config_for(&dir), Arc::new(ScriptedSource::ok()))
            .await
            .unwrap();

    let mut spec = world_spec(0);
    spec.include_metadata = true;
    spec.include_markers = true;
    downloader.begin(spec).await.unwrap();
    let seen = collect_until_complete(&mut events).await;

    assert!(
        matches!(seen[1], DownloadEvent::TotalExpected(3)),
        "one tile, the metadata document, and the marker overlay"
    );
    let map = match seen.last().unwrap() {
        DownloadEvent::Completed(Ok(map)) => map.clone(),
        other => panic!("expected successful completion, got {:?}", other),
    };
    assert_eq!(map.header().total_written, 3);

    assert_eq!(&map.metadata().await.unwrap()[..], METADATA_BYTES);
    assert_eq!(&map.marker_index().await.unwrap()[..], MARKER_INDEX_BYTES);
    assert_eq!(
        &map.marker_icon("pin-m-star+ff0000.png").await.unwrap()[..],
        ICON_BYTES
    );
    assert_eq!(&map.marker_icon("pin-l.png").await.unwrap()[..], ICON_BYTES);
}

/// The downloader owns a single job slot: beginning while a job runs is
/// rejected without disturbing the running job.
#[tokio::test]
async fn test_begin_while_running_is_busy() {
    let dir = TempDir::new().unwrap();
    let gate = Arc::new(Semaphore::new(0));
    let (downloader, mut events) =
        OfflineMapDownloader::start(config_for(&dir), Arc::new(ScriptedSource::gated(gate.clone())))
            .await
            .unwrap();

    downloader.begin(world_spec(1)).await.unwrap();

    let second = downloader.begin(world_spec(0)).await;
    assert!(
        matches!(second, Err(BeginError::Busy(DownloadState::Running))),
        "the second begin must be rejected while the first job runs"
    );
    assert_eq!(
        store_dir_count(&dir).await,
        1,
        "the rejected job must not leave a store behind"
    );

    // Clean shutdown
    downloader.cancel();
    gate.add_permits(16);
    let seen = collect_until_complete(&mut events).await;
    assert!(matches!(
        seen.last().unwrap(),
        DownloadEvent::Completed(Err(DownloadError::Canceled))
    ));
}

/// Control calls in the wrong state are silent no-ops: no state change,
/// no events.
#[tokio::test]
async fn test_control_calls_without_job_are_silent() {
    let dir = TempDir::new().unwrap();
    let (downloader, mut events) =
        OfflineMapDownloader::start(config_for(&dir), Arc::new(ScriptedSource::ok()))
            .await
            .unwrap();

    downloader.suspend();
    downloader.resume();
    downloader.cancel();

    assert_eq!(downloader.state(), DownloadState::Available);
    assert!(
        events.try_recv().is_err(),
        "ignored control calls must not emit events"
    );
}

/// Removing an offline map invalidates handles that are still held and
/// deletes the store directory.
#[tokio::test]
async fn test_remove_offline_map_invalidates_held_handles() {
    let dir = TempDir::new().unwrap();
    let (downloader, mut events) =
        OfflineMapDownloader::start(config_for(&dir), Arc::new(ScriptedSource::ok()))
            .await
            .unwrap();

    downloader.begin(world_spec(0)).await.unwrap();
    let seen = collect_until_complete(&mut events).await;
    let map = match seen.last().unwrap() {
        DownloadEvent::Completed(Ok(map)) => map.clone(),
        other => panic!("expected successful completion, got {:?}", other),
    };
    let held = map.clone();

    downloader.remove_offline_map(map.store_id()).await.unwrap();

    assert!(downloader.offline_maps().is_empty());
    assert_eq!(store_dir_count(&dir).await, 0);
    let result = held.read_tile(TileAddress::new(0, 0, 0).unwrap()).await;
    assert!(
        matches!(result, Err(TileReadError::Store(StoreError::Invalid { .. }))),
        "held handles must observe invalidation, not missing files"
    );

    // Removing an unknown id is a no-op
    downloader.remove_offline_map("does-not-exist").await.unwrap();
}

/// A completed store is rediscovered by a fresh downloader over the
/// same data directory.
#[tokio::test]
async fn test_restart_discovers_completed_store() {
    let dir = TempDir::new().unwrap();
    let store_id;
    {
        let (downloader, mut events) =
            OfflineMapDownloader::start(config_for(&dir), Arc::new(ScriptedSource::ok()))
                .await
                .unwrap();
        downloader.begin(world_spec(1)).await.unwrap();
        let seen = collect_until_complete(&mut events).await;
        store_id = match seen.last().unwrap() {
            DownloadEvent::Completed(Ok(map)) => map.store_id().to_string(),
            other => panic!("expected successful completion, got {:?}", other),
        };
    }

    let (restarted, _events) =
        OfflineMapDownloader::start(config_for(&dir), Arc::new(ScriptedSource::ok()))
            .await
            .unwrap();
    let maps = restarted.offline_maps();
    assert_eq!(maps.len(), 1);
    assert_eq!(maps[0].store_id(), store_id);

    let read = maps[0]
        .read_tile(TileAddress::new(0, 0, 0).unwrap())
        .await
        .unwrap();
    assert_eq!(&read.data[..], TILE_BYTES);
}
