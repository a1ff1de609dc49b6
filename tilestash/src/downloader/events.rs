//! Download progress events.

use std::fmt;

use tokio::sync::mpsc;
use tracing::trace;

use super::{DownloadError, DownloadState, OfflineMap};
use crate::source::FetchError;
use crate::store::ResourceKind;

/// Event emitted while a download job runs.
///
/// Events arrive on the channel returned by
/// [`super::OfflineMapDownloader::start`] in a fixed order: a state
/// change is observable before the expected total, the total before any
/// progress, and [`DownloadEvent::Completed`] is the final event of a
/// job.
#[derive(Debug)]
pub enum DownloadEvent {
    /// The downloader's state changed.
    StateChanged(DownloadState),
    /// The job computed how many resources it will attempt.
    TotalExpected(u64),
    /// One more resource was written durably.
    Progress { written: u64, expected: u64 },
    /// A single resource failed; the job continues without it.
    RecoverableError(RecoverableError),
    /// The job finished. On success the completed store is delivered as
    /// a readable [`OfflineMap`].
    Completed(Result<OfflineMap, DownloadError>),
}

/// A per-resource failure that did not stop the job.
#[derive(Debug)]
pub struct RecoverableError {
    /// What kind of resource failed.
    pub kind: ResourceKind,
    /// The resource's store key.
    pub key: String,
    /// The fetch failure.
    pub error: FetchError,
}

impl fmt::Display for RecoverableError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.kind, self.key, self.error)
    }
}

/// Sending half of the event channel.
///
/// Sends never block; a dropped receiver only drops the events.
#[derive(Debug, Clone)]
pub(crate) struct EventSender {
    tx: mpsc::UnboundedSender<DownloadEvent>,
}

impl EventSender {
    pub(crate) fn new() -> (Self, mpsc::UnboundedReceiver<DownloadEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub(crate) fn send(&self, event: DownloadEvent) {
        if self.tx.send(event).is_err() {
            trace!("event receiver dropped; discarding event");
        }
    }
}
