//! Download job lifecycle states.

use std::fmt;

/// State of the downloader's single job slot.
///
/// ```text
///             begin                suspend
///  Available ───────▶ Running ◀──────────▶ Suspended
///      ▲                 │      resume         │
///      │                 │ cancel              │ cancel
///      │                 ▼                     │
///      └──────────── Canceling ◀───────────────┘
///         cleanup
/// ```
///
/// Transitions requested from the wrong state are ignored, so callers
/// never need to synchronize their control calls with job progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DownloadState {
    /// No job active; a new download may begin.
    #[default]
    Available,
    /// A job is dispatching fetches.
    Running,
    /// A job is paused: no new fetches start, already fetched results
    /// are still written.
    Suspended,
    /// A job is shutting down after a cancel; its store is being
    /// deleted.
    Canceling,
}

impl DownloadState {
    /// Whether a new job may begin.
    pub fn can_begin(&self) -> bool {
        matches!(self, DownloadState::Available)
    }

    /// Whether a suspend request applies.
    pub fn can_suspend(&self) -> bool {
        matches!(self, DownloadState::Running)
    }

    /// Whether a resume request applies.
    pub fn can_resume(&self) -> bool {
        matches!(self, DownloadState::Suspended)
    }

    /// Whether a cancel request applies.
    pub fn can_cancel(&self) -> bool {
        matches!(self, DownloadState::Running | DownloadState::Suspended)
    }

    /// Whether a job currently occupies the slot.
    pub fn is_active(&self) -> bool {
        !matches!(self, DownloadState::Available)
    }
}

impl fmt::Display for DownloadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DownloadState::Available => "available",
            DownloadState::Running => "running",
            DownloadState::Suspended => "suspended",
            DownloadState::Canceling => "canceling",
        };
        write!(f, "{}", name)
    }
}
