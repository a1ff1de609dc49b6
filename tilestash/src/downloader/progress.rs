//! Shared progress counters for a running download job.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Counters updated by the job driver and readable from any thread.
#[derive(Debug, Default)]
pub struct ProgressCounters {
    expected: AtomicU64,
    written: AtomicU64,
    failed: AtomicU64,
}

impl ProgressCounters {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Sets the total number of resources the job will attempt.
    pub fn set_expected(&self, expected: u64) {
        self.expected.store(expected, Ordering::SeqCst);
    }

    /// Records one resource written durably; returns the new total.
    pub fn record_written(&self) -> u64 {
        self.written.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Records one resource that failed recoverably; returns the new
    /// total.
    pub fn record_failed(&self) -> u64 {
        self.failed.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            expected: self.expected.load(Ordering::SeqCst),
            written: self.written.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
        }
    }
}

/// Point-in-time view of a job's progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressSnapshot {
    /// Resources the job expects to attempt in total.
    pub expected: u64,
    /// Resources written durably so far.
    pub written: u64,
    /// Resources that failed recoverably so far.
    pub failed: u64,
}

impl ProgressSnapshot {
    /// Resources that have reached a final outcome.
    pub fn settled(&self) -> u64 {
        self.written + self.failed
    }
}
