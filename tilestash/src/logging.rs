//! Logging setup for binaries embedding the library.
//!
//! The library itself only emits `tracing` events; installing a
//! subscriber is the host's decision. These helpers install the
//! standard one: compact format, `RUST_LOG`-style filtering with an
//! `info` default, local RFC 3339 timestamps.

use std::io;
use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::LocalTime;
use tracing_subscriber::EnvFilter;

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Installs a compact stderr subscriber.
///
/// Panics if a global subscriber is already installed, so call it once
/// at startup.
pub fn init() {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_timer(LocalTime::rfc_3339())
        .with_writer(io::stderr)
        .compact()
        .init();
}

/// Installs a subscriber writing to `path` instead of stderr.
///
/// Writes go through a non-blocking appender; the returned guard
/// flushes buffered lines when dropped, so keep it alive for the
/// process lifetime.
pub fn init_with_file(path: &Path) -> io::Result<WorkerGuard> {
    let file = std::fs::File::create(path)?;
    let (writer, guard) = tracing_appender::non_blocking(file);
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_timer(LocalTime::rfc_3339())
        .with_writer(writer)
        .with_ansi(false)
        .compact()
        .init();
    Ok(guard)
}
