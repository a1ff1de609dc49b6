//! Downloader configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

/// Default number of concurrent fetch workers.
pub const DEFAULT_WORKER_COUNT: usize = 8;

/// Default per-request fetch timeout in seconds.
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;

/// Default user agent presented to tile servers.
pub const DEFAULT_USER_AGENT: &str = concat!("tilestash/", env!("CARGO_PKG_VERSION"));

/// Configuration loading failure.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read or parsed.
    #[error("cannot read config file {path}: {reason}")]
    Read { path: String, reason: String },

    /// A config value does not parse or is out of range.
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}

/// Settings for an [`crate::downloader::OfflineMapDownloader`].
#[derive(Debug, Clone)]
pub struct DownloaderConfig {
    /// Root directory holding one subdirectory per store.
    pub data_dir: PathBuf,
    /// Concurrent fetch workers per job.
    pub worker_count: usize,
    /// Per-request fetch timeout.
    pub fetch_timeout: Duration,
    /// User agent for HTTP tile sources.
    pub user_agent: String,
    /// Whether the data directory is tagged for backup exclusion.
    pub exclude_from_backup: bool,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            worker_count: DEFAULT_WORKER_COUNT,
            fetch_timeout: Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            exclude_from_backup: true,
        }
    }
}

impl DownloaderConfig {
    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    /// Sets the worker pool size; clamped to at least one worker.
    pub fn with_worker_count(mut self, count: usize) -> Self {
        self.worker_count = count.max(1);
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn with_user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = agent.into();
        self
    }

    pub fn with_backup_exclusion(mut self, excluded: bool) -> Self {
        self.exclude_from_backup = excluded;
        self
    }

    /// Loads overrides from an INI file on top of the defaults.
    ///
    /// ```ini
    /// [download]
    /// workers = 16
    /// timeout_secs = 45
    /// user_agent = my-app/2.0
    ///
    /// [storage]
    /// data_dir = /var/lib/tilestash
    /// exclude_from_backup = false
    /// ```
    ///
    /// Absent sections and keys keep their defaults.
    pub fn load_from_ini(path: &Path) -> Result<Self, ConfigError> {
        let ini = ini::Ini::load_from_file(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let mut config = Self::default();

        if let Some(section) = ini.section(Some("download")) {
            if let Some(value) = section.get("workers") {
                let workers = parse_value::<usize>("download.workers", value)?;
                if workers == 0 {
                    return Err(ConfigError::InvalidValue {
                        key: "download.workers".into(),
                        value: value.to_string(),
                    });
                }
                config.worker_count = workers;
            }
            if let Some(value) = section.get("timeout_secs") {
                let secs = parse_value::<u64>("download.timeout_secs", value)?;
                config.fetch_timeout = Duration::from_secs(secs);
            }
            if let Some(value) = section.get("user_agent") {
                config.user_agent = value.to_string();
            }
        }

        if let Some(section) = ini.section(Some("storage")) {
            if let Some(value) = section.get("data_dir") {
                config.data_dir = PathBuf::from(value);
            }
            if let Some(value) = section.get("exclude_from_backup") {
                config.exclude_from_backup =
                    parse_value::<bool>("storage.exclude_from_backup", value)?;
            }
        }

        Ok(config)
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tilestash")
}
