//! Common types and utilities shared across CLI commands.

use std::path::{Path, PathBuf};

use clap::ValueEnum;
use tilestash::{DownloaderConfig, ImageQuality, StoreHeader};

use crate::error::CliError;

/// Tile quality selection for CLI arguments.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum QualityArg {
    /// Full-quality PNG
    Full,
    /// 32-color indexed PNG
    Png32,
    /// 64-color indexed PNG
    Png64,
    /// 128-color indexed PNG
    Png128,
    /// 256-color indexed PNG
    Png256,
    /// JPEG at 70% quality
    Jpeg70,
    /// JPEG at 80% quality
    Jpeg80,
    /// JPEG at 90% quality
    Jpeg90,
}

impl From<QualityArg> for ImageQuality {
    fn from(arg: QualityArg) -> Self {
        match arg {
            QualityArg::Full => ImageQuality::Full,
            QualityArg::Png32 => ImageQuality::Png32,
            QualityArg::Png64 => ImageQuality::Png64,
            QualityArg::Png128 => ImageQuality::Png128,
            QualityArg::Png256 => ImageQuality::Png256,
            QualityArg::Jpeg70 => ImageQuality::Jpeg70,
            QualityArg::Jpeg80 => ImageQuality::Jpeg80,
            QualityArg::Jpeg90 => ImageQuality::Jpeg90,
        }
    }
}

/// Resolve downloader settings from CLI arguments and config file.
///
/// CLI takes precedence, then an explicit config file, then the default
/// config location, then built-in defaults.
pub fn resolve_config(
    config_path: Option<&Path>,
    data_dir: Option<PathBuf>,
) -> Result<DownloaderConfig, CliError> {
    let mut config = match config_path {
        Some(path) => {
            DownloaderConfig::load_from_ini(path).map_err(|e| CliError::Config(e.to_string()))?
        }
        None => match default_config_path() {
            Some(path) if path.exists() => DownloaderConfig::load_from_ini(&path)
                .map_err(|e| CliError::Config(e.to_string()))?,
            _ => DownloaderConfig::default(),
        },
    };

    if let Some(dir) = data_dir {
        config = config.with_data_dir(dir);
    }
    Ok(config)
}

/// Default config file location: `<config dir>/tilestash/config.ini`.
fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("tilestash").join("config.ini"))
}

/// One-line description of a store's contents, e.g. `z0-15 png@2x`.
pub fn describe_layers(header: &StoreHeader) -> String {
    let mut desc = format!(
        "z{}-{} {}{}",
        header.min_z,
        header.max_z,
        header.quality.file_extension(),
        header.tile_scale.suffix()
    );
    if header.include_metadata {
        desc.push_str(" +metadata");
    }
    if header.include_markers {
        desc.push_str(" +markers");
    }
    desc
}
