//! Download command - fetch a map region into a new offline store.

use std::process;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use clap::Args;
use console::style;
use dialoguer::Confirm;
use indicatif::{ProgressBar, ProgressStyle};
use tilestash::{
    count_region_tiles, DownloadError, DownloadEvent, DownloaderConfig, HttpTileSource,
    ImageQuality, JobSpec, MapRegion, OfflineMapDownloader, TileScale,
};

use super::common::QualityArg;
use crate::error::CliError;

/// Ask before starting a download beyond this many tiles.
const LARGE_JOB_THRESHOLD: u64 = 50_000;

/// Arguments for the download command.
#[derive(Debug, Args)]
pub struct DownloadArgs {
    /// Hosted map identifier, e.g. examples.map-pgygbwdm
    pub map_id: String,

    /// Tile server base URL
    #[arg(long, value_name = "URL")]
    pub base_url: String,

    /// Region to download as north,south,east,west in degrees
    #[arg(long, value_name = "N,S,E,W", allow_hyphen_values = true)]
    pub bbox: String,

    /// Lowest zoom level to fetch
    #[arg(long, default_value_t = 0, value_name = "Z")]
    pub min_zoom: u8,

    /// Highest zoom level to fetch
    #[arg(long, value_name = "Z")]
    pub max_zoom: u8,

    /// Tile quality variant
    #[arg(long, value_enum, default_value_t = QualityArg::Full)]
    pub quality: QualityArg,

    /// Fetch high-density @2x tiles
    #[arg(long)]
    pub retina: bool,

    /// Also fetch the map's TileJSON metadata
    #[arg(long)]
    pub metadata: bool,

    /// Also fetch the marker overlay and its icons
    #[arg(long)]
    pub markers: bool,

    /// Concurrent fetch workers (overrides config)
    #[arg(long, value_name = "N")]
    pub workers: Option<usize>,

    /// Skip the large-download confirmation prompt
    #[arg(short = 'y', long)]
    pub yes: bool,
}

/// Run the download command.
pub async fn run(args: DownloadArgs, mut config: DownloaderConfig) -> Result<(), CliError> {
    let region = parse_bbox(&args.bbox)?;
    if args.min_zoom > args.max_zoom {
        return Err(CliError::InvalidArgument(format!(
            "--min-zoom {} exceeds --max-zoom {}",
            args.min_zoom, args.max_zoom
        )));
    }
    if let Some(workers) = args.workers {
        config = config.with_worker_count(workers);
    }

    let quality = ImageQuality::from(args.quality);
    let scale = if args.retina {
        TileScale::Retina
    } else {
        TileScale::Standard
    };

    // The tile total is known before any network traffic, so oversized
    // requests can be caught here rather than hours in.
    let tile_total = count_region_tiles(&region, args.min_zoom, args.max_zoom)
        .map_err(|e| CliError::InvalidArgument(e.to_string()))?;

    if tile_total > LARGE_JOB_THRESHOLD && !args.yes {
        let confirmed = Confirm::new()
            .with_prompt(format!(
                "This download covers {} tiles. Continue?",
                tile_total
            ))
            .default(false)
            .interact()
            .map_err(|e| CliError::Download(format!("confirmation prompt failed: {}", e)))?;
        if !confirmed {
            println!("Download not started.");
            return Ok(());
        }
    }

    // Print banner
    println!("tilestash Offline Map Download v{}", tilestash::VERSION);
    println!("===================================");
    println!();
    println!("Map:      {}", args.map_id);
    println!("Region:   {}", region);
    println!("Zoom:     {}-{}", args.min_zoom, args.max_zoom);
    println!("Quality:  {}{}", quality.file_extension(), scale.suffix());
    println!("Tiles:    {}", tile_total);
    println!();
    println!("Press Ctrl+C to cancel");
    println!();

    let source = HttpTileSource::new(
        &args.base_url,
        &args.map_id,
        quality,
        config.fetch_timeout,
        &config.user_agent,
    )
    .map_err(|e| CliError::Download(format!("cannot create tile source: {}", e)))?;

    let data_dir = config.data_dir.clone();
    let (downloader, mut events) = OfflineMapDownloader::start(config, Arc::new(source))
        .await
        .map_err(|e| CliError::Store(e.to_string()))?;

    // First Ctrl+C cancels the job and waits for cleanup; a second one
    // force-quits without waiting.
    let presses = Arc::new(AtomicUsize::new(0));
    let handler_downloader = downloader.clone();
    let handler_presses = presses.clone();
    ctrlc::set_handler(move || {
        if handler_presses.fetch_add(1, Ordering::SeqCst) == 0 {
            eprintln!();
            eprintln!("Canceling download... (press Ctrl+C again to force quit)");
            handler_downloader.cancel();
        } else {
            process::exit(130);
        }
    })
    .map_err(|e| CliError::Download(format!("failed to set signal handler: {}", e)))?;

    let spec = JobSpec {
        map_id: args.map_id.clone(),
        region,
        min_z: args.min_zoom,
        max_z: args.max_zoom,
        quality,
        tile_scale: scale,
        include_metadata: args.metadata,
        include_markers: args.markers,
    };
    downloader
        .begin(spec)
        .await
        .map_err(|e| CliError::Download(e.to_string()))?;

    let bar = ProgressBar::new(tile_total);
    bar.set_style(
        ProgressStyle::with_template("{bar:40.cyan/blue} {pos}/{len} resources ({eta})")
            .expect("valid progress template"),
    );

    while let Some(event) = events.recv().await {
        match event {
            DownloadEvent::StateChanged(state) => {
                tracing::debug!(%state, "download state changed");
            }
            DownloadEvent::TotalExpected(total) => {
                bar.set_length(total);
            }
            DownloadEvent::Progress { written, expected } => {
                bar.set_length(expected);
                bar.set_position(written);
            }
            DownloadEvent::RecoverableError(err) => {
                bar.suspend(|| {
                    eprintln!("{} {}", style("warning:").yellow().bold(), err);
                });
            }
            DownloadEvent::Completed(result) => {
                bar.finish_and_clear();
                return match result {
                    Ok(map) => {
                        let header = map.header();
                        println!();
                        println!("Download Complete");
                        println!("─────────────────");
                        println!("  Store id:  {}", map.store_id());
                        println!("  Map:       {}", header.map_id);
                        println!(
                            "  Resources: {} written / {} expected",
                            header.total_written, header.total_expected
                        );
                        println!(
                            "  Location:  {}",
                            data_dir.join(map.store_id()).display()
                        );
                        Ok(())
                    }
                    Err(DownloadError::Canceled) => {
                        println!("Download canceled; partial files removed.");
                        Ok(())
                    }
                    Err(e) => Err(CliError::Download(e.to_string())),
                };
            }
        }
    }

    Err(CliError::Download(
        "event channel closed before completion".to_string(),
    ))
}

/// Parse `--bbox north,south,east,west` into a validated region.
fn parse_bbox(s: &str) -> Result<MapRegion, CliError> {
    let parts: Vec<&str> = s.split(',').map(str::trim).collect();
    if parts.len() != 4 {
        return Err(CliError::InvalidArgument(format!(
            "--bbox expects north,south,east,west, got '{}'",
            s
        )));
    }

    let mut values = [0f64; 4];
    for (slot, part) in values.iter_mut().zip(&parts) {
        *slot = part.parse().map_err(|_| {
            CliError::InvalidArgument(format!("--bbox value '{}' is not a number", part))
        })?;
    }

    MapRegion::new(values[0], values[1], values[2], values[3])
        .map_err(|e| CliError::InvalidArgument(e.to_string()))
}
