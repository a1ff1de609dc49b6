//! Remove command - delete an offline map and its files.

use clap::Args;
use dialoguer::Confirm;
use tilestash::store::discover_stores;
use tilestash::DownloaderConfig;

use super::common::describe_layers;
use crate::error::CliError;

/// Arguments for the remove command.
#[derive(Debug, Args)]
pub struct RemoveArgs {
    /// Store id of the offline map to remove (see `tilestash list`)
    pub store_id: String,

    /// Skip the confirmation prompt
    #[arg(short = 'y', long)]
    pub yes: bool,
}

/// Run the remove command.
pub async fn run(args: RemoveArgs, config: DownloaderConfig) -> Result<(), CliError> {
    let stores = discover_stores(&config.data_dir)
        .await
        .map_err(|e| CliError::Store(e.to_string()))?;

    let (store, header) = stores
        .into_iter()
        .find(|(store, _)| store.id() == args.store_id)
        .ok_or_else(|| CliError::NotFound(args.store_id.clone()))?;

    println!("Removing offline map {}", store.id());
    println!("  Map:    {}", header.map_id);
    println!("  Region: {}", header.region);
    println!("  Layers: {}", describe_layers(&header));

    if !args.yes {
        let confirmed = Confirm::new()
            .with_prompt("Delete this map and all its files?")
            .default(false)
            .interact()
            .map_err(|e| CliError::Store(format!("confirmation prompt failed: {}", e)))?;
        if !confirmed {
            println!("Nothing removed.");
            return Ok(());
        }
    }

    store
        .remove()
        .await
        .map_err(|e| CliError::Store(e.to_string()))?;

    println!("Offline map removed ({} resources).", header.total_written);
    Ok(())
}
