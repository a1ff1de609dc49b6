//! List command - show completed offline maps.

use chrono::Local;
use tilestash::store::discover_stores;
use tilestash::DownloaderConfig;

use super::common::describe_layers;
use crate::error::CliError;

/// Run the list command.
pub async fn run(config: DownloaderConfig) -> Result<(), CliError> {
    let stores = discover_stores(&config.data_dir)
        .await
        .map_err(|e| CliError::Store(e.to_string()))?;

    if stores.is_empty() {
        println!("No offline maps in {}", config.data_dir.display());
        return Ok(());
    }

    println!(
        "{} offline map{} in {}",
        stores.len(),
        if stores.len() == 1 { "" } else { "s" },
        config.data_dir.display()
    );
    println!();

    for (store, header) in &stores {
        let created = header.created_at.with_timezone(&Local);
        println!("{}", store.id());
        println!("  Map:       {}", header.map_id);
        println!("  Region:    {}", header.region);
        println!("  Layers:    {}", describe_layers(header));
        println!("  Resources: {}", header.total_written);
        println!("  Created:   {}", created.format("%Y-%m-%d %H:%M"));
        println!();
    }

    Ok(())
}
