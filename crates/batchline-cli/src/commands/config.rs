//! Configuration commands.

use anyhow::Result;
use batchline_config::{BatchlineConfig, ConfigLoader};

use crate::style::{colors::SemanticStyle, print_labeled, print_success};

/// Show the effective configuration.
pub fn show(config: &BatchlineConfig, format: &str) -> Result<()> {
    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(config)?);
        }
        "toml" => {
            println!("{}", toml::to_string_pretty(config)?);
        }
        _ => {
            println!("Batchline Configuration");
            println!("=======================\n");

            println!("Queue:");
            println!("  Host: {}", config.queue.host);
            println!("  Name: {}", config.queue.name);
            println!("  Prefetch: {}", config.queue.prefetch);
            println!();

            println!("Batch:");
            println!("  Size: {}", config.batch.size);
            println!("  Retry backoff: {} ms", config.batch.retry_backoff_ms);
            println!();

            println!("Store:");
            println!("  Path: {}", config.store.path.display());
        }
    }

    Ok(())
}

/// Report where configuration was read from and confirm it is valid.
///
/// Loading already validated it; reaching this point means every layer parsed.
pub fn validate(project: &str, config: &BatchlineConfig) {
    print_success("Configuration is valid");

    let layers = ConfigLoader::new().with_project_dir(project).file_layers();
    for (layer, path) in layers {
        let state = if path.exists() { "found" } else { "absent" };
        print_labeled(&layer.to_string(), &format!("{} ({state})", path.display().code()));
    }

    print_labeled(
        "Batching",
        &format!(
            "{} records per batch, prefetch {}",
            config.batch.size, config.queue.prefetch
        ),
    );
}
