//! CLI command implementations.

use std::path::PathBuf;

use anyhow::{Context, Result};
use batchline_config::BatchlineConfig;
use clap::Args;
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub mod config;
pub mod demo;
pub mod query;
pub mod version;

#[cfg(feature = "amqp")]
pub mod consume;
#[cfg(feature = "amqp")]
pub mod declare;
#[cfg(feature = "amqp")]
pub mod produce;

/// Command-line overrides, applied on top of the layered configuration.
#[derive(Debug, Default, Args)]
pub struct Overrides {
    /// Broker URI (overrides queue.host).
    #[arg(long)]
    pub host: Option<String>,

    /// Queue name (overrides queue.name).
    #[arg(short, long)]
    pub queue: Option<String>,

    /// Records per batch (overrides batch.size).
    #[arg(short, long)]
    pub batch_size: Option<u32>,

    /// Unacknowledged delivery bound (overrides queue.prefetch).
    #[arg(short, long)]
    pub prefetch: Option<u32>,

    /// SQLite database file (overrides store.path).
    #[arg(long)]
    pub db: Option<PathBuf>,
}

impl Overrides {
    fn apply(&self, config: &mut BatchlineConfig) {
        if let Some(host) = &self.host {
            config.queue.host.clone_from(host);
        }
        if let Some(queue) = &self.queue {
            config.queue.name.clone_from(queue);
        }
        if let Some(size) = self.batch_size {
            config.batch.size = size;
        }
        if let Some(prefetch) = self.prefetch {
            config.queue.prefetch = prefetch;
        }
        if let Some(db) = &self.db {
            config.store.path.clone_from(db);
        }
    }
}

/// Loads the layered configuration for `project` and applies `overrides`.
pub fn load_config(project: &str, overrides: &Overrides) -> Result<BatchlineConfig> {
    let mut config =
        BatchlineConfig::load_from_dir(project).context("Failed to load configuration")?;
    overrides.apply(&mut config);
    config
        .validate()
        .context("Invalid command-line overrides")?;
    Ok(config)
}

pub(crate) fn runtime() -> Result<Runtime> {
    Runtime::new().context("Failed to start async runtime")
}

/// Token cancelled on Ctrl+C. Must be called from within the runtime.
pub(crate) fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, stopping");
            trigger.cancel();
        }
    });
    token
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_replace_only_given_fields() {
        let mut config = BatchlineConfig::default();
        let overrides = Overrides {
            queue: Some("orders".to_string()),
            batch_size: Some(1),
            ..Overrides::default()
        };

        overrides.apply(&mut config);

        assert_eq!(config.queue.name, "orders");
        assert_eq!(config.batch.size, 1);
        assert_eq!(config.queue.prefetch, 5);
        assert_eq!(config.queue.host, BatchlineConfig::default().queue.host);
    }
}
