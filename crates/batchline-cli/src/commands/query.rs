//! Query command - print the stored events.

use std::path::Path;

use anyhow::{Context, Result, bail};
use batchline_config::BatchlineConfig;
use batchline_store::{PersistError, SqliteSink};
use batchline_types::EventRecord;

use crate::style::{create_spinner, finish_and_clear, print_records_table};

pub fn run(config: &BatchlineConfig, limit: Option<usize>) -> Result<()> {
    let path = config.store.path.as_path();
    if !path.exists() {
        bail!(
            "No event store at '{}'. Run 'batchline demo' or 'batchline consume' first.",
            path.display()
        );
    }

    let sp = create_spinner("Reading events...");
    let records = super::runtime()?
        .block_on(read_all(path))
        .with_context(|| format!("Failed to read events from {}", path.display()))?;
    finish_and_clear(&sp);

    let shown = limit.map_or(records.as_slice(), |n| &records[..n.min(records.len())]);
    print_records_table(shown);

    Ok(())
}

async fn read_all(path: &Path) -> Result<Vec<EventRecord>, PersistError> {
    let sink = SqliteSink::open(path).await?;
    let records = sink.fetch_all().await;
    sink.close().await;
    records
}
