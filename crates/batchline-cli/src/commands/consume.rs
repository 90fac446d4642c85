//! Consume command - run the batching consumer against RabbitMQ.

use anyhow::{Context, Result};
use batchline::{Consumer, ConsumerOptions};
use batchline_config::BatchlineConfig;
use batchline_queue::AmqpTransport;
use batchline_store::SqliteSink;
use tracing::warn;

use crate::style::{
    colors::SemanticStyle, create_spinner, finish_and_clear, print_heading, print_hint,
    print_labeled, print_records_table, print_report_table, print_spacer, print_success,
};

pub fn run(config: &BatchlineConfig) -> Result<()> {
    super::runtime()?.block_on(consume(config))
}

async fn consume(config: &BatchlineConfig) -> Result<()> {
    let host = config.queue.host.as_str();

    let sp = create_spinner(&format!("Connecting to {host}..."));
    let transport = AmqpTransport::connect(host)
        .await
        .with_context(|| format!("Failed to connect to {host}"))?;
    finish_and_clear(&sp);

    let path = &config.store.path;
    let sink = SqliteSink::open(path)
        .await
        .with_context(|| format!("Failed to open event store at {}", path.display()))?;

    let mut consumer = Consumer::new(ConsumerOptions::from(config), transport, sink.clone())
        .context("Invalid consumer options")?;

    print_success(&format!("Consuming from '{}'", config.queue.name));
    print_labeled("Store", &path.display().code());
    print_labeled(
        "Batching",
        &format!(
            "{} records per batch, prefetch {}",
            config.batch.size, config.queue.prefetch
        ),
    );
    print_hint("Press Ctrl+C to stop.");

    let result = consumer.run(super::shutdown_token()).await;

    let (transport, _) = consumer.into_parts();
    if let Err(e) = transport.close().await {
        warn!(error = %e, "AMQP connection did not close cleanly");
    }

    let report = result.context("Consumer failed")?;
    let records = sink
        .fetch_all()
        .await
        .context("Failed to read stored events")?;
    sink.close().await;

    print_spacer();
    print_heading("Run summary");
    print_report_table(&report);
    print_spacer();
    print_heading("Stored events");
    print_records_table(&records);

    Ok(())
}
