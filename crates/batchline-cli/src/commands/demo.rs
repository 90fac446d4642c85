//! Demo command - produce and consume through an in-process broker.
//!
//! Publishes `count` synthetic events, closes the broker so the consumer's
//! delivery stream ends once the queue is drained, then runs the consumer
//! against the configured store (or an in-memory one).

use std::sync::Arc;

use anyhow::{Context, Result};
use batchline::{Consumer, ConsumerOptions, RunReport};
use batchline_config::BatchlineConfig;
use batchline_producer::{ProduceOptions, RecordGenerator, publish_events};
use batchline_queue::MemoryBroker;
use batchline_store::{MemorySink, Sink, SqliteSink};
use batchline_types::{EventRecord, QueueName};
use tokio_util::sync::CancellationToken;

use crate::style::{
    colors::SemanticStyle, print_heading, print_hint, print_labeled, print_records_table,
    print_report_table, print_spacer, print_success, print_warn,
};

pub fn run(config: &BatchlineConfig, count: u64, in_memory: bool) -> Result<()> {
    super::runtime()?.block_on(demo(config, count, in_memory))
}

async fn demo(config: &BatchlineConfig, count: u64, in_memory: bool) -> Result<()> {
    let queue = QueueName::new(config.queue.name.as_str());
    let broker = MemoryBroker::new();

    let published = publish_events(
        &mut broker.publisher(),
        &queue,
        &mut RecordGenerator::new(),
        &ProduceOptions::burst(count),
        &CancellationToken::new(),
    )
    .await
    .context("Failed to publish demo events")?;
    broker.close();

    print_success(&format!(
        "Published {published} events to in-process queue '{queue}'"
    ));
    print_labeled(
        "Batching",
        &format!(
            "{} records per batch, prefetch {}",
            config.batch.size, config.queue.prefetch
        ),
    );

    let options = ConsumerOptions::from(config);
    let token = super::shutdown_token();

    let (report, records) = if in_memory {
        print_labeled("Store", &"in-memory".code());
        let sink = Arc::new(MemorySink::new());
        let report = consume(&broker, options, Arc::clone(&sink), token).await?;
        (report, sink.records())
    } else {
        let path = &config.store.path;
        print_labeled("Store", &path.display().code());
        let sink = SqliteSink::open(path)
            .await
            .with_context(|| format!("Failed to open event store at {}", path.display()))?;
        let report = consume(&broker, options, sink.clone(), token).await?;
        let records = sink
            .fetch_all()
            .await
            .context("Failed to read stored events")?;
        sink.close().await;
        (report, records)
    };

    print_summary(&broker, &queue, &report, &records);
    Ok(())
}

async fn consume<S: Sink>(
    broker: &MemoryBroker,
    options: ConsumerOptions,
    sink: S,
    token: CancellationToken,
) -> Result<RunReport> {
    let mut consumer =
        Consumer::new(options, broker.connect(), sink).context("Invalid consumer options")?;
    let report = consumer.run(token).await.context("Consumer failed")?;
    // Dropping the connection returns the unsealed remainder to the queue.
    drop(consumer);
    Ok(report)
}

fn print_summary(
    broker: &MemoryBroker,
    queue: &QueueName,
    report: &RunReport,
    records: &[EventRecord],
) {
    print_spacer();
    print_heading("Run summary");
    print_report_table(report);

    if report.batches_failed > 0 || report.rejected > 0 {
        print_warn(&format!(
            "{} batches failed, {} messages rejected",
            report.batches_failed, report.rejected
        ));
    }

    let waiting = broker.ready_count(queue);
    if waiting > 0 {
        print_hint(&format!(
            "{waiting} messages were returned to '{queue}' for redelivery (batch not full)"
        ));
    }

    print_spacer();
    print_heading("Stored events");
    print_records_table(records);
}
