//! Produce command - publish synthetic events to RabbitMQ.

use std::time::Duration;

use anyhow::{Context, Result};
use batchline_config::BatchlineConfig;
use batchline_producer::{ProduceOptions, RecordGenerator, publish_events};
use batchline_queue::AmqpPublisher;
use batchline_types::QueueName;
use tracing::warn;

use crate::style::{create_spinner, finish_and_clear, print_hint, print_success};

pub fn run(config: &BatchlineConfig, count: Option<u64>, max_jitter_ms: u64) -> Result<()> {
    let options = ProduceOptions {
        count,
        max_jitter: Duration::from_millis(max_jitter_ms),
    };
    super::runtime()?.block_on(produce(config, &options))
}

async fn produce(config: &BatchlineConfig, options: &ProduceOptions) -> Result<()> {
    let host = config.queue.host.as_str();
    let queue = QueueName::new(config.queue.name.as_str());

    let sp = create_spinner(&format!("Connecting to {host}..."));
    let mut publisher = AmqpPublisher::connect(host)
        .await
        .with_context(|| format!("Failed to connect to {host}"))?;
    finish_and_clear(&sp);

    if options.count.is_none() {
        print_hint("Producing until Ctrl+C.");
    }

    let result = publish_events(
        &mut publisher,
        &queue,
        &mut RecordGenerator::new(),
        options,
        &super::shutdown_token(),
    )
    .await;

    if let Err(e) = publisher.close().await {
        warn!(error = %e, "AMQP connection did not close cleanly");
    }

    let published = result.context("Failed to publish events")?;
    print_success(&format!("Published {published} events to '{queue}'"));
    Ok(())
}
