//! Declare command - create the queue on RabbitMQ.

use anyhow::{Context, Result};
use batchline_config::BatchlineConfig;
use batchline_queue::{AmqpPublisher, Publisher};
use batchline_types::QueueName;

use crate::style::print_success;

pub fn run(config: &BatchlineConfig) -> Result<()> {
    super::runtime()?.block_on(declare(config))
}

async fn declare(config: &BatchlineConfig) -> Result<()> {
    let host = config.queue.host.as_str();
    let queue = QueueName::new(config.queue.name.as_str());

    let mut publisher = AmqpPublisher::connect(host)
        .await
        .with_context(|| format!("Failed to connect to {host}"))?;
    publisher
        .declare(&queue)
        .await
        .with_context(|| format!("Failed to declare queue '{queue}'"))?;
    publisher.close().await.context("Failed to close connection")?;

    print_success(&format!("Queue '{queue}' declared"));
    Ok(())
}
