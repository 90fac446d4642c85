//! RabbitMQ transport built on `lapin`.

use async_trait::async_trait;
use batchline_types::{DeliveryTag, QueueName};
use bytes::Bytes;
use futures::StreamExt;
use lapin::{
    BasicProperties, Channel, Connection, ConnectionProperties, Consumer,
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
        BasicQosOptions, QueueDeclareOptions,
    },
    types::FieldTable,
};
use tracing::{debug, info};

use crate::{AckError, Delivery, Publisher, Transport, TransportError};

const CONSUMER_TAG: &str = "batchline-consumer";

async fn open_channel(uri: &str) -> Result<(Connection, Channel), TransportError> {
    let connection = Connection::connect(uri, ConnectionProperties::default()).await?;
    let channel = connection.create_channel().await?;
    info!(channel_id = channel.id(), "Connected to AMQP broker");
    Ok((connection, channel))
}

async fn declare_queue(channel: &Channel, queue: &QueueName) -> Result<(), TransportError> {
    channel
        .queue_declare(
            queue.as_str(),
            QueueDeclareOptions::default(),
            FieldTable::default(),
        )
        .await?;
    debug!(queue = %queue, "Queue declared");
    Ok(())
}

/// Consumer side of an AMQP connection.
pub struct AmqpTransport {
    connection: Connection,
    channel: Channel,
    consumer: Option<Consumer>,
}

impl AmqpTransport {
    /// Connects to the broker at `uri` (e.g. `amqp://localhost:5672/%2f`).
    pub async fn connect(uri: &str) -> Result<Self, TransportError> {
        let (connection, channel) = open_channel(uri).await?;
        Ok(Self {
            connection,
            channel,
            consumer: None,
        })
    }

    /// Closes the connection. Unacknowledged deliveries are requeued by the broker.
    pub async fn close(self) -> Result<(), TransportError> {
        self.connection.close(200, "consumer stopped").await?;
        Ok(())
    }
}

impl std::fmt::Debug for AmqpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AmqpTransport")
            .field("channel_id", &self.channel.id())
            .field("consuming", &self.consumer.is_some())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Transport for AmqpTransport {
    async fn declare(&mut self, queue: &QueueName) -> Result<(), TransportError> {
        declare_queue(&self.channel, queue).await
    }

    async fn set_prefetch(&mut self, limit: u16) -> Result<(), TransportError> {
        self.channel
            .basic_qos(limit, BasicQosOptions::default())
            .await?;
        Ok(())
    }

    async fn consume(&mut self, queue: &QueueName) -> Result<(), TransportError> {
        let consumer = self
            .channel
            .basic_consume(
                queue.as_str(),
                CONSUMER_TAG,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;
        self.consumer = Some(consumer);
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<Delivery>, TransportError> {
        let consumer = self.consumer.as_mut().ok_or(TransportError::NotConsuming)?;
        match consumer.next().await {
            Some(Ok(delivery)) => Ok(Some(Delivery {
                tag: DeliveryTag::new(delivery.delivery_tag),
                payload: Bytes::from(delivery.data),
                redelivered: delivery.redelivered,
            })),
            Some(Err(e)) => Err(TransportError::Amqp(e)),
            None => Ok(None),
        }
    }

    async fn ack(&mut self, tag: DeliveryTag) -> Result<(), AckError> {
        self.channel
            .basic_ack(tag.as_u64(), BasicAckOptions::default())
            .await
            .map_err(|e| AckError::Transport(e.to_string()))
    }

    async fn nack(&mut self, tag: DeliveryTag, requeue: bool) -> Result<(), AckError> {
        self.channel
            .basic_nack(
                tag.as_u64(),
                BasicNackOptions {
                    multiple: false,
                    requeue,
                },
            )
            .await
            .map_err(|e| AckError::Transport(e.to_string()))
    }
}

/// Publisher side of an AMQP connection.
///
/// Publishes go to the default exchange with the queue name as routing key.
pub struct AmqpPublisher {
    connection: Connection,
    channel: Channel,
}

impl AmqpPublisher {
    pub async fn connect(uri: &str) -> Result<Self, TransportError> {
        let (connection, channel) = open_channel(uri).await?;
        Ok(Self {
            connection,
            channel,
        })
    }

    pub async fn close(self) -> Result<(), TransportError> {
        self.connection.close(200, "publisher done").await?;
        Ok(())
    }
}

impl std::fmt::Debug for AmqpPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AmqpPublisher")
            .field("channel_id", &self.channel.id())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Publisher for AmqpPublisher {
    async fn declare(&mut self, queue: &QueueName) -> Result<(), TransportError> {
        declare_queue(&self.channel, queue).await
    }

    async fn publish(&mut self, queue: &QueueName, payload: Bytes) -> Result<(), TransportError> {
        self.channel
            .basic_publish(
                "",
                queue.as_str(),
                BasicPublishOptions::default(),
                &payload,
                BasicProperties::default(),
            )
            .await?
            .await?;
        Ok(())
    }
}
