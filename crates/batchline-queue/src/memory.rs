//! In-process broker with AMQP-style delivery semantics.
//!
//! One [`MemoryBroker`] owns any number of named queues. Each
//! [`MemoryConnection`] is an independent consumer connection: it numbers its
//! own delivery tags starting at 1, enforces its own prefetch bound, and
//! requeues whatever it still holds unacknowledged when dropped.
//!
//! Requeued messages go back to their original position (ordered by publish
//! sequence), flagged as redelivered.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use batchline_types::{DeliveryTag, QueueName};
use bytes::Bytes;
use tokio::sync::Notify;
use tracing::debug;

use crate::{AckError, Delivery, Publisher, Transport, TransportError};

#[derive(Debug, Clone)]
struct Message {
    seq: u64,
    payload: Bytes,
    redelivered: bool,
}

#[derive(Debug, Default)]
struct QueueState {
    ready: VecDeque<Message>,
    in_flight: usize,
    acked: Vec<Bytes>,
    dead_letters: Vec<Bytes>,
    redeliveries: u64,
}

impl QueueState {
    fn requeue(&mut self, mut message: Message) {
        message.redelivered = true;
        self.redeliveries += 1;
        self.in_flight = self.in_flight.saturating_sub(1);
        let position = self.ready.partition_point(|m| m.seq < message.seq);
        self.ready.insert(position, message);
    }
}

#[derive(Debug, Default)]
struct BrokerState {
    queues: HashMap<QueueName, QueueState>,
    next_seq: u64,
    /// Bumped by `sever_connections`; connections from an older epoch are dead.
    epoch: u64,
    closed: bool,
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<BrokerState>,
    notify: Notify,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// In-process message broker.
///
/// Cloning yields another handle to the same broker.
#[derive(Debug, Clone, Default)]
pub struct MemoryBroker {
    shared: Arc<Shared>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a new consumer connection.
    pub fn connect(&self) -> MemoryConnection {
        let epoch = self.shared.lock().epoch;
        MemoryConnection {
            shared: Arc::clone(&self.shared),
            epoch,
            queue: None,
            prefetch: 0,
            next_tag: 0,
            unacked: HashMap::new(),
        }
    }

    /// Returns a publishing handle.
    pub fn publisher(&self) -> MemoryPublisher {
        MemoryPublisher {
            broker: self.clone(),
        }
    }

    /// Creates `queue` if it does not exist.
    pub fn declare(&self, queue: &QueueName) {
        self.shared.lock().queues.entry(queue.clone()).or_default();
    }

    /// Appends a message to `queue`.
    pub fn enqueue(&self, queue: &QueueName, payload: Bytes) -> Result<(), TransportError> {
        {
            let mut state = self.shared.lock();
            if state.closed {
                return Err(TransportError::ChannelClosed);
            }
            state.next_seq += 1;
            let seq = state.next_seq;
            let queue_state = state
                .queues
                .get_mut(queue)
                .ok_or_else(|| TransportError::QueueNotFound(queue.clone()))?;
            queue_state.ready.push_back(Message {
                seq,
                payload,
                redelivered: false,
            });
        }
        self.shared.notify.notify_waiters();
        Ok(())
    }

    /// Stops the broker: publishes are refused and each consumer's delivery
    /// stream ends once it has nothing more it could be given.
    pub fn close(&self) {
        self.shared.lock().closed = true;
        self.shared.notify.notify_waiters();
        debug!("Memory broker closed");
    }

    /// Simulates a network failure. Every existing connection fails its next
    /// operation; its unacknowledged deliveries are requeued when it is dropped.
    pub fn sever_connections(&self) {
        self.shared.lock().epoch += 1;
        self.shared.notify.notify_waiters();
        debug!("Memory broker severed all connections");
    }

    /// Messages waiting to be delivered.
    pub fn ready_count(&self, queue: &QueueName) -> usize {
        self.with_queue(queue, |q| q.ready.len())
    }

    /// Messages delivered but not yet resolved.
    pub fn in_flight(&self, queue: &QueueName) -> usize {
        self.with_queue(queue, |q| q.in_flight)
    }

    /// Bodies of acknowledged messages, in acknowledgment order.
    pub fn acked(&self, queue: &QueueName) -> Vec<Bytes> {
        self.with_queue(queue, |q| q.acked.clone())
    }

    /// Bodies of messages rejected without requeue.
    pub fn dead_letters(&self, queue: &QueueName) -> Vec<Bytes> {
        self.with_queue(queue, |q| q.dead_letters.clone())
    }

    /// Number of times a message of `queue` was put back for redelivery.
    pub fn redeliveries(&self, queue: &QueueName) -> u64 {
        self.with_queue(queue, |q| q.redeliveries)
    }

    fn with_queue<T: Default>(&self, queue: &QueueName, f: impl FnOnce(&QueueState) -> T) -> T {
        self.shared.lock().queues.get(queue).map(f).unwrap_or_default()
    }
}

/// A consumer connection to a [`MemoryBroker`].
#[derive(Debug)]
pub struct MemoryConnection {
    shared: Arc<Shared>,
    epoch: u64,
    queue: Option<QueueName>,
    /// 0 means unbounded, as in AMQP.
    prefetch: u16,
    next_tag: u64,
    unacked: HashMap<u64, Message>,
}

impl MemoryConnection {
    /// Number of deliveries this connection holds unresolved.
    pub fn unacked_count(&self) -> usize {
        self.unacked.len()
    }

    fn has_credit(&self) -> bool {
        self.prefetch == 0 || self.unacked.len() < usize::from(self.prefetch)
    }

    fn resolve(
        &mut self,
        tag: &DeliveryTag,
    ) -> Result<(Message, MutexGuard<'_, BrokerState>), AckError> {
        let state = self.shared.lock();
        if state.epoch != self.epoch {
            return Err(AckError::Transport("connection lost".to_string()));
        }
        let message = self
            .unacked
            .remove(&tag.as_u64())
            .ok_or(AckError::UnknownTag(tag.as_u64()))?;
        Ok((message, state))
    }
}

#[async_trait]
impl Transport for MemoryConnection {
    async fn declare(&mut self, queue: &QueueName) -> Result<(), TransportError> {
        let mut state = self.shared.lock();
        if state.epoch != self.epoch {
            return Err(TransportError::ConnectionLost(
                "connection severed by broker".to_string(),
            ));
        }
        state.queues.entry(queue.clone()).or_default();
        Ok(())
    }

    async fn set_prefetch(&mut self, limit: u16) -> Result<(), TransportError> {
        self.prefetch = limit;
        Ok(())
    }

    async fn consume(&mut self, queue: &QueueName) -> Result<(), TransportError> {
        if !self.shared.lock().queues.contains_key(queue) {
            return Err(TransportError::QueueNotFound(queue.clone()));
        }
        self.queue = Some(queue.clone());
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<Delivery>, TransportError> {
        let queue = self.queue.clone().ok_or(TransportError::NotConsuming)?;
        let shared = Arc::clone(&self.shared);

        loop {
            // Registered before inspecting state so a publish between the
            // check and the await still wakes us.
            let notified = shared.notify.notified();

            {
                let mut state = shared.lock();
                if state.epoch != self.epoch {
                    return Err(TransportError::ConnectionLost(
                        "connection severed by broker".to_string(),
                    ));
                }

                let closed = state.closed;
                let has_credit = self.has_credit();
                let queue_state = state
                    .queues
                    .get_mut(&queue)
                    .ok_or_else(|| TransportError::QueueNotFound(queue.clone()))?;

                if has_credit {
                    if let Some(message) = queue_state.ready.pop_front() {
                        queue_state.in_flight += 1;
                        self.next_tag += 1;
                        let tag = self.next_tag;
                        let delivery = Delivery {
                            tag: DeliveryTag::new(tag),
                            payload: message.payload.clone(),
                            redelivered: message.redelivered,
                        };
                        self.unacked.insert(tag, message);
                        return Ok(Some(delivery));
                    }
                }

                if closed && (queue_state.ready.is_empty() || !has_credit) {
                    return Ok(None);
                }
            }

            notified.await;
        }
    }

    async fn ack(&mut self, tag: DeliveryTag) -> Result<(), AckError> {
        let queue = self.queue.clone();
        let (message, mut state) = self.resolve(&tag)?;
        if let Some(queue_state) = queue.and_then(|q| state.queues.get_mut(&q)) {
            queue_state.in_flight = queue_state.in_flight.saturating_sub(1);
            queue_state.acked.push(message.payload);
        }
        Ok(())
    }

    async fn nack(&mut self, tag: DeliveryTag, requeue: bool) -> Result<(), AckError> {
        let queue = self.queue.clone();
        let shared = Arc::clone(&self.shared);
        {
            let (message, mut state) = self.resolve(&tag)?;
            if let Some(queue_state) = queue.and_then(|q| state.queues.get_mut(&q)) {
                if requeue {
                    queue_state.requeue(message);
                } else {
                    queue_state.in_flight = queue_state.in_flight.saturating_sub(1);
                    queue_state.dead_letters.push(message.payload);
                }
            }
        }
        if requeue {
            shared.notify.notify_waiters();
        }
        Ok(())
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        if self.unacked.is_empty() {
            return;
        }
        let Some(queue) = self.queue.as_ref() else {
            return;
        };

        let mut pending: Vec<Message> = self.unacked.drain().map(|(_, m)| m).collect();
        pending.sort_by_key(|m| m.seq);
        let requeued = pending.len();

        {
            let mut state = self.shared.lock();
            if let Some(queue_state) = state.queues.get_mut(queue) {
                for message in pending {
                    queue_state.requeue(message);
                }
            }
        }
        self.shared.notify.notify_waiters();

        debug!(queue = %queue, requeued, "Connection dropped, unacked deliveries requeued");
    }
}

/// Publishing handle to a [`MemoryBroker`].
#[derive(Debug, Clone)]
pub struct MemoryPublisher {
    broker: MemoryBroker,
}

#[async_trait]
impl Publisher for MemoryPublisher {
    async fn declare(&mut self, queue: &QueueName) -> Result<(), TransportError> {
        self.broker.declare(queue);
        Ok(())
    }

    async fn publish(&mut self, queue: &QueueName, payload: Bytes) -> Result<(), TransportError> {
        self.broker.enqueue(queue, payload)
    }
}
