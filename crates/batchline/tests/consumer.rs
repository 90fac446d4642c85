//! End-to-end behavior of the consumer against the in-process broker.

use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use batchline::{
    Consumer, ConsumerError, ConsumerOptions, MemoryBroker, MemorySink, PersistError, Sink,
    SqliteSink, StopReason, TransportError,
};
use batchline_producer::{ProduceOptions, RecordGenerator, publish_events};
use batchline_queue::{AckError, Delivery, MemoryConnection, Transport};
use batchline_types::{DeliveryTag, EventRecord, QueueName, RecordId};
use bytes::Bytes;
use tokio_util::sync::CancellationToken;

fn queue() -> QueueName {
    QueueName::new("event_queue")
}

fn records(count: usize, seed: u64) -> Vec<EventRecord> {
    let mut generator = RecordGenerator::seeded(seed);
    (0..count).map(|_| generator.next_record()).collect()
}

fn publish(broker: &MemoryBroker, records: &[EventRecord]) {
    broker.declare(&queue());
    for record in records {
        broker.enqueue(&queue(), record.encode().unwrap()).unwrap();
    }
}

fn ids(records: &[EventRecord]) -> Vec<RecordId> {
    records.iter().map(|r| r.id).collect()
}

fn acked_ids(broker: &MemoryBroker) -> Vec<RecordId> {
    broker
        .acked(&queue())
        .iter()
        .map(|body| EventRecord::decode(body).unwrap().id)
        .collect()
}

const BACKOFF: Duration = Duration::from_millis(10);

fn options(batch_size: u32, prefetch: u32) -> ConsumerOptions {
    ConsumerOptions::new(queue(), batch_size, prefetch).with_retry_backoff(BACKOFF)
}

fn consumer<S: Sink>(
    broker: &MemoryBroker,
    batch_size: u32,
    prefetch: u32,
    sink: S,
) -> Consumer<MemoryConnection, S> {
    Consumer::new(options(batch_size, prefetch), broker.connect(), sink).unwrap()
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// Sink that records whether any of its records were acknowledged before
/// persist was called, and can fail or cancel the run on a given call.
struct InstrumentedSink {
    inner: MemorySink,
    broker: MemoryBroker,
    fail_on: Option<usize>,
    fail_always: bool,
    cancel_after: Option<(usize, CancellationToken)>,
    calls: AtomicUsize,
    acked_before_persist: Mutex<Vec<RecordId>>,
}

impl InstrumentedSink {
    fn new(broker: &MemoryBroker) -> Self {
        Self {
            inner: MemorySink::new(),
            broker: broker.clone(),
            fail_on: None,
            fail_always: false,
            cancel_after: None,
            calls: AtomicUsize::new(0),
            acked_before_persist: Mutex::new(Vec::new()),
        }
    }

    fn failing_on(mut self, call: usize) -> Self {
        self.fail_on = Some(call);
        self
    }

    fn always_failing(mut self) -> Self {
        self.fail_always = true;
        self
    }

    fn cancelling_after(mut self, call: usize, token: &CancellationToken) -> Self {
        self.cancel_after = Some((call, token.clone()));
        self
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn violations(&self) -> Vec<RecordId> {
        self.acked_before_persist.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sink for InstrumentedSink {
    async fn persist(&self, records: &[EventRecord]) -> Result<(), PersistError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;

        let acked: HashSet<RecordId> = acked_ids(&self.broker).into_iter().collect();
        let early: Vec<RecordId> = records
            .iter()
            .map(|r| r.id)
            .filter(|id| acked.contains(id))
            .collect();
        self.acked_before_persist.lock().unwrap().extend(early);

        let result = if self.fail_always || self.fail_on == Some(call) {
            Err(PersistError::Unavailable(format!("injected failure on call {call}")))
        } else {
            self.inner.persist(records).await
        };

        if let Some((after, token)) = &self.cancel_after {
            if call >= *after {
                token.cancel();
            }
        }

        result
    }
}

#[tokio::test]
async fn twelve_records_in_batches_of_five_leave_two_pending() {
    let broker = MemoryBroker::new();
    let published = records(12, 1);
    publish(&broker, &published);
    broker.close();

    let mut consumer = consumer(&broker, 5, 5, MemorySink::new());
    let report = consumer.run(CancellationToken::new()).await.unwrap();

    assert_eq!(report.stop_reason, StopReason::StreamEnded);
    assert_eq!(report.batches_persisted, 2);
    assert_eq!(report.records_acked, 10);
    assert_eq!(report.pending, 2);
    assert_eq!(consumer.sink().records(), published[..10]);
    assert_eq!(acked_ids(&broker), ids(&published[..10]));
    assert_eq!(broker.in_flight(&queue()), 2);

    // Closing the connection hands the unsealed remainder back to the broker.
    drop(consumer);
    assert_eq!(broker.ready_count(&queue()), 2);

    let mut reconnect = broker.connect();
    reconnect.consume(&queue()).await.unwrap();
    for expected in &published[10..] {
        let delivery = reconnect.recv().await.unwrap().unwrap();
        assert!(delivery.redelivered);
        assert_eq!(EventRecord::decode(&delivery.payload).unwrap().id, expected.id);
    }
}

#[tokio::test]
async fn stop_does_not_flush_the_unsealed_batch() {
    let broker = MemoryBroker::new();
    let published = records(12, 2);
    publish(&broker, &published);

    let sink = std::sync::Arc::new(MemorySink::new());
    let mut consumer = consumer(&broker, 5, 5, std::sync::Arc::clone(&sink));
    let token = CancellationToken::new();

    let task = {
        let token = token.clone();
        tokio::spawn(async move {
            let report = consumer.run(token).await;
            (consumer, report)
        })
    };

    wait_until(|| sink.len() == 10 && broker.in_flight(&queue()) == 2).await;
    token.cancel();

    let (consumer, report) = task.await.unwrap();
    let report = report.unwrap();
    assert_eq!(report.stop_reason, StopReason::Cancelled);
    assert_eq!(report.pending, 2);
    assert_eq!(sink.len(), 10);
    assert_eq!(broker.acked(&queue()).len(), 10);

    drop(consumer);
    assert_eq!(broker.ready_count(&queue()), 2);
    assert_eq!(broker.redeliveries(&queue()), 2);
}

#[tokio::test]
async fn failed_second_batch_is_released_and_not_stored() {
    let broker = MemoryBroker::new();
    let published = records(6, 3);
    publish(&broker, &published);

    let token = CancellationToken::new();
    let sink = InstrumentedSink::new(&broker)
        .failing_on(2)
        .cancelling_after(2, &token);
    let mut consumer = consumer(&broker, 3, 3, sink);

    let report = consumer.run(token).await.unwrap();

    assert_eq!(report.batches_persisted, 1);
    assert_eq!(report.batches_failed, 1);
    assert_eq!(report.records_acked, 3);
    assert_eq!(report.records_released, 3);
    assert_eq!(consumer.sink().inner.records(), published[..3]);
    assert_eq!(acked_ids(&broker), ids(&published[..3]));
    assert_eq!(broker.ready_count(&queue()), 3);
    assert_eq!(broker.redeliveries(&queue()), 3);
}

#[tokio::test]
async fn failed_persist_acks_nothing() {
    let broker = MemoryBroker::new();
    let published = records(4, 4);
    publish(&broker, &published);

    let token = CancellationToken::new();
    let sink = InstrumentedSink::new(&broker)
        .always_failing()
        .cancelling_after(1, &token);
    let mut consumer = consumer(&broker, 4, 4, sink);

    let report = consumer.run(token).await.unwrap();

    assert_eq!(report.records_acked, 0);
    assert_eq!(report.records_released, 4);
    assert!(broker.acked(&queue()).is_empty());
    assert!(consumer.sink().inner.is_empty());
    assert_eq!(broker.in_flight(&queue()), 0);
    assert_eq!(broker.ready_count(&queue()), 4);
}

#[tokio::test]
async fn released_batch_is_persisted_on_redelivery() {
    let broker = MemoryBroker::new();
    let published = records(3, 5);
    publish(&broker, &published);

    let token = CancellationToken::new();
    let sink = InstrumentedSink::new(&broker)
        .failing_on(1)
        .cancelling_after(2, &token);
    let mut consumer = consumer(&broker, 3, 3, sink);

    let report = consumer.run(token).await.unwrap();

    assert_eq!(consumer.sink().calls(), 2);
    assert_eq!(report.batches_failed, 1);
    assert_eq!(report.batches_persisted, 1);
    assert_eq!(consumer.sink().inner.records(), published);
    assert_eq!(acked_ids(&broker), ids(&published));
}

#[tokio::test]
async fn no_record_is_acked_before_its_batch_is_persisted() {
    let broker = MemoryBroker::new();
    let published = records(12, 6);
    publish(&broker, &published);
    broker.close();

    let mut consumer = consumer(&broker, 4, 8, InstrumentedSink::new(&broker));
    let report = consumer.run(CancellationToken::new()).await.unwrap();

    assert_eq!(report.batches_persisted, 3);
    assert!(consumer.sink().violations().is_empty());

    let stored: HashSet<RecordId> = ids(&consumer.sink().inner.records()).into_iter().collect();
    assert!(acked_ids(&broker).iter().all(|id| stored.contains(id)));
}

#[tokio::test]
async fn malformed_message_is_dead_lettered_and_never_batched() {
    let broker = MemoryBroker::new();
    let valid = records(3, 7);
    let garbage = Bytes::from_static(br#"{"id": "not-a-uuid", "name": "x"}"#);

    broker.declare(&queue());
    broker.enqueue(&queue(), valid[0].encode().unwrap()).unwrap();
    broker.enqueue(&queue(), garbage.clone()).unwrap();
    broker.enqueue(&queue(), valid[1].encode().unwrap()).unwrap();
    broker.enqueue(&queue(), valid[2].encode().unwrap()).unwrap();
    broker.close();

    let mut consumer = consumer(&broker, 3, 4, MemorySink::new());
    let report = consumer.run(CancellationToken::new()).await.unwrap();

    assert_eq!(report.rejected, 1);
    assert_eq!(report.batches_persisted, 1);
    assert_eq!(consumer.sink().records(), valid);
    assert_eq!(broker.dead_letters(&queue()), [garbage]);
    assert_eq!(acked_ids(&broker), ids(&valid));
}

#[tokio::test]
async fn batch_size_one_persists_every_message_individually() {
    let broker = MemoryBroker::new();
    let published = records(3, 8);
    publish(&broker, &published);
    broker.close();

    let mut consumer = consumer(&broker, 1, 1, MemorySink::new());
    let report = consumer.run(CancellationToken::new()).await.unwrap();

    assert_eq!(report.batches_persisted, 3);
    assert_eq!(report.pending, 0);
    assert_eq!(consumer.sink().batches_committed(), 3);
    assert_eq!(acked_ids(&broker), ids(&published));
}

#[tokio::test]
async fn duplicate_deliveries_are_stored_once() {
    let broker = MemoryBroker::new();
    let record = records(1, 9).remove(0);
    publish(&broker, &[record.clone(), record.clone()]);
    broker.close();

    let mut consumer = consumer(&broker, 2, 2, MemorySink::new());
    let report = consumer.run(CancellationToken::new()).await.unwrap();

    assert_eq!(report.records_acked, 2);
    assert_eq!(consumer.sink().records(), [record]);
}

#[tokio::test]
async fn lost_connection_ends_the_run_with_an_error() {
    let broker = MemoryBroker::new();
    broker.declare(&queue());

    let mut consumer = consumer(&broker, 2, 2, MemorySink::new());
    let task = tokio::spawn(async move { consumer.run(CancellationToken::new()).await });

    tokio::time::sleep(Duration::from_millis(20)).await;
    broker.sever_connections();

    let err = task.await.unwrap().unwrap_err();
    assert!(matches!(
        err,
        ConsumerError::Transport(TransportError::ConnectionLost(_))
    ));
}

#[tokio::test]
async fn cancelled_before_start_processes_nothing() {
    let broker = MemoryBroker::new();
    publish(&broker, &records(5, 10));

    let token = CancellationToken::new();
    token.cancel();

    let mut consumer = consumer(&broker, 5, 5, MemorySink::new());
    let report = consumer.run(token).await.unwrap();

    assert_eq!(report.stop_reason, StopReason::Cancelled);
    assert_eq!(report.batches_persisted, 0);
    assert_eq!(broker.ready_count(&queue()), 5);
}

#[tokio::test]
async fn invalid_options_are_rejected_at_construction() {
    let broker = MemoryBroker::new();

    for (batch_size, prefetch) in [(0, 5), (5, 4), (5, 70_000)] {
        let result = Consumer::new(
            ConsumerOptions::new(queue(), batch_size, prefetch),
            broker.connect(),
            MemorySink::new(),
        );
        assert!(matches!(result, Err(ConsumerError::InvalidOptions(_))));
    }

    let no_backoff = options(5, 5).with_retry_backoff(Duration::ZERO);
    let result = Consumer::new(no_backoff, broker.connect(), MemorySink::new());
    assert!(matches!(result, Err(ConsumerError::InvalidOptions(_))));
}

#[tokio::test]
async fn store_outage_backs_off_between_attempts() {
    let broker = MemoryBroker::new();
    publish(&broker, &records(5, 11));

    let sink = std::sync::Arc::new(MemorySink::new());
    sink.set_unavailable(Some("disk full"));

    let options = options(5, 5).with_retry_backoff(Duration::from_millis(50));
    let mut consumer =
        Consumer::new(options, broker.connect(), std::sync::Arc::clone(&sink)).unwrap();

    // Current-thread runtime: the cancel task only runs if the loop yields.
    let token = CancellationToken::new();
    let canceller = {
        let token = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            token.cancel();
        })
    };

    let report = tokio::time::timeout(Duration::from_secs(5), consumer.run(token))
        .await
        .expect("run must observe cancellation during an outage")
        .unwrap();
    canceller.await.unwrap();

    assert_eq!(report.stop_reason, StopReason::Cancelled);
    // 300 ms window, 50 ms pause after each failure.
    assert!(report.batches_failed >= 1);
    assert!(
        report.batches_failed <= 8,
        "persist attempted {} times",
        report.batches_failed
    );
    assert_eq!(report.records_released, 5 * report.batches_failed);
    assert_eq!(report.records_acked, 0);
    assert!(sink.is_empty());
    assert_eq!(broker.ready_count(&queue()), 5);
}

#[tokio::test]
async fn store_recovery_after_backoff_persists_the_batch() {
    let broker = MemoryBroker::new();
    let published = records(3, 12);
    publish(&broker, &published);
    broker.close();

    let sink = std::sync::Arc::new(MemorySink::new());
    sink.set_unavailable(Some("locked"));

    let options = options(3, 3).with_retry_backoff(Duration::from_millis(100));
    let mut consumer =
        Consumer::new(options, broker.connect(), std::sync::Arc::clone(&sink)).unwrap();

    let restorer = {
        let sink = std::sync::Arc::clone(&sink);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            sink.set_unavailable(None);
        })
    };

    let report = consumer.run(CancellationToken::new()).await.unwrap();
    restorer.await.unwrap();

    assert_eq!(report.batches_failed, 1);
    assert_eq!(report.batches_persisted, 1);
    assert_eq!(sink.records(), published);
    assert_eq!(acked_ids(&broker), ids(&published));
}

/// Transport whose first `failures` acks are refused by the broker.
struct RefusingAcks {
    inner: MemoryConnection,
    failures: usize,
}

#[async_trait]
impl Transport for RefusingAcks {
    async fn declare(&mut self, queue: &QueueName) -> Result<(), TransportError> {
        self.inner.declare(queue).await
    }

    async fn set_prefetch(&mut self, limit: u16) -> Result<(), TransportError> {
        self.inner.set_prefetch(limit).await
    }

    async fn consume(&mut self, queue: &QueueName) -> Result<(), TransportError> {
        self.inner.consume(queue).await
    }

    async fn recv(&mut self) -> Result<Option<Delivery>, TransportError> {
        self.inner.recv().await
    }

    async fn ack(&mut self, tag: DeliveryTag) -> Result<(), AckError> {
        if self.failures > 0 {
            self.failures -= 1;
            return Err(AckError::UnknownTag(tag.as_u64()));
        }
        self.inner.ack(tag).await
    }

    async fn nack(&mut self, tag: DeliveryTag, requeue: bool) -> Result<(), AckError> {
        self.inner.nack(tag, requeue).await
    }
}

#[tokio::test]
async fn ack_failures_are_counted_and_the_run_continues() {
    let broker = MemoryBroker::new();
    let published = records(6, 13);
    publish(&broker, &published);
    broker.close();

    let transport = RefusingAcks {
        inner: broker.connect(),
        failures: 3,
    };
    // Refused acks keep their prefetch credit, so leave room for a second batch.
    let mut consumer = Consumer::new(options(3, 6), transport, MemorySink::new()).unwrap();
    let report = consumer.run(CancellationToken::new()).await.unwrap();

    assert_eq!(report.stop_reason, StopReason::StreamEnded);
    assert_eq!(report.batches_persisted, 2);
    assert_eq!(report.ack_failures, 3);
    assert_eq!(report.records_acked, 3);
    assert_eq!(consumer.sink().records(), published);
    assert_eq!(acked_ids(&broker), ids(&published[3..]));
    assert_eq!(broker.in_flight(&queue()), 3);

    // The unacknowledged first batch comes back once the connection goes away.
    drop(consumer);
    assert_eq!(broker.ready_count(&queue()), 3);
}

#[tokio::test]
async fn produced_events_land_in_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let sink = SqliteSink::open(dir.path().join("users.db")).await.unwrap();
    let broker = MemoryBroker::new();

    let published = publish_events(
        &mut broker.publisher(),
        &queue(),
        &mut RecordGenerator::seeded(42),
        &ProduceOptions::burst(10),
        &CancellationToken::new(),
    )
    .await
    .unwrap();
    assert_eq!(published, 10);
    broker.close();

    let mut consumer = consumer(&broker, 5, 5, sink.clone());
    let report = consumer.run(CancellationToken::new()).await.unwrap();

    assert_eq!(report.batches_persisted, 2);
    assert_eq!(sink.count().await.unwrap(), 10);
    assert_eq!(acked_ids(&broker), ids(&sink.fetch_all().await.unwrap()));
}
