//! Broker producer: dispatch task + caller-side `send_message`
//!
//! Callers hand payloads through a rendezvous to `produce`, which submits
//! them to the broker. Delivery reports are drained by a background task and
//! only logged. Submission is fire-and-forget: no error reaches the caller.

use super::rendezvous::{rendezvous, HandoffReceiver, HandoffSender};
use crate::broker::{Broker, BrokerError, DeliveryEvent, OutboundRecord, Publisher, TopicOutcome};
use crate::core::ConnectionSite;
use crate::infrastructure::config::PipelineConfig;
use crate::infrastructure::{BufferPool, PipelineMetrics, PooledBuffer};
use crate::{RelayError, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::Level;

/// Producer pipeline for one topic
pub struct Producer<B: Broker> {
    broker: B,
    site: Arc<ConnectionSite>,
    buffers: Arc<BufferPool>,
    metrics: Arc<PipelineMetrics>,
    header_key: String,
    flush_timeout: Duration,
    flush_attempts: u32,
    active: AtomicBool,
    handoff_tx: HandoffSender<PooledBuffer>,
    handoff_rx: Mutex<Option<HandoffReceiver<PooledBuffer>>>,
}

impl<B: Broker> Producer<B> {
    pub fn new(broker: B, site: Arc<ConnectionSite>, config: &PipelineConfig) -> Self {
        let (tx, rx) = rendezvous();
        Self {
            broker,
            site,
            buffers: Arc::new(BufferPool::new(config.pool_capacity)),
            metrics: Arc::new(PipelineMetrics::new()),
            header_key: config.header_key.clone(),
            flush_timeout: config.flush_timeout(),
            flush_attempts: config.flush_attempts,
            active: AtomicBool::new(false),
            handoff_tx: tx,
            handoff_rx: Mutex::new(Some(rx)),
        }
    }

    /// Share a metrics collector with other pipeline parts
    pub fn with_metrics(mut self, metrics: Arc<PipelineMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Dispatch task: rendezvous → broker
    ///
    /// On cancellation stops taking handoffs, flushes in-flight deliveries
    /// (bounded) and closes the publisher. Returns `RelayError::Fatal` if the
    /// publisher cannot be created.
    pub async fn produce(&self, cancel: CancellationToken) -> Result<()> {
        let mut handoff = self
            .handoff_rx
            .lock()
            .take()
            .ok_or(RelayError::AlreadyRunning("producer dispatch"))?;

        let mut publisher = self
            .broker
            .publisher(&self.site)
            .await
            .map_err(|e| RelayError::fatal("failed to create publisher", e))?;

        let events = publisher
            .take_events()
            .map(|rx| tokio::spawn(drain_delivery_events(rx, Arc::clone(&self.metrics))));

        crate::log_producer!(Level::INFO, topic = %self.site.topic(), "Produce started");
        self.site.set_active(true);
        self.active.store(true, Ordering::Release);

        loop {
            let buffer = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                received = handoff.recv() => match received {
                    Some(buffer) => buffer,
                    None => break,
                },
            };

            self.dispatch(&publisher, &buffer);
            self.buffers.release(buffer);
        }

        for stranded in handoff.close() {
            self.buffers.release(stranded);
        }
        self.active.store(false, Ordering::Release);

        self.drain(&publisher).await;
        publisher.close().await;
        drop(publisher);

        if let Some(task) = events {
            if tokio::time::timeout(self.flush_timeout, task).await.is_err() {
                crate::log_producer!(Level::WARN, "Delivery event stream did not end");
            }
        }

        self.site.set_active(false);
        crate::log_producer!(Level::INFO, topic = %self.site.topic(), "Produce finished");
        Ok(())
    }

    /// Submit one buffer and classify the outcome
    fn dispatch(&self, publisher: &B::Publisher, buffer: &PooledBuffer) {
        let topic = self.site.topic();
        let headers = [(self.header_key.as_str(), topic.as_bytes())];
        let record = OutboundRecord {
            topic,
            payload: buffer.as_bytes(),
            headers: &headers,
        };

        match publisher.submit(record) {
            Ok(()) => {
                self.metrics.record_dispatched();
                crate::log_producer!(Level::DEBUG, bytes = buffer.len(), "Produce event");
            }
            Err(BrokerError::QueueFull) => {
                self.metrics.record_dispatch_drop();
                crate::log_producer!(Level::WARN, "Producer queue full, message dropped");
            }
            Err(BrokerError::Timeout) => {
                self.metrics.record_dispatch_drop();
                crate::log_producer!(Level::WARN, "Producer submit timed out, message dropped");
            }
            Err(e) => {
                self.metrics.record_dispatch_drop();
                crate::log_producer!(Level::ERROR, error = %e, "Producer error");
            }
        }
    }

    /// Poll flush until nothing is pending or attempts run out
    async fn drain(&self, publisher: &B::Publisher) {
        for attempt in 1..=self.flush_attempts {
            let pending = publisher.flush(self.flush_timeout).await;
            if pending == 0 {
                return;
            }
            crate::log_producer!(Level::INFO, attempt, pending, "Producer flush ...");
        }
        if self.flush_attempts > 0 {
            crate::log_producer!(
                Level::WARN,
                attempts = self.flush_attempts,
                "Producer flush gave up with deliveries pending"
            );
        }
    }

    /// Hand a payload to the dispatch task
    ///
    /// Suspends until the dispatch task has taken it. If dispatch has
    /// stopped, the payload is dropped and logged.
    pub async fn send_message(&self, payload: impl AsRef<[u8]>) {
        let mut buffer = self.buffers.acquire();
        buffer.write(payload.as_ref());

        if self.handoff_tx.send(buffer).await.is_err() {
            self.metrics.record_dispatch_drop();
            crate::log_producer!(Level::WARN, "Dispatch stopped, message dropped");
        }
    }

    /// Provision the topic using the site's partition and replication counts
    ///
    /// Failure of the request as a whole is fatal; per-topic failures (such
    /// as an existing topic) are logged.
    pub async fn create_topic(&self) -> Result<()> {
        let outcomes = self
            .broker
            .create_topic(&self.site)
            .await
            .map_err(|e| RelayError::fatal("topic creation failed", e))?;

        for outcome in outcomes {
            match outcome {
                TopicOutcome::Created(topic) => crate::log_producer!(
                    Level::INFO,
                    topic = %topic,
                    partitions = self.site.partitions(),
                    replication_factor = self.site.replication_factor(),
                    "Topic created"
                ),
                TopicOutcome::Failed { topic, reason } => crate::log_producer!(
                    Level::WARN,
                    topic = %topic,
                    reason = %reason,
                    "Topic not created"
                ),
            }
        }
        Ok(())
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn connection_site(&self) -> Arc<ConnectionSite> {
        Arc::clone(&self.site)
    }

    pub fn metrics(&self) -> Arc<PipelineMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn buffer_pool(&self) -> Arc<BufferPool> {
        Arc::clone(&self.buffers)
    }
}

/// Log every delivery event until the publisher drops its sender
async fn drain_delivery_events(
    mut events: mpsc::UnboundedReceiver<DeliveryEvent>,
    metrics: Arc<PipelineMetrics>,
) {
    while let Some(event) = events.recv().await {
        match event {
            DeliveryEvent::Delivered { origin } => {
                metrics.record_delivered();
                crate::log_producer!(Level::DEBUG, %origin, "Delivered message");
            }
            DeliveryEvent::Failed { topic, error } => {
                metrics.record_delivery_failure();
                crate::log_producer!(Level::WARN, topic = %topic, error = %error, "Delivery failed");
            }
            DeliveryEvent::ClientError(error) => {
                crate::log_producer!(Level::ERROR, error = %error, "Producer client error");
            }
            DeliveryEvent::Other(event) => {
                crate::log_producer!(Level::DEBUG, event = %event, "Ignored event");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::memory::MemorySubscription;
    use crate::broker::{MemoryBroker, Subscription};
    use crate::pipeline::Supervisor;
    use crate::test_utils::{test_site, wait_until};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;

    type BrokerResult<T> = std::result::Result<T, BrokerError>;

    /// Broker whose publisher never finishes flushing
    struct StallingBroker {
        inner: MemoryBroker,
        flushes: Arc<AtomicU32>,
        closed: Arc<AtomicBool>,
    }

    struct StallingPublisher {
        flushes: Arc<AtomicU32>,
        closed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Broker for StallingBroker {
        type Subscription = MemorySubscription;
        type Publisher = StallingPublisher;

        async fn subscribe(&self, site: &ConnectionSite) -> BrokerResult<MemorySubscription> {
            self.inner.subscribe(site).await
        }

        async fn publisher(&self, _site: &ConnectionSite) -> BrokerResult<StallingPublisher> {
            Ok(StallingPublisher {
                flushes: Arc::clone(&self.flushes),
                closed: Arc::clone(&self.closed),
            })
        }

        async fn create_topic(&self, site: &ConnectionSite) -> BrokerResult<Vec<TopicOutcome>> {
            self.inner.create_topic(site).await
        }
    }

    #[async_trait]
    impl Publisher for StallingPublisher {
        fn submit(&self, _record: OutboundRecord<'_>) -> BrokerResult<()> {
            Ok(())
        }

        fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<DeliveryEvent>> {
            None
        }

        async fn flush(&self, timeout: Duration) -> usize {
            self.flushes.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(timeout).await;
            1
        }

        async fn close(&mut self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    fn producer(broker: &MemoryBroker) -> Arc<Producer<MemoryBroker>> {
        Arc::new(Producer::new(
            broker.clone(),
            Arc::new(test_site(false)),
            &PipelineConfig::default(),
        ))
    }

    fn spawn_produce(
        producer: &Arc<Producer<MemoryBroker>>,
        cancel: &CancellationToken,
    ) -> tokio::task::JoinHandle<Result<()>> {
        let (p, t) = (Arc::clone(producer), cancel.clone());
        tokio::spawn(async move { p.produce(t).await })
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_message_reaches_broker() {
        let broker = MemoryBroker::new();
        let producer = producer(&broker);
        let cancel = CancellationToken::new();
        let task = spawn_produce(&producer, &cancel);

        producer.send_message("hello broker").await;

        let mut sub = broker.subscribe(&test_site(false)).await.unwrap();
        let message = sub.read(Duration::from_secs(6)).await.unwrap();
        assert_eq!(message.payload, b"hello broker");
        assert_eq!(message.header("kafka-relay"), Some(&b"flows"[..]));

        let metrics = producer.metrics();
        wait_until(|| metrics.snapshot().delivered == 1).await;
        assert_eq!(metrics.snapshot().dispatched, 1);

        cancel.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_send_waits_for_dispatch() {
        let broker = MemoryBroker::new();
        let producer = producer(&broker);

        let first = tokio::spawn({
            let p = Arc::clone(&producer);
            async move { p.send_message("first").await }
        });
        let second = tokio::spawn({
            let p = Arc::clone(&producer);
            async move { p.send_message("second").await }
        });

        // No dispatch task yet: both callers stay suspended
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(!first.is_finished());
        assert!(!second.is_finished());

        let cancel = CancellationToken::new();
        let task = spawn_produce(&producer, &cancel);
        first.await.unwrap();
        second.await.unwrap();

        let mut sub = broker.subscribe(&test_site(false)).await.unwrap();
        let a = sub.read(Duration::from_secs(6)).await.unwrap();
        let b = sub.read(Duration::from_secs(6)).await.unwrap();
        assert_eq!(a.payload, b"first");
        assert_eq!(b.payload, b"second");

        cancel.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_queue_full_drops_and_continues() {
        let broker = MemoryBroker::with_queue_capacity(1);
        let producer = producer(&broker);
        let cancel = CancellationToken::new();
        let task = spawn_produce(&producer, &cancel);
        let metrics = producer.metrics();

        producer.send_message("kept").await;
        producer.send_message("dropped").await;
        wait_until(|| metrics.snapshot().dispatch_drops == 1).await;

        // Dispatch is still running once the queue drains
        let mut sub = broker.subscribe(&test_site(false)).await.unwrap();
        assert_eq!(sub.read(Duration::from_secs(6)).await.unwrap().payload, b"kept");
        producer.send_message("later").await;
        assert_eq!(sub.read(Duration::from_secs(6)).await.unwrap().payload, b"later");
        assert_eq!(metrics.snapshot().dispatched, 2);
        assert!(producer.is_active());

        cancel.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_errors_drop_and_continue() {
        let broker = MemoryBroker::new();
        let producer = producer(&broker);
        let cancel = CancellationToken::new();
        let task = spawn_produce(&producer, &cancel);
        let metrics = producer.metrics();
        let pool = producer.buffer_pool();

        broker.fail_next_submit(BrokerError::Timeout);
        producer.send_message("timed out").await;
        wait_until(|| metrics.snapshot().dispatch_drops == 1).await;
        assert_eq!(pool.size(), 1);

        broker.fail_next_submit(BrokerError::Transport("leader moved".into()));
        producer.send_message("transport").await;
        wait_until(|| metrics.snapshot().dispatch_drops == 2).await;
        assert_eq!(pool.size(), 1);

        producer.send_message("delivered").await;
        wait_until(|| metrics.snapshot().dispatched == 1).await;
        assert!(producer.is_active());

        let mut sub = broker.subscribe(&test_site(false)).await.unwrap();
        assert_eq!(sub.read(Duration::from_secs(6)).await.unwrap().payload, b"delivered");

        cancel.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_after_shutdown_returns() {
        let broker = MemoryBroker::new();
        let producer = producer(&broker);
        let cancel = CancellationToken::new();
        let task = spawn_produce(&producer, &cancel);

        wait_until(|| producer.is_active()).await;
        cancel.cancel();
        task.await.unwrap().unwrap();
        assert!(!producer.is_active());
        assert!(!producer.connection_site().is_active());

        producer.send_message("too late").await;
        assert_eq!(producer.metrics().snapshot().dispatch_drops, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_budget_covers_pending_flush() {
        let flushes = Arc::new(AtomicU32::new(0));
        let closed = Arc::new(AtomicBool::new(false));
        let broker = StallingBroker {
            inner: MemoryBroker::new(),
            flushes: Arc::clone(&flushes),
            closed: Arc::clone(&closed),
        };
        let config = PipelineConfig::default();
        let producer = Arc::new(Producer::new(broker, Arc::new(test_site(false)), &config));

        let mut supervisor = Supervisor::new();
        let token = supervisor.token();
        supervisor.spawn("produce", {
            let p = Arc::clone(&producer);
            async move { p.produce(token).await }
        });
        wait_until(|| producer.is_active()).await;
        producer.send_message("in flight").await;

        let report = supervisor.shutdown(config.shutdown_budget()).await;
        assert!(report.is_clean(), "{:?}", report);
        assert_eq!(flushes.load(Ordering::SeqCst), config.flush_attempts);
        assert!(closed.load(Ordering::SeqCst));
        assert!(!producer.connection_site().is_active());
    }

    #[tokio::test]
    async fn test_publisher_failure_is_fatal() {
        let broker = MemoryBroker::new();
        broker.refuse_connections(true);
        let producer = producer(&broker);

        let err = producer.produce(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, RelayError::Fatal(_)));
    }

    #[tokio::test]
    async fn test_create_topic() {
        let broker = MemoryBroker::new();
        let site = Arc::new(test_site(false).with_layout(3, 1));
        let producer = Producer::new(broker.clone(), site, &PipelineConfig::default());

        producer.create_topic().await.unwrap();
        assert_eq!(broker.partitions("flows"), Some(3));

        // Existing topic is logged, not fatal
        producer.create_topic().await.unwrap();
    }

    #[tokio::test]
    async fn test_create_topic_failure_is_fatal() {
        let broker = MemoryBroker::new();
        broker.refuse_connections(true);
        let producer = producer(&broker);
        assert!(matches!(
            producer.create_topic().await,
            Err(RelayError::Fatal(_))
        ));
    }

    #[tokio::test]
    async fn test_delivery_events_counted() {
        let (tx, rx) = mpsc::unbounded_channel();
        let metrics = Arc::new(PipelineMetrics::new());

        tx.send(DeliveryEvent::Delivered {
            origin: crate::core::Origin::new("flows", 0, 1),
        })
        .unwrap();
        tx.send(DeliveryEvent::Failed {
            topic: "flows".into(),
            error: "broker down".into(),
        })
        .unwrap();
        tx.send(DeliveryEvent::ClientError("all brokers down".into()))
            .unwrap();
        drop(tx);

        drain_delivery_events(rx, Arc::clone(&metrics)).await;
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.delivered, 1);
        assert_eq!(snapshot.delivery_failures, 1);
    }
}
