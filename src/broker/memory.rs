//! In-process broker
//!
//! One bounded queue per topic. Subscribers on the same topic share the
//! queue (each message is read once). Publishers confirm delivery
//! synchronously, so `flush` never has anything pending. Used by the tests
//! and by the binary's loopback mode.

use super::{
    Broker, BrokerError, DeliveryEvent, InboundMessage, OutboundRecord, Publisher, Subscription,
    TopicOutcome,
};
use crate::core::{ConnectionSite, Origin};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::Level;

type Entry = Result<InboundMessage, BrokerError>;

struct TopicQueue {
    name: String,
    partitions: i32,
    tx: mpsc::Sender<Entry>,
    rx: tokio::sync::Mutex<mpsc::Receiver<Entry>>,
    next_offset: AtomicI64,
}

impl TopicQueue {
    fn new(name: &str, partitions: i32, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            name: name.to_string(),
            partitions,
            tx,
            rx: tokio::sync::Mutex::new(rx),
            next_offset: AtomicI64::new(0),
        }
    }

    fn push(&self, payload: &[u8], headers: &[(&str, &[u8])]) -> Result<Origin, BrokerError> {
        // Reserve first so a full queue does not burn an offset
        let permit = self.tx.try_reserve().map_err(|e| match e {
            mpsc::error::TrySendError::Full(()) => BrokerError::QueueFull,
            mpsc::error::TrySendError::Closed(()) => BrokerError::Closed,
        })?;
        let origin = Origin::new(
            self.name.clone(),
            0,
            self.next_offset.fetch_add(1, Ordering::Relaxed),
        );
        permit.send(Ok(InboundMessage {
            origin: origin.clone(),
            payload: payload.to_vec(),
            headers: headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_vec()))
                .collect(),
        }));
        Ok(origin)
    }
}

struct Inner {
    topics: Mutex<HashMap<String, Arc<TopicQueue>>>,
    queue_capacity: usize,
    refuse_connections: AtomicBool,
    submit_errors: Mutex<VecDeque<BrokerError>>,
}

/// In-process broker; clones share the same topics
#[derive(Clone)]
pub struct MemoryBroker {
    inner: Arc<Inner>,
}

impl MemoryBroker {
    /// Default per-topic queue bound
    pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

    pub fn new() -> Self {
        Self::with_queue_capacity(Self::DEFAULT_QUEUE_CAPACITY)
    }

    /// Broker whose topic queues hold at most `capacity` unread messages
    pub fn with_queue_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                topics: Mutex::new(HashMap::new()),
                queue_capacity: capacity.max(1),
                refuse_connections: AtomicBool::new(false),
                submit_errors: Mutex::new(VecDeque::new()),
            }),
        }
    }

    /// Make every subsequent client construction fail
    pub fn refuse_connections(&self, refuse: bool) {
        self.inner.refuse_connections.store(refuse, Ordering::Relaxed);
    }

    /// Append a message to `topic`, creating the topic on first use
    pub fn publish(&self, topic: &str, payload: &[u8]) -> Result<Origin, BrokerError> {
        self.topic(topic).push(payload, &[])
    }

    /// Queue an error that the next read on `topic` returns
    pub fn inject_error(&self, topic: &str, error: BrokerError) -> Result<(), BrokerError> {
        self.topic(topic)
            .tx
            .try_send(Err(error))
            .map_err(|_| BrokerError::QueueFull)
    }

    /// Make the next publisher submit fail with `error`
    ///
    /// Errors queue up and are consumed one per submit, in order.
    pub fn fail_next_submit(&self, error: BrokerError) {
        self.inner.submit_errors.lock().push_back(error);
    }

    /// Names of the topics that exist
    pub fn topics(&self) -> Vec<String> {
        let mut names: Vec<_> = self.inner.topics.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Partition count recorded for `topic`
    pub fn partitions(&self, topic: &str) -> Option<i32> {
        self.inner.topics.lock().get(topic).map(|t| t.partitions)
    }

    fn topic(&self, name: &str) -> Arc<TopicQueue> {
        let mut topics = self.inner.topics.lock();
        Arc::clone(
            topics
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(TopicQueue::new(name, 1, self.inner.queue_capacity))),
        )
    }

    fn check_connect(&self, what: &str) -> Result<(), BrokerError> {
        if self.inner.refuse_connections.load(Ordering::Relaxed) {
            return Err(BrokerError::Construction(format!(
                "memory broker refused {}",
                what
            )));
        }
        Ok(())
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    type Subscription = MemorySubscription;
    type Publisher = MemoryPublisher;

    async fn subscribe(&self, site: &ConnectionSite) -> Result<MemorySubscription, BrokerError> {
        self.check_connect("subscription")?;
        crate::log_broker!(Level::DEBUG, topic = %site.topic(), "Memory subscription opened");
        Ok(MemorySubscription {
            queue: Some(self.topic(site.topic())),
        })
    }

    async fn publisher(&self, _site: &ConnectionSite) -> Result<MemoryPublisher, BrokerError> {
        self.check_connect("publisher")?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Ok(MemoryPublisher {
            broker: self.clone(),
            events_tx: Some(events_tx),
            events_rx: Some(events_rx),
        })
    }

    async fn create_topic(&self, site: &ConnectionSite) -> Result<Vec<TopicOutcome>, BrokerError> {
        if self.inner.refuse_connections.load(Ordering::Relaxed) {
            return Err(BrokerError::Admin("memory broker refused admin client".into()));
        }

        let name = site.topic();
        if site.partitions() < 1 || site.replication_factor() < 1 {
            return Ok(vec![TopicOutcome::Failed {
                topic: name.to_string(),
                reason: "invalid partition or replication count".into(),
            }]);
        }

        let mut topics = self.inner.topics.lock();
        if topics.contains_key(name) {
            return Ok(vec![TopicOutcome::Failed {
                topic: name.to_string(),
                reason: "topic already exists".into(),
            }]);
        }
        topics.insert(
            name.to_string(),
            Arc::new(TopicQueue::new(name, site.partitions(), self.inner.queue_capacity)),
        );
        Ok(vec![TopicOutcome::Created(name.to_string())])
    }
}

/// Reader over one topic queue
pub struct MemorySubscription {
    queue: Option<Arc<TopicQueue>>,
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn read(&mut self, timeout: Duration) -> Result<InboundMessage, BrokerError> {
        let queue = self.queue.as_ref().ok_or(BrokerError::Closed)?;
        let next = tokio::time::timeout(timeout, async {
            let mut rx = queue.rx.lock().await;
            rx.recv().await
        })
        .await;

        match next {
            Err(_) => Err(BrokerError::Timeout),
            Ok(None) => Err(BrokerError::Closed),
            Ok(Some(entry)) => entry,
        }
    }

    async fn close(&mut self) {
        self.queue = None;
    }
}

/// Publisher with immediate delivery confirmation
pub struct MemoryPublisher {
    broker: MemoryBroker,
    events_tx: Option<mpsc::UnboundedSender<DeliveryEvent>>,
    events_rx: Option<mpsc::UnboundedReceiver<DeliveryEvent>>,
}

#[async_trait]
impl Publisher for MemoryPublisher {
    fn submit(&self, record: OutboundRecord<'_>) -> Result<(), BrokerError> {
        let events = self.events_tx.as_ref().ok_or(BrokerError::Closed)?;
        if let Some(error) = self.broker.inner.submit_errors.lock().pop_front() {
            return Err(error);
        }
        let origin = self
            .broker
            .topic(record.topic)
            .push(record.payload, record.headers)?;
        let _ = events.send(DeliveryEvent::Delivered { origin });
        Ok(())
    }

    fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<DeliveryEvent>> {
        self.events_rx.take()
    }

    async fn flush(&self, _timeout: Duration) -> usize {
        0
    }

    async fn close(&mut self) {
        self.events_tx = None;
    }
}
