//! Broker consumer: ingest task + processing task
//!
//! `consume` reads from the broker into pooled buffers and hands each one
//! through a rendezvous to `process`, which appends it to the ordered
//! message history. The two run as separate tasks on a shared
//! `Arc<Consumer>`:
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use kafka_relay::{ConnectionSite, Consumer, PipelineConfig};
//! # use kafka_relay::broker::MemoryBroker;
//! # use tokio_util::sync::CancellationToken;
//! # async fn run() {
//! let site = Arc::new(ConnectionSite::new("localhost:9092", "flows", "dashboard"));
//! let consumer = Arc::new(Consumer::new("flows", MemoryBroker::new(), site, &PipelineConfig::default()));
//! let cancel = CancellationToken::new();
//!
//! let ingest = tokio::spawn({
//!     let (c, t) = (Arc::clone(&consumer), cancel.clone());
//!     async move { c.consume(t).await }
//! });
//! let process = tokio::spawn({
//!     let (c, t) = (Arc::clone(&consumer), cancel.clone());
//!     async move { c.process(t).await }
//! });
//! # }
//! ```

use super::rendezvous::{rendezvous, HandoffReceiver, HandoffSender};
use crate::broker::{Broker, BrokerError, Subscription};
use crate::core::{ConnectionSite, MessageRecord, Origin};
use crate::infrastructure::config::PipelineConfig;
use crate::infrastructure::{BufferPool, PipelineMetrics, PooledBuffer, SyncList};
use crate::{RelayError, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::Level;

/// Payload travelling from ingest to processing
struct Inbound {
    origin: Origin,
    buffer: PooledBuffer,
}

/// Consumer pipeline for one topic
pub struct Consumer<B: Broker> {
    name: String,
    broker: B,
    site: Arc<ConnectionSite>,
    buffers: Arc<BufferPool>,
    messages: Arc<SyncList<MessageRecord>>,
    metrics: Arc<PipelineMetrics>,
    /// Consecutive read timeouts since the last append or reset
    reset: AtomicU32,
    reset_threshold: u32,
    read_timeout: Duration,
    ingest_active: AtomicBool,
    process_active: AtomicBool,
    handoff_tx: Mutex<Option<HandoffSender<Inbound>>>,
    handoff_rx: Mutex<Option<HandoffReceiver<Inbound>>>,
}

impl<B: Broker> Consumer<B> {
    pub fn new(
        name: impl Into<String>,
        broker: B,
        site: Arc<ConnectionSite>,
        config: &PipelineConfig,
    ) -> Self {
        let (tx, rx) = rendezvous();
        Self {
            name: name.into(),
            broker,
            site,
            buffers: Arc::new(BufferPool::new(config.pool_capacity)),
            messages: Arc::new(SyncList::new()),
            metrics: Arc::new(PipelineMetrics::new()),
            reset: AtomicU32::new(0),
            reset_threshold: config.reset_threshold,
            read_timeout: config.read_timeout(),
            ingest_active: AtomicBool::new(false),
            process_active: AtomicBool::new(false),
            handoff_tx: Mutex::new(Some(tx)),
            handoff_rx: Mutex::new(Some(rx)),
        }
    }

    /// Share a metrics collector with other pipeline parts
    pub fn with_metrics(mut self, metrics: Arc<PipelineMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Ingest task: broker → rendezvous
    ///
    /// Runs until `cancel` fires or the processing side goes away. Returns
    /// `RelayError::Fatal` if the subscription cannot be created.
    pub async fn consume(&self, cancel: CancellationToken) -> Result<()> {
        let handoff = self
            .handoff_tx
            .lock()
            .take()
            .ok_or(RelayError::AlreadyRunning("consumer ingest"))?;

        let mut subscription = self
            .broker
            .subscribe(&self.site)
            .await
            .map_err(|e| RelayError::fatal("failed to create subscription", e))?;

        crate::log_consumer!(
            Level::INFO,
            name = %self.name,
            topic = %self.site.topic(),
            "Consume started"
        );
        self.site.set_active(true);
        self.ingest_active.store(true, Ordering::Release);

        loop {
            if cancel.is_cancelled() {
                crate::log_consumer!(Level::INFO, name = %self.name, "Consume cancelled");
                break;
            }

            let mut buffer = self.buffers.acquire();
            let read = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    self.buffers.release(buffer);
                    continue;
                }
                read = subscription.read(self.read_timeout) => read,
            };

            match read {
                Ok(message) => {
                    buffer.write(&message.payload);
                    self.metrics.record_consumed();
                    let permit = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            self.buffers.release(buffer);
                            continue;
                        }
                        reserved = handoff.reserve() => match reserved {
                            Ok(permit) => permit,
                            Err(_) => {
                                self.buffers.release(buffer);
                                self.processing_closed();
                                break;
                            }
                        },
                    };

                    // From here the buffer belongs to the rendezvous; if
                    // cancellation wins, `process` returns it on close
                    let ack = permit.send(Inbound {
                        origin: message.origin,
                        buffer,
                    });
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => continue,
                        received = ack.received() => {
                            if received.is_err() {
                                self.processing_closed();
                                break;
                            }
                        }
                    }
                }
                Err(BrokerError::Timeout) => {
                    self.metrics.record_read_timeout();
                    if self.site.reset_enabled() {
                        self.reset.fetch_add(1, Ordering::AcqRel);
                    }
                    self.buffers.release(buffer);
                }
                Err(e) => {
                    self.metrics.record_read_error();
                    crate::log_consumer!(Level::WARN, name = %self.name, error = %e, "Consumer error");
                    self.buffers.release(buffer);
                }
            }
        }

        // Dropping the sender closes the rendezvous for `process`
        drop(handoff);
        self.ingest_active.store(false, Ordering::Release);
        self.site.set_active(false);
        subscription.close().await;

        crate::log_consumer!(Level::INFO, name = %self.name, "Consume finished");
        Ok(())
    }

    /// Processing task: rendezvous → message history
    pub async fn process(&self, cancel: CancellationToken) -> Result<()> {
        let mut handoff = self
            .handoff_rx
            .lock()
            .take()
            .ok_or(RelayError::AlreadyRunning("consumer processing"))?;

        crate::log_consumer!(Level::INFO, name = %self.name, "Process started");
        self.process_active.store(true, Ordering::Release);

        loop {
            let inbound = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                received = handoff.recv() => match received {
                    Some(inbound) => inbound,
                    None => break,
                },
            };

            // Cancellation raced the receive: discard
            if cancel.is_cancelled() {
                self.buffers.release(inbound.buffer);
                break;
            }

            self.record(inbound);
        }

        for stranded in handoff.close() {
            self.buffers.release(stranded.buffer);
        }
        self.process_active.store(false, Ordering::Release);
        crate::log_consumer!(Level::INFO, name = %self.name, "Process finished");
        Ok(())
    }

    fn processing_closed(&self) {
        crate::log_consumer!(
            Level::WARN,
            name = %self.name,
            "Processing stage closed, stopping ingest"
        );
    }

    /// Apply the reset policy and append one record
    fn record(&self, inbound: Inbound) {
        let Inbound { origin, buffer } = inbound;
        {
            let mut messages = self.messages.lock();
            if self.site.reset_enabled() && self.reset.load(Ordering::Acquire) > self.reset_threshold {
                crate::log_consumer!(
                    Level::INFO,
                    name = %self.name,
                    items = messages.len(),
                    "Message list reset event"
                );
                messages.clear();
                self.metrics.record_reset();
            }
            messages.push_back(MessageRecord::from_bytes(origin, buffer.as_bytes()));
            self.reset.store(0, Ordering::Release);
        }
        self.metrics.record_stored();
        self.buffers.release(buffer);
    }

    /// True while either task is running
    pub fn is_active(&self) -> bool {
        self.ingest_active.load(Ordering::Acquire) || self.process_active.load(Ordering::Acquire)
    }

    /// Shared handle to the message history
    pub fn message_list(&self) -> Arc<SyncList<MessageRecord>> {
        Arc::clone(&self.messages)
    }

    pub fn connection_site(&self) -> Arc<ConnectionSite> {
        Arc::clone(&self.site)
    }

    /// Current timeout streak
    pub fn reset_count(&self) -> u32 {
        self.reset.load(Ordering::Acquire)
    }

    pub fn metrics(&self) -> Arc<PipelineMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn buffer_pool(&self) -> Arc<BufferPool> {
        Arc::clone(&self.buffers)
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}
