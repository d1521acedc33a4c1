//! Broker client seam
//!
//! The pipeline never talks to a wire protocol directly. It drives these
//! traits, which are implemented by the in-process [`memory`] broker and,
//! with the `kafka` feature, by the rdkafka-backed [`kafka`] client.
//!
//! # Design Notes
//! - Generic over the broker in the pipeline (monomorphized, no `dyn`)
//! - `Publisher::submit` borrows the payload; a backend that keeps the
//!   bytes past the call must copy them, so callers may recycle the buffer
//!   as soon as `submit` returns
//! - Delivery results arrive asynchronously on a separate event stream

pub mod memory;

#[cfg(feature = "kafka")]
pub mod kafka;

pub use memory::MemoryBroker;

#[cfg(feature = "kafka")]
pub use kafka::KafkaBroker;

use crate::core::{ConnectionSite, Origin};
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;

/// Message read from a subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub origin: Origin,
    pub payload: Vec<u8>,
    pub headers: Vec<(String, Vec<u8>)>,
}

impl InboundMessage {
    /// Value of the first header named `key`
    pub fn header(&self, key: &str) -> Option<&[u8]> {
        self.headers
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_slice())
    }
}

/// Message handed to a publisher
#[derive(Debug, Clone, Copy)]
pub struct OutboundRecord<'a> {
    pub topic: &'a str,
    pub payload: &'a [u8],
    pub headers: &'a [(&'a str, &'a [u8])],
}

/// Asynchronous result reported by a publisher after submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryEvent {
    /// Broker acknowledged the message
    Delivered { origin: Origin },
    /// Broker rejected or lost the message
    Failed { topic: String, error: String },
    /// Client-level error not tied to one message
    ClientError(String),
    /// Anything else the client reports
    Other(String),
}

/// Per-topic result of a provisioning request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicOutcome {
    Created(String),
    Failed { topic: String, reason: String },
}

/// Errors reported by broker clients
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BrokerError {
    /// Bounded wait elapsed without a result
    #[error("Timed out")]
    Timeout,
    /// Local producer queue is full
    #[error("Queue full")]
    QueueFull,
    /// Client could not be created or subscribed
    #[error("Client construction failed: {0}")]
    Construction(String),
    /// Administrative request failed as a whole
    #[error("Admin request failed: {0}")]
    Admin(String),
    #[error("Client closed")]
    Closed,
    /// Anything else the client reports
    #[error("Transport error: {0}")]
    Transport(String),
}

/// Factory for broker clients
#[async_trait]
pub trait Broker: Send + Sync + 'static {
    type Subscription: Subscription;
    type Publisher: Publisher;

    /// Create a consumer subscribed to the site's topic
    async fn subscribe(&self, site: &ConnectionSite) -> Result<Self::Subscription, BrokerError>;

    /// Create a producer for the site's brokers
    async fn publisher(&self, site: &ConnectionSite) -> Result<Self::Publisher, BrokerError>;

    /// Provision the site's topic with its partition and replication counts
    async fn create_topic(&self, site: &ConnectionSite) -> Result<Vec<TopicOutcome>, BrokerError>;
}

/// Consumer side of a broker client
#[async_trait]
pub trait Subscription: Send + 'static {
    /// Wait at most `timeout` for the next message
    async fn read(&mut self, timeout: Duration) -> Result<InboundMessage, BrokerError>;

    /// Leave the subscription
    async fn close(&mut self);
}

/// Producer side of a broker client
#[async_trait]
pub trait Publisher: Send + Sync + 'static {
    /// Enqueue a message; returns once the client has accepted or rejected it
    fn submit(&self, record: OutboundRecord<'_>) -> Result<(), BrokerError>;

    /// Take the delivery event stream (only the first call returns it)
    fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<DeliveryEvent>>;

    /// Wait up to `timeout` for in-flight deliveries; returns how many remain
    async fn flush(&self, timeout: Duration) -> usize;

    /// Release client resources; the event stream ends once the publisher drops
    async fn close(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_lookup() {
        let message = InboundMessage {
            origin: Origin::new("flows", 0, 0),
            payload: b"x".to_vec(),
            headers: vec![("kafka-relay".to_string(), b"flows".to_vec())],
        };
        assert_eq!(message.header("kafka-relay"), Some(&b"flows"[..]));
        assert_eq!(message.header("missing"), None);
    }

    #[test]
    fn test_broker_error_display() {
        assert_eq!(BrokerError::QueueFull.to_string(), "Queue full");
        assert_eq!(
            BrokerError::Construction("no brokers".into()).to_string(),
            "Client construction failed: no brokers"
        );
    }
}
