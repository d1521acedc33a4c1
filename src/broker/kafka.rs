//! Apache Kafka broker client over rdkafka
//!
//! - Consumer: `StreamConsumer`, latest offsets, IPv4 broker addresses
//! - Producer: `ThreadedProducer` whose context forwards delivery reports
//!   and client errors onto the publisher's event stream
//! - Admin: `AdminClient` topic creation
//!
//! librdkafka copies the payload on `send`, so the caller's buffer may be
//! reused as soon as `submit` returns.

use super::{
    Broker, BrokerError, DeliveryEvent, InboundMessage, OutboundRecord, Publisher, Subscription,
    TopicOutcome,
};
use crate::core::{ConnectionSite, Origin};
use async_trait::async_trait;
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::{ClientContext, DefaultClientContext};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::message::{Header, Headers, Message, OwnedHeaders};
use rdkafka::producer::{BaseRecord, DeliveryResult, Producer, ProducerContext, ThreadedProducer};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::Level;

/// Kafka client factory
///
/// Connection parameters come from the [`ConnectionSite`] passed to each
/// call; this type only carries client tunables.
#[derive(Clone, Debug)]
pub struct KafkaBroker {
    /// Local delivery timeout (`message.timeout.ms`)
    pub message_timeout_ms: u64,
}

impl KafkaBroker {
    pub fn new() -> Self {
        Self {
            message_timeout_ms: 30_000,
        }
    }

    fn base_config(site: &ConnectionSite) -> ClientConfig {
        let mut config = ClientConfig::new();
        config.set("bootstrap.servers", site.brokers());
        config.set("broker.address.family", "v4");
        config
    }

    fn consumer_config(&self, site: &ConnectionSite) -> ClientConfig {
        let mut config = Self::base_config(site);
        config.set("group.id", site.group_id());
        config.set("auto.offset.reset", "latest");
        config
    }

    fn producer_config(&self, site: &ConnectionSite) -> ClientConfig {
        let mut config = Self::base_config(site);
        config.set("message.timeout.ms", self.message_timeout_ms.to_string());
        config
    }
}

impl Default for KafkaBroker {
    fn default() -> Self {
        Self::new()
    }
}

/// Map an rdkafka error onto the pipeline's error classes
fn classify(error: KafkaError) -> BrokerError {
    match error.rdkafka_error_code() {
        Some(RDKafkaErrorCode::QueueFull) => BrokerError::QueueFull,
        Some(RDKafkaErrorCode::MessageTimedOut)
        | Some(RDKafkaErrorCode::OperationTimedOut)
        | Some(RDKafkaErrorCode::RequestTimedOut) => BrokerError::Timeout,
        _ => BrokerError::Transport(error.to_string()),
    }
}

#[async_trait]
impl Broker for KafkaBroker {
    type Subscription = KafkaSubscription;
    type Publisher = KafkaPublisher;

    async fn subscribe(&self, site: &ConnectionSite) -> Result<KafkaSubscription, BrokerError> {
        let consumer: StreamConsumer = self
            .consumer_config(site)
            .create()
            .map_err(|e| BrokerError::Construction(format!("Failed to create Kafka consumer: {}", e)))?;

        consumer
            .subscribe(&[site.topic()])
            .map_err(|e| BrokerError::Construction(format!("Failed to subscribe: {}", e)))?;

        crate::log_broker!(
            Level::INFO,
            brokers = %site.brokers(),
            topic = %site.topic(),
            group_id = %site.group_id(),
            "Subscribed to Kafka topic"
        );

        Ok(KafkaSubscription { consumer })
    }

    async fn publisher(&self, site: &ConnectionSite) -> Result<KafkaPublisher, BrokerError> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let producer: ThreadedProducer<DeliveryContext> = self
            .producer_config(site)
            .create_with_context(DeliveryContext { events: events_tx })
            .map_err(|e| BrokerError::Construction(format!("Failed to create Kafka producer: {}", e)))?;

        crate::log_broker!(Level::INFO, brokers = %site.brokers(), "Connected Kafka producer");

        Ok(KafkaPublisher {
            producer: Arc::new(producer),
            events: Some(events_rx),
        })
    }

    async fn create_topic(&self, site: &ConnectionSite) -> Result<Vec<TopicOutcome>, BrokerError> {
        let admin: AdminClient<DefaultClientContext> = Self::base_config(site)
            .create()
            .map_err(|e| BrokerError::Construction(format!("Failed to create admin client: {}", e)))?;

        let topic = NewTopic::new(
            site.topic(),
            site.partitions(),
            TopicReplication::Fixed(site.replication_factor()),
        );

        let results = admin
            .create_topics(&[topic], &AdminOptions::new())
            .await
            .map_err(|e| BrokerError::Admin(e.to_string()))?;

        Ok(results
            .into_iter()
            .map(|result| match result {
                Ok(name) => TopicOutcome::Created(name),
                Err((name, code)) => TopicOutcome::Failed {
                    topic: name,
                    reason: code.to_string(),
                },
            })
            .collect())
    }
}

/// Subscribed Kafka consumer
pub struct KafkaSubscription {
    consumer: StreamConsumer,
}

#[async_trait]
impl Subscription for KafkaSubscription {
    async fn read(&mut self, timeout: Duration) -> Result<InboundMessage, BrokerError> {
        match tokio::time::timeout(timeout, self.consumer.recv()).await {
            Err(_) => Err(BrokerError::Timeout),
            Ok(Err(e)) => Err(classify(e)),
            Ok(Ok(message)) => {
                let headers = message
                    .headers()
                    .map(|headers| {
                        headers
                            .iter()
                            .map(|h| (h.key.to_string(), h.value.map(<[u8]>::to_vec).unwrap_or_default()))
                            .collect()
                    })
                    .unwrap_or_default();

                Ok(InboundMessage {
                    origin: Origin::new(message.topic(), message.partition(), message.offset()),
                    payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
                    headers,
                })
            }
        }
    }

    async fn close(&mut self) {
        self.consumer.unsubscribe();
        crate::log_broker!(Level::DEBUG, "Kafka consumer unsubscribed");
    }
}

/// Producer context forwarding client callbacks as delivery events
pub struct DeliveryContext {
    events: mpsc::UnboundedSender<DeliveryEvent>,
}

impl ClientContext for DeliveryContext {
    fn error(&self, error: KafkaError, reason: &str) {
        let _ = self
            .events
            .send(DeliveryEvent::ClientError(format!("{}: {}", error, reason)));
    }
}

impl ProducerContext for DeliveryContext {
    type DeliveryOpaque = ();

    fn delivery(&self, result: &DeliveryResult<'_>, _opaque: Self::DeliveryOpaque) {
        let event = match result {
            Ok(message) => DeliveryEvent::Delivered {
                origin: Origin::new(message.topic(), message.partition(), message.offset()),
            },
            Err((error, message)) => DeliveryEvent::Failed {
                topic: message.topic().to_string(),
                error: error.to_string(),
            },
        };
        let _ = self.events.send(event);
    }
}

/// Kafka producer handle
pub struct KafkaPublisher {
    producer: Arc<ThreadedProducer<DeliveryContext>>,
    events: Option<mpsc::UnboundedReceiver<DeliveryEvent>>,
}

#[async_trait]
impl Publisher for KafkaPublisher {
    fn submit(&self, record: OutboundRecord<'_>) -> Result<(), BrokerError> {
        let mut headers = OwnedHeaders::new();
        for &(key, value) in record.headers {
            headers = headers.insert(Header {
                key,
                value: Some(value),
            });
        }

        let base = BaseRecord::<(), [u8]>::to(record.topic)
            .payload(record.payload)
            .headers(headers);

        self.producer.send(base).map_err(|(e, _)| classify(e))
    }

    fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<DeliveryEvent>> {
        self.events.take()
    }

    async fn flush(&self, timeout: Duration) -> usize {
        let producer = Arc::clone(&self.producer);
        // librdkafka flush blocks the calling thread
        tokio::task::spawn_blocking(move || {
            let _ = producer.flush(timeout);
            producer.in_flight_count().max(0) as usize
        })
        .await
        .unwrap_or(0)
    }

    async fn close(&mut self) {
        crate::log_broker!(
            Level::DEBUG,
            in_flight = self.producer.in_flight_count(),
            "Closing Kafka producer"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_queue_full() {
        let err = KafkaError::MessageProduction(RDKafkaErrorCode::QueueFull);
        assert_eq!(classify(err), BrokerError::QueueFull);
    }

    #[test]
    fn test_classify_timeout() {
        let err = KafkaError::MessageProduction(RDKafkaErrorCode::MessageTimedOut);
        assert_eq!(classify(err), BrokerError::Timeout);
    }

    #[test]
    fn test_classify_other() {
        let err = KafkaError::MessageProduction(RDKafkaErrorCode::UnknownTopicOrPartition);
        assert!(matches!(classify(err), BrokerError::Transport(_)));
    }

    #[test]
    fn test_consumer_config() {
        let site = ConnectionSite::new("kafka-1:9092", "flows", "dashboard");
        let config = KafkaBroker::new().consumer_config(&site);
        assert_eq!(config.get("bootstrap.servers"), Some("kafka-1:9092"));
        assert_eq!(config.get("group.id"), Some("dashboard"));
        assert_eq!(config.get("auto.offset.reset"), Some("latest"));
        assert_eq!(config.get("broker.address.family"), Some("v4"));
    }
}
