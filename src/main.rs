//! Broker relay daemon
//!
//! # Architecture
//! - **consume/process**: broker topic → ordered in-process history
//! - **produce**: stdin lines → broker topic
//! - **monitor**: periodic status line
//!
//! Built without the `kafka` feature the relay runs against the in-process
//! broker, so every line typed on stdin loops back into the history.

use kafka_relay::broker::Broker;
use kafka_relay::infrastructure::logging::init_logging;
use kafka_relay::infrastructure::PipelineMetrics;
use kafka_relay::pipeline::ShutdownReport;
use kafka_relay::{Config, ConnectionSite, Consumer, Producer, Supervisor};
use std::io::{self, BufRead};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::Level;

/// Lines buffered between the stdin thread and the forwarder
const STDIN_BACKLOG: usize = 16;

/// Main application state
pub struct RelayApp {
    config: Config,
    create_topic: bool,
}

impl RelayApp {
    pub fn new(config: Config, create_topic: bool) -> Self {
        Self {
            config,
            create_topic,
        }
    }

    /// Run the pipeline on `broker` until Ctrl-C, stdin EOF or a fatal error
    pub async fn run<B: Broker + Clone>(&self, broker: B) -> kafka_relay::Result<()> {
        kafka_relay::log_main!(
            Level::INFO,
            brokers = %self.config.site.brokers,
            topic = %self.config.site.topic,
            "Starting relay..."
        );

        let pipeline = &self.config.pipeline;
        let metrics = Arc::new(PipelineMetrics::new());

        // Each side tracks its own active flag
        let consumer = Arc::new(
            Consumer::new(
                self.config.site.topic.clone(),
                broker.clone(),
                Arc::new(ConnectionSite::from(&self.config.site)),
                pipeline,
            )
            .with_metrics(Arc::clone(&metrics)),
        );
        let producer = Arc::new(
            Producer::new(
                broker,
                Arc::new(ConnectionSite::from(&self.config.site)),
                pipeline,
            )
            .with_metrics(Arc::clone(&metrics)),
        );

        if self.create_topic {
            producer.create_topic().await?;
        }

        let mut supervisor = Supervisor::new();
        let token = supervisor.token();

        supervisor.spawn("consume", {
            let (c, t) = (Arc::clone(&consumer), token.clone());
            async move { c.consume(t).await }
        });
        supervisor.spawn("process", {
            let (c, t) = (Arc::clone(&consumer), token.clone());
            async move { c.process(t).await }
        });
        supervisor.spawn("produce", {
            let (p, t) = (Arc::clone(&producer), token.clone());
            async move { p.produce(t).await }
        });
        supervisor.spawn(
            "stdin",
            forward_lines(spawn_stdin_reader(), Arc::clone(&producer), token.clone()),
        );
        supervisor.spawn("monitor", {
            let (c, p, m, t) = (
                Arc::clone(&consumer),
                Arc::clone(&producer),
                Arc::clone(&metrics),
                token.clone(),
            );
            let interval = pipeline.monitor_interval();
            async move {
                let mut ticker = tokio::time::interval(interval);
                loop {
                    tokio::select! {
                        biased;
                        _ = t.cancelled() => return Ok(()),
                        _ = ticker.tick() => {}
                    }
                    let s = m.snapshot();
                    kafka_relay::log_main!(
                        Level::INFO,
                        consumer_active = c.is_active(),
                        producer_active = p.is_active(),
                        stored = c.message_list().len(),
                        consumed = s.consumed,
                        read_timeouts = s.read_timeouts,
                        resets = s.resets,
                        dispatched = s.dispatched,
                        dispatch_drops = s.dispatch_drops,
                        delivered = s.delivered,
                        delivery_failures = s.delivery_failures,
                        uptime_s = s.uptime_seconds,
                        "Relay status"
                    );
                }
            }
        });

        let outcome = supervisor
            .wait_for({
                let t = token.clone();
                async move {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => {
                            kafka_relay::log_main!(Level::INFO, "Interrupt received");
                        }
                        _ = t.cancelled() => {}
                    }
                }
            })
            .await;

        let report = supervisor.shutdown(pipeline.shutdown_budget()).await;
        log_report(&report);
        outcome
    }
}

/// Read stdin on a dedicated thread
///
/// The blocking read is never joined, so a pending read does not hold the
/// runtime open once shutdown has finished.
fn spawn_stdin_reader() -> mpsc::Receiver<io::Result<String>> {
    let (tx, rx) = mpsc::channel(STDIN_BACKLOG);
    let reader = std::thread::Builder::new()
        .name("stdin-reader".into())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                if tx.blocking_send(line).is_err() {
                    break;
                }
            }
        });
    // Without a reader the forwarder sees end of input
    if let Err(e) = reader {
        kafka_relay::log_main!(Level::ERROR, error = %e, "Failed to start stdin reader");
    }
    rx
}

/// Forward lines to the producer; end of input stops the relay
async fn forward_lines<B: Broker>(
    mut lines: mpsc::Receiver<io::Result<String>>,
    producer: Arc<Producer<B>>,
    cancel: CancellationToken,
) -> kafka_relay::Result<()> {
    loop {
        let line = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            line = lines.recv() => line.transpose()?,
        };
        match line {
            Some(line) if line.is_empty() => continue,
            Some(line) => {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Ok(()),
                    _ = producer.send_message(line) => {}
                }
            }
            None => {
                kafka_relay::log_main!(Level::INFO, "stdin closed, shutting down");
                cancel.cancel();
                return Ok(());
            }
        }
    }
}

fn log_report(report: &ShutdownReport) {
    for (task, error) in &report.failed {
        kafka_relay::log_main!(Level::ERROR, task, error = %error, "Task ended with error");
    }
    kafka_relay::log_main!(
        Level::INFO,
        completed = report.completed.len(),
        failed = report.failed.len(),
        aborted = report.aborted,
        clean = report.is_clean(),
        "Relay stopped"
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load()?;
    // Keep the guard alive so the file writer flushes on exit
    let _log_guard = init_logging(&config.logging)?;

    let create_topic = std::env::args().skip(1).any(|arg| arg == "--create-topic");
    let app = RelayApp::new(config, create_topic);

    #[cfg(feature = "kafka")]
    app.run(kafka_relay::broker::KafkaBroker::new()).await?;

    #[cfg(not(feature = "kafka"))]
    app.run(kafka_relay::broker::MemoryBroker::new()).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use kafka_relay::broker::{MemoryBroker, Subscription};
    use kafka_relay::PipelineConfig;
    use std::time::Duration;

    fn producer(broker: &MemoryBroker) -> Arc<Producer<MemoryBroker>> {
        Arc::new(Producer::new(
            broker.clone(),
            Arc::new(ConnectionSite::new("memory", "flows", "tests")),
            &PipelineConfig::default(),
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_with_reader_pending() {
        let producer = producer(&MemoryBroker::new());
        // Sender kept alive: the reader never yields a line or EOF
        let (_tx, rx) = mpsc::channel(STDIN_BACKLOG);

        let mut supervisor = Supervisor::new();
        let token = supervisor.token();
        supervisor.spawn("stdin", forward_lines(rx, Arc::clone(&producer), token));

        let report = supervisor.shutdown(Duration::from_secs(1)).await;
        assert!(report.is_clean());
        assert_eq!(report.completed, vec!["stdin"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_while_send_waits_for_dispatch() {
        // No dispatch task: the forwarder parks in send_message
        let producer = producer(&MemoryBroker::new());
        let (tx, rx) = mpsc::channel(STDIN_BACKLOG);
        tx.send(Ok("parked".to_string())).await.unwrap();

        let mut supervisor = Supervisor::new();
        let token = supervisor.token();
        supervisor.spawn("stdin", forward_lines(rx, producer, token));
        tokio::time::sleep(Duration::from_millis(10)).await;

        let report = supervisor.shutdown(Duration::from_secs(1)).await;
        assert!(report.is_clean());
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_of_input_cancels() {
        let broker = MemoryBroker::new();
        let producer = producer(&broker);
        let cancel = CancellationToken::new();
        let dispatch = tokio::spawn({
            let (p, t) = (Arc::clone(&producer), cancel.clone());
            async move { p.produce(t).await }
        });

        let (tx, rx) = mpsc::channel(STDIN_BACKLOG);
        tx.send(Ok("hello".to_string())).await.unwrap();
        tx.send(Ok(String::new())).await.unwrap();
        drop(tx);

        forward_lines(rx, Arc::clone(&producer), cancel.clone())
            .await
            .unwrap();
        assert!(cancel.is_cancelled());
        dispatch.await.unwrap().unwrap();

        let mut sub = broker
            .subscribe(&ConnectionSite::new("memory", "flows", "tests"))
            .await
            .unwrap();
        let message = sub.read(Duration::from_secs(1)).await.unwrap();
        assert_eq!(message.payload, b"hello");
    }
}
