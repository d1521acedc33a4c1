//! Task supervisor
//!
//! Owns the cancellation token shared by every pipeline task and the set of
//! running tasks. Shutdown is bounded: tasks get `grace` to wind down after
//! cancellation, then the rest are aborted.

use crate::{RelayError, Result};
use std::future::Future;
use std::time::Duration;
use tokio::task::{JoinError, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Level;

type TaskOutput = (&'static str, Result<()>);

/// How the tasks ended during [`Supervisor::shutdown`]
#[derive(Debug, Default)]
pub struct ShutdownReport {
    /// Tasks that returned `Ok`
    pub completed: Vec<&'static str>,
    /// Tasks that returned an error or panicked
    pub failed: Vec<(&'static str, String)>,
    /// Tasks still running when the grace period ran out
    pub aborted: usize,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.aborted == 0
    }
}

pub struct Supervisor {
    token: CancellationToken,
    tasks: JoinSet<TaskOutput>,
}

impl Supervisor {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            tasks: JoinSet::new(),
        }
    }

    /// Token to hand to the supervised tasks
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Number of tasks not yet joined
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Run `task` on the runtime under `name`
    pub fn spawn<F>(&mut self, name: &'static str, task: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        crate::log_main!(Level::DEBUG, task = name, "Spawned task");
        self.tasks.spawn(async move { (name, task.await) });
    }

    /// Wait for `signal`, or for a task to fail
    ///
    /// Returns the first task error (a panic becomes `RelayError::Fatal`).
    /// Tasks finishing cleanly are logged and waiting continues; the call
    /// returns `Ok` once `signal` fires or no tasks remain.
    pub async fn wait_for<S>(&mut self, signal: S) -> Result<()>
    where
        S: Future<Output = ()>,
    {
        tokio::pin!(signal);
        loop {
            tokio::select! {
                _ = &mut signal => return Ok(()),
                joined = self.tasks.join_next() => match joined {
                    None => return Ok(()),
                    Some(Ok((name, Ok(())))) => {
                        crate::log_main!(Level::INFO, task = name, "Task finished");
                    }
                    Some(Ok((name, Err(e)))) => {
                        crate::log_main!(Level::ERROR, task = name, error = %e, "Task failed");
                        return Err(e);
                    }
                    Some(Err(e)) => return Err(panicked(e)),
                },
            }
        }
    }

    /// Cancel every task and join them for at most `grace`
    pub async fn shutdown(mut self, grace: Duration) -> ShutdownReport {
        self.token.cancel();
        let deadline = Instant::now() + grace;
        let mut report = ShutdownReport::default();

        loop {
            match tokio::time::timeout_at(deadline, self.tasks.join_next()).await {
                Ok(None) => break,
                Ok(Some(Ok((name, Ok(()))))) => report.completed.push(name),
                Ok(Some(Ok((name, Err(e))))) => report.failed.push((name, e.to_string())),
                Ok(Some(Err(e))) => report.failed.push(("unknown", panicked(e).to_string())),
                Err(_) => {
                    report.aborted = self.tasks.len();
                    crate::log_main!(
                        Level::WARN,
                        remaining = report.aborted,
                        grace_ms = grace.as_millis() as u64,
                        "Grace period elapsed, aborting tasks"
                    );
                    self.tasks.abort_all();
                    while self.tasks.join_next().await.is_some() {}
                    break;
                }
            }
        }

        report
    }
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

fn panicked(error: JoinError) -> RelayError {
    RelayError::fatal("task panicked", error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MemoryBroker;
    use crate::infrastructure::config::PipelineConfig;
    use crate::pipeline::Consumer;
    use crate::test_utils::{test_site, wait_until};
    use std::future::pending;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_joins_cooperative_tasks() {
        let mut supervisor = Supervisor::new();
        for name in ["consume", "process"] {
            let token = supervisor.token();
            supervisor.spawn(name, async move {
                token.cancelled().await;
                Ok(())
            });
        }

        let report = supervisor.shutdown(Duration::from_secs(10)).await;
        assert!(report.is_clean());
        assert_eq!(report.completed.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_aborts_after_grace() {
        let mut supervisor = Supervisor::new();
        supervisor.spawn("stuck", pending());
        let token = supervisor.token();
        supervisor.spawn("polite", async move {
            token.cancelled().await;
            Ok(())
        });

        let start = Instant::now();
        let report = supervisor.shutdown(Duration::from_secs(10)).await;
        assert_eq!(report.completed, vec!["polite"]);
        assert_eq!(report.aborted, 1);
        assert!(!report.is_clean());
        assert!(start.elapsed() >= Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_wait_for_returns_task_failure() {
        let mut supervisor = Supervisor::new();
        supervisor.spawn("consume", async { Err(RelayError::Fatal("broker gone".into())) });

        let result = supervisor.wait_for(pending()).await;
        assert!(matches!(result, Err(RelayError::Fatal(_))));
    }

    #[tokio::test]
    async fn test_wait_for_reports_panic() {
        let mut supervisor = Supervisor::new();
        supervisor.spawn("process", async {
            if true {
                panic!("boom");
            }
            Ok(())
        });

        let result = supervisor.wait_for(pending()).await;
        assert!(matches!(result, Err(RelayError::Fatal(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_signal() {
        let mut supervisor = Supervisor::new();
        supervisor.spawn("produce", pending());

        supervisor
            .wait_for(tokio::time::sleep(Duration::from_secs(1)))
            .await
            .unwrap();
        assert_eq!(supervisor.len(), 1);
    }

    #[tokio::test]
    async fn test_wait_for_all_finished() {
        let mut supervisor = Supervisor::new();
        supervisor.spawn("stdin", async { Ok(()) });

        supervisor.wait_for(pending()).await.unwrap();
        assert!(supervisor.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_with_ingest_blocked_in_handoff() {
        let broker = MemoryBroker::new();
        let consumer = Arc::new(Consumer::new(
            "flows",
            broker.clone(),
            Arc::new(test_site(false)),
            &PipelineConfig::default(),
        ));

        // No processing task: ingest parks in the handoff
        let mut supervisor = Supervisor::new();
        let token = supervisor.token();
        supervisor.spawn("consume", {
            let c = Arc::clone(&consumer);
            async move { c.consume(token).await }
        });
        broker.publish("flows", b"stuck").unwrap();
        let metrics = consumer.metrics();
        wait_until(|| metrics.snapshot().consumed == 1).await;

        let report = supervisor.shutdown(Duration::from_secs(10)).await;
        assert!(report.is_clean());
        assert_eq!(report.completed, vec!["consume"]);
        assert!(!consumer.is_active());
        assert!(consumer.message_list().is_empty());
    }
}
