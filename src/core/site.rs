//! Broker target descriptor with a published liveness flag

use crate::infrastructure::config::SiteConfig;
use std::sync::atomic::{AtomicBool, Ordering};

/// Broker target and session parameters
///
/// Built once at startup. The `active` flag is written only by the task that
/// currently owns the site (consume or produce) and may be read from any
/// thread; readers can observe a stale value for a short while.
#[derive(Debug)]
pub struct ConnectionSite {
    brokers: String,
    topic: String,
    group_id: String,
    reset_enabled: bool,
    partitions: i32,
    replication_factor: i32,
    active: AtomicBool,
}

impl ConnectionSite {
    /// Create a site with one partition, one replica and reset tracking off
    pub fn new(
        brokers: impl Into<String>,
        topic: impl Into<String>,
        group_id: impl Into<String>,
    ) -> Self {
        Self {
            brokers: brokers.into(),
            topic: topic.into(),
            group_id: group_id.into(),
            reset_enabled: false,
            partitions: 1,
            replication_factor: 1,
            active: AtomicBool::new(false),
        }
    }

    pub fn with_reset(mut self, enabled: bool) -> Self {
        self.reset_enabled = enabled;
        self
    }

    pub fn with_layout(mut self, partitions: i32, replication_factor: i32) -> Self {
        self.partitions = partitions;
        self.replication_factor = replication_factor;
        self
    }

    /// Comma-separated bootstrap address list
    pub fn brokers(&self) -> &str {
        &self.brokers
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    /// Whether consecutive read timeouts are tracked for the reset policy
    pub fn reset_enabled(&self) -> bool {
        self.reset_enabled
    }

    pub fn partitions(&self) -> i32 {
        self.partitions
    }

    pub fn replication_factor(&self) -> i32 {
        self.replication_factor
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Release);
    }
}

impl From<&SiteConfig> for ConnectionSite {
    fn from(config: &SiteConfig) -> Self {
        ConnectionSite::new(&config.brokers, &config.topic, &config.group_id)
            .with_reset(config.reset_enabled)
            .with_layout(config.partitions, config.replication_factor)
    }
}
