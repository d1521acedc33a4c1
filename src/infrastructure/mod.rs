//! Infrastructure - cold path and shared building blocks
//!
//! This module contains:
//! - Logging and metrics
//! - Configuration management
//! - Buffer pooling
//! - The lock-guarded message store

pub mod config;
pub mod logging;
pub mod metrics;
pub mod pool;
pub mod store;

pub use metrics::{MetricsSnapshot, PipelineMetrics};
pub use pool::{BufferPool, PooledBuffer};
pub use store::{DoubleEnded, Fifo, OrderedStore, StoreGuard, SyncList, SyncQueue};
