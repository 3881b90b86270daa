//! Background Jobs for metacache
//!
//! This module contains background tasks that run periodically:
//!
//! - `sweeper`: Advances cache entries through their lifecycle and tears down
//!   auxiliary resources of evicted entries
//!
//! # Usage
//!
//! ```ignore
//! use metacache_storage::jobs::{sweeper_task, SweeperHandle};
//! use tokio::sync::watch;
//!
//! // Either spawn through the handle...
//! let handle = SweeperHandle::spawn(Arc::clone(&cache), config.clone());
//! let metrics = handle.shutdown().await?;
//!
//! // ...or drive the task yourself
//! let (shutdown_tx, shutdown_rx) = watch::channel(false);
//! tokio::spawn(sweeper_task(cache, config, shutdown_rx));
//! let _ = shutdown_tx.send(true);
//! ```

pub mod sweeper;

// Re-export commonly used types
pub use sweeper::{sweeper_task, SweeperHandle, SweeperMetrics, SweeperSnapshot};
