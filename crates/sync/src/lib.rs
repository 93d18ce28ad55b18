//! Real-time synchronization manager.
//!
//! Maintains live subscriptions to the session change feed, reconciles
//! concurrent versions of the same entity, and keeps independently
//! connected clients eventually consistent across connection loss:
//! exponential-backoff reconnects, heartbeat staleness scans, and a
//! bounded conflict-resolution history.

pub mod config;
pub mod error;
pub mod feed;
pub mod manager;
pub mod notify;
pub mod subscription;
pub mod tracker;

pub use config::SyncConfig;
pub use error::SyncError;
pub use feed::ChangeFeed;
pub use manager::{SubscriptionHandle, SyncManager, SyncUpdate};
pub use notify::NotificationSink;
pub use subscription::{ConnectionStatus, SubscriptionId, WatchFilter};
