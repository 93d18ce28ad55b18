//! Transport seam between the sync manager and the change feed.
//!
//! In production the feed is the in-process [`EventBus`]; tests substitute
//! slow or failing feeds to exercise timeout and reconnect paths.

use async_trait::async_trait;
use tokio::sync::broadcast;

use rallypoint_events::{ChangeEvent, EventBus};

use crate::subscription::WatchFilter;

/// Establishment failure, surfaced to the reconnect scheduler.
#[derive(Debug, Clone, thiserror::Error)]
#[error("Change feed connection failed: {0}")]
pub struct FeedError(pub String);

/// A connectable source of change events.
///
/// Filtering happens manager-side; `connect` hands back the raw stream so
/// the registry can re-establish it independently per subscription.
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    async fn connect(
        &self,
        filter: &WatchFilter,
    ) -> Result<broadcast::Receiver<ChangeEvent>, FeedError>;
}

#[async_trait]
impl ChangeFeed for EventBus {
    async fn connect(
        &self,
        _filter: &WatchFilter,
    ) -> Result<broadcast::Receiver<ChangeEvent>, FeedError> {
        Ok(self.subscribe())
    }
}
