use crate::subscription::SubscriptionId;

/// Sync-layer failures.
///
/// Transient connectivity degrades to a reconnecting status internally;
/// these errors surface only on establishment timeout or after retry
/// exhaustion.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SyncError {
    #[error("Subscription {id} timed out while connecting")]
    SubscriptionTimeout { id: SubscriptionId },

    #[error("Subscription {id} failed: {message}")]
    SubscriptionError { id: SubscriptionId, message: String },

    #[error("Subscription {id} abandoned after {retries} reconnect attempts")]
    RetriesExhausted { id: SubscriptionId, retries: u32 },
}
