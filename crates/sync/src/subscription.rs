//! Subscription state and the reconnect backoff schedule.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use rallypoint_core::types::{DbId, Timestamp};
use rallypoint_events::{tables, ChangeEvent};

use crate::error::SyncError;

/// Identifier of one logical watch.
pub type SubscriptionId = Uuid;

/// Connection lifecycle of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Disconnected,
    Error,
}

/// What a subscription watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchFilter {
    /// Every change on the session tables.
    AllSessions,
    /// Changes to sessions a user is involved in (creator or participant).
    ByUser(DbId),
    /// Changes scoped to one session.
    BySession(DbId),
}

impl WatchFilter {
    /// Whether `event` falls inside this watch.
    pub fn matches(&self, event: &ChangeEvent) -> bool {
        match self {
            WatchFilter::AllSessions => true,
            WatchFilter::BySession(id) => event.session_id == *id,
            WatchFilter::ByUser(user_id) => {
                let row = event.new_row.as_ref().or(event.old_row.as_ref());
                let Some(row) = row else { return false };
                if event.table == tables::PARTICIPANTS {
                    return row.get("user_id").and_then(|v| v.as_i64()) == Some(*user_id);
                }
                if row.get("creator_id").and_then(|v| v.as_i64()) == Some(*user_id) {
                    return true;
                }
                row.get("participant_ids")
                    .and_then(|v| v.as_array())
                    .is_some_and(|ids| ids.iter().any(|v| v.as_i64() == Some(*user_id)))
            }
        }
    }
}

/// Registry entry for one live watch.
#[derive(Debug, Clone)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub filter: WatchFilter,
    pub status: ConnectionStatus,
    pub created_at: Timestamp,
    pub last_activity: Timestamp,
    pub retry_count: u32,
    /// Why the most recent connection attempt failed; cleared on a
    /// successful connect.
    pub last_error: Option<SyncError>,
}

impl Subscription {
    pub fn new(filter: WatchFilter) -> Self {
        let now = chrono::Utc::now();
        Self {
            id: Uuid::now_v7(),
            filter,
            status: ConnectionStatus::Connecting,
            created_at: now,
            last_activity: now,
            retry_count: 0,
            last_error: None,
        }
    }
}

/// Reconnect delay for the given retry count: `min(1000 * 2^retry, 30000)`
/// milliseconds.
pub fn backoff_delay(retry_count: u32) -> Duration {
    let exp = 1u64 << retry_count.min(15);
    Duration::from_millis((1000 * exp).min(30_000))
}
