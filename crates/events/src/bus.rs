//! Change feed backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] is the push mechanism delivering INSERT/UPDATE/DELETE
//! events per table. It is designed to be shared via `Arc<EventBus>`
//! across the application.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use rallypoint_core::types::DbId;

// ---------------------------------------------------------------------------
// ChangeEvent
// ---------------------------------------------------------------------------

/// Watched table names.
pub mod tables {
    pub const SESSIONS: &str = "sessions";
    pub const PARTICIPANTS: &str = "session_participants";
}

/// What happened to the row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeOp {
    Insert,
    Update,
    Delete,
}

/// One observed change to a row in a watched table.
///
/// Carries both the old and new row snapshots so subscribers can diff
/// without refetching.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Source table, e.g. `"sessions"`.
    pub table: String,

    pub op: ChangeOp,

    /// Primary key of the changed row's owning session. For participant
    /// rows this is the session id, so filters stay session-scoped.
    pub session_id: DbId,

    /// Row snapshot before the change (UPDATE/DELETE).
    pub old_row: Option<serde_json::Value>,

    /// Row snapshot after the change (INSERT/UPDATE).
    pub new_row: Option<serde_json::Value>,

    /// When the change was published (UTC).
    pub timestamp: DateTime<Utc>,
}

impl ChangeEvent {
    /// Create a new event for a table/op/session triple.
    pub fn new(table: impl Into<String>, op: ChangeOp, session_id: DbId) -> Self {
        Self {
            table: table.into(),
            op,
            session_id,
            old_row: None,
            new_row: None,
            timestamp: Utc::now(),
        }
    }

    /// Attach the pre-change row snapshot.
    pub fn with_old(mut self, row: serde_json::Value) -> Self {
        self.old_row = Some(row);
        self
    }

    /// Attach the post-change row snapshot.
    pub fn with_new(mut self, row: serde_json::Value) -> Self {
        self.new_row = Some(row);
        self
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out change feed.
///
/// Wraps a [`broadcast::Sender`] so that any number of subscribers can
/// independently receive every published [`ChangeEvent`].
pub struct EventBus {
    sender: broadcast::Sender<ChangeEvent>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// When the buffer is full, the oldest un-consumed messages are dropped
    /// and slow receivers will observe a `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers.
    ///
    /// If there are no active subscribers the event is silently dropped;
    /// the authoritative state already lives in the store.
    pub fn publish(&self, event: ChangeEvent) {
        // Ignore the SendError — it only means there are zero receivers.
        let _ = self.sender.send(event);
    }

    /// Subscribe to all events published on this bus.
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.sender.subscribe()
    }

    /// Number of active receivers, used by staleness diagnostics.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
