//! User-facing notification fan-out for status changes.
//!
//! The sink is an external collaborator (toast/push delivery); the manager
//! spawns deliveries and never awaits them on the event path.

use async_trait::async_trait;
use serde_json::Value;

use rallypoint_core::session::SessionStatus;
use rallypoint_core::types::DbId;
use rallypoint_events::{tables, ChangeEvent, ChangeOp};

/// Delivery of a user-facing message.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, user_id: DbId, message: &str);
}

/// Sink that just logs, for deployments without a push channel.
pub struct TracingSink;

#[async_trait]
impl NotificationSink for TracingSink {
    async fn notify(&self, user_id: DbId, message: &str) {
        tracing::info!(user_id, message, "Session notification");
    }
}

/// A status-change notification: who should hear about it and what to say.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub recipients: Vec<DbId>,
    pub message: String,
}

/// Build the notification for a change event, if it warrants one.
///
/// Only session status changes notify, and only the users involved in
/// that session (creator and participants); everyone else hears nothing.
pub fn notification_for(event: &ChangeEvent) -> Option<Notification> {
    if event.table != tables::SESSIONS || event.op != ChangeOp::Update {
        return None;
    }
    let new_row = event.new_row.as_ref()?;
    let new_status: SessionStatus = new_row.get("status")?.as_str()?.parse().ok()?;
    let old_status: Option<SessionStatus> = event
        .old_row
        .as_ref()
        .and_then(|r| r.get("status"))
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse().ok());

    if old_status == Some(new_status) {
        return None;
    }

    let title = new_row
        .get("title")
        .and_then(|v| v.as_str())
        .unwrap_or("Session");

    let message = match new_status {
        SessionStatus::Active => match old_status {
            Some(SessionStatus::Paused) => format!("{title} resumed"),
            _ => format!("{title} started"),
        },
        SessionStatus::Paused => format!("{title} paused"),
        SessionStatus::Completed => format!("{title} completed"),
        SessionStatus::Cancelled => {
            match new_row.get("cancel_reason").and_then(|v| v.as_str()) {
                Some(reason) => format!("{title} cancelled: {reason}"),
                None => format!("{title} cancelled"),
            }
        }
        SessionStatus::Open | SessionStatus::Waiting => return None,
    };

    Some(Notification {
        recipients: involved_users(new_row),
        message,
    })
}

/// Creator plus participants, deduplicated, from a session row snapshot.
fn involved_users(row: &Value) -> Vec<DbId> {
    let mut users = Vec::new();
    if let Some(creator) = row.get("creator_id").and_then(|v| v.as_i64()) {
        users.push(creator);
    }
    if let Some(ids) = row.get("participant_ids").and_then(|v| v.as_array()) {
        for id in ids.iter().filter_map(|v| v.as_i64()) {
            if !users.contains(&id) {
                users.push(id);
            }
        }
    }
    users
}
