//! Session row model and DTOs.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

use rallypoint_core::error::CoreError;
use rallypoint_core::session::{SessionFormat, SessionKind, SessionStatus};
use rallypoint_core::types::{DbId, Timestamp};

/// A session row from the `sessions` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Session {
    pub id: DbId,
    pub creator_id: DbId,
    pub club_id: Option<DbId>,
    pub kind: String,
    pub format: Option<String>,
    pub title: String,
    pub max_players: i64,
    pub stakes_amount: i64,
    pub is_private: bool,
    pub invite_code: Option<String>,
    pub status: String,
    pub session_result: Option<serde_json::Value>,
    pub cancel_reason: Option<String>,
    pub created_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub ended_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub cancelled_at: Option<Timestamp>,
    pub updated_at: Timestamp,
}

impl Session {
    /// Typed lifecycle status.
    pub fn status(&self) -> Result<SessionStatus, CoreError> {
        self.status.parse()
    }

    /// Typed session kind.
    pub fn kind(&self) -> Result<SessionKind, CoreError> {
        self.kind.parse()
    }

    /// Typed format, if set.
    pub fn format(&self) -> Result<Option<SessionFormat>, CoreError> {
        self.format.as_deref().map(str::parse).transpose()
    }
}

/// DTO for creating a new session.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateSession {
    pub creator_id: DbId,
    pub club_id: Option<DbId>,
    pub kind: SessionKind,
    pub format: Option<SessionFormat>,
    #[validate(length(min = 1, max = 120))]
    pub title: String,
    #[validate(range(min = 2, max = 64))]
    pub max_players: i64,
    #[validate(range(min = 0))]
    pub stakes_amount: i64,
    pub is_private: bool,
}

/// Fields the creator may edit while the session is still `open`.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdateSession {
    #[validate(length(min = 1, max = 120))]
    pub title: Option<String>,
    #[validate(range(min = 2, max = 64))]
    pub max_players: Option<i64>,
}
