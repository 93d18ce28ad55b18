//! Participant row model.

use serde::Serialize;
use sqlx::FromRow;

use rallypoint_core::error::CoreError;
use rallypoint_core::participant::{AttendanceStatus, ParticipantRole, PaymentStatus};
use rallypoint_core::types::{DbId, Timestamp};

/// A membership row from the `session_participants` table.
///
/// The reward columns (`xp_awarded`, `hp_delta`, `tokens_delta`) stay NULL
/// until the session completes.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Participant {
    pub id: DbId,
    pub session_id: DbId,
    pub user_id: DbId,
    pub role: String,
    pub joined_at: Timestamp,
    pub tokens_paid: i64,
    pub money_paid: i64,
    pub payment_status: String,
    pub attendance_status: String,
    pub xp_awarded: Option<i64>,
    pub hp_delta: Option<i64>,
    pub tokens_delta: Option<i64>,
}

impl Participant {
    pub fn role(&self) -> Result<ParticipantRole, CoreError> {
        self.role.parse()
    }

    pub fn payment_status(&self) -> Result<PaymentStatus, CoreError> {
        self.payment_status.parse()
    }

    pub fn attendance_status(&self) -> Result<AttendanceStatus, CoreError> {
        self.attendance_status.parse()
    }
}
