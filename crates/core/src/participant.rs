//! Participant role and per-participant status enums.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Role of a user within one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantRole {
    Creator,
    Participant,
    Assistant,
    Observer,
}

impl ParticipantRole {
    pub fn as_str(self) -> &'static str {
        match self {
            ParticipantRole::Creator => "creator",
            ParticipantRole::Participant => "participant",
            ParticipantRole::Assistant => "assistant",
            ParticipantRole::Observer => "observer",
        }
    }
}

impl fmt::Display for ParticipantRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ParticipantRole {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "creator" => Ok(ParticipantRole::Creator),
            "participant" => Ok(ParticipantRole::Participant),
            "assistant" => Ok(ParticipantRole::Assistant),
            "observer" => Ok(ParticipantRole::Observer),
            other => Err(CoreError::Validation(format!(
                "Unknown participant role: {other}"
            ))),
        }
    }
}

/// Payment state of a participant's stake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Refunded,
    Waived,
}

impl PaymentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Refunded => "refunded",
            PaymentStatus::Waived => "waived",
        }
    }
}

impl FromStr for PaymentStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "paid" => Ok(PaymentStatus::Paid),
            "refunded" => Ok(PaymentStatus::Refunded),
            "waived" => Ok(PaymentStatus::Waived),
            other => Err(CoreError::Validation(format!(
                "Unknown payment status: {other}"
            ))),
        }
    }
}

/// Whether the participant actually showed up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttendanceStatus {
    Registered,
    Attended,
    NoShow,
    Cancelled,
}

impl AttendanceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AttendanceStatus::Registered => "registered",
            AttendanceStatus::Attended => "attended",
            AttendanceStatus::NoShow => "no_show",
            AttendanceStatus::Cancelled => "cancelled",
        }
    }
}

impl FromStr for AttendanceStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "registered" => Ok(AttendanceStatus::Registered),
            "attended" => Ok(AttendanceStatus::Attended),
            "no_show" => Ok(AttendanceStatus::NoShow),
            "cancelled" => Ok(AttendanceStatus::Cancelled),
            other => Err(CoreError::Validation(format!(
                "Unknown attendance status: {other}"
            ))),
        }
    }
}
