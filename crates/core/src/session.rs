//! Session status, kind, and format enums plus the lifecycle state machine.
//!
//! Statuses are stored as TEXT in the database; the `as_str`/`FromStr`
//! pair is the single mapping between the two representations.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Minimum participant count required to start a session.
pub const MIN_PLAYERS_TO_START: i64 = 2;

// ---------------------------------------------------------------------------
// SessionStatus
// ---------------------------------------------------------------------------

/// Lifecycle status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Publicly joinable; participant list is editable.
    Open,
    /// Created but gated (private / pending confirmation); still editable.
    Waiting,
    /// In play.
    Active,
    /// Temporarily suspended by the creator.
    Paused,
    /// Terminal: finished with a result.
    Completed,
    /// Terminal: aborted, stakes refunded.
    Cancelled,
}

/// All statuses, used by exhaustive transition checks.
pub const ALL_STATUSES: [SessionStatus; 6] = [
    SessionStatus::Open,
    SessionStatus::Waiting,
    SessionStatus::Active,
    SessionStatus::Paused,
    SessionStatus::Completed,
    SessionStatus::Cancelled,
];

impl SessionStatus {
    /// Database TEXT representation.
    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Open => "open",
            SessionStatus::Waiting => "waiting",
            SessionStatus::Active => "active",
            SessionStatus::Paused => "paused",
            SessionStatus::Completed => "completed",
            SessionStatus::Cancelled => "cancelled",
        }
    }

    /// Terminal statuses accept no further writes.
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Cancelled)
    }

    /// Participant membership and session fields may only change here.
    pub fn is_editable(self) -> bool {
        matches!(self, SessionStatus::Open | SessionStatus::Waiting)
    }

    /// The session is in play (completable / pausable).
    pub fn is_in_play(self) -> bool {
        matches!(self, SessionStatus::Active | SessionStatus::Paused)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(SessionStatus::Open),
            "waiting" => Ok(SessionStatus::Waiting),
            "active" => Ok(SessionStatus::Active),
            "paused" => Ok(SessionStatus::Paused),
            "completed" => Ok(SessionStatus::Completed),
            "cancelled" => Ok(SessionStatus::Cancelled),
            other => Err(CoreError::Validation(format!(
                "Unknown session status: {other}"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

/// Returns the set of valid target statuses reachable from `from`.
///
/// Terminal statuses return an empty slice because no further transitions
/// are allowed.
pub fn valid_transitions(from: SessionStatus) -> &'static [SessionStatus] {
    use SessionStatus::*;
    match from {
        Open => &[Active, Cancelled],
        Waiting => &[Active, Cancelled],
        Active => &[Completed, Cancelled, Paused],
        Paused => &[Active, Cancelled, Completed],
        Completed | Cancelled => &[],
    }
}

/// Check whether a transition from `from` to `to` is valid.
pub fn can_transition(from: SessionStatus, to: SessionStatus) -> bool {
    valid_transitions(from).contains(&to)
}

/// Validate a state transition; invalid ones fail without mutating anything.
pub fn validate_transition(from: SessionStatus, to: SessionStatus) -> Result<(), CoreError> {
    if can_transition(from, to) {
        Ok(())
    } else {
        Err(CoreError::InvalidTransition { from, to })
    }
}

/// Evaluate auto-trigger predicates for a session.
///
/// Currently the only trigger is full capacity: an editable session whose
/// participant count has reached `max_players` is eligible to go `Active`.
/// The result is advisory — the engine never applies it without an explicit
/// caller-authorized write; the creator is offered the transition instead.
pub fn check_auto_trigger(
    status: SessionStatus,
    participant_count: i64,
    max_players: i64,
) -> Option<SessionStatus> {
    if status.is_editable() && participant_count >= max_players {
        Some(SessionStatus::Active)
    } else {
        None
    }
}

// ---------------------------------------------------------------------------
// SessionKind
// ---------------------------------------------------------------------------

/// What tokens staked at join time do at resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StakePolicy {
    /// Winner takes the pot minus the platform fee.
    Contested,
    /// Stakes are always returned 1:1, no fee.
    Refunded,
}

/// Effect a completed session has on participant HP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HpEffect {
    /// Competitive play drains HP proportionally to duration.
    Drain,
    /// Restorative activities add a flat amount back.
    Restore,
    /// No HP change.
    Neutral,
}

/// The kind of activity a session represents.
///
/// Kind drives fee applicability and the reward formula through the closed
/// tables below rather than branching scattered across call sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    Match,
    Training,
    Social,
    ClubBooking,
    ClubEvent,
    Wellbeing,
}

impl SessionKind {
    /// Database TEXT representation.
    pub fn as_str(self) -> &'static str {
        match self {
            SessionKind::Match => "match",
            SessionKind::Training => "training",
            SessionKind::Social => "social",
            SessionKind::ClubBooking => "club_booking",
            SessionKind::ClubEvent => "club_event",
            SessionKind::Wellbeing => "wellbeing",
        }
    }

    /// Whether stakes are contested (winner takes the pot) or always
    /// refunded for this kind. Training is stake-free by definition;
    /// bookings and social play never transfer stake between parties.
    pub fn stake_policy(self) -> StakePolicy {
        match self {
            SessionKind::Match | SessionKind::ClubEvent => StakePolicy::Contested,
            SessionKind::Training
            | SessionKind::Social
            | SessionKind::ClubBooking
            | SessionKind::Wellbeing => StakePolicy::Refunded,
        }
    }

    /// HP effect applied to all participants at completion.
    pub fn hp_effect(self) -> HpEffect {
        match self {
            SessionKind::Match | SessionKind::ClubEvent => HpEffect::Drain,
            SessionKind::Social | SessionKind::Wellbeing => HpEffect::Restore,
            SessionKind::Training | SessionKind::ClubBooking => HpEffect::Neutral,
        }
    }
}

impl fmt::Display for SessionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "match" => Ok(SessionKind::Match),
            "training" => Ok(SessionKind::Training),
            "social" => Ok(SessionKind::Social),
            "club_booking" => Ok(SessionKind::ClubBooking),
            "club_event" => Ok(SessionKind::ClubEvent),
            "wellbeing" => Ok(SessionKind::Wellbeing),
            other => Err(CoreError::Validation(format!(
                "Unknown session kind: {other}"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// SessionFormat
// ---------------------------------------------------------------------------

/// Match format, where applicable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionFormat {
    Singles,
    Doubles,
}

impl SessionFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionFormat::Singles => "singles",
            SessionFormat::Doubles => "doubles",
        }
    }
}

impl FromStr for SessionFormat {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "singles" => Ok(SessionFormat::Singles),
            "doubles" => Ok(SessionFormat::Doubles),
            other => Err(CoreError::Validation(format!(
                "Unknown session format: {other}"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use SessionStatus::*;

    // -----------------------------------------------------------------------
    // Transition table
    // -----------------------------------------------------------------------

    /// The full transition table, checked over all 36 (from, to) pairs.
    #[test]
    fn transition_table_is_exhaustive() {
        let allowed: &[(SessionStatus, SessionStatus)] = &[
            (Open, Active),
            (Open, Cancelled),
            (Waiting, Active),
            (Waiting, Cancelled),
            (Active, Completed),
            (Active, Cancelled),
            (Active, Paused),
            (Paused, Active),
            (Paused, Cancelled),
            (Paused, Completed),
        ];

        for from in ALL_STATUSES {
            for to in ALL_STATUSES {
                let expected = allowed.contains(&(from, to));
                assert_eq!(
                    can_transition(from, to),
                    expected,
                    "transition {from} -> {to} should be {expected}"
                );
            }
        }
    }

    #[test]
    fn terminal_statuses_have_no_outgoing_transitions() {
        for from in [Completed, Cancelled] {
            assert!(valid_transitions(from).is_empty());
            for to in ALL_STATUSES {
                assert!(!can_transition(from, to));
            }
        }
    }

    #[test]
    fn validate_transition_reports_both_endpoints() {
        let err = validate_transition(Completed, Active).unwrap_err();
        assert_eq!(
            err,
            CoreError::InvalidTransition {
                from: Completed,
                to: Active
            }
        );
    }

    #[test]
    fn self_transitions_are_rejected() {
        for s in ALL_STATUSES {
            assert!(!can_transition(s, s));
        }
    }

    // -----------------------------------------------------------------------
    // Auto trigger
    // -----------------------------------------------------------------------

    #[test]
    fn auto_trigger_fires_at_capacity() {
        assert_eq!(check_auto_trigger(Open, 2, 2), Some(Active));
        assert_eq!(check_auto_trigger(Waiting, 4, 4), Some(Active));
    }

    #[test]
    fn auto_trigger_silent_below_capacity() {
        assert_eq!(check_auto_trigger(Open, 1, 2), None);
        assert_eq!(check_auto_trigger(Waiting, 3, 4), None);
    }

    #[test]
    fn auto_trigger_never_fires_outside_editable_states() {
        for s in [Active, Paused, Completed, Cancelled] {
            assert_eq!(check_auto_trigger(s, 2, 2), None);
        }
    }

    // -----------------------------------------------------------------------
    // Text round-trips
    // -----------------------------------------------------------------------

    #[test]
    fn status_text_round_trip() {
        for s in ALL_STATUSES {
            assert_eq!(s.as_str().parse::<SessionStatus>().unwrap(), s);
        }
    }

    #[test]
    fn unknown_status_text_is_rejected() {
        assert!("archived".parse::<SessionStatus>().is_err());
    }

    #[test]
    fn kind_text_round_trip() {
        for k in [
            SessionKind::Match,
            SessionKind::Training,
            SessionKind::Social,
            SessionKind::ClubBooking,
            SessionKind::ClubEvent,
            SessionKind::Wellbeing,
        ] {
            assert_eq!(k.as_str().parse::<SessionKind>().unwrap(), k);
        }
    }

    // -----------------------------------------------------------------------
    // Kind tables
    // -----------------------------------------------------------------------

    #[test]
    fn training_stakes_are_never_contested() {
        assert_eq!(SessionKind::Training.stake_policy(), StakePolicy::Refunded);
    }

    #[test]
    fn matches_are_contested_and_drain_hp() {
        assert_eq!(SessionKind::Match.stake_policy(), StakePolicy::Contested);
        assert_eq!(SessionKind::Match.hp_effect(), HpEffect::Drain);
    }

    #[test]
    fn social_play_restores_hp() {
        assert_eq!(SessionKind::Social.hp_effect(), HpEffect::Restore);
        assert_eq!(SessionKind::Wellbeing.hp_effect(), HpEffect::Restore);
    }
}
