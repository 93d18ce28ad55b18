//! Permission guard: authorizes session actions against role and status.
//!
//! Pure over a [`SessionCtx`] snapshot; every denial carries a specific,
//! displayable reason so the facade never surfaces a bare boolean.

use crate::error::CoreError;
use crate::session::{SessionStatus, MIN_PLAYERS_TO_START};
use crate::types::DbId;

/// Actions a user can request against a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionAction {
    Start,
    Pause,
    Resume,
    Complete,
    Join,
    Leave,
    Edit,
    Cancel,
}

/// The slice of session state the guard needs to decide.
#[derive(Debug, Clone)]
pub struct SessionCtx<'a> {
    pub status: SessionStatus,
    pub creator_id: DbId,
    pub participant_ids: &'a [DbId],
    pub max_players: i64,
}

impl SessionCtx<'_> {
    fn is_participant(&self, user_id: DbId) -> bool {
        self.participant_ids.contains(&user_id)
    }

    fn participant_count(&self) -> i64 {
        self.participant_ids.len() as i64
    }
}

/// Authorize `user_id` to perform `action` on the session described by `ctx`.
///
/// Role rules first, then status rules, so the denial reason names the
/// most actionable problem.
pub fn authorize(ctx: &SessionCtx<'_>, user_id: DbId, action: SessionAction) -> Result<(), CoreError> {
    let status = ctx.status;
    let is_creator = user_id == ctx.creator_id;
    let is_participant = ctx.is_participant(user_id);

    match action {
        SessionAction::Start => {
            if !is_creator && !is_participant {
                return deny("Only participants can start a session");
            }
            if !status.is_editable() {
                return deny(format!("Cannot start a session that is {status}"));
            }
            if ctx.participant_count() < MIN_PLAYERS_TO_START {
                return deny(format!(
                    "At least {MIN_PLAYERS_TO_START} participants are required to start"
                ));
            }
            Ok(())
        }
        SessionAction::Pause | SessionAction::Resume => {
            if !is_creator {
                return deny("Only the creator can pause or resume a session");
            }
            if !status.is_in_play() {
                return deny(format!("Cannot pause or resume a session that is {status}"));
            }
            Ok(())
        }
        SessionAction::Complete => {
            if !is_participant {
                return deny("Only participants can complete a session");
            }
            if !status.is_in_play() {
                return deny(format!("Cannot complete a session that is {status}"));
            }
            Ok(())
        }
        SessionAction::Join => {
            if is_participant {
                return deny("You are already a participant in this session");
            }
            if !status.is_editable() {
                return deny(format!("Cannot join a session that is {status}"));
            }
            if ctx.participant_count() >= ctx.max_players {
                return deny("Session is already full");
            }
            Ok(())
        }
        SessionAction::Leave => {
            if is_creator {
                return deny("The creator cannot leave their own session");
            }
            if !is_participant {
                return deny("You are not a participant in this session");
            }
            if !status.is_editable() {
                return deny(format!("Cannot leave a session that is {status}"));
            }
            Ok(())
        }
        SessionAction::Edit => {
            if !is_creator {
                return deny("Only the creator can edit a session");
            }
            if status != SessionStatus::Open {
                return deny(format!("Cannot edit a session that is {status}"));
            }
            Ok(())
        }
        SessionAction::Cancel => {
            if !is_creator {
                return deny("Only the creator can cancel a session");
            }
            if !status.is_editable() {
                return deny(format!("Cannot cancel a session that is {status}"));
            }
            Ok(())
        }
    }
}

fn deny(reason: impl Into<String>) -> Result<(), CoreError> {
    Err(CoreError::Forbidden(reason.into()))
}
