use crate::session::SessionStatus;
use crate::types::DbId;

/// Domain-level error taxonomy.
///
/// Business-rule errors are never retried by callers — they represent a
/// caller mistake or a stale view and carry enough context to surface a
/// specific, displayable message.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CoreError {
    #[error("Invalid transition: {from} -> {to}")]
    InvalidTransition {
        from: SessionStatus,
        to: SessionStatus,
    },

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Session is full")]
    Full,

    #[error("User is already a participant in this session")]
    AlreadyJoined,

    #[error("User is not a participant in this session")]
    NotParticipant,

    #[error("Session is not open for joining")]
    NotOpen,

    #[error("Session is no longer editable")]
    NotEditable,

    #[error("The session creator cannot leave their own session")]
    CreatorCannotLeave,

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: DbId },
}
