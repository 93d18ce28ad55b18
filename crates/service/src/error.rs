//! Service-level error taxonomy.

use rallypoint_core::error::CoreError;
use rallypoint_core::wallet::WalletError;

/// Everything a facade operation can fail with.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Wallet(#[from] WalletError),

    #[error("Database error: {0}")]
    Database(sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ServiceError {
    /// The underlying business-rule error, if this is one.
    pub fn core(&self) -> Option<&CoreError> {
        match self {
            ServiceError::Core(e) => Some(e),
            _ => None,
        }
    }
}

/// Constraint violations are mapped back to their business meaning so a
/// racing duplicate join surfaces the same way a sequential one does.
impl From<sqlx::Error> for ServiceError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &err {
            if db.code().as_deref() == Some("23505")
                && db.constraint() == Some("uq_session_participants_pair")
            {
                return ServiceError::Core(CoreError::AlreadyJoined);
            }
        }
        ServiceError::Database(err)
    }
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::Core(CoreError::Validation(err.to_string()))
    }
}
