//! Token wallet seam.
//!
//! The ledger debits and credits user token balances through this trait so
//! the engine never depends on a concrete wallet backend. Every movement is
//! keyed by (session, user, purpose) so a retried call is a no-op rather
//! than a double charge.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::DbId;

/// Why tokens moved. Part of the idempotency key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementPurpose {
    /// Escrowed at join time.
    Stake,
    /// Returned on leave or cancellation.
    Refund,
    /// Winner's share at completion.
    Payout,
}

impl MovementPurpose {
    pub fn as_str(self) -> &'static str {
        match self {
            MovementPurpose::Stake => "stake",
            MovementPurpose::Refund => "refund",
            MovementPurpose::Payout => "payout",
        }
    }
}

impl fmt::Display for MovementPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Idempotency key for a single token movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MovementKey {
    pub session_id: DbId,
    pub user_id: DbId,
    pub purpose: MovementPurpose,
}

/// Wallet backend failures, distinguished from business-rule errors so the
/// caller knows what is retryable.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum WalletError {
    #[error("Insufficient tokens: needed {needed}, available {available}")]
    InsufficientTokens { needed: i64, available: i64 },

    #[error("Wallet backend failure: {0}")]
    Backend(String),
}

impl WalletError {
    /// Backend failures are safe to retry thanks to the movement key;
    /// insufficient balance is a business outcome and is not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, WalletError::Backend(_))
    }
}

/// Debit/credit of a user's token balance.
///
/// Implementations must make both operations idempotent on `key`: a repeat
/// of an already-applied movement succeeds without moving tokens again.
#[async_trait]
pub trait Wallet: Send + Sync {
    /// Remove `amount` tokens from the user's balance.
    async fn debit(&self, amount: i64, key: MovementKey) -> Result<(), WalletError>;

    /// Add `amount` tokens to the user's balance.
    async fn credit(&self, amount: i64, key: MovementKey) -> Result<(), WalletError>;

    /// Current balance for a user.
    async fn balance(&self, user_id: DbId) -> Result<i64, WalletError>;
}
