//! Token wallet backed by the `token_accounts` / `token_ledger` tables.
//!
//! Every movement is recorded in the ledger first; the unique constraint
//! on (session, user, purpose) makes a retried movement a no-op, so a
//! partial failure upstream can always be retried safely.

use async_trait::async_trait;
use sqlx::PgConnection;

use rallypoint_core::types::DbId;
use rallypoint_core::wallet::{MovementKey, Wallet, WalletError};

use crate::DbPool;

/// In-transaction ledger operations, for callers composing a movement with
/// other writes (e.g. completion payout atomically with the status change).
pub struct TokenWalletRepo;

impl TokenWalletRepo {
    /// Apply a signed balance movement under `key`.
    ///
    /// Returns `Ok(false)` when the movement was already applied (the
    /// ledger row exists), without touching the balance. A debit that
    /// would overdraw fails with `InsufficientTokens` and writes nothing
    /// once the surrounding transaction rolls back.
    pub async fn apply(
        conn: &mut PgConnection,
        key: MovementKey,
        delta: i64,
    ) -> Result<bool, WalletError> {
        let inserted = sqlx::query_scalar::<_, DbId>(
            "INSERT INTO token_ledger (session_id, user_id, purpose, amount)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT ON CONSTRAINT uq_token_ledger_movement DO NOTHING
             RETURNING id",
        )
        .bind(key.session_id)
        .bind(key.user_id)
        .bind(key.purpose.as_str())
        .bind(delta)
        .fetch_optional(&mut *conn)
        .await
        .map_err(backend)?;

        if inserted.is_none() {
            tracing::debug!(
                session_id = key.session_id,
                user_id = key.user_id,
                purpose = %key.purpose,
                "Token movement already applied, skipping"
            );
            return Ok(false);
        }

        if delta < 0 {
            let needed = -delta;
            let rows = sqlx::query(
                "UPDATE token_accounts SET balance = balance - $2
                 WHERE user_id = $1 AND balance >= $2",
            )
            .bind(key.user_id)
            .bind(needed)
            .execute(&mut *conn)
            .await
            .map_err(backend)?
            .rows_affected();

            if rows == 0 {
                let available = Self::balance(&mut *conn, key.user_id).await?;
                return Err(WalletError::InsufficientTokens { needed, available });
            }
        } else if delta > 0 {
            sqlx::query(
                "INSERT INTO token_accounts (user_id, balance) VALUES ($1, $2)
                 ON CONFLICT (user_id)
                 DO UPDATE SET balance = token_accounts.balance + EXCLUDED.balance",
            )
            .bind(key.user_id)
            .bind(delta)
            .execute(&mut *conn)
            .await
            .map_err(backend)?;
        }

        Ok(true)
    }

    /// Return an escrowed stake to the account and retire its ledger row,
    /// so a later rejoin of the same session escrows again.
    ///
    /// Exactly-once is carried by the caller's transaction (the membership
    /// removal), not by the ledger key. Returns `Ok(false)` when no stake
    /// row exists.
    pub async fn release_stake(
        conn: &mut PgConnection,
        session_id: DbId,
        user_id: DbId,
    ) -> Result<bool, WalletError> {
        // Stake movements are stored as negative deltas; the refund is
        // the negation of what the ledger recorded.
        let refund = sqlx::query_scalar::<_, i64>(
            "DELETE FROM token_ledger
             WHERE session_id = $1 AND user_id = $2 AND purpose = 'stake'
             RETURNING -amount",
        )
        .bind(session_id)
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(backend)?;

        let Some(refund) = refund else {
            return Ok(false);
        };
        sqlx::query("UPDATE token_accounts SET balance = balance + $2 WHERE user_id = $1")
            .bind(user_id)
            .bind(refund)
            .execute(conn)
            .await
            .map_err(backend)?;
        Ok(true)
    }

    /// Current balance; a missing account reads as zero.
    pub async fn balance(conn: &mut PgConnection, user_id: DbId) -> Result<i64, WalletError> {
        let balance = sqlx::query_scalar::<_, i64>(
            "SELECT balance FROM token_accounts WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(conn)
        .await
        .map_err(backend)?;
        Ok(balance.unwrap_or(0))
    }

    /// Seed a user's balance directly. Test and onboarding helper; bypasses
    /// the ledger.
    pub async fn seed_balance(
        pool: &DbPool,
        user_id: DbId,
        balance: i64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO token_accounts (user_id, balance) VALUES ($1, $2)
             ON CONFLICT (user_id) DO UPDATE SET balance = EXCLUDED.balance",
        )
        .bind(user_id)
        .bind(balance)
        .execute(pool)
        .await?;
        Ok(())
    }
}

/// Pool-owning wallet for standalone movements (join debits, leave
/// refunds). Each call runs in its own transaction.
#[derive(Clone)]
pub struct PgTokenWallet {
    pool: DbPool,
}

impl PgTokenWallet {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn apply_in_tx(&self, key: MovementKey, delta: i64) -> Result<(), WalletError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        TokenWalletRepo::apply(&mut tx, key, delta).await?;
        tx.commit().await.map_err(backend)?;
        Ok(())
    }
}

#[async_trait]
impl Wallet for PgTokenWallet {
    async fn debit(&self, amount: i64, key: MovementKey) -> Result<(), WalletError> {
        self.apply_in_tx(key, -amount).await
    }

    async fn credit(&self, amount: i64, key: MovementKey) -> Result<(), WalletError> {
        self.apply_in_tx(key, amount).await
    }

    async fn balance(&self, user_id: DbId) -> Result<i64, WalletError> {
        let mut conn = self.pool.acquire().await.map_err(backend)?;
        TokenWalletRepo::balance(&mut conn, user_id).await
    }
}

fn backend(err: sqlx::Error) -> WalletError {
    WalletError::Backend(err.to_string())
}
