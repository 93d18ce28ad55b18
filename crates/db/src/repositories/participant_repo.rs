//! Repository for the `session_participants` table.
//!
//! The capacity invariant (`participant_count <= max_players`) is enforced
//! inside the guarded INSERT, so a racing join observes either a row or
//! nothing, never an over-full session.

use sqlx::{PgConnection, PgPool};

use rallypoint_core::participant::{ParticipantRole, PaymentStatus};
use rallypoint_core::payout::Award;
use rallypoint_core::types::DbId;

use crate::models::participant::Participant;

const COLUMNS: &str = "id, session_id, user_id, role, joined_at, tokens_paid, money_paid, \
                       payment_status, attendance_status, xp_awarded, hp_delta, tokens_delta";

/// Provides membership operations for session participants.
pub struct ParticipantRepo;

impl ParticipantRepo {
    /// Guarded insert: only succeeds while the session is editable and
    /// below capacity. Returns `None` when the guard rejected the insert;
    /// a duplicate (session, user) pair surfaces as a unique violation.
    ///
    /// The session row is locked first so concurrent joins serialize per
    /// session; without the lock two writers racing for the last seat
    /// would both read the pre-insert count.
    pub async fn insert(
        conn: &mut PgConnection,
        session_id: DbId,
        user_id: DbId,
        role: ParticipantRole,
        tokens_paid: i64,
        payment_status: PaymentStatus,
    ) -> Result<Option<Participant>, sqlx::Error> {
        let query = format!(
            "WITH s AS (
                 SELECT id, status, max_players FROM sessions
                 WHERE id = $1
                 FOR UPDATE
             )
             INSERT INTO session_participants
                 (session_id, user_id, role, tokens_paid, payment_status)
             SELECT s.id, $2, $3, $4, $5
             FROM s
             WHERE s.status IN ('open', 'waiting')
               AND (SELECT COUNT(*) FROM session_participants
                    WHERE session_id = $1) < s.max_players
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Participant>(&query)
            .bind(session_id)
            .bind(user_id)
            .bind(role.as_str())
            .bind(tokens_paid)
            .bind(payment_status.as_str())
            .fetch_optional(conn)
            .await
    }

    /// Remove a participant while the session is still editable.
    /// Returns `true` if a row was deleted.
    pub async fn remove(
        conn: &mut PgConnection,
        session_id: DbId,
        user_id: DbId,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "DELETE FROM session_participants p
             USING sessions s
             WHERE p.session_id = $1
               AND p.user_id = $2
               AND s.id = p.session_id
               AND s.status IN ('open', 'waiting')",
        )
        .bind(session_id)
        .bind(user_id)
        .execute(conn)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Participants of a session, ordered by join time ascending.
    pub async fn list(pool: &PgPool, session_id: DbId) -> Result<Vec<Participant>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM session_participants
             WHERE session_id = $1
             ORDER BY joined_at ASC, id ASC"
        );
        sqlx::query_as::<_, Participant>(&query)
            .bind(session_id)
            .fetch_all(pool)
            .await
    }

    /// Participant user ids in join order.
    pub async fn user_ids(
        conn: &mut PgConnection,
        session_id: DbId,
    ) -> Result<Vec<DbId>, sqlx::Error> {
        sqlx::query_scalar::<_, DbId>(
            "SELECT user_id FROM session_participants
             WHERE session_id = $1
             ORDER BY joined_at ASC, id ASC",
        )
        .bind(session_id)
        .fetch_all(conn)
        .await
    }

    /// Find one membership row.
    pub async fn find(
        pool: &PgPool,
        session_id: DbId,
        user_id: DbId,
    ) -> Result<Option<Participant>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM session_participants
             WHERE session_id = $1 AND user_id = $2"
        );
        sqlx::query_as::<_, Participant>(&query)
            .bind(session_id)
            .bind(user_id)
            .fetch_optional(pool)
            .await
    }

    /// Current participant count.
    pub async fn count(conn: &mut PgConnection, session_id: DbId) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM session_participants WHERE session_id = $1",
        )
        .bind(session_id)
        .fetch_one(conn)
        .await
    }

    /// Mark a pending stake as paid once the wallet debit lands.
    pub async fn mark_paid(
        conn: &mut PgConnection,
        session_id: DbId,
        user_id: DbId,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE session_participants SET payment_status = 'paid'
             WHERE session_id = $1 AND user_id = $2 AND payment_status = 'pending'",
        )
        .bind(session_id)
        .bind(user_id)
        .execute(conn)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Annotate a participant with their completion rewards and mark
    /// attendance.
    pub async fn apply_award(
        conn: &mut PgConnection,
        session_id: DbId,
        award: &Award,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE session_participants SET
                 xp_awarded = $3,
                 hp_delta = $4,
                 tokens_delta = $5,
                 attendance_status = 'attended'
             WHERE session_id = $1 AND user_id = $2",
        )
        .bind(session_id)
        .bind(award.user_id)
        .bind(award.xp)
        .bind(award.hp_delta)
        .bind(award.tokens_delta)
        .execute(conn)
        .await?;
        Ok(())
    }

    /// User ids of participants whose stake is currently `paid`, used for
    /// cancellation refunds.
    pub async fn paid_user_ids(
        conn: &mut PgConnection,
        session_id: DbId,
    ) -> Result<Vec<DbId>, sqlx::Error> {
        sqlx::query_scalar::<_, DbId>(
            "SELECT user_id FROM session_participants
             WHERE session_id = $1 AND payment_status = 'paid'
             ORDER BY joined_at ASC, id ASC",
        )
        .bind(session_id)
        .fetch_all(conn)
        .await
    }

    /// Flip every paid participant to `refunded`. Returns the row count.
    pub async fn mark_all_refunded(
        conn: &mut PgConnection,
        session_id: DbId,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE session_participants SET payment_status = 'refunded'
             WHERE session_id = $1 AND payment_status = 'paid'",
        )
        .bind(session_id)
        .execute(conn)
        .await?;
        Ok(result.rows_affected())
    }
}
