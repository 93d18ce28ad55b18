//! Repository for the `sessions` table.
//!
//! Every status mutation is an update-with-precondition: the `WHERE`
//! clause re-checks the expected source status so concurrent writers
//! cannot both apply the same transition. Zero rows updated means the
//! caller's view was stale.

use sqlx::{PgConnection, PgPool};

use rallypoint_core::session::SessionStatus;
use rallypoint_core::types::DbId;

use crate::models::session::{CreateSession, Session, UpdateSession};

/// Column list shared across queries to avoid repetition.
const COLUMNS: &str = "id, creator_id, club_id, kind, format, title, max_players, \
                       stakes_amount, is_private, invite_code, status, session_result, \
                       cancel_reason, created_at, started_at, ended_at, completed_at, \
                       cancelled_at, updated_at";

/// Provides CRUD and guarded transition operations for sessions.
pub struct SessionRepo;

impl SessionRepo {
    /// Insert a new session, returning the created row.
    pub async fn create(
        conn: &mut PgConnection,
        input: &CreateSession,
        status: SessionStatus,
        invite_code: Option<&str>,
    ) -> Result<Session, sqlx::Error> {
        let query = format!(
            "INSERT INTO sessions
                 (creator_id, club_id, kind, format, title, max_players,
                  stakes_amount, is_private, invite_code, status)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Session>(&query)
            .bind(input.creator_id)
            .bind(input.club_id)
            .bind(input.kind.as_str())
            .bind(input.format.map(|f| f.as_str()))
            .bind(&input.title)
            .bind(input.max_players)
            .bind(input.stakes_amount)
            .bind(input.is_private)
            .bind(invite_code)
            .bind(status.as_str())
            .fetch_one(conn)
            .await
    }

    /// Fetch a session by id.
    pub async fn get(pool: &PgPool, id: DbId) -> Result<Option<Session>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM sessions WHERE id = $1");
        sqlx::query_as::<_, Session>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Apply a status transition guarded by the expected source statuses.
    ///
    /// Lifecycle timestamps are owned by their transition and set exactly
    /// once (`COALESCE` keeps an earlier value, so resuming from `paused`
    /// never rewrites `started_at`). Returns `None` when the precondition
    /// failed, i.e. the row was not in any of `from`.
    pub async fn transition(
        conn: &mut PgConnection,
        id: DbId,
        from: &[SessionStatus],
        to: SessionStatus,
    ) -> Result<Option<Session>, sqlx::Error> {
        let from: Vec<String> = from.iter().map(|s| s.as_str().to_string()).collect();
        let query = format!(
            "UPDATE sessions SET
                 status = $2,
                 started_at = CASE WHEN $2 = 'active'
                     THEN COALESCE(started_at, NOW()) ELSE started_at END,
                 ended_at = CASE WHEN $2 IN ('completed', 'cancelled')
                     THEN COALESCE(ended_at, NOW()) ELSE ended_at END,
                 completed_at = CASE WHEN $2 = 'completed'
                     THEN COALESCE(completed_at, NOW()) ELSE completed_at END,
                 cancelled_at = CASE WHEN $2 = 'cancelled'
                     THEN COALESCE(cancelled_at, NOW()) ELSE cancelled_at END,
                 updated_at = NOW()
             WHERE id = $1 AND status = ANY($3)
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Session>(&query)
            .bind(id)
            .bind(to.as_str())
            .bind(&from)
            .fetch_optional(conn)
            .await
    }

    /// Complete a session: transition to `completed` and persist the
    /// result payload in one statement, guarded on an in-play status.
    pub async fn complete(
        conn: &mut PgConnection,
        id: DbId,
        result: &serde_json::Value,
    ) -> Result<Option<Session>, sqlx::Error> {
        let query = format!(
            "UPDATE sessions SET
                 status = 'completed',
                 session_result = $2,
                 ended_at = COALESCE(ended_at, NOW()),
                 completed_at = COALESCE(completed_at, NOW()),
                 updated_at = NOW()
             WHERE id = $1 AND status IN ('active', 'paused')
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Session>(&query)
            .bind(id)
            .bind(result)
            .fetch_optional(conn)
            .await
    }

    /// Cancel a session with an optional reason, guarded on the source
    /// statuses the caller validated.
    pub async fn cancel(
        conn: &mut PgConnection,
        id: DbId,
        from: &[SessionStatus],
        reason: Option<&str>,
    ) -> Result<Option<Session>, sqlx::Error> {
        let from: Vec<String> = from.iter().map(|s| s.as_str().to_string()).collect();
        let query = format!(
            "UPDATE sessions SET
                 status = 'cancelled',
                 cancel_reason = $3,
                 ended_at = COALESCE(ended_at, NOW()),
                 cancelled_at = COALESCE(cancelled_at, NOW()),
                 updated_at = NOW()
             WHERE id = $1 AND status = ANY($2)
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Session>(&query)
            .bind(id)
            .bind(&from)
            .bind(reason)
            .fetch_optional(conn)
            .await
    }

    /// Edit creator-editable fields while the session is still `open`.
    /// Returns `None` when the session left the editable state.
    pub async fn update(
        conn: &mut PgConnection,
        id: DbId,
        input: &UpdateSession,
    ) -> Result<Option<Session>, sqlx::Error> {
        let query = format!(
            "UPDATE sessions SET
                 title = COALESCE($2, title),
                 max_players = COALESCE($3, max_players),
                 updated_at = NOW()
             WHERE id = $1
               AND status = 'open'
               AND COALESCE($3, max_players) >=
                   (SELECT COUNT(*) FROM session_participants WHERE session_id = $1)
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Session>(&query)
            .bind(id)
            .bind(input.title.as_deref())
            .bind(input.max_players)
            .fetch_optional(conn)
            .await
    }

    /// List sessions a user participates in, most recent first.
    pub async fn list_for_user(pool: &PgPool, user_id: DbId) -> Result<Vec<Session>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM sessions
             WHERE id IN (SELECT session_id FROM session_participants WHERE user_id = $1)
             ORDER BY created_at DESC"
        );
        sqlx::query_as::<_, Session>(&query)
            .bind(user_id)
            .fetch_all(pool)
            .await
    }
}
