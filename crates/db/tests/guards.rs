//! Guarded-write semantics against a real Postgres schema.
//!
//! These are the races the repositories exist to win: double transitions,
//! over-capacity joins, and replayed token movements.

use assert_matches::assert_matches;
use sqlx::PgPool;

use rallypoint_core::participant::{ParticipantRole, PaymentStatus};
use rallypoint_core::session::{SessionKind, SessionStatus};
use rallypoint_core::wallet::{MovementKey, MovementPurpose, Wallet, WalletError};
use rallypoint_db::models::session::CreateSession;
use rallypoint_db::repositories::{ParticipantRepo, PgTokenWallet, SessionRepo, TokenWalletRepo};

fn new_session(max_players: i64, stakes_amount: i64) -> CreateSession {
    CreateSession {
        creator_id: 1,
        club_id: None,
        kind: SessionKind::Match,
        format: None,
        title: "Guard test".into(),
        max_players,
        stakes_amount,
        is_private: false,
    }
}

const EDITABLE: &[SessionStatus] = &[SessionStatus::Open, SessionStatus::Waiting];

// ---------------------------------------------------------------------------
// Transition preconditions
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../migrations")]
async fn transition_admits_exactly_one_writer(pool: PgPool) -> sqlx::Result<()> {
    let mut conn = pool.acquire().await?;
    let s = SessionRepo::create(&mut conn, &new_session(4, 0), SessionStatus::Open, None).await?;

    let first = SessionRepo::transition(&mut conn, s.id, EDITABLE, SessionStatus::Active).await?;
    assert!(first.is_some());

    // The second writer's view is stale; the precondition refuses it.
    let second = SessionRepo::transition(&mut conn, s.id, EDITABLE, SessionStatus::Active).await?;
    assert!(second.is_none());
    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
async fn started_at_survives_pause_and_resume(pool: PgPool) -> sqlx::Result<()> {
    let mut conn = pool.acquire().await?;
    let s = SessionRepo::create(&mut conn, &new_session(4, 0), SessionStatus::Open, None).await?;

    let started = SessionRepo::transition(&mut conn, s.id, EDITABLE, SessionStatus::Active)
        .await?
        .unwrap();
    let started_at = started.started_at.unwrap();

    SessionRepo::transition(&mut conn, s.id, &[SessionStatus::Active], SessionStatus::Paused)
        .await?
        .unwrap();
    let resumed =
        SessionRepo::transition(&mut conn, s.id, &[SessionStatus::Paused], SessionStatus::Active)
            .await?
            .unwrap();

    assert_eq!(resumed.started_at.unwrap(), started_at);
    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
async fn complete_is_exclusive_and_persists_the_result(pool: PgPool) -> sqlx::Result<()> {
    let mut conn = pool.acquire().await?;
    let s = SessionRepo::create(&mut conn, &new_session(4, 0), SessionStatus::Open, None).await?;
    SessionRepo::transition(&mut conn, s.id, EDITABLE, SessionStatus::Active).await?;

    let result = serde_json::json!({"winners": [1], "platform_fee": 10});
    let first = SessionRepo::complete(&mut conn, s.id, &result).await?;
    let completed = first.unwrap();
    assert_eq!(completed.status, "completed");
    assert_eq!(completed.session_result.unwrap()["platform_fee"], 10);
    assert!(completed.completed_at.is_some());

    let second = SessionRepo::complete(&mut conn, s.id, &result).await?;
    assert!(second.is_none());
    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
async fn cancel_refuses_an_in_play_session(pool: PgPool) -> sqlx::Result<()> {
    let mut conn = pool.acquire().await?;
    let s = SessionRepo::create(&mut conn, &new_session(4, 0), SessionStatus::Open, None).await?;
    SessionRepo::transition(&mut conn, s.id, EDITABLE, SessionStatus::Active).await?;

    let cancelled = SessionRepo::cancel(&mut conn, s.id, EDITABLE, Some("rain")).await?;
    assert!(cancelled.is_none());
    Ok(())
}

// ---------------------------------------------------------------------------
// Membership guards
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../migrations")]
async fn insert_refuses_beyond_capacity(pool: PgPool) -> sqlx::Result<()> {
    let mut conn = pool.acquire().await?;
    let s = SessionRepo::create(&mut conn, &new_session(2, 0), SessionStatus::Open, None).await?;

    for user_id in [1, 2] {
        let row = ParticipantRepo::insert(
            &mut conn,
            s.id,
            user_id,
            ParticipantRole::Participant,
            0,
            PaymentStatus::Waived,
        )
        .await?;
        assert!(row.is_some());
    }

    let overflow = ParticipantRepo::insert(
        &mut conn,
        s.id,
        3,
        ParticipantRole::Participant,
        0,
        PaymentStatus::Waived,
    )
    .await?;
    assert!(overflow.is_none());
    assert_eq!(ParticipantRepo::count(&mut conn, s.id).await?, 2);
    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
async fn concurrent_joins_cannot_exceed_capacity(pool: PgPool) -> sqlx::Result<()> {
    let mut conn = pool.acquire().await?;
    let s = SessionRepo::create(&mut conn, &new_session(2, 0), SessionStatus::Open, None).await?;
    ParticipantRepo::insert(&mut conn, s.id, 1, ParticipantRole::Creator, 0, PaymentStatus::Waived)
        .await?;
    drop(conn);

    let join = |user_id: i64| {
        let pool = pool.clone();
        let session_id = s.id;
        async move {
            let mut tx = pool.begin().await?;
            let row = ParticipantRepo::insert(
                &mut tx,
                session_id,
                user_id,
                ParticipantRole::Participant,
                0,
                PaymentStatus::Waived,
            )
            .await?;
            tx.commit().await?;
            sqlx::Result::Ok(row.is_some())
        }
    };

    // Both transactions contend for the one remaining seat. The session
    // row lock serializes them, so the second sees the committed count.
    let (a, b): (sqlx::Result<bool>, sqlx::Result<bool>) = tokio::join!(join(2), join(3));
    assert_ne!(a?, b?);

    let mut conn = pool.acquire().await?;
    assert_eq!(ParticipantRepo::count(&mut conn, s.id).await?, 2);
    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
async fn membership_is_frozen_once_in_play(pool: PgPool) -> sqlx::Result<()> {
    let mut conn = pool.acquire().await?;
    let s = SessionRepo::create(&mut conn, &new_session(4, 0), SessionStatus::Open, None).await?;
    ParticipantRepo::insert(
        &mut conn,
        s.id,
        1,
        ParticipantRole::Creator,
        0,
        PaymentStatus::Waived,
    )
    .await?;
    SessionRepo::transition(&mut conn, s.id, EDITABLE, SessionStatus::Active).await?;

    let joined = ParticipantRepo::insert(
        &mut conn,
        s.id,
        2,
        ParticipantRole::Participant,
        0,
        PaymentStatus::Waived,
    )
    .await?;
    assert!(joined.is_none());
    assert!(!ParticipantRepo::remove(&mut conn, s.id, 1).await?);
    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
async fn duplicate_membership_violates_the_unique_pair(pool: PgPool) -> sqlx::Result<()> {
    let mut conn = pool.acquire().await?;
    let s = SessionRepo::create(&mut conn, &new_session(4, 0), SessionStatus::Open, None).await?;

    ParticipantRepo::insert(&mut conn, s.id, 1, ParticipantRole::Creator, 0, PaymentStatus::Waived)
        .await?;
    let err = ParticipantRepo::insert(
        &mut conn,
        s.id,
        1,
        ParticipantRole::Participant,
        0,
        PaymentStatus::Waived,
    )
    .await
    .unwrap_err();

    assert_matches!(&err, sqlx::Error::Database(db)
        if db.constraint() == Some("uq_session_participants_pair"));
    Ok(())
}

// ---------------------------------------------------------------------------
// Wallet
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../migrations")]
async fn movements_are_idempotent_per_key(pool: PgPool) -> sqlx::Result<()> {
    TokenWalletRepo::seed_balance(&pool, 1, 100).await?;
    let wallet = PgTokenWallet::new(pool.clone());
    let key = MovementKey {
        session_id: 7,
        user_id: 1,
        purpose: MovementPurpose::Stake,
    };

    wallet.debit(40, key).await.unwrap();
    assert_eq!(wallet.balance(1).await.unwrap(), 60);

    // A replay of the same movement is a no-op, not a double charge.
    wallet.debit(40, key).await.unwrap();
    assert_eq!(wallet.balance(1).await.unwrap(), 60);

    let refund = MovementKey {
        purpose: MovementPurpose::Refund,
        ..key
    };
    wallet.credit(40, refund).await.unwrap();
    assert_eq!(wallet.balance(1).await.unwrap(), 100);
    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
async fn failed_debit_leaves_no_ledger_trace(pool: PgPool) -> sqlx::Result<()> {
    TokenWalletRepo::seed_balance(&pool, 1, 100).await?;
    let wallet = PgTokenWallet::new(pool.clone());
    let key = MovementKey {
        session_id: 9,
        user_id: 1,
        purpose: MovementPurpose::Stake,
    };

    let err = wallet.debit(500, key).await.unwrap_err();
    assert_matches!(
        err,
        WalletError::InsufficientTokens {
            needed: 500,
            available: 100
        }
    );

    // The rejected movement rolled back entirely, so a retry after a
    // top-up applies normally.
    TokenWalletRepo::seed_balance(&pool, 1, 600).await?;
    wallet.debit(500, key).await.unwrap();
    assert_eq!(wallet.balance(1).await.unwrap(), 100);
    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
async fn a_released_stake_can_be_escrowed_again(pool: PgPool) -> sqlx::Result<()> {
    TokenWalletRepo::seed_balance(&pool, 1, 100).await?;
    let wallet = PgTokenWallet::new(pool.clone());
    let key = MovementKey {
        session_id: 7,
        user_id: 1,
        purpose: MovementPurpose::Stake,
    };

    wallet.debit(40, key).await.unwrap();
    assert_eq!(wallet.balance(1).await.unwrap(), 60);

    // Releasing retires the ledger row, so the same key escrows again.
    let mut conn = pool.acquire().await?;
    assert!(TokenWalletRepo::release_stake(&mut conn, 7, 1).await.unwrap());
    assert_eq!(wallet.balance(1).await.unwrap(), 100);

    wallet.debit(40, key).await.unwrap();
    assert_eq!(wallet.balance(1).await.unwrap(), 60);

    // Nothing left to release a second time.
    assert!(!TokenWalletRepo::release_stake(&mut conn, 9, 1).await.unwrap());
    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
async fn missing_account_reads_as_zero(pool: PgPool) -> sqlx::Result<()> {
    let wallet = PgTokenWallet::new(pool.clone());
    assert_eq!(wallet.balance(42).await.unwrap(), 0);

    let err = wallet
        .debit(
            1,
            MovementKey {
                session_id: 1,
                user_id: 42,
                purpose: MovementPurpose::Stake,
            },
        )
        .await
        .unwrap_err();
    assert_matches!(
        err,
        WalletError::InsufficientTokens {
            needed: 1,
            available: 0
        }
    );
    Ok(())
}
