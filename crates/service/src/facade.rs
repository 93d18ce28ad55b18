//! The session service: every mutation flows through here so permission
//! checks, guarded writes, wallet movements, and change-feed publication
//! stay composed in one place.
//!
//! Mutations follow the same shape: fetch, authorize against a state
//! snapshot, apply a guarded write (the database re-checks the
//! precondition), settle tokens, publish. The guarded write is what makes
//! racing callers safe; the in-memory check just produces better errors.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use validator::Validate;

use rallypoint_core::error::CoreError;
use rallypoint_core::participant::{ParticipantRole, PaymentStatus};
use rallypoint_core::payout::{self, Outcome, RewardConfig};
use rallypoint_core::permission::{authorize, SessionAction, SessionCtx};
use rallypoint_core::session::{check_auto_trigger, validate_transition, SessionStatus};
use rallypoint_core::types::DbId;
use rallypoint_core::wallet::{MovementKey, MovementPurpose, Wallet};
use rallypoint_db::models::participant::Participant;
use rallypoint_db::models::session::{CreateSession, Session, UpdateSession};
use rallypoint_db::repositories::{ParticipantRepo, PgTokenWallet, SessionRepo, TokenWalletRepo};
use rallypoint_db::DbPool;
use rallypoint_events::{tables, ChangeEvent, ChangeOp, EventBus};
use rallypoint_sync::notify::TracingSink;
use rallypoint_sync::{SubscriptionHandle, SyncManager, SyncUpdate, WatchFilter};

use crate::config::EngineConfig;
use crate::error::ServiceError;

const INVITE_CODE_LEN: usize = 8;

/// Result of a successful join.
#[derive(Debug)]
pub struct JoinOutcome {
    pub participant: Participant,
    /// Advisory: the session hit full capacity and is eligible to go
    /// active. Never applied automatically; the creator decides.
    pub suggested_transition: Option<SessionStatus>,
}

/// Facade over the lifecycle engine.
#[derive(Clone)]
pub struct SessionService {
    pool: DbPool,
    wallet: Arc<dyn Wallet>,
    bus: Arc<EventBus>,
    sync: SyncManager,
    rewards: RewardConfig,
}

impl SessionService {
    pub fn new(pool: DbPool, wallet: Arc<dyn Wallet>, config: EngineConfig) -> Self {
        let bus = Arc::new(EventBus::default());
        let sync = SyncManager::new(bus.clone(), Arc::new(TracingSink), config.sync);
        Self {
            pool,
            wallet,
            bus,
            sync,
            rewards: config.rewards,
        }
    }

    /// Connect to the database and wire up the default Postgres-backed
    /// wallet.
    pub async fn connect(config: EngineConfig) -> Result<Self, ServiceError> {
        let pool = rallypoint_db::create_pool(&config.database_url).await?;
        let wallet = Arc::new(PgTokenWallet::new(pool.clone()));
        Ok(Self::new(pool, wallet, config))
    }

    /// Start the sync background tasks (heartbeat and notification fan-out).
    pub async fn start(&self) {
        self.sync.start().await;
    }

    /// Tear down all subscriptions and background tasks.
    pub async fn shutdown(&self) {
        self.sync.cleanup().await;
    }

    pub fn event_bus(&self) -> Arc<EventBus> {
        self.bus.clone()
    }

    pub fn sync(&self) -> &SyncManager {
        &self.sync
    }

    /// Open a real-time watch. See [`SyncManager::subscribe`].
    pub async fn subscribe(
        &self,
        filter: WatchFilter,
        on_change: impl Fn(SyncUpdate) + Send + Sync + 'static,
    ) -> SubscriptionHandle {
        self.sync.subscribe(filter, on_change).await
    }

    // -----------------------------------------------------------------------
    // Creation and membership
    // -----------------------------------------------------------------------

    /// Create a session. The creator becomes its first participant; private
    /// sessions start `waiting` with an invite code, public ones `open`.
    pub async fn create_session(&self, input: CreateSession) -> Result<Session, ServiceError> {
        input.validate()?;

        let status = if input.is_private {
            SessionStatus::Waiting
        } else {
            SessionStatus::Open
        };
        let invite_code = input.is_private.then(generate_invite_code);

        let mut tx = self.pool.begin().await?;
        let session = SessionRepo::create(&mut tx, &input, status, invite_code.as_deref()).await?;
        ParticipantRepo::insert(
            &mut tx,
            session.id,
            session.creator_id,
            ParticipantRole::Creator,
            session.stakes_amount,
            initial_payment_status(session.stakes_amount),
        )
        .await?
        .ok_or(CoreError::NotOpen)?;
        tx.commit().await?;

        tracing::info!(
            session_id = session.id,
            creator_id = session.creator_id,
            kind = %session.kind,
            stakes = session.stakes_amount,
            "Session created"
        );

        if session.stakes_amount > 0 {
            if let Err(e) = self.collect_stake(&session, session.creator_id).await {
                // The creator cannot cover their own stake; abort the session.
                let mut conn = self.pool.acquire().await?;
                SessionRepo::cancel(&mut conn, session.id, &[status], Some("stake payment failed"))
                    .await?;
                return Err(e);
            }
        }

        let snapshot = self.snapshot(&session).await?;
        self.bus.publish(
            ChangeEvent::new(tables::SESSIONS, ChangeOp::Insert, session.id).with_new(snapshot),
        );
        Ok(session)
    }

    /// Join a session, escrowing the stake. Private sessions require the
    /// invite code.
    pub async fn join_session(
        &self,
        session_id: DbId,
        user_id: DbId,
        invite_code: Option<&str>,
    ) -> Result<JoinOutcome, ServiceError> {
        let session = self.get_session(session_id).await?;
        let status = session.status()?;

        if session.is_private && session.invite_code.as_deref() != invite_code {
            return Err(CoreError::Forbidden(
                "A valid invite code is required to join this session".into(),
            )
            .into());
        }

        // Ledger taxonomy first, so callers get the specific error rather
        // than a generic denial; the guarded INSERT re-checks all of it.
        let ids = self.participant_ids(session_id).await?;
        if ids.contains(&user_id) {
            return Err(CoreError::AlreadyJoined.into());
        }
        if !status.is_editable() {
            return Err(CoreError::NotOpen.into());
        }
        if ids.len() as i64 >= session.max_players {
            return Err(CoreError::Full.into());
        }

        let old = self.snapshot(&session).await?;

        let mut tx = self.pool.begin().await?;
        let inserted = ParticipantRepo::insert(
            &mut tx,
            session_id,
            user_id,
            ParticipantRole::Participant,
            session.stakes_amount,
            initial_payment_status(session.stakes_amount),
        )
        .await?;
        let Some(participant) = inserted else {
            // The guarded insert re-checked and refused: the session changed
            // between our read and the write.
            drop(tx);
            let current = self.get_session(session_id).await?.status()?;
            let err = if current.is_editable() {
                CoreError::Full
            } else {
                CoreError::NotOpen
            };
            return Err(err.into());
        };
        let count = ParticipantRepo::count(&mut tx, session_id).await?;
        tx.commit().await?;

        if session.stakes_amount > 0 {
            if let Err(e) = self.collect_stake(&session, user_id).await {
                let mut conn = self.pool.acquire().await?;
                ParticipantRepo::remove(&mut conn, session_id, user_id).await?;
                return Err(e);
            }
        }

        tracing::info!(session_id, user_id, count, "Participant joined");

        self.bus.publish(
            ChangeEvent::new(tables::PARTICIPANTS, ChangeOp::Insert, session_id)
                .with_new(serde_json::to_value(&participant)?),
        );
        self.publish_session_update(Some(old), session_id).await?;

        Ok(JoinOutcome {
            participant,
            suggested_transition: check_auto_trigger(status, count, session.max_players),
        })
    }

    /// Leave a session, refunding a paid stake. The stake's ledger row is
    /// retired in the same transaction as the membership removal, so a
    /// later rejoin escrows a fresh stake instead of replaying the old
    /// movement.
    pub async fn leave_session(&self, session_id: DbId, user_id: DbId) -> Result<(), ServiceError> {
        let session = self.get_session(session_id).await?;
        let status = session.status()?;
        if user_id == session.creator_id {
            return Err(CoreError::CreatorCannotLeave.into());
        }
        let participant = ParticipantRepo::find(&self.pool, session_id, user_id)
            .await?
            .ok_or(CoreError::NotParticipant)?;
        if !status.is_editable() {
            return Err(CoreError::NotEditable.into());
        }

        let old = self.snapshot(&session).await?;

        let mut tx = self.pool.begin().await?;
        let removed = ParticipantRepo::remove(&mut tx, session_id, user_id).await?;
        if !removed {
            return Err(CoreError::NotEditable.into());
        }
        if participant.payment_status()? == PaymentStatus::Paid {
            TokenWalletRepo::release_stake(&mut tx, session_id, user_id).await?;
        }
        tx.commit().await?;

        tracing::info!(session_id, user_id, "Participant left");

        self.bus.publish(
            ChangeEvent::new(tables::PARTICIPANTS, ChangeOp::Delete, session_id)
                .with_old(serde_json::to_value(&participant)?),
        );
        self.publish_session_update(Some(old), session_id).await?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Lifecycle transitions
    // -----------------------------------------------------------------------

    /// Start a session. Any participant may start once the minimum player
    /// count is met.
    pub async fn start_session(
        &self,
        session_id: DbId,
        user_id: DbId,
    ) -> Result<Session, ServiceError> {
        self.apply_transition(
            session_id,
            user_id,
            SessionAction::Start,
            &[SessionStatus::Open, SessionStatus::Waiting],
            SessionStatus::Active,
        )
        .await
    }

    /// Pause an active session (creator only).
    pub async fn pause_session(
        &self,
        session_id: DbId,
        user_id: DbId,
    ) -> Result<Session, ServiceError> {
        self.apply_transition(
            session_id,
            user_id,
            SessionAction::Pause,
            &[SessionStatus::Active],
            SessionStatus::Paused,
        )
        .await
    }

    /// Resume a paused session (creator only). `started_at` is not
    /// rewritten; the original start timestamp stands.
    pub async fn resume_session(
        &self,
        session_id: DbId,
        user_id: DbId,
    ) -> Result<Session, ServiceError> {
        self.apply_transition(
            session_id,
            user_id,
            SessionAction::Resume,
            &[SessionStatus::Paused],
            SessionStatus::Active,
        )
        .await
    }

    /// Complete a session: resolve the settlement and persist it atomically
    /// with the `completed` transition. Exactly one racing completion can
    /// succeed; the loser observes an invalid transition.
    pub async fn complete_session(
        &self,
        session_id: DbId,
        user_id: DbId,
        outcome: Outcome,
    ) -> Result<Session, ServiceError> {
        let session = self.get_session(session_id).await?;
        let status = session.status()?;
        let ids = self.participant_ids(session_id).await?;
        let ctx = SessionCtx {
            status,
            creator_id: session.creator_id,
            participant_ids: &ids,
            max_players: session.max_players,
        };
        authorize(&ctx, user_id, SessionAction::Complete)?;

        let duration_seconds = session
            .started_at
            .map(|t| (Utc::now() - t).num_seconds().max(0))
            .unwrap_or(0);
        let settlement = payout::resolve(
            session.kind()?,
            session.stakes_amount,
            &ids,
            &outcome,
            duration_seconds,
            &self.rewards,
        )?;

        let old = self.snapshot(&session).await?;

        let mut tx = self.pool.begin().await?;
        let completed =
            SessionRepo::complete(&mut tx, session_id, &settlement.to_result_json()).await?;
        let Some(completed) = completed else {
            drop(tx);
            let current = self.get_session(session_id).await?.status()?;
            return Err(CoreError::InvalidTransition {
                from: current,
                to: SessionStatus::Completed,
            }
            .into());
        };

        // Settle token credits in the same transaction as the transition so
        // a crash can never leave the session completed but unpaid.
        let purpose = if settlement.winner_payout > 0 {
            MovementPurpose::Payout
        } else {
            MovementPurpose::Refund
        };
        for award in &settlement.awards {
            ParticipantRepo::apply_award(&mut tx, session_id, award).await?;
            if award.tokens_delta > 0 {
                let key = MovementKey {
                    session_id,
                    user_id: award.user_id,
                    purpose,
                };
                TokenWalletRepo::apply(&mut tx, key, award.tokens_delta).await?;
            }
        }
        tx.commit().await?;

        tracing::info!(
            session_id,
            winners = ?settlement.winners,
            platform_fee = settlement.platform_fee,
            duration_seconds,
            "Session completed"
        );

        self.publish_session_update(Some(old), session_id).await?;
        Ok(completed)
    }

    /// Cancel a session before play starts, refunding every paid stake.
    pub async fn cancel_session(
        &self,
        session_id: DbId,
        user_id: DbId,
        reason: Option<&str>,
    ) -> Result<Session, ServiceError> {
        let session = self.get_session(session_id).await?;
        let status = session.status()?;
        let ids = self.participant_ids(session_id).await?;
        let ctx = SessionCtx {
            status,
            creator_id: session.creator_id,
            participant_ids: &ids,
            max_players: session.max_players,
        };
        authorize(&ctx, user_id, SessionAction::Cancel)?;

        let old = self.snapshot(&session).await?;

        let mut tx = self.pool.begin().await?;
        let cancelled = SessionRepo::cancel(
            &mut tx,
            session_id,
            &[SessionStatus::Open, SessionStatus::Waiting],
            reason,
        )
        .await?;
        let Some(cancelled) = cancelled else {
            drop(tx);
            let current = self.get_session(session_id).await?.status()?;
            return Err(CoreError::InvalidTransition {
                from: current,
                to: SessionStatus::Cancelled,
            }
            .into());
        };

        let paid = ParticipantRepo::paid_user_ids(&mut tx, session_id).await?;
        for refund_user in &paid {
            let key = MovementKey {
                session_id,
                user_id: *refund_user,
                purpose: MovementPurpose::Refund,
            };
            TokenWalletRepo::apply(&mut tx, key, session.stakes_amount).await?;
        }
        ParticipantRepo::mark_all_refunded(&mut tx, session_id).await?;
        tx.commit().await?;

        tracing::info!(session_id, refunded = paid.len(), "Session cancelled");

        self.publish_session_update(Some(old), session_id).await?;
        Ok(cancelled)
    }

    /// Edit creator-editable fields while the session is `open`.
    pub async fn update_session(
        &self,
        session_id: DbId,
        user_id: DbId,
        input: UpdateSession,
    ) -> Result<Session, ServiceError> {
        input.validate()?;

        let session = self.get_session(session_id).await?;
        let status = session.status()?;
        let ids = self.participant_ids(session_id).await?;
        let ctx = SessionCtx {
            status,
            creator_id: session.creator_id,
            participant_ids: &ids,
            max_players: session.max_players,
        };
        authorize(&ctx, user_id, SessionAction::Edit)?;

        let old = self.snapshot(&session).await?;

        let mut conn = self.pool.acquire().await?;
        let updated = SessionRepo::update(&mut conn, session_id, &input).await?;
        drop(conn);
        let Some(updated) = updated else {
            let current = self.get_session(session_id).await?.status()?;
            if current != SessionStatus::Open {
                return Err(CoreError::NotEditable.into());
            }
            return Err(CoreError::Validation(
                "max_players cannot drop below the current participant count".into(),
            )
            .into());
        };

        self.publish_session_update(Some(old), session_id).await?;
        Ok(updated)
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    pub async fn get_session(&self, session_id: DbId) -> Result<Session, ServiceError> {
        SessionRepo::get(&self.pool, session_id)
            .await?
            .ok_or_else(|| {
                CoreError::NotFound {
                    entity: "session",
                    id: session_id,
                }
                .into()
            })
    }

    /// Participants in join order.
    pub async fn participants(&self, session_id: DbId) -> Result<Vec<Participant>, ServiceError> {
        Ok(ParticipantRepo::list(&self.pool, session_id).await?)
    }

    /// Sessions a user participates in, most recent first.
    pub async fn sessions_for_user(&self, user_id: DbId) -> Result<Vec<Session>, ServiceError> {
        Ok(SessionRepo::list_for_user(&self.pool, user_id).await?)
    }

    pub async fn balance(&self, user_id: DbId) -> Result<i64, ServiceError> {
        Ok(self.wallet.balance(user_id).await?)
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    async fn participant_ids(&self, session_id: DbId) -> Result<Vec<DbId>, ServiceError> {
        let mut conn = self.pool.acquire().await?;
        Ok(ParticipantRepo::user_ids(&mut conn, session_id).await?)
    }

    /// Debit the stake and flip the participant's payment status.
    async fn collect_stake(&self, session: &Session, user_id: DbId) -> Result<(), ServiceError> {
        let key = MovementKey {
            session_id: session.id,
            user_id,
            purpose: MovementPurpose::Stake,
        };
        self.wallet.debit(session.stakes_amount, key).await?;
        let mut conn = self.pool.acquire().await?;
        ParticipantRepo::mark_paid(&mut conn, session.id, user_id).await?;
        Ok(())
    }

    /// Session row as a JSON snapshot enriched with the derived membership
    /// fields, so subscribers never refetch.
    async fn snapshot(&self, session: &Session) -> Result<serde_json::Value, ServiceError> {
        let ids = self.participant_ids(session.id).await?;
        let mut row = serde_json::to_value(session)?;
        row["participant_count"] = json!(ids.len() as i64);
        row["participant_ids"] = json!(ids);
        Ok(row)
    }

    /// Publish a sessions UPDATE carrying the pre-change and fresh
    /// post-change snapshots.
    async fn publish_session_update(
        &self,
        old: Option<serde_json::Value>,
        session_id: DbId,
    ) -> Result<Session, ServiceError> {
        let session = self.get_session(session_id).await?;
        let new = self.snapshot(&session).await?;
        let mut event =
            ChangeEvent::new(tables::SESSIONS, ChangeOp::Update, session_id).with_new(new);
        if let Some(old) = old {
            event = event.with_old(old);
        }
        self.bus.publish(event);
        Ok(session)
    }

    /// Shared shape of start/pause/resume: authorize, validate the
    /// transition, apply the guarded write, publish.
    async fn apply_transition(
        &self,
        session_id: DbId,
        user_id: DbId,
        action: SessionAction,
        from: &[SessionStatus],
        to: SessionStatus,
    ) -> Result<Session, ServiceError> {
        let session = self.get_session(session_id).await?;
        let status = session.status()?;
        let ids = self.participant_ids(session_id).await?;
        let ctx = SessionCtx {
            status,
            creator_id: session.creator_id,
            participant_ids: &ids,
            max_players: session.max_players,
        };
        authorize(&ctx, user_id, action)?;
        validate_transition(status, to)?;

        let old = self.snapshot(&session).await?;

        let mut conn = self.pool.acquire().await?;
        let updated = SessionRepo::transition(&mut conn, session_id, from, to).await?;
        drop(conn);
        let Some(updated) = updated else {
            let current = self.get_session(session_id).await?.status()?;
            return Err(CoreError::InvalidTransition { from: current, to }.into());
        };

        tracing::info!(session_id, from = %status, to = %to, "Session transition applied");

        self.publish_session_update(Some(old), session_id).await?;
        Ok(updated)
    }
}

fn initial_payment_status(stakes_amount: i64) -> PaymentStatus {
    if stakes_amount > 0 {
        PaymentStatus::Pending
    } else {
        PaymentStatus::Waived
    }
}

/// Uppercase alphanumeric invite code for private sessions.
fn generate_invite_code() -> String {
    use rand::distr::Alphanumeric;
    use rand::Rng;

    rand::rng()
        .sample_iter(Alphanumeric)
        .take(INVITE_CODE_LEN)
        .map(|b| char::from(b).to_ascii_uppercase())
        .collect()
}
