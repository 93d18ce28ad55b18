//! Completion settlement: stake payout, platform fee, and reward math.
//!
//! [`resolve`] is pure over its inputs; the facade persists the resulting
//! [`Settlement`] atomically with the `completed` transition. All tuning
//! constants live in [`RewardConfig`] — they are configuration, not
//! hard-coded behavior.

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::CoreError;
use crate::session::{HpEffect, SessionKind, StakePolicy};
use crate::types::DbId;

// ---------------------------------------------------------------------------
// RewardConfig
// ---------------------------------------------------------------------------

/// Tunable constants for fee and reward computation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewardConfig {
    /// Fraction of the total pot retained by the platform on a contested
    /// outcome. Applied only to an actual transfer of stake between
    /// parties, never to refunds.
    pub fee_rate: f64,
    /// XP earned per minute of play, before the cap.
    pub xp_per_minute: i64,
    /// Upper bound on duration-based XP.
    pub xp_cap: i64,
    /// Flat XP bonus per participant in the session.
    pub xp_bonus_per_participant: i64,
    /// HP drained per started 30-minute block of competitive play.
    pub hp_per_block: i64,
    /// Flat HP restored by restorative session kinds.
    pub hp_restore: i64,
}

/// Minutes per HP drain block.
const HP_BLOCK_MINUTES: i64 = 30;

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            fee_rate: 0.10,
            xp_per_minute: 10,
            xp_cap: 600,
            xp_bonus_per_participant: 25,
            hp_per_block: 5,
            hp_restore: 10,
        }
    }
}

impl RewardConfig {
    /// Load configuration from environment variables, falling back to the
    /// defaults above for anything unset or unparsable.
    ///
    /// | Env Var                  | Default |
    /// |--------------------------|---------|
    /// | `PLATFORM_FEE_RATE`      | `0.10`  |
    /// | `XP_PER_MINUTE`          | `10`    |
    /// | `XP_CAP`                 | `600`   |
    /// | `XP_BONUS_PER_PLAYER`    | `25`    |
    /// | `HP_PER_BLOCK`           | `5`     |
    /// | `HP_RESTORE`             | `10`    |
    pub fn from_env() -> Self {
        let defaults = Self::default();

        fn parse<T: std::str::FromStr>(var: &str, default: T) -> T {
            std::env::var(var)
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default)
        }

        Self {
            fee_rate: parse("PLATFORM_FEE_RATE", defaults.fee_rate),
            xp_per_minute: parse("XP_PER_MINUTE", defaults.xp_per_minute),
            xp_cap: parse("XP_CAP", defaults.xp_cap),
            xp_bonus_per_participant: parse("XP_BONUS_PER_PLAYER", defaults.xp_bonus_per_participant),
            hp_per_block: parse("HP_PER_BLOCK", defaults.hp_per_block),
            hp_restore: parse("HP_RESTORE", defaults.hp_restore),
        }
    }
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// The reported result of a completed session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outcome {
    /// A single winning user.
    Winner { user_id: DbId },
    /// A winning team; the payout is split evenly across its members.
    WinningTeam { user_ids: Vec<DbId> },
    /// No winner; stakes are returned 1:1.
    Draw,
}

// ---------------------------------------------------------------------------
// Settlement
// ---------------------------------------------------------------------------

/// Per-participant outcome of a settlement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Award {
    pub user_id: DbId,
    /// Tokens credited back to this participant (stake refund or payout
    /// share). The stake itself was escrowed at join time, so a loser's
    /// delta is 0, not negative.
    pub tokens_delta: i64,
    pub xp: i64,
    pub hp_delta: i64,
}

/// Complete result of resolving a session: token movements plus the
/// `session_result` payload persisted on the row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settlement {
    pub platform_fee: i64,
    pub winner_payout: i64,
    pub is_draw: bool,
    pub winners: Vec<DbId>,
    pub duration_seconds: i64,
    pub awards: Vec<Award>,
}

impl Settlement {
    /// The JSONB payload stored in `sessions.session_result`.
    pub fn to_result_json(&self) -> serde_json::Value {
        json!({
            "is_draw": self.is_draw,
            "winners": self.winners,
            "duration_seconds": self.duration_seconds,
            "platform_fee": self.platform_fee,
            "winner_payout": self.winner_payout,
            "awards": self.awards,
        })
    }
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// Resolve the settlement for a completing session.
///
/// `participants` is the full membership in join order; `stakes_amount` is
/// the uniform per-participant stake escrowed at join time.
///
/// Stake rules:
/// - zero stakes, stake-free kinds, and draws refund 1:1 with zero fee;
/// - otherwise `platform_fee = floor(total × fee_rate)` and the remainder
///   is split evenly across the winners, with any indivisible remainder
///   retained as fee so tokens are conserved exactly.
pub fn resolve(
    kind: SessionKind,
    stakes_amount: i64,
    participants: &[DbId],
    outcome: &Outcome,
    duration_seconds: i64,
    config: &RewardConfig,
) -> Result<Settlement, CoreError> {
    if participants.is_empty() {
        return Err(CoreError::Validation(
            "Cannot resolve a session with no participants".into(),
        ));
    }
    if stakes_amount < 0 {
        return Err(CoreError::Validation("Negative stakes amount".into()));
    }
    if duration_seconds < 0 {
        return Err(CoreError::Validation("Negative duration".into()));
    }

    let winners = winners_of(outcome, participants)?;
    let total_stakes = stakes_amount * participants.len() as i64;

    let contested = stakes_amount > 0
        && !winners.is_empty()
        && kind.stake_policy() == StakePolicy::Contested;

    // Fees apply only to an actual transfer of stake between parties; pure
    // refunds (zero stakes, draws, stake-free kinds) skip the math entirely.
    let (platform_fee, winner_payout) = if contested {
        let fee = (total_stakes as f64 * config.fee_rate).floor() as i64;
        (fee, total_stakes - fee)
    } else {
        (0, 0)
    };

    let (per_winner, split_remainder) = if contested {
        let n = winners.len() as i64;
        (winner_payout / n, winner_payout % n)
    } else {
        (0, 0)
    };

    let duration_minutes = duration_seconds / 60;
    let base_xp = (duration_minutes * config.xp_per_minute).min(config.xp_cap);
    let xp = base_xp + participants.len() as i64 * config.xp_bonus_per_participant;

    let hp_delta = match kind.hp_effect() {
        HpEffect::Drain => -(((duration_minutes + HP_BLOCK_MINUTES - 1) / HP_BLOCK_MINUTES) * config.hp_per_block),
        HpEffect::Restore => config.hp_restore,
        HpEffect::Neutral => 0,
    };

    let awards = participants
        .iter()
        .map(|&user_id| {
            let tokens_delta = if contested {
                if winners.contains(&user_id) {
                    per_winner
                } else {
                    0
                }
            } else {
                // Refund path: everyone gets their own stake back.
                stakes_amount
            };
            Award {
                user_id,
                tokens_delta,
                xp,
                hp_delta,
            }
        })
        .collect();

    Ok(Settlement {
        // Indivisible remainder of the split stays with the platform.
        platform_fee: platform_fee + split_remainder,
        winner_payout: winner_payout - split_remainder,
        is_draw: matches!(outcome, Outcome::Draw),
        winners,
        duration_seconds,
        awards,
    })
}

/// Validate the outcome against the participant list and extract winners.
fn winners_of(outcome: &Outcome, participants: &[DbId]) -> Result<Vec<DbId>, CoreError> {
    match outcome {
        Outcome::Draw => Ok(Vec::new()),
        Outcome::Winner { user_id } => {
            if !participants.contains(user_id) {
                return Err(CoreError::Validation(format!(
                    "Winner {user_id} is not a participant"
                )));
            }
            Ok(vec![*user_id])
        }
        Outcome::WinningTeam { user_ids } => {
            if user_ids.is_empty() {
                return Err(CoreError::Validation("Winning team is empty".into()));
            }
            for id in user_ids {
                if !participants.contains(id) {
                    return Err(CoreError::Validation(format!(
                        "Winning team member {id} is not a participant"
                    )));
                }
            }
            Ok(user_ids.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn cfg() -> RewardConfig {
        RewardConfig::default()
    }

    // -----------------------------------------------------------------------
    // Stake math
    // -----------------------------------------------------------------------

    #[test]
    fn single_winner_default_fee() {
        // totalStakes = 1000, 10% fee -> fee 100, payout 900.
        let s = resolve(
            SessionKind::Match,
            500,
            &[1, 2],
            &Outcome::Winner { user_id: 1 },
            3600,
            &cfg(),
        )
        .unwrap();

        assert_eq!(s.platform_fee, 100);
        assert_eq!(s.winner_payout, 900);
        assert_eq!(s.awards[0].tokens_delta, 900);
        assert_eq!(s.awards[1].tokens_delta, 0);
    }

    #[test]
    fn zero_stakes_skips_fee_math() {
        let s = resolve(
            SessionKind::Match,
            0,
            &[1, 2],
            &Outcome::Winner { user_id: 1 },
            600,
            &cfg(),
        )
        .unwrap();

        assert_eq!(s.platform_fee, 0);
        assert_eq!(s.winner_payout, 0);
        assert!(s.awards.iter().all(|a| a.tokens_delta == 0));
    }

    #[test]
    fn draw_refunds_stakes_without_fee() {
        let s = resolve(SessionKind::Match, 250, &[1, 2], &Outcome::Draw, 1800, &cfg()).unwrap();

        assert_eq!(s.platform_fee, 0);
        assert_eq!(s.winner_payout, 0);
        assert!(s.is_draw);
        assert!(s.awards.iter().all(|a| a.tokens_delta == 250));
    }

    #[test]
    fn training_refunds_even_with_a_winner() {
        let s = resolve(
            SessionKind::Training,
            100,
            &[1, 2, 3],
            &Outcome::Winner { user_id: 2 },
            1200,
            &cfg(),
        )
        .unwrap();

        assert_eq!(s.platform_fee, 0);
        assert!(s.awards.iter().all(|a| a.tokens_delta == 100));
    }

    #[test]
    fn team_payout_splits_evenly() {
        // 4 x 100 = 400 total, fee 40, payout 360, 180 each.
        let s = resolve(
            SessionKind::Match,
            100,
            &[1, 2, 3, 4],
            &Outcome::WinningTeam {
                user_ids: vec![1, 3],
            },
            3600,
            &cfg(),
        )
        .unwrap();

        assert_eq!(s.platform_fee, 40);
        assert_eq!(s.awards[0].tokens_delta, 180);
        assert_eq!(s.awards[2].tokens_delta, 180);
        assert_eq!(s.awards[1].tokens_delta, 0);
        assert_eq!(s.awards[3].tokens_delta, 0);
    }

    #[test]
    fn indivisible_split_remainder_goes_to_fee() {
        // 3 x 37 = 111 total, fee floor(11.1) = 11, payout 100 across 3
        // winners -> 33 each, remainder 1 retained as fee.
        let s = resolve(
            SessionKind::Match,
            37,
            &[1, 2, 3],
            &Outcome::WinningTeam {
                user_ids: vec![1, 2, 3],
            },
            600,
            &cfg(),
        )
        .unwrap();

        assert_eq!(s.platform_fee, 12);
        assert_eq!(s.winner_payout, 99);
        let credited: i64 = s.awards.iter().map(|a| a.tokens_delta).sum();
        assert_eq!(credited + s.platform_fee, 111, "tokens must be conserved");
    }

    #[test]
    fn tokens_are_conserved_on_contested_outcomes() {
        let s = resolve(
            SessionKind::Match,
            333,
            &[1, 2, 3, 4, 5],
            &Outcome::WinningTeam {
                user_ids: vec![2, 4],
            },
            5400,
            &cfg(),
        )
        .unwrap();

        let credited: i64 = s.awards.iter().map(|a| a.tokens_delta).sum();
        assert_eq!(credited + s.platform_fee, 333 * 5);
    }

    // -----------------------------------------------------------------------
    // Rewards
    // -----------------------------------------------------------------------

    #[test]
    fn xp_is_duration_based_plus_participation_bonus() {
        // 30 minutes * 10 xp + 2 * 25 bonus = 350.
        let s = resolve(
            SessionKind::Match,
            0,
            &[1, 2],
            &Outcome::Draw,
            1800,
            &cfg(),
        )
        .unwrap();
        assert!(s.awards.iter().all(|a| a.xp == 350));
    }

    #[test]
    fn xp_duration_component_is_capped() {
        // 120 minutes * 10 = 1200, capped at 600, + 2 * 25 = 650.
        let s = resolve(
            SessionKind::Match,
            0,
            &[1, 2],
            &Outcome::Draw,
            7200,
            &cfg(),
        )
        .unwrap();
        assert!(s.awards.iter().all(|a| a.xp == 650));
    }

    #[test]
    fn competitive_play_drains_hp_per_block() {
        // 45 minutes -> ceil(45/30) = 2 blocks -> -10 HP.
        let s = resolve(
            SessionKind::Match,
            0,
            &[1, 2],
            &Outcome::Winner { user_id: 1 },
            2700,
            &cfg(),
        )
        .unwrap();
        assert!(s.awards.iter().all(|a| a.hp_delta == -10));
    }

    #[test]
    fn social_play_restores_hp() {
        let s = resolve(SessionKind::Social, 0, &[1, 2, 3], &Outcome::Draw, 3600, &cfg()).unwrap();
        assert!(s.awards.iter().all(|a| a.hp_delta == 10));
    }

    #[test]
    fn training_is_hp_neutral() {
        let s = resolve(SessionKind::Training, 0, &[1, 2], &Outcome::Draw, 3600, &cfg()).unwrap();
        assert!(s.awards.iter().all(|a| a.hp_delta == 0));
    }

    // -----------------------------------------------------------------------
    // Outcome validation
    // -----------------------------------------------------------------------

    #[test]
    fn winner_must_be_a_participant() {
        let err = resolve(
            SessionKind::Match,
            100,
            &[1, 2],
            &Outcome::Winner { user_id: 9 },
            600,
            &cfg(),
        )
        .unwrap_err();
        assert_matches!(err, CoreError::Validation(_));
    }

    #[test]
    fn empty_winning_team_is_rejected() {
        let err = resolve(
            SessionKind::Match,
            100,
            &[1, 2],
            &Outcome::WinningTeam { user_ids: vec![] },
            600,
            &cfg(),
        )
        .unwrap_err();
        assert_matches!(err, CoreError::Validation(_));
    }

    #[test]
    fn result_json_carries_the_full_breakdown() {
        let s = resolve(
            SessionKind::Match,
            500,
            &[1, 2],
            &Outcome::Winner { user_id: 1 },
            3600,
            &cfg(),
        )
        .unwrap();

        let v = s.to_result_json();
        assert_eq!(v["platform_fee"], 100);
        assert_eq!(v["winner_payout"], 900);
        assert_eq!(v["winners"][0], 1);
        assert_eq!(v["awards"].as_array().unwrap().len(), 2);
    }
}
