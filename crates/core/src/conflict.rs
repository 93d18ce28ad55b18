//! Conflict detection and resolution between a locally-held and a
//! server-delivered version of the same entity.
//!
//! The sync layer retains the last version it forwarded per entity and
//! runs every incoming version through [`resolve`]. Resolution never
//! fails: it always produces a usable merged record, plus a classification
//! the caller can record for diagnostics.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::hashing::sha256_hex;
use crate::session::SessionStatus;
use crate::types::{DbId, Timestamp};

/// What diverged between the two versions. Counts are checked first, then
/// status, then the full-record hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    ParticipantCount,
    Status,
    Data,
}

/// Which side's value was kept for the conflicting field(s).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictWinner {
    Local,
    Server,
}

/// One observed version of a session-like entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityVersion {
    pub entity_id: DbId,
    pub status: SessionStatus,
    pub participant_count: i64,
    pub updated_at: Timestamp,
    /// Full row snapshot, used for generic divergence detection and merge.
    pub record: Value,
}

impl EntityVersion {
    /// Fingerprint of the full record, for generic divergence detection.
    pub fn record_hash(&self) -> String {
        sha256_hex(self.record.to_string().as_bytes())
    }
}

/// A recorded resolution, kept in the sync layer's bounded history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resolution {
    pub entity_id: DbId,
    pub kind: ConflictKind,
    pub winner: ConflictWinner,
    pub merged: EntityVersion,
    pub detected_at: Timestamp,
}

/// Classify the divergence between `local` and `incoming`, if any.
pub fn detect(local: &EntityVersion, incoming: &EntityVersion) -> Option<ConflictKind> {
    if local.participant_count != incoming.participant_count {
        Some(ConflictKind::ParticipantCount)
    } else if local.status != incoming.status {
        Some(ConflictKind::Status)
    } else if local.record_hash() != incoming.record_hash() {
        Some(ConflictKind::Data)
    } else {
        None
    }
}

/// Resolve a detected divergence by policy:
///
/// - `participant_count`: the server value always wins (authoritative
///   counter).
/// - `status`: the version with the newer `updated_at` wins; ties favor
///   the server.
/// - `data`: the server record wins, except fields listed in
///   `optimistic_fields` keep their local value when the server did not
///   change that field relative to `base` (the last confirmed version).
///   Without a base, the server wins wholly.
///
/// Returns `None` when the versions do not diverge.
pub fn resolve(
    local: &EntityVersion,
    server: &EntityVersion,
    base: Option<&EntityVersion>,
    optimistic_fields: &[String],
) -> Option<Resolution> {
    let kind = detect(local, server)?;

    let (winner, merged) = match kind {
        ConflictKind::ParticipantCount => (ConflictWinner::Server, server.clone()),
        ConflictKind::Status => {
            if local.updated_at > server.updated_at {
                (ConflictWinner::Local, local.clone())
            } else {
                (ConflictWinner::Server, server.clone())
            }
        }
        ConflictKind::Data => merge_data(local, server, base, optimistic_fields),
    };

    Some(Resolution {
        entity_id: server.entity_id,
        kind,
        winner,
        merged,
        detected_at: chrono::Utc::now(),
    })
}

/// Server-wins merge that preserves untouched optimistic local fields.
fn merge_data(
    local: &EntityVersion,
    server: &EntityVersion,
    base: Option<&EntityVersion>,
    optimistic_fields: &[String],
) -> (ConflictWinner, EntityVersion) {
    let base_map = match base.and_then(|b| b.record.as_object()) {
        Some(m) => m,
        None => return (ConflictWinner::Server, server.clone()),
    };
    let (local_map, server_map) = match (local.record.as_object(), server.record.as_object()) {
        (Some(l), Some(s)) => (l, s),
        _ => return (ConflictWinner::Server, server.clone()),
    };

    let server_changed = changed_fields(base_map, server_map);

    let mut merged_map = server_map.clone();
    let mut kept_local = false;
    for field in optimistic_fields {
        if server_changed.contains(field) {
            continue;
        }
        if let Some(v) = local_map.get(field) {
            if merged_map.get(field) != Some(v) {
                merged_map.insert(field.clone(), v.clone());
                kept_local = true;
            }
        }
    }

    let mut merged = server.clone();
    merged.record = Value::Object(merged_map);
    let winner = if kept_local {
        ConflictWinner::Local
    } else {
        ConflictWinner::Server
    };
    (winner, merged)
}

/// Fields whose value differs between `base` and `incoming`, including
/// fields added or removed.
fn changed_fields(
    base: &serde_json::Map<String, Value>,
    incoming: &serde_json::Map<String, Value>,
) -> Vec<String> {
    let mut changed = Vec::new();
    for (key, incoming_val) in incoming {
        if base.get(key) != Some(incoming_val) {
            changed.push(key.clone());
        }
    }
    for key in base.keys() {
        if !incoming.contains_key(key) {
            changed.push(key.clone());
        }
    }
    changed
}

// ---------------------------------------------------------------------------
// Optimistic tagging
// ---------------------------------------------------------------------------

/// Three-phase optimistic update: apply a tentative local value tagged
/// `Optimistic`, then replace it with the authoritative value on
/// confirmation or revert to the last authoritative value on rejection.
/// Shared state is never mutated silently.
#[derive(Debug, Clone, PartialEq)]
pub enum Versioned<T> {
    Optimistic(T),
    Confirmed(T),
}

impl<T> Versioned<T> {
    pub fn value(&self) -> &T {
        match self {
            Versioned::Optimistic(v) | Versioned::Confirmed(v) => v,
        }
    }

    pub fn is_optimistic(&self) -> bool {
        matches!(self, Versioned::Optimistic(_))
    }

    /// Replace the tentative value with the server-confirmed one.
    pub fn confirm(self, authoritative: T) -> Self {
        Versioned::Confirmed(authoritative)
    }

    /// Reject the tentative value, reverting to the last authoritative one.
    pub fn revert(self, last_confirmed: T) -> Self {
        Versioned::Confirmed(last_confirmed)
    }
}
