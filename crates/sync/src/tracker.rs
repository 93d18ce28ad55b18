//! Last-seen-version cache and bounded conflict history.
//!
//! One tracker per manager; it is the only shared mutable state besides
//! the subscription registry, and it is guarded by a single mutex so
//! concurrent delivery tasks serialize per observation, never per session
//! transition.

use std::collections::{HashMap, VecDeque};

use serde_json::Value;

use rallypoint_core::conflict::{self, EntityVersion, Resolution};
use rallypoint_core::types::DbId;

/// Tracks the last version forwarded per entity and resolves divergences
/// against newly delivered versions.
pub struct ConflictTracker {
    /// Last server-confirmed version per entity.
    confirmed: HashMap<DbId, EntityVersion>,
    /// Last version forwarded to clients (may carry optimistic fields).
    local: HashMap<DbId, EntityVersion>,
    /// Fields currently held optimistically, per entity.
    optimistic: HashMap<DbId, Vec<String>>,
    history: VecDeque<Resolution>,
    history_limit: usize,
    default_optimistic_fields: Vec<String>,
}

impl ConflictTracker {
    pub fn new(history_limit: usize, default_optimistic_fields: Vec<String>) -> Self {
        Self {
            confirmed: HashMap::new(),
            local: HashMap::new(),
            optimistic: HashMap::new(),
            history: VecDeque::new(),
            history_limit,
            default_optimistic_fields,
        }
    }

    /// Record a tentative local mutation so the next server version can be
    /// merged against it.
    pub fn apply_optimistic(&mut self, version: EntityVersion, fields: Vec<String>) {
        self.optimistic.insert(version.entity_id, fields);
        self.local.insert(version.entity_id, version);
    }

    /// Observe a server-delivered version.
    ///
    /// Returns the resolution when it diverged from the locally-held
    /// version; either way the caches advance so the next observation
    /// compares against what was actually forwarded.
    pub fn observe(&mut self, incoming: EntityVersion) -> Option<Resolution> {
        let id = incoming.entity_id;
        let local = self.local.get(&id).or_else(|| self.confirmed.get(&id));

        let resolution = match local {
            None => None,
            Some(local) => {
                let fields = self
                    .optimistic
                    .get(&id)
                    .unwrap_or(&self.default_optimistic_fields);
                conflict::resolve(local, &incoming, self.confirmed.get(&id), fields)
            }
        };

        let forwarded = resolution
            .as_ref()
            .map(|r| r.merged.clone())
            .unwrap_or_else(|| incoming.clone());
        self.local.insert(id, forwarded);
        self.confirmed.insert(id, incoming);
        self.optimistic.remove(&id);

        if let Some(r) = &resolution {
            self.history.push_back(r.clone());
            while self.history.len() > self.history_limit {
                self.history.pop_front();
            }
        }
        resolution
    }

    /// Recorded resolutions, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &Resolution> {
        self.history.iter()
    }

    pub fn clear(&mut self) {
        self.confirmed.clear();
        self.local.clear();
        self.optimistic.clear();
        self.history.clear();
    }
}

/// Parse an [`EntityVersion`] from a published session row snapshot.
///
/// Snapshots carry the derived `participant_count` and `participant_ids`
/// alongside the row columns, so no refetch is needed here.
pub fn version_from_row(row: &Value) -> Option<EntityVersion> {
    let entity_id = row.get("id")?.as_i64()?;
    let status = row.get("status")?.as_str()?.parse().ok()?;
    let participant_count = row
        .get("participant_count")
        .and_then(|v| v.as_i64())
        .unwrap_or(0);
    let updated_at = row
        .get("updated_at")
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse().ok())
        .unwrap_or_else(chrono::Utc::now);

    Some(EntityVersion {
        entity_id,
        status,
        participant_count,
        updated_at,
        record: row.clone(),
    })
}
