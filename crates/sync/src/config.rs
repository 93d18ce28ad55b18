use std::time::Duration;

/// Sync-layer timing and retry knobs.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// How long subscription establishment may take before it is treated
    /// as failed and rescheduled.
    pub connect_timeout: Duration,
    /// Interval between staleness scans over all subscriptions.
    pub heartbeat_interval: Duration,
    /// A connected subscription with no observed activity for longer than
    /// this is treated as disconnected, whatever the transport believes.
    pub stale_after: Duration,
    /// Reconnect attempts before a subscription is abandoned.
    pub max_retries: u32,
    /// How many conflict resolutions to retain for diagnostics.
    pub conflict_history_limit: usize,
    /// Session row fields a client may hold optimistically; preserved in a
    /// data-conflict merge when the server did not touch them.
    pub optimistic_fields: Vec<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(30),
            stale_after: Duration::from_secs(60),
            max_retries: 10,
            conflict_history_limit: 10,
            optimistic_fields: vec!["title".into()],
        }
    }
}

impl SyncConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                  | Default |
    /// |--------------------------|---------|
    /// | `SYNC_CONNECT_TIMEOUT_SECS`   | `30` |
    /// | `SYNC_HEARTBEAT_INTERVAL_SECS`| `30` |
    /// | `SYNC_STALE_AFTER_SECS`       | `60` |
    /// | `SYNC_MAX_RETRIES`            | `10` |
    pub fn from_env() -> Self {
        let defaults = Self::default();

        fn secs(var: &str, default: Duration) -> Duration {
            std::env::var(var)
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(default)
        }

        Self {
            connect_timeout: secs("SYNC_CONNECT_TIMEOUT_SECS", defaults.connect_timeout),
            heartbeat_interval: secs("SYNC_HEARTBEAT_INTERVAL_SECS", defaults.heartbeat_interval),
            stale_after: secs("SYNC_STALE_AFTER_SECS", defaults.stale_after),
            max_retries: std::env::var("SYNC_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_retries),
            ..defaults
        }
    }
}
