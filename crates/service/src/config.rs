use rallypoint_core::payout::RewardConfig;
use rallypoint_sync::SyncConfig;

/// Top-level engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub database_url: String,
    pub rewards: RewardConfig,
    pub sync: SyncConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_url: "postgres://localhost/rallypoint".into(),
            rewards: RewardConfig::default(),
            sync: SyncConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from the environment (and `.env` if present).
    ///
    /// | Env Var        | Default                           |
    /// |----------------|-----------------------------------|
    /// | `DATABASE_URL` | `postgres://localhost/rallypoint` |
    ///
    /// Reward and sync knobs are read by their own `from_env` loaders.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let defaults = Self::default();
        Self {
            database_url: std::env::var("DATABASE_URL").unwrap_or(defaults.database_url),
            rewards: RewardConfig::from_env(),
            sync: SyncConfig::from_env(),
        }
    }
}
