//! Service facade over the session lifecycle engine.
//!
//! [`SessionService`] is the single entry point for mutations: it composes
//! the permission guard, the guarded repositories, the token wallet, the
//! change feed, and the sync manager so callers never coordinate those
//! pieces themselves.

pub mod config;
pub mod error;
pub mod facade;

pub use config::EngineConfig;
pub use error::ServiceError;
pub use facade::{JoinOutcome, SessionService};

/// Install the global tracing subscriber, honoring `RUST_LOG`.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}
