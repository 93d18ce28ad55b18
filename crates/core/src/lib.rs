//! Pure domain logic for the session lifecycle engine.
//!
//! This crate has zero internal deps so the persistence layer, the sync
//! layer, and any future worker or CLI tooling can all reference the same
//! state machine, permission rules, payout math, and conflict policy.

pub mod conflict;
pub mod error;
pub mod hashing;
pub mod participant;
pub mod payout;
pub mod permission;
pub mod session;
pub mod types;
pub mod wallet;

pub use error::CoreError;
