//! In-process change feed for session entities.
//!
//! The facade publishes a [`ChangeEvent`] after every successful mutation;
//! the sync layer subscribes and fans resolved changes out to clients.

pub mod bus;

pub use bus::{tables, ChangeEvent, ChangeOp, EventBus};
