//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async CRUD methods.
//! Methods that must participate in a caller-owned transaction take
//! `&mut PgConnection`; standalone reads take `&PgPool`.

pub mod participant_repo;
pub mod session_repo;
pub mod wallet_repo;

pub use participant_repo::ParticipantRepo;
pub use session_repo::SessionRepo;
pub use wallet_repo::{PgTokenWallet, TokenWalletRepo};
