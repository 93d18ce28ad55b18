//! Domain model structs and DTOs.
//!
//! Each submodule contains:
//! - A `FromRow` + `Serialize` entity struct matching the database row
//! - A `Deserialize` create DTO for inserts
//!
//! Enum-valued columns are stored as TEXT; the row structs keep the raw
//! string and expose fallible typed accessors so a bad row surfaces as a
//! validation error instead of a decode panic.

pub mod participant;
pub mod session;
