//! Domain model structs and DTOs.
//!
//! Each submodule contains:
//! - A `FromRow` + `Serialize` entity struct matching the database row
//! - A `Deserialize` create DTO for inserts

pub mod command;
pub mod group;
pub mod item;
pub mod job;
pub mod server;
pub mod status;
pub mod template;
