//! Domain model structs and DTOs.
//!
//! Each submodule contains:
//! - A `FromRow` + `Serialize` entity struct matching the database row
//! - A `Deserialize` create DTO for inserts
//! - Update DTOs or auxiliary row types where the table needs them

pub mod annotation;
pub mod prediction;
pub mod project;
pub mod task;
