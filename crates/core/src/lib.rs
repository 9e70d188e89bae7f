//! Domain logic for task counter and labeling-state maintenance.
//!
//! Nothing in this crate touches the database: every function operates on
//! values loaded by the caller, so the `db` and `worker` crates can share it.

pub mod cohort;
pub mod error;
pub mod labeling;
pub mod recompute;
pub mod types;
