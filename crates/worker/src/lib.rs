//! Recompute orchestration for task counters and labeling state.
//!
//! - [`store`]: the storage seam and its PostgreSQL implementation.
//! - [`orchestrator`]: the recompute pipeline itself.
//! - [`queue`]: inline or background dispatch with job status tracking.
//! - [`listener`]: turns labeling events into recompute requests.
//! - [`notify`]: relays database notifications onto the event bus.
//! - [`actions`]: administrative bulk actions that end in a recompute.
//! - [`sweep`]: periodic consistency pass run by the worker binary.

pub mod actions;
pub mod config;
pub mod listener;
pub mod notify;
pub mod orchestrator;
pub mod queue;
pub mod store;
pub mod sweep;
