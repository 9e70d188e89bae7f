//! Labeling event bus.
//!
//! Mutations of annotations, predictions, tasks or project settings become
//! [`LabelingEvent`]s on the [`EventBus`], published in process or relayed
//! from database notifications. The recompute listener in the worker crate
//! subscribes and keeps task counters current.

pub mod bus;

pub use bus::{EventBus, EventKind, LabelingEvent};
