//! Labeling-state evaluation.
//!
//! Decides whether a task counts as labeled from its active annotation
//! count and the owning project's overlap policy. Cohort membership is read
//! from the task's stored `overlap` value rather than computed here; see
//! [`crate::cohort`] for how that value is assigned.

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::CoreError;
use crate::types::DbId;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Default `maximum_annotations` for new projects.
pub const DEFAULT_MAXIMUM_ANNOTATIONS: i32 = 1;

/// Default `overlap_cohort_percentage` for new projects.
pub const DEFAULT_OVERLAP_COHORT_PERCENTAGE: i32 = 100;

/// Overlap value stored on tasks outside the overlap cohort.
pub const SINGLE_OVERLAP: i32 = 1;

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

/// Project-level settings that control when a task is "done".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct LabelingPolicy {
    /// Annotations required for a task in the overlap cohort.
    #[validate(range(min = 1))]
    pub maximum_annotations: i32,
    /// Share of the project's tasks that belong to the overlap cohort.
    #[validate(range(min = 0, max = 100))]
    pub overlap_cohort_percentage: i32,
    /// When `false`, a single active annotation labels any task.
    pub use_overlap: bool,
}

impl LabelingPolicy {
    /// Build a policy, rejecting out-of-range settings.
    pub fn new(
        maximum_annotations: i32,
        overlap_cohort_percentage: i32,
        use_overlap: bool,
    ) -> Result<Self, CoreError> {
        let policy = Self {
            maximum_annotations,
            overlap_cohort_percentage,
            use_overlap,
        };
        policy
            .validate()
            .map_err(|e| CoreError::Validation(e.to_string()))?;
        Ok(policy)
    }
}

impl Default for LabelingPolicy {
    fn default() -> Self {
        Self {
            maximum_annotations: DEFAULT_MAXIMUM_ANNOTATIONS,
            overlap_cohort_percentage: DEFAULT_OVERLAP_COHORT_PERCENTAGE,
            use_overlap: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Counters
// ---------------------------------------------------------------------------

/// Derived per-task counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCounts {
    /// Annotations with `was_cancelled = false`.
    pub total_annotations: i32,
    /// Annotations with `was_cancelled = true`.
    pub cancelled_annotations: i32,
    pub total_predictions: i32,
}

/// The persisted labeling state of one task.
///
/// This is the unit the recompute pipeline loads, re-derives and writes
/// back. Only `overlap` is an input; everything else is derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskLabelState {
    pub task_id: DbId,
    pub overlap: i32,
    pub counts: TaskCounts,
    pub is_labeled: bool,
}

impl TaskLabelState {
    /// Whether the task currently belongs to the overlap cohort.
    pub fn in_cohort(&self) -> bool {
        self.overlap > SINGLE_OVERLAP
    }

    /// Return the state this task should have given fresh `counts`.
    pub fn recomputed(&self, counts: TaskCounts, policy: &LabelingPolicy) -> Self {
        Self {
            task_id: self.task_id,
            overlap: self.overlap,
            counts,
            is_labeled: is_labeled(counts.total_annotations, policy, self.in_cohort()),
        }
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

/// Number of active annotations a task needs under `policy`.
pub fn required_overlap(policy: &LabelingPolicy, in_cohort: bool) -> i32 {
    if in_cohort {
        policy.maximum_annotations
    } else {
        SINGLE_OVERLAP
    }
}

/// Decide `is_labeled` for a task with `active_annotations`.
pub fn is_labeled(active_annotations: i32, policy: &LabelingPolicy, in_cohort: bool) -> bool {
    if !policy.use_overlap {
        return active_annotations > 0;
    }
    active_annotations >= required_overlap(policy, in_cohort)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
