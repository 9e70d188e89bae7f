//! Overlap cohort planning.
//!
//! A project's overlap cohort is the set of tasks that must collect
//! `maximum_annotations` annotations; every other task needs one. Membership
//! is persisted as the task's `overlap` column. When project settings or the
//! task count change, the cohort is resized by sampling tasks uniformly at
//! random.

use rand::Rng;

use crate::labeling::LabelingPolicy;
use crate::recompute::SettingsChanges;
use crate::types::DbId;

/// Current cohort membership of a project's tasks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CohortPartition {
    /// Tasks with `overlap > 1`.
    pub cohort: Vec<DbId>,
    /// Tasks with `overlap = 1`.
    pub others: Vec<DbId>,
}

impl CohortPartition {
    pub fn total(&self) -> usize {
        self.cohort.len() + self.others.len()
    }

    pub fn all_ids(&self) -> Vec<DbId> {
        let mut ids: Vec<DbId> = self.cohort.iter().chain(&self.others).copied().collect();
        ids.sort_unstable();
        ids
    }
}

/// What to do with the cohort in response to a settings change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CohortAction {
    /// Leave every task's overlap as it is.
    Keep,
    /// Stamp the existing cohort with the new `maximum_annotations`.
    Restamp,
    /// Resize the cohort to match `overlap_cohort_percentage`.
    Rearrange,
    /// Put every task in the cohort.
    StampAll,
}

/// Overlap writes produced by a rearrangement.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CohortPlan {
    /// Tasks leaving the cohort (set to overlap 1).
    pub demote: Vec<DbId>,
    /// Every task in the resulting cohort (set to `maximum_annotations`).
    pub stamp: Vec<DbId>,
}

/// Cohort size for `total` tasks at `percentage`, rounded half up.
pub fn target_cohort_size(total: usize, percentage: i32) -> usize {
    let percentage = percentage.clamp(0, 100) as usize;
    (2 * percentage * total + 100) / 200
}

/// Choose the cohort action for a set of settings changes.
pub fn decide_action(
    changes: &SettingsChanges,
    policy: &LabelingPolicy,
    cohort_exists: bool,
) -> CohortAction {
    let max = policy.maximum_annotations;
    let pct = policy.overlap_cohort_percentage;

    if changes.maximum_annotations_changed
        && (!changes.overlap_cohort_percentage_changed || max == 1)
    {
        if cohort_exists {
            CohortAction::Restamp
        } else if pct < 100 {
            CohortAction::Rearrange
        } else {
            CohortAction::StampAll
        }
    } else if changes.overlap_cohort_percentage_changed && max > 1 {
        CohortAction::Rearrange
    } else if changes.tasks_number_changed && pct < 100 && max > 1 {
        CohortAction::Rearrange
    } else {
        CohortAction::Keep
    }
}

/// Resize the cohort in `partition` to `percentage` of all tasks.
///
/// Demoted and promoted tasks are sampled uniformly with `rng`. The
/// returned `stamp` list always holds the full resulting cohort, sorted.
pub fn plan_rearrangement<R: Rng + ?Sized>(
    partition: &CohortPartition,
    percentage: i32,
    rng: &mut R,
) -> CohortPlan {
    let target = target_cohort_size(partition.total(), percentage);
    let current = partition.cohort.len();

    let mut plan = CohortPlan::default();
    if current > target {
        let demote_idx = sample_indices(rng, current, current - target);
        plan.demote = demote_idx.iter().map(|&i| partition.cohort[i]).collect();
        plan.stamp = partition
            .cohort
            .iter()
            .enumerate()
            .filter(|(i, _)| demote_idx.binary_search(i).is_err())
            .map(|(_, &id)| id)
            .collect();
    } else {
        let promote_idx = sample_indices(rng, partition.others.len(), target - current);
        plan.stamp = partition.cohort.clone();
        plan.stamp
            .extend(promote_idx.iter().map(|&i| partition.others[i]));
    }

    plan.demote.sort_unstable();
    plan.stamp.sort_unstable();
    plan
}

/// `amount` distinct indices below `len`, ascending.
fn sample_indices<R: Rng + ?Sized>(rng: &mut R, len: usize, amount: usize) -> Vec<usize> {
    let mut idx = rand::seq::index::sample(rng, len, amount.min(len)).into_vec();
    idx.sort_unstable();
    idx
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
