//! The recompute pipeline.
//!
//! [`Recomputer::run`] takes one [`RecomputeRequest`] through cohort
//! maintenance, scope resolution, counter aggregation, labeling evaluation
//! and the bulk write. It holds no locks; concurrent runs over overlapping
//! task sets resolve last-write-wins per row.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use annotally_core::cohort::{decide_action, plan_rearrangement, CohortAction};
use annotally_core::error::CoreError;
use annotally_core::labeling::{LabelingPolicy, TaskCounts, TaskLabelState, SINGLE_OVERLAP};
use annotally_core::recompute::{RecomputeMode, RecomputeReport, RecomputeRequest, SettingsChanges};
use annotally_core::types::DbId;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::store::RecomputeStore;

/// Runs recompute requests against a [`RecomputeStore`].
pub struct Recomputer {
    store: Arc<dyn RecomputeStore>,
    batch_size: usize,
    rng: Mutex<StdRng>,
}

impl Recomputer {
    pub fn new(store: Arc<dyn RecomputeStore>, batch_size: usize) -> Self {
        Self {
            store,
            batch_size,
            rng: Mutex::new(StdRng::from_os_rng()),
        }
    }

    /// Replace the cohort sampling RNG, e.g. with a seeded one.
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = Mutex::new(rng);
        self
    }

    pub fn store(&self) -> &Arc<dyn RecomputeStore> {
        &self.store
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn rng(&self) -> MutexGuard<'_, StdRng> {
        self.rng.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Recompute counters and `is_labeled` for the request's tasks.
    ///
    /// An explicit empty task list returns an empty report without touching
    /// the store. Store failures abort the run; rows already written by
    /// earlier batches stay written.
    pub async fn run(&self, request: &RecomputeRequest) -> Result<RecomputeReport, CoreError> {
        let project_id = request.project_id;
        if request.scope.is_empty() {
            tracing::debug!(
                project_id,
                "Recompute requested for an empty task set, skipping"
            );
            return Ok(RecomputeReport::default());
        }

        let policy = self.store.labeling_policy(project_id).await?;

        if request.changes.any() {
            let changed = self
                .update_cohort(project_id, &request.changes, &policy)
                .await?;
            tracing::debug!(
                project_id,
                overlap_changed = changed,
                "Overlap cohort updated"
            );
        }

        let resolved = self.store.resolve_scope(project_id, &request.scope).await?;
        let mut report = RecomputeReport {
            resolved: resolved.len(),
            ..Default::default()
        };
        if resolved.is_empty() {
            tracing::info!(project_id, "No tasks in recompute scope");
            return Ok(report);
        }

        let mode = request.mode();
        let task_ids = match mode {
            RecomputeMode::Full => resolved,
            RecomputeMode::Incremental => self.store.find_stale(&resolved).await?,
        };
        report.examined = task_ids.len();
        if task_ids.is_empty() {
            tracing::debug!(
                project_id,
                task_count = report.resolved,
                "All counters up to date"
            );
            return Ok(report);
        }

        let counts: HashMap<DbId, TaskCounts> = self
            .store
            .aggregate_counts(&task_ids)
            .await?
            .into_iter()
            .collect();
        let states = self.store.load_states(&task_ids).await?;
        let changed = changed_states(&states, &counts, &policy);

        if !changed.is_empty() {
            report.updated = self
                .store
                .write_states(&changed, self.batch_size)
                .await?;
        }

        tracing::info!(
            project_id,
            mode = ?mode,
            task_count = report.examined,
            updated = report.updated,
            "Recompute finished"
        );
        Ok(report)
    }

    /// Bring task overlap values in line with changed project settings.
    ///
    /// Returns the number of tasks whose overlap changed.
    async fn update_cohort(
        &self,
        project_id: DbId,
        changes: &SettingsChanges,
        policy: &LabelingPolicy,
    ) -> Result<u64, CoreError> {
        let partition = self.store.cohort_partition(project_id).await?;
        let action = decide_action(changes, policy, !partition.cohort.is_empty());
        let max = policy.maximum_annotations;

        match action {
            CohortAction::Keep => Ok(0),
            CohortAction::Restamp => {
                self.store
                    .set_overlap(project_id, &partition.cohort, max)
                    .await
            }
            CohortAction::StampAll => {
                self.store
                    .set_overlap(project_id, &partition.all_ids(), max)
                    .await
            }
            CohortAction::Rearrange => {
                let plan = {
                    let mut rng = self.rng();
                    plan_rearrangement(&partition, policy.overlap_cohort_percentage, &mut *rng)
                };
                tracing::debug!(
                    project_id,
                    demoted = plan.demote.len(),
                    cohort = plan.stamp.len(),
                    "Rearranging overlap cohort"
                );
                let demoted = self
                    .store
                    .set_overlap(project_id, &plan.demote, SINGLE_OVERLAP)
                    .await?;
                let stamped = self.store.set_overlap(project_id, &plan.stamp, max).await?;
                Ok(demoted + stamped)
            }
        }
    }
}

/// Re-derive each state from fresh counts, keeping only those that differ.
///
/// A task absent from `counts` has no annotations or predictions.
fn changed_states(
    states: &[TaskLabelState],
    counts: &HashMap<DbId, TaskCounts>,
    policy: &LabelingPolicy,
) -> Vec<TaskLabelState> {
    states
        .iter()
        .filter_map(|state| {
            let fresh = counts.get(&state.task_id).copied().unwrap_or_default();
            let next = state.recomputed(fresh, policy);
            (next != *state).then_some(next)
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
