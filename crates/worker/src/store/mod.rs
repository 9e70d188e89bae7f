//! Storage seam for the recompute pipeline.
//!
//! [`RecomputeStore`] lists every read and write the orchestrator and the
//! administrative actions need. [`PgRecomputeStore`] implements it over the
//! `db` crate's repositories; tests use an in-memory implementation.

use annotally_core::cohort::CohortPartition;
use annotally_core::error::CoreError;
use annotally_core::labeling::{LabelingPolicy, TaskCounts, TaskLabelState};
use annotally_core::recompute::TaskScope;
use annotally_core::types::DbId;
use async_trait::async_trait;

pub mod pg;

#[cfg(test)]
pub mod memory;

pub use pg::PgRecomputeStore;

/// Reads and writes over projects, tasks, annotations and predictions.
///
/// Every method is one logical round trip. Failures of the underlying
/// store surface as [`CoreError::StorageUnavailable`]; implementations do
/// not retry.
#[async_trait]
pub trait RecomputeStore: Send + Sync {
    /// IDs of every project, ascending.
    async fn project_ids(&self) -> Result<Vec<DbId>, CoreError>;

    /// Overlap settings of a project.
    async fn labeling_policy(&self, project_id: DbId) -> Result<LabelingPolicy, CoreError>;

    /// Resolve a scope to existing task IDs of the project, ascending.
    async fn resolve_scope(
        &self,
        project_id: DbId,
        scope: &TaskScope,
    ) -> Result<Vec<DbId>, CoreError>;

    /// Subset of `task_ids` whose stored counters disagree with the data, or
    /// whose stored `is_labeled` disagrees with the project's policy.
    async fn find_stale(&self, task_ids: &[DbId]) -> Result<Vec<DbId>, CoreError>;

    /// Fresh counters for each task in `task_ids`.
    async fn aggregate_counts(
        &self,
        task_ids: &[DbId],
    ) -> Result<Vec<(DbId, TaskCounts)>, CoreError>;

    /// Stored labeling state of each task in `task_ids`.
    async fn load_states(&self, task_ids: &[DbId]) -> Result<Vec<TaskLabelState>, CoreError>;

    /// Persist counters and `is_labeled` of `states`, `batch_size` rows per
    /// statement. Returns rows updated.
    async fn write_states(
        &self,
        states: &[TaskLabelState],
        batch_size: usize,
    ) -> Result<u64, CoreError>;

    /// Current overlap cohort of a project.
    async fn cohort_partition(&self, project_id: DbId) -> Result<CohortPartition, CoreError>;

    /// Set `overlap` on the given tasks. Returns rows changed.
    async fn set_overlap(
        &self,
        project_id: DbId,
        task_ids: &[DbId],
        overlap: i32,
    ) -> Result<u64, CoreError>;

    /// Delete tasks with their annotations and predictions.
    async fn delete_tasks(&self, project_id: DbId, task_ids: &[DbId]) -> Result<u64, CoreError>;

    /// Delete every annotation of the given tasks.
    async fn delete_annotations(
        &self,
        project_id: DbId,
        task_ids: &[DbId],
    ) -> Result<u64, CoreError>;

    /// Delete every prediction of the given tasks.
    async fn delete_predictions(
        &self,
        project_id: DbId,
        task_ids: &[DbId],
    ) -> Result<u64, CoreError>;

    /// Create one annotation per task from its newest prediction.
    async fn predictions_to_annotations(
        &self,
        project_id: DbId,
        task_ids: &[DbId],
        completed_by: Option<DbId>,
    ) -> Result<u64, CoreError>;

    /// Groups of task IDs sharing identical `data`, each ascending.
    async fn duplicate_groups(&self, project_id: DbId) -> Result<Vec<Vec<DbId>>, CoreError>;

    /// Move annotations and predictions of `merged` onto `keep` and delete
    /// `merged`. Returns tasks deleted.
    async fn merge_tasks(
        &self,
        project_id: DbId,
        keep: DbId,
        merged: &[DbId],
    ) -> Result<u64, CoreError>;
}
