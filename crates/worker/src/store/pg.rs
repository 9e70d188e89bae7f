//! PostgreSQL-backed [`RecomputeStore`].

use annotally_core::cohort::CohortPartition;
use annotally_core::error::CoreError;
use annotally_core::labeling::{LabelingPolicy, TaskCounts, TaskLabelState};
use annotally_core::recompute::TaskScope;
use annotally_core::types::DbId;
use annotally_db::bulk_update::{self, BulkUpdateError, TASK_STATE_FIELDS};
use annotally_db::repositories::{
    AnnotationRepo, PredictionRepo, ProjectRepo, TaskCounterRepo, TaskRepo,
};
use annotally_db::DbPool;
use async_trait::async_trait;

use super::RecomputeStore;

/// Map a driver error onto the recompute error taxonomy.
fn storage(e: sqlx::Error) -> CoreError {
    CoreError::StorageUnavailable(e.to_string())
}

fn bulk(e: BulkUpdateError) -> CoreError {
    match e {
        BulkUpdateError::UnknownField { table, field } => CoreError::Schema { table, field },
        BulkUpdateError::Invalid(msg) => CoreError::Validation(msg.to_string()),
        e @ BulkUpdateError::BatchTooLarge { .. } => CoreError::Validation(e.to_string()),
        BulkUpdateError::Database(e) => storage(e),
    }
}

/// [`RecomputeStore`] over a PostgreSQL pool.
#[derive(Clone)]
pub struct PgRecomputeStore {
    pool: DbPool,
}

impl PgRecomputeStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RecomputeStore for PgRecomputeStore {
    async fn project_ids(&self) -> Result<Vec<DbId>, CoreError> {
        ProjectRepo::list_ids(&self.pool).await.map_err(storage)
    }

    async fn labeling_policy(&self, project_id: DbId) -> Result<LabelingPolicy, CoreError> {
        ProjectRepo::find_by_id(&self.pool, project_id)
            .await
            .map_err(storage)?
            .map(|p| p.labeling_policy())
            .ok_or(CoreError::NotFound {
                entity: "project",
                id: project_id,
            })
    }

    async fn resolve_scope(
        &self,
        project_id: DbId,
        scope: &TaskScope,
    ) -> Result<Vec<DbId>, CoreError> {
        let ids = match scope {
            TaskScope::Project => TaskRepo::list_ids_by_project(&self.pool, project_id).await,
            TaskScope::Tasks(ids) => {
                TaskRepo::filter_ids_in_project(&self.pool, project_id, ids).await
            }
        };
        ids.map_err(storage)
    }

    async fn find_stale(&self, task_ids: &[DbId]) -> Result<Vec<DbId>, CoreError> {
        TaskCounterRepo::find_stale(&self.pool, task_ids)
            .await
            .map_err(storage)
    }

    async fn aggregate_counts(
        &self,
        task_ids: &[DbId],
    ) -> Result<Vec<(DbId, TaskCounts)>, CoreError> {
        let rows = TaskCounterRepo::aggregate(&self.pool, task_ids)
            .await
            .map_err(storage)?;
        Ok(rows.iter().map(|r| (r.task_id, r.counts())).collect())
    }

    async fn load_states(&self, task_ids: &[DbId]) -> Result<Vec<TaskLabelState>, CoreError> {
        let rows = TaskRepo::list_states(&self.pool, task_ids)
            .await
            .map_err(storage)?;
        Ok(rows.into_iter().map(TaskLabelState::from).collect())
    }

    async fn write_states(
        &self,
        states: &[TaskLabelState],
        batch_size: usize,
    ) -> Result<u64, CoreError> {
        bulk_update::bulk_update(&self.pool, states, TASK_STATE_FIELDS, batch_size)
            .await
            .map_err(bulk)
    }

    async fn cohort_partition(&self, project_id: DbId) -> Result<CohortPartition, CoreError> {
        let (cohort, others) = TaskRepo::cohort_partition(&self.pool, project_id)
            .await
            .map_err(storage)?;
        Ok(CohortPartition { cohort, others })
    }

    async fn set_overlap(
        &self,
        project_id: DbId,
        task_ids: &[DbId],
        overlap: i32,
    ) -> Result<u64, CoreError> {
        TaskRepo::set_overlap(&self.pool, project_id, task_ids, overlap)
            .await
            .map_err(storage)
    }

    async fn delete_tasks(&self, project_id: DbId, task_ids: &[DbId]) -> Result<u64, CoreError> {
        TaskRepo::delete_by_ids(&self.pool, project_id, task_ids)
            .await
            .map_err(storage)
    }

    async fn delete_annotations(
        &self,
        project_id: DbId,
        task_ids: &[DbId],
    ) -> Result<u64, CoreError> {
        AnnotationRepo::delete_by_tasks(&self.pool, project_id, task_ids)
            .await
            .map_err(storage)
    }

    async fn delete_predictions(
        &self,
        project_id: DbId,
        task_ids: &[DbId],
    ) -> Result<u64, CoreError> {
        PredictionRepo::delete_by_tasks(&self.pool, project_id, task_ids)
            .await
            .map_err(storage)
    }

    async fn predictions_to_annotations(
        &self,
        project_id: DbId,
        task_ids: &[DbId],
        completed_by: Option<DbId>,
    ) -> Result<u64, CoreError> {
        AnnotationRepo::create_from_predictions(&self.pool, project_id, task_ids, completed_by)
            .await
            .map_err(storage)
    }

    async fn duplicate_groups(&self, project_id: DbId) -> Result<Vec<Vec<DbId>>, CoreError> {
        TaskRepo::find_duplicate_groups(&self.pool, project_id)
            .await
            .map_err(storage)
    }

    async fn merge_tasks(
        &self,
        project_id: DbId,
        keep: DbId,
        merged: &[DbId],
    ) -> Result<u64, CoreError> {
        TaskRepo::merge_into(&self.pool, project_id, keep, merged)
            .await
            .map_err(storage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn unknown_field_maps_to_schema_error() {
        let err = bulk(BulkUpdateError::UnknownField {
            table: "tasks",
            field: "labeled".to_string(),
        });
        assert_matches!(err, CoreError::Schema { table: "tasks", field } if field == "labeled");
    }

    #[test]
    fn driver_errors_map_to_storage_unavailable() {
        assert_matches!(
            storage(sqlx::Error::PoolTimedOut),
            CoreError::StorageUnavailable(_)
        );
        assert_matches!(
            bulk(BulkUpdateError::Database(sqlx::Error::PoolClosed)),
            CoreError::StorageUnavailable(_)
        );
    }

    #[test]
    fn oversized_batch_maps_to_validation() {
        let err = bulk(BulkUpdateError::BatchTooLarge {
            batch_size: 10_000,
            max: 8191,
        });
        assert_matches!(err, CoreError::Validation(msg) if msg.contains("10000"));
    }
}
