//! Counter aggregation over `annotations` and `predictions`.
//!
//! Computes what a task's stored counters should be. Writing them back is
//! the job of [`crate::bulk_update`].

use annotally_core::types::DbId;
use sqlx::PgPool;

use crate::models::task::TaskCounterRow;

/// Per-task aggregates joined onto `tasks`, zero-filled for tasks without
/// annotations or predictions.
const AGGREGATE: &str = "\
    FROM tasks t \
    JOIN projects pr ON pr.id = t.project_id \
    LEFT JOIN ( \
        SELECT task_id, \
               COUNT(*) FILTER (WHERE NOT was_cancelled) AS active, \
               COUNT(*) FILTER (WHERE was_cancelled) AS cancelled \
        FROM annotations WHERE task_id = ANY($1) GROUP BY task_id \
    ) a ON a.task_id = t.id \
    LEFT JOIN ( \
        SELECT task_id, COUNT(*) AS predictions \
        FROM predictions WHERE task_id = ANY($1) GROUP BY task_id \
    ) p ON p.task_id = t.id \
    WHERE t.id = ANY($1)";

/// What `is_labeled` should be for the aggregated active count. Cohort
/// members need `maximum_annotations`, other tasks need one.
const LABELED: &str = "\
    CASE \
        WHEN NOT pr.use_overlap THEN COALESCE(a.active, 0) > 0 \
        WHEN t.overlap > 1 THEN COALESCE(a.active, 0) >= pr.maximum_annotations \
        ELSE COALESCE(a.active, 0) >= 1 \
    END";

/// Aggregates annotation and prediction counts per task.
pub struct TaskCounterRepo;

impl TaskCounterRepo {
    /// Count active annotations, cancelled annotations and predictions for
    /// each existing task in `task_ids`, ordered by task ID.
    ///
    /// An empty id set returns immediately without a query.
    pub async fn aggregate(
        pool: &PgPool,
        task_ids: &[DbId],
    ) -> Result<Vec<TaskCounterRow>, sqlx::Error> {
        if task_ids.is_empty() {
            return Ok(vec![]);
        }
        let query = format!(
            "SELECT t.id AS task_id, \
                    COALESCE(a.active, 0)::INTEGER AS total_annotations, \
                    COALESCE(a.cancelled, 0)::INTEGER AS cancelled_annotations, \
                    COALESCE(p.predictions, 0)::INTEGER AS total_predictions \
             {AGGREGATE} \
             ORDER BY t.id"
        );
        sqlx::query_as::<_, TaskCounterRow>(&query)
            .bind(task_ids)
            .fetch_all(pool)
            .await
    }

    /// IDs from `task_ids` whose stored counters disagree with the data, or
    /// whose `is_labeled` disagrees with the project's overlap settings and
    /// the task's cohort membership.
    pub async fn find_stale(pool: &PgPool, task_ids: &[DbId]) -> Result<Vec<DbId>, sqlx::Error> {
        if task_ids.is_empty() {
            return Ok(vec![]);
        }
        let query = format!(
            "SELECT t.id \
             {AGGREGATE} \
               AND (t.total_annotations <> COALESCE(a.active, 0) \
                 OR t.cancelled_annotations <> COALESCE(a.cancelled, 0) \
                 OR t.total_predictions <> COALESCE(p.predictions, 0) \
                 OR t.is_labeled <> {LABELED}) \
             ORDER BY t.id"
        );
        sqlx::query_scalar::<_, DbId>(&query)
            .bind(task_ids)
            .fetch_all(pool)
            .await
    }
}
