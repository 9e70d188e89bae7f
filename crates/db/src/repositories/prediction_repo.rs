//! Repository for the `predictions` table.

use annotally_core::types::DbId;
use sqlx::PgPool;

use crate::models::prediction::{CreatePrediction, Prediction};

/// Column list shared across queries to avoid repetition.
const COLUMNS: &str =
    "id, task_id, project_id, result, model_version, score, created_at, updated_at";

/// Provides CRUD operations for predictions.
pub struct PredictionRepo;

impl PredictionRepo {
    /// Insert a new prediction. `project_id` is copied from the task row.
    pub async fn create(
        pool: &PgPool,
        input: &CreatePrediction,
    ) -> Result<Prediction, sqlx::Error> {
        let query = format!(
            "INSERT INTO predictions (task_id, project_id, result, model_version, score)
             SELECT t.id, t.project_id, $2, $3, $4 FROM tasks t WHERE t.id = $1
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Prediction>(&query)
            .bind(input.task_id)
            .bind(&input.result)
            .bind(&input.model_version)
            .bind(input.score)
            .fetch_one(pool)
            .await
    }

    /// List predictions of a task, oldest first.
    pub async fn list_by_task(
        pool: &PgPool,
        task_id: DbId,
    ) -> Result<Vec<Prediction>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM predictions WHERE task_id = $1 ORDER BY id");
        sqlx::query_as::<_, Prediction>(&query)
            .bind(task_id)
            .fetch_all(pool)
            .await
    }

    /// Delete a prediction, returning the removed row.
    pub async fn delete(pool: &PgPool, id: DbId) -> Result<Option<Prediction>, sqlx::Error> {
        let query = format!("DELETE FROM predictions WHERE id = $1 RETURNING {COLUMNS}");
        sqlx::query_as::<_, Prediction>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Delete every prediction of the given tasks in a project.
    pub async fn delete_by_tasks(
        pool: &PgPool,
        project_id: DbId,
        task_ids: &[DbId],
    ) -> Result<u64, sqlx::Error> {
        if task_ids.is_empty() {
            return Ok(0);
        }
        let result =
            sqlx::query("DELETE FROM predictions WHERE project_id = $1 AND task_id = ANY($2)")
                .bind(project_id)
                .bind(task_ids)
                .execute(pool)
                .await?;
        Ok(result.rows_affected())
    }
}
