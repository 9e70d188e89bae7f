//! Repository for the `tasks` table.

use annotally_core::types::DbId;
use sqlx::PgPool;

use crate::models::task::{CreateTask, Task, TaskStateRow};

/// Column list shared across queries to avoid repetition.
const COLUMNS: &str = "id, project_id, data, overlap, total_annotations, \
    cancelled_annotations, total_predictions, is_labeled, created_at, updated_at";

/// Columns of the [`TaskStateRow`] projection.
const STATE_COLUMNS: &str =
    "id, overlap, total_annotations, cancelled_annotations, total_predictions, is_labeled";

/// Provides CRUD operations for tasks.
pub struct TaskRepo;

impl TaskRepo {
    /// Insert a single task, returning the created row.
    pub async fn create(
        pool: &PgPool,
        project_id: DbId,
        input: &CreateTask,
    ) -> Result<Task, sqlx::Error> {
        let query = format!(
            "INSERT INTO tasks (project_id, data) VALUES ($1, $2) RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Task>(&query)
            .bind(project_id)
            .bind(&input.data)
            .fetch_one(pool)
            .await
    }

    /// Batch-import tasks, returning the created rows in input order.
    pub async fn create_batch(
        pool: &PgPool,
        project_id: DbId,
        inputs: &[CreateTask],
    ) -> Result<Vec<Task>, sqlx::Error> {
        if inputs.is_empty() {
            return Ok(vec![]);
        }

        let data: Vec<serde_json::Value> = inputs.iter().map(|t| t.data.clone()).collect();
        let query = format!(
            "INSERT INTO tasks (project_id, data) \
             SELECT $1, d FROM UNNEST($2::jsonb[]) WITH ORDINALITY AS u(d, n) ORDER BY n \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Task>(&query)
            .bind(project_id)
            .bind(&data)
            .fetch_all(pool)
            .await
    }

    /// Find a task by its internal ID.
    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<Task>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM tasks WHERE id = $1");
        sqlx::query_as::<_, Task>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// List every task of a project ordered by ID.
    pub async fn list_by_project(
        pool: &PgPool,
        project_id: DbId,
    ) -> Result<Vec<Task>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM tasks WHERE project_id = $1 ORDER BY id");
        sqlx::query_as::<_, Task>(&query)
            .bind(project_id)
            .fetch_all(pool)
            .await
    }

    /// IDs of every task in a project, ascending.
    pub async fn list_ids_by_project(
        pool: &PgPool,
        project_id: DbId,
    ) -> Result<Vec<DbId>, sqlx::Error> {
        sqlx::query_scalar::<_, DbId>("SELECT id FROM tasks WHERE project_id = $1 ORDER BY id")
            .bind(project_id)
            .fetch_all(pool)
            .await
    }

    /// Restrict `ids` to tasks that exist in `project_id`, ascending.
    pub async fn filter_ids_in_project(
        pool: &PgPool,
        project_id: DbId,
        ids: &[DbId],
    ) -> Result<Vec<DbId>, sqlx::Error> {
        if ids.is_empty() {
            return Ok(vec![]);
        }
        sqlx::query_scalar::<_, DbId>(
            "SELECT id FROM tasks WHERE project_id = $1 AND id = ANY($2) ORDER BY id",
        )
        .bind(project_id)
        .bind(ids)
        .fetch_all(pool)
        .await
    }

    /// Load the labeling-state projection of the given tasks.
    pub async fn list_states(
        pool: &PgPool,
        ids: &[DbId],
    ) -> Result<Vec<TaskStateRow>, sqlx::Error> {
        if ids.is_empty() {
            return Ok(vec![]);
        }
        let query = format!("SELECT {STATE_COLUMNS} FROM tasks WHERE id = ANY($1) ORDER BY id");
        sqlx::query_as::<_, TaskStateRow>(&query)
            .bind(ids)
            .fetch_all(pool)
            .await
    }

    /// Split a project's task IDs into overlap cohort members and the rest.
    pub async fn cohort_partition(
        pool: &PgPool,
        project_id: DbId,
    ) -> Result<(Vec<DbId>, Vec<DbId>), sqlx::Error> {
        let rows: Vec<(DbId, bool)> = sqlx::query_as(
            "SELECT id, overlap > 1 FROM tasks WHERE project_id = $1 ORDER BY id",
        )
        .bind(project_id)
        .fetch_all(pool)
        .await?;

        let (cohort, others): (Vec<_>, Vec<_>) = rows.into_iter().partition(|(_, c)| *c);
        Ok((
            cohort.into_iter().map(|(id, _)| id).collect(),
            others.into_iter().map(|(id, _)| id).collect(),
        ))
    }

    /// Set `overlap` on the given tasks of a project. Returns rows changed.
    pub async fn set_overlap(
        pool: &PgPool,
        project_id: DbId,
        ids: &[DbId],
        overlap: i32,
    ) -> Result<u64, sqlx::Error> {
        if ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(
            "UPDATE tasks SET overlap = $3 \
             WHERE project_id = $1 AND id = ANY($2) AND overlap <> $3",
        )
        .bind(project_id)
        .bind(ids)
        .bind(overlap)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Delete the given tasks of a project. Annotations and predictions go
    /// with them by cascade.
    pub async fn delete_by_ids(
        pool: &PgPool,
        project_id: DbId,
        ids: &[DbId],
    ) -> Result<u64, sqlx::Error> {
        if ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query("DELETE FROM tasks WHERE project_id = $1 AND id = ANY($2)")
            .bind(project_id)
            .bind(ids)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Groups of task IDs in a project that share identical `data`.
    ///
    /// Each group is ascending and has at least two members; groups are
    /// ordered by their lowest ID.
    pub async fn find_duplicate_groups(
        pool: &PgPool,
        project_id: DbId,
    ) -> Result<Vec<Vec<DbId>>, sqlx::Error> {
        sqlx::query_scalar::<_, Vec<DbId>>(
            "SELECT ARRAY_AGG(id ORDER BY id) FROM tasks \
             WHERE project_id = $1 \
             GROUP BY data \
             HAVING COUNT(*) > 1 \
             ORDER BY MIN(id)",
        )
        .bind(project_id)
        .fetch_all(pool)
        .await
    }

    /// Move every annotation and prediction of `merged` onto `keep`, then
    /// delete the `merged` tasks. Runs in one transaction.
    ///
    /// Returns the number of tasks deleted.
    pub async fn merge_into(
        pool: &PgPool,
        project_id: DbId,
        keep: DbId,
        merged: &[DbId],
    ) -> Result<u64, sqlx::Error> {
        if merged.is_empty() {
            return Ok(0);
        }
        let mut tx = pool.begin().await?;

        sqlx::query(
            "UPDATE annotations SET task_id = $2 WHERE project_id = $1 AND task_id = ANY($3)",
        )
        .bind(project_id)
        .bind(keep)
        .bind(merged)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE predictions SET task_id = $2 WHERE project_id = $1 AND task_id = ANY($3)",
        )
        .bind(project_id)
        .bind(keep)
        .bind(merged)
        .execute(&mut *tx)
        .await?;

        let deleted = sqlx::query("DELETE FROM tasks WHERE project_id = $1 AND id = ANY($2)")
            .bind(project_id)
            .bind(merged)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;
        Ok(deleted)
    }
}
