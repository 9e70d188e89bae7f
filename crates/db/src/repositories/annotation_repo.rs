//! Repository for the `annotations` table.
//!
//! None of these methods touch task counters. Callers publish a
//! labeling event or run a recompute after mutating annotations.

use annotally_core::types::DbId;
use sqlx::PgPool;

use crate::models::annotation::{Annotation, CreateAnnotation, UpdateAnnotation};

/// Column list shared across queries to avoid repetition.
const COLUMNS: &str = "id, task_id, project_id, result, was_cancelled, ground_truth, \
    completed_by, created_at, updated_at";

/// Provides CRUD operations for annotations.
pub struct AnnotationRepo;

impl AnnotationRepo {
    /// Insert a new annotation. `project_id` is copied from the task row.
    pub async fn create(
        pool: &PgPool,
        input: &CreateAnnotation,
    ) -> Result<Annotation, sqlx::Error> {
        let query = format!(
            "INSERT INTO annotations
                 (task_id, project_id, result, was_cancelled, ground_truth, completed_by)
             SELECT t.id, t.project_id, $2, $3, $4, $5 FROM tasks t WHERE t.id = $1
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Annotation>(&query)
            .bind(input.task_id)
            .bind(&input.result)
            .bind(input.was_cancelled)
            .bind(input.ground_truth)
            .bind(input.completed_by)
            .fetch_one(pool)
            .await
    }

    /// Find an annotation by its internal ID.
    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<Annotation>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM annotations WHERE id = $1");
        sqlx::query_as::<_, Annotation>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// List annotations of a task, oldest first.
    pub async fn list_by_task(
        pool: &PgPool,
        task_id: DbId,
    ) -> Result<Vec<Annotation>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM annotations WHERE task_id = $1 ORDER BY id");
        sqlx::query_as::<_, Annotation>(&query)
            .bind(task_id)
            .fetch_all(pool)
            .await
    }

    /// Update an annotation. Only non-`None` fields in `input` are applied.
    pub async fn update(
        pool: &PgPool,
        id: DbId,
        input: &UpdateAnnotation,
    ) -> Result<Option<Annotation>, sqlx::Error> {
        let query = format!(
            "UPDATE annotations SET
                result = COALESCE($2, result),
                was_cancelled = COALESCE($3, was_cancelled),
                ground_truth = COALESCE($4, ground_truth)
             WHERE id = $1
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Annotation>(&query)
            .bind(id)
            .bind(&input.result)
            .bind(input.was_cancelled)
            .bind(input.ground_truth)
            .fetch_optional(pool)
            .await
    }

    /// Delete an annotation, returning the removed row.
    pub async fn delete(pool: &PgPool, id: DbId) -> Result<Option<Annotation>, sqlx::Error> {
        let query = format!("DELETE FROM annotations WHERE id = $1 RETURNING {COLUMNS}");
        sqlx::query_as::<_, Annotation>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Delete every annotation of the given tasks in a project.
    pub async fn delete_by_tasks(
        pool: &PgPool,
        project_id: DbId,
        task_ids: &[DbId],
    ) -> Result<u64, sqlx::Error> {
        if task_ids.is_empty() {
            return Ok(0);
        }
        let result =
            sqlx::query("DELETE FROM annotations WHERE project_id = $1 AND task_id = ANY($2)")
                .bind(project_id)
                .bind(task_ids)
                .execute(pool)
                .await?;
        Ok(result.rows_affected())
    }

    /// Copy the newest prediction of each task into a new annotation.
    ///
    /// Tasks without predictions are skipped. Returns the number of
    /// annotations created.
    pub async fn create_from_predictions(
        pool: &PgPool,
        project_id: DbId,
        task_ids: &[DbId],
        completed_by: Option<DbId>,
    ) -> Result<u64, sqlx::Error> {
        if task_ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(
            "INSERT INTO annotations \
                 (task_id, project_id, result, was_cancelled, ground_truth, completed_by) \
             SELECT DISTINCT ON (p.task_id) p.task_id, p.project_id, p.result, FALSE, FALSE, $3 \
             FROM predictions p \
             WHERE p.project_id = $1 AND p.task_id = ANY($2) \
             ORDER BY p.task_id, p.created_at DESC, p.id DESC",
        )
        .bind(project_id)
        .bind(task_ids)
        .bind(completed_by)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }
}
