//! Task entity model, DTOs and recompute projections.

use annotally_core::labeling::{TaskCounts, TaskLabelState};
use annotally_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A task row from the `tasks` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Task {
    pub id: DbId,
    pub project_id: DbId,
    /// Arbitrary JSON payload being labeled.
    pub data: serde_json::Value,
    /// Annotations required to label this task: `maximum_annotations` for
    /// overlap cohort members, 1 otherwise.
    pub overlap: i32,
    pub total_annotations: i32,
    pub cancelled_annotations: i32,
    pub total_predictions: i32,
    pub is_labeled: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// DTO for importing a task.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateTask {
    pub data: serde_json::Value,
}

/// Labeling-state projection of a task row.
#[derive(Debug, Clone, Copy, FromRow)]
pub struct TaskStateRow {
    pub id: DbId,
    pub overlap: i32,
    pub total_annotations: i32,
    pub cancelled_annotations: i32,
    pub total_predictions: i32,
    pub is_labeled: bool,
}

impl From<TaskStateRow> for TaskLabelState {
    fn from(row: TaskStateRow) -> Self {
        Self {
            task_id: row.id,
            overlap: row.overlap,
            counts: TaskCounts {
                total_annotations: row.total_annotations,
                cancelled_annotations: row.cancelled_annotations,
                total_predictions: row.total_predictions,
            },
            is_labeled: row.is_labeled,
        }
    }
}

/// Aggregated annotation and prediction counts for one task.
#[derive(Debug, Clone, Copy, FromRow)]
pub struct TaskCounterRow {
    pub task_id: DbId,
    pub total_annotations: i32,
    pub cancelled_annotations: i32,
    pub total_predictions: i32,
}

impl TaskCounterRow {
    pub fn counts(&self) -> TaskCounts {
        TaskCounts {
            total_annotations: self.total_annotations,
            cancelled_annotations: self.cancelled_annotations,
            total_predictions: self.total_predictions,
        }
    }
}
