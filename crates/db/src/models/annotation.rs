//! Annotation entity model and DTOs.

use annotally_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// An annotation row from the `annotations` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Annotation {
    pub id: DbId,
    pub task_id: DbId,
    pub project_id: DbId,
    /// List of region/label objects.
    pub result: serde_json::Value,
    /// Skip marker. Cancelled annotations count towards
    /// `cancelled_annotations` only.
    pub was_cancelled: bool,
    pub ground_truth: bool,
    pub completed_by: Option<DbId>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// DTO for creating a new annotation.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateAnnotation {
    pub task_id: DbId,
    pub result: serde_json::Value,
    #[serde(default)]
    pub was_cancelled: bool,
    #[serde(default)]
    pub ground_truth: bool,
    pub completed_by: Option<DbId>,
}

/// DTO for updating an annotation. All fields are optional.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateAnnotation {
    pub result: Option<serde_json::Value>,
    pub was_cancelled: Option<bool>,
    pub ground_truth: Option<bool>,
}
