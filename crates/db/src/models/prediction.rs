//! Prediction entity model and DTOs.

use annotally_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A machine-generated candidate annotation from the `predictions` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Prediction {
    pub id: DbId,
    pub task_id: DbId,
    pub project_id: DbId,
    pub result: serde_json::Value,
    pub model_version: String,
    pub score: Option<f64>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// DTO for creating a new prediction.
#[derive(Debug, Clone, Deserialize)]
pub struct CreatePrediction {
    pub task_id: DbId,
    pub result: serde_json::Value,
    #[serde(default)]
    pub model_version: String,
    pub score: Option<f64>,
}
