//! Project entity model and DTOs.

use annotally_core::labeling::LabelingPolicy;
use annotally_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

/// A project row from the `projects` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Project {
    pub id: DbId,
    pub title: String,
    pub maximum_annotations: i32,
    pub overlap_cohort_percentage: i32,
    pub use_overlap: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Project {
    /// The overlap settings of this project.
    pub fn labeling_policy(&self) -> LabelingPolicy {
        LabelingPolicy {
            maximum_annotations: self.maximum_annotations,
            overlap_cohort_percentage: self.overlap_cohort_percentage,
            use_overlap: self.use_overlap,
        }
    }
}

/// DTO for creating a new project. Omitted settings take column defaults.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateProject {
    #[validate(length(min = 1))]
    pub title: String,
    #[validate(range(min = 1))]
    pub maximum_annotations: Option<i32>,
    #[validate(range(min = 0, max = 100))]
    pub overlap_cohort_percentage: Option<i32>,
    pub use_overlap: Option<bool>,
}

/// DTO for updating an existing project. All fields are optional.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdateProject {
    #[validate(length(min = 1))]
    pub title: Option<String>,
    #[validate(range(min = 1))]
    pub maximum_annotations: Option<i32>,
    #[validate(range(min = 0, max = 100))]
    pub overlap_cohort_percentage: Option<i32>,
    pub use_overlap: Option<bool>,
}
