//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async CRUD methods
//! that accept `&PgPool` as the first argument.

pub mod annotation_repo;
pub mod prediction_repo;
pub mod project_repo;
pub mod task_counter_repo;
pub mod task_repo;

pub use annotation_repo::AnnotationRepo;
pub use prediction_repo::PredictionRepo;
pub use project_repo::ProjectRepo;
pub use task_counter_repo::TaskCounterRepo;
pub use task_repo::TaskRepo;
