use crate::types::DbId;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: DbId },

    #[error("Validation failed: {0}")]
    Validation(String),

    /// A bulk write named a field that is not an updatable column.
    #[error("Unknown field `{field}` on table `{table}`")]
    Schema { table: &'static str, field: String },

    /// The relational store could not be reached or rejected a statement.
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidTransition {
        from: &'static str,
        to: &'static str,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}
