//! Batched multi-row updates.
//!
//! Writes per-row field values for many records with one statement per
//! batch instead of one per record:
//!
//! ```sql
//! UPDATE tasks SET
//!     total_annotations = CASE id WHEN $1 THEN $2 WHEN $3 THEN $4 END,
//!     is_labeled = CASE id WHEN $5 THEN $6 WHEN $7 THEN $8 END
//! WHERE id = ANY($9)
//! ```
//!
//! Every field name is checked against the record type's column list before
//! any SQL is built, so an unknown field never reaches the server. A batch
//! binds `2 * fields * records + 1` parameters, which must stay within the
//! PostgreSQL protocol limit of [`MAX_BIND_PARAMS`].

use annotally_core::labeling::TaskLabelState;
use annotally_core::types::DbId;
use sqlx::{PgPool, Postgres, QueryBuilder};

/// Default number of records written per statement.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Bind parameters PostgreSQL accepts in one statement.
pub const MAX_BIND_PARAMS: usize = 65535;

#[derive(Debug, thiserror::Error)]
pub enum BulkUpdateError {
    #[error("Unknown field `{field}` on table `{table}`")]
    UnknownField { table: &'static str, field: String },

    #[error("Invalid bulk update: {0}")]
    Invalid(&'static str),

    #[error("Batch size {batch_size} exceeds the limit of {max} records for this field list")]
    BatchTooLarge { batch_size: usize, max: usize },

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// A record type whose columns can be written by [`bulk_update`].
pub trait BulkUpdatable {
    /// Target table.
    const TABLE: &'static str;

    /// Primary-key column. Never updatable.
    const PRIMARY_KEY: &'static str = "id";

    /// Columns that may appear in a field list.
    const COLUMNS: &'static [&'static str];

    fn primary_key(&self) -> DbId;

    /// Bind this record's value for `field` onto `builder`.
    ///
    /// Implementations push a cast after the placeholder so every `CASE`
    /// arm resolves to the column type.
    fn push_field(
        &self,
        field: &str,
        builder: &mut QueryBuilder<'static, Postgres>,
    ) -> Result<(), BulkUpdateError>;
}

/// Largest batch whose statement stays within [`MAX_BIND_PARAMS`] when
/// writing `field_count` distinct fields.
pub fn max_batch_size(field_count: usize) -> usize {
    (MAX_BIND_PARAMS - 1) / (2 * field_count.max(1))
}

/// Check `fields` against `T::COLUMNS`, returning them deduplicated in order.
pub fn validate_fields<'f, T: BulkUpdatable>(
    fields: &[&'f str],
) -> Result<Vec<&'f str>, BulkUpdateError> {
    if fields.is_empty() {
        return Err(BulkUpdateError::Invalid("field list must not be empty"));
    }
    let mut checked: Vec<&str> = Vec::with_capacity(fields.len());
    for &field in fields {
        if !T::COLUMNS.contains(&field) {
            return Err(BulkUpdateError::UnknownField {
                table: T::TABLE,
                field: field.to_string(),
            });
        }
        if !checked.contains(&field) {
            checked.push(field);
        }
    }
    Ok(checked)
}

/// Build one `UPDATE` statement per `batch_size` records, in input order.
pub fn build_statements<T: BulkUpdatable>(
    records: &[T],
    fields: &[&str],
    batch_size: usize,
) -> Result<Vec<QueryBuilder<'static, Postgres>>, BulkUpdateError> {
    if batch_size == 0 {
        return Err(BulkUpdateError::Invalid("batch size must be positive"));
    }
    let fields = validate_fields::<T>(fields)?;
    let max = max_batch_size(fields.len());
    if batch_size > max {
        return Err(BulkUpdateError::BatchTooLarge { batch_size, max });
    }

    records
        .chunks(batch_size)
        .map(|batch| build_batch(batch, &fields))
        .collect()
}

fn build_batch<T: BulkUpdatable>(
    batch: &[T],
    fields: &[&str],
) -> Result<QueryBuilder<'static, Postgres>, BulkUpdateError> {
    let mut builder = QueryBuilder::new(format!("UPDATE {} SET ", T::TABLE));

    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            builder.push(", ");
        }
        builder.push(format!("{field} = CASE {} ", T::PRIMARY_KEY));
        for record in batch {
            builder.push("WHEN ");
            builder.push_bind(record.primary_key());
            builder.push(" THEN ");
            record.push_field(field, &mut builder)?;
            builder.push(" ");
        }
        builder.push("END");
    }

    let ids: Vec<DbId> = batch.iter().map(|record| record.primary_key()).collect();
    builder.push(format!(" WHERE {} = ANY(", T::PRIMARY_KEY));
    builder.push_bind(ids);
    builder.push(")");

    Ok(builder)
}

/// Write `fields` of every record, one round trip per batch.
///
/// Returns the number of rows updated. Empty input issues no statement.
pub async fn bulk_update<T: BulkUpdatable>(
    pool: &PgPool,
    records: &[T],
    fields: &[&str],
    batch_size: usize,
) -> Result<u64, BulkUpdateError> {
    let statements = build_statements(records, fields, batch_size)?;
    if statements.is_empty() {
        return Ok(0);
    }

    let mut updated = 0;
    for mut statement in statements {
        updated += statement.build().execute(pool).await?.rows_affected();
    }

    tracing::debug!(
        table = T::TABLE,
        records = records.len(),
        batch_size,
        updated,
        "Bulk update applied"
    );
    Ok(updated)
}

// ---------------------------------------------------------------------------
// Task labeling state
// ---------------------------------------------------------------------------

/// Columns written by the recompute pipeline.
pub const TASK_STATE_FIELDS: &[&str] = &[
    "total_annotations",
    "cancelled_annotations",
    "total_predictions",
    "is_labeled",
];

impl BulkUpdatable for TaskLabelState {
    const TABLE: &'static str = "tasks";
    const COLUMNS: &'static [&'static str] = &[
        "overlap",
        "total_annotations",
        "cancelled_annotations",
        "total_predictions",
        "is_labeled",
    ];

    fn primary_key(&self) -> DbId {
        self.task_id
    }

    fn push_field(
        &self,
        field: &str,
        builder: &mut QueryBuilder<'static, Postgres>,
    ) -> Result<(), BulkUpdateError> {
        match field {
            "overlap" => builder.push_bind(self.overlap).push("::INTEGER"),
            "total_annotations" => builder
                .push_bind(self.counts.total_annotations)
                .push("::INTEGER"),
            "cancelled_annotations" => builder
                .push_bind(self.counts.cancelled_annotations)
                .push("::INTEGER"),
            "total_predictions" => builder
                .push_bind(self.counts.total_predictions)
                .push("::INTEGER"),
            "is_labeled" => builder.push_bind(self.is_labeled).push("::BOOLEAN"),
            other => {
                return Err(BulkUpdateError::UnknownField {
                    table: Self::TABLE,
                    field: other.to_string(),
                });
            }
        };
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
