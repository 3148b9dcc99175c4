// Canonical change event model.
//
// `ChangeEvent` is the normalized record every adapter produces and every
// publisher consumes. It is immutable after construction: the builder
// enforces the before/after invariants up front rather than leaving callers
// to assemble a struct by hand and hope they got it right.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::common::{RowImage, SchemaName, SourceId, TableName};
use crate::error::{CdcError, Result};

pub mod offset;

/// The kind of row-level mutation a `ChangeEvent` represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    Insert,
    Update,
    Delete,
    BulkInsert,
    BulkUpdate,
    BulkDelete,
}

impl Operation {
    pub fn is_bulk(&self) -> bool {
        matches!(
            self,
            Operation::BulkInsert | Operation::BulkUpdate | Operation::BulkDelete
        )
    }
}

/// The canonical, immutable change record. `offset` uniquely identifies this
/// event within `source`; offsets for a single source are non-decreasing in
/// the order adapters emit them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub source: SourceId,
    pub schema: SchemaName,
    pub table: TableName,
    pub operation: Operation,
    pub timestamp_utc: SystemTime,
    pub offset: String,
    pub before: Option<RowImage>,
    pub after: Option<RowImage>,
    pub metadata: HashMap<String, String>,
}

impl ChangeEvent {
    pub fn builder(source: impl Into<String>, operation: Operation) -> ChangeEventBuilder {
        ChangeEventBuilder::new(source, operation)
    }

    /// Names of columns whose values differ between `before` and `after`,
    /// recomputed on demand rather than cached, since adapters populate
    /// `metadata["affected_columns"]` themselves when they can diff cheaply.
    pub fn modified_columns(&self) -> Vec<String> {
        crate::common::diff_row_images(self.before.as_ref(), self.after.as_ref())
            .into_iter()
            .filter(|c| c.modified)
            .map(|c| c.column_name)
            .collect()
    }
}

/// Builder enforcing spec invariants: INSERT has no `before`, DELETE has no
/// `after`, `source` is non-empty.
pub struct ChangeEventBuilder {
    source: String,
    schema: String,
    table: String,
    operation: Operation,
    timestamp_utc: Option<SystemTime>,
    offset: Option<String>,
    before: Option<RowImage>,
    after: Option<RowImage>,
    metadata: HashMap<String, String>,
}

impl ChangeEventBuilder {
    pub fn new(source: impl Into<String>, operation: Operation) -> Self {
        Self {
            source: source.into(),
            schema: String::new(),
            table: String::new(),
            operation,
            timestamp_utc: None,
            offset: None,
            before: None,
            after: None,
            metadata: HashMap::new(),
        }
    }

    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = schema.into();
        self
    }

    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    pub fn offset(mut self, offset: impl Into<String>) -> Self {
        self.offset = Some(offset.into());
        self
    }

    pub fn timestamp_utc(mut self, ts: SystemTime) -> Self {
        self.timestamp_utc = Some(ts);
        self
    }

    pub fn before(mut self, before: RowImage) -> Self {
        self.before = Some(before);
        self
    }

    pub fn after(mut self, after: RowImage) -> Self {
        self.after = Some(after);
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> Result<ChangeEvent> {
        if self.source.trim().is_empty() {
            return Err(CdcError::Validation("source must not be empty".into()));
        }
        let offset = self
            .offset
            .ok_or_else(|| CdcError::Validation("offset is required".into()))?;

        match self.operation {
            Operation::Insert | Operation::BulkInsert if self.before.is_some() => {
                return Err(CdcError::Validation(
                    "INSERT events must not carry a before image".into(),
                ));
            }
            Operation::Delete | Operation::BulkDelete if self.after.is_some() => {
                return Err(CdcError::Validation(
                    "DELETE events must not carry an after image".into(),
                ));
            }
            _ => {}
        }

        Ok(ChangeEvent {
            source: self.source,
            schema: self.schema,
            table: self.table,
            operation: self.operation,
            timestamp_utc: self.timestamp_utc.unwrap_or_else(SystemTime::now),
            offset,
            before: self.before,
            after: self.after,
            metadata: self.metadata,
        })
    }
}

/// A derived record summarizing N row changes made by one logical statement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkOperationEvent {
    pub source: SourceId,
    pub schema: SchemaName,
    pub table: TableName,
    pub operation: Operation,
    pub affected_row_count: u64,
    pub batch_id: String,
    pub transaction_id: Option<String>,
    pub execution_duration_ms: u64,
    pub sample_data: Vec<RowImage>,
    pub offset: String,
    pub timestamp_utc: SystemTime,
}

impl BulkOperationEvent {
    /// Convert to a `ChangeEvent` whose `after` image carries the bulk
    /// summary (row count, batch id, sample rows) rather than per-row data.
    pub fn into_change_event(self) -> Result<ChangeEvent> {
        let mut summary = RowImage::new();
        summary.insert(
            "affected_row_count".to_string(),
            crate::common::ColumnValue::Integer(self.affected_row_count as i64),
        );
        summary.insert(
            "batch_id".to_string(),
            crate::common::ColumnValue::Text(self.batch_id.clone()),
        );
        summary.insert(
            "sample_count".to_string(),
            crate::common::ColumnValue::Integer(self.sample_data.len() as i64),
        );

        let mut builder = ChangeEvent::builder(self.source, self.operation)
            .schema(self.schema)
            .table(self.table)
            .offset(self.offset)
            .timestamp_utc(self.timestamp_utc)
            .after(summary)
            .metadata("batch_id", self.batch_id)
            .metadata(
                "execution_duration_ms",
                self.execution_duration_ms.to_string(),
            );

        if let Some(txn_id) = self.transaction_id {
            builder = builder.metadata("transaction_id", txn_id);
        }

        builder.build()
    }
}

pub(crate) fn unix_millis(ts: SystemTime) -> u128 {
    ts.duration_since(UNIX_EPOCH).unwrap_or_default().as_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::ColumnValue;

    fn row(pairs: &[(&str, ColumnValue)]) -> RowImage {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn insert_rejects_before_image() {
        let err = ChangeEvent::builder("src-A", Operation::Insert)
            .offset("1")
            .before(row(&[("id", ColumnValue::Integer(1))]))
            .build()
            .unwrap_err();
        assert!(matches!(err, CdcError::Validation(_)));
    }

    #[test]
    fn delete_rejects_after_image() {
        let err = ChangeEvent::builder("src-A", Operation::Delete)
            .offset("1")
            .after(row(&[("id", ColumnValue::Integer(1))]))
            .build()
            .unwrap_err();
        assert!(matches!(err, CdcError::Validation(_)));
    }

    #[test]
    fn empty_source_is_rejected() {
        let err = ChangeEvent::builder("", Operation::Insert)
            .offset("1")
            .build()
            .unwrap_err();
        assert!(matches!(err, CdcError::Validation(_)));
    }

    #[test]
    fn update_reports_modified_columns() {
        let event = ChangeEvent::builder("src-A", Operation::Update)
            .schema("public")
            .table("users")
            .offset("2")
            .before(row(&[("id", ColumnValue::Integer(1)), ("name", ColumnValue::Text("Bob".into()))]))
            .after(row(&[("id", ColumnValue::Integer(1)), ("name", ColumnValue::Text("Robert".into()))]))
            .build()
            .unwrap();

        assert_eq!(event.modified_columns(), vec!["name".to_string()]);
    }

    #[test]
    fn bulk_event_converts_to_summary_change_event() {
        let bulk = BulkOperationEvent {
            source: "src-A".into(),
            schema: "public".into(),
            table: "users".into(),
            operation: Operation::BulkUpdate,
            affected_row_count: 500,
            batch_id: "batch-1".into(),
            transaction_id: Some("txn-1".into()),
            execution_duration_ms: 42,
            sample_data: vec![],
            offset: "99".into(),
            timestamp_utc: SystemTime::now(),
        };

        let event = bulk.into_change_event().unwrap();
        assert_eq!(event.operation, Operation::BulkUpdate);
        assert!(event.after.is_some());
        assert_eq!(event.metadata.get("batch_id").unwrap(), "batch-1");
    }
}
