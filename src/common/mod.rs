// Shared types used across the pipeline: opaque identifiers, the row-value
// enum backing RowImage, component lifecycle traits, and bounded collections.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Opaque logical identifier for a source database/stream.
pub type SourceId = String;

/// Namespace within a source (database schema).
pub type SchemaName = String;

/// Table name within a schema.
pub type TableName = String;

/// Source-side transaction identifier, opaque to the core.
pub type TransactionId = String;

/// Tenant identifier for throttling and multi-tenant admission control.
pub type TenantId = String;

/// A single column value in a row image. Intentionally closed and small —
/// the core event model carries no business typing, only this opaque shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ColumnValue {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    Timestamp(i64),
}

impl PartialEq for ColumnValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ColumnValue::Null, ColumnValue::Null) => true,
            (ColumnValue::Bool(a), ColumnValue::Bool(b)) => a == b,
            (ColumnValue::Integer(a), ColumnValue::Integer(b)) => a == b,
            (ColumnValue::Float(a), ColumnValue::Float(b)) => a.to_bits() == b.to_bits(),
            (ColumnValue::Text(a), ColumnValue::Text(b)) => a == b,
            (ColumnValue::Bytes(a), ColumnValue::Bytes(b)) => a == b,
            (ColumnValue::Timestamp(a), ColumnValue::Timestamp(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for ColumnValue {}

/// An ordered row image: column name -> value. `BTreeMap` keeps column order
/// stable for checksum and content-hash purposes.
pub type RowImage = BTreeMap<String, ColumnValue>;

/// Diff between an old and new value for one column, used by adapters that
/// can compute column-level changes from before/after images.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnChange {
    pub column_name: String,
    pub old_value: Option<ColumnValue>,
    pub new_value: Option<ColumnValue>,
    pub modified: bool,
}

/// Diff two row images into per-column changes, used to populate the
/// `affected_columns` metadata entry on UPDATE events.
pub fn diff_row_images(before: Option<&RowImage>, after: Option<&RowImage>) -> Vec<ColumnChange> {
    let mut columns: Vec<&String> = Vec::new();
    if let Some(b) = before {
        columns.extend(b.keys());
    }
    if let Some(a) = after {
        for k in a.keys() {
            if !columns.contains(&k) {
                columns.push(k);
            }
        }
    }

    columns
        .into_iter()
        .map(|col| {
            let old_value = before.and_then(|b| b.get(col).cloned());
            let new_value = after.and_then(|a| a.get(col).cloned());
            let modified = old_value != new_value;
            ColumnChange {
                column_name: col.clone(),
                old_value,
                new_value,
                modified,
            }
        })
        .collect()
}

/// Health status of a component, used by adapters, publishers, and the
/// aggregate health report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Unknown,
}

impl PartialOrd for HealthStatus {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HealthStatus {
    fn cmp(&self, other: &Self) -> Ordering {
        fn rank(s: &HealthStatus) -> u8 {
            match s {
                HealthStatus::Healthy => 0,
                HealthStatus::Unknown => 1,
                HealthStatus::Degraded => 2,
                HealthStatus::Unhealthy => 3,
            }
        }
        rank(self).cmp(&rank(other))
    }
}

/// A value produced by `Monitorable::collect_metrics`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MetricValue {
    Counter(u64),
    Gauge(f64),
    Histogram(Vec<f64>),
}

/// Base lifecycle trait for long-running components (adapters, publishers,
/// managers). Mirrors the lifecycle contract used throughout the pipeline:
/// initialize once, run, shut down cooperatively, report health on demand.
pub trait Component: Send + Sync {
    fn health_check(&self) -> HealthStatus;
}

/// Bounded HashMap with LRU eviction for memory-safe collections.
pub mod bounded_map;
pub use bounded_map::BoundedHashMap;
