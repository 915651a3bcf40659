use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

// ============================================================================
// Record Types (transient, live for one chunk)
// ============================================================================

/// One source row as read, before any coercion.
#[derive(Debug, Clone)]
pub struct RawRecord {
    /// 0-based data row number in the source (header excluded).
    pub row: u64,
    /// Byte offset of the row in the source.
    pub byte_offset: u64,
    pub fields: csv::StringRecord,
}

/// A bounded, contiguous slice of source rows.
#[derive(Debug, Clone, Default)]
pub struct RawChunk {
    /// 0-based chunk number within the pass.
    pub index: u64,
    /// Byte offset of the first row.
    pub byte_offset: u64,
    /// Byte offset just past the last row.
    pub end_offset: u64,
    pub records: Vec<RawRecord>,
}

impl RawChunk {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Identity of a login event, kept for traceability only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordKey {
    pub user: Option<String>,
    pub timestamp: Option<String>,
    pub address: Option<String>,
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "(user={}, timestamp={}, ip={})",
            self.user.as_deref().unwrap_or("?"),
            self.timestamp.as_deref().unwrap_or("?"),
            self.address.as_deref().unwrap_or("?")
        )
    }
}

/// A coerced field of a [`ValidatedRecord`].
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Instant(DateTime<Utc>),
    Number(f64),
    Category(String),
    Flag(bool),
    /// Text columns are checked for presence and then discarded.
    Omitted,
}

/// A record whose required fields are present and parseable.
///
/// `values` is aligned with the resolved schema columns.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedRecord {
    pub row: u64,
    pub key: RecordKey,
    pub values: Vec<FieldValue>,
}

/// Why a record was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    MissingField,
    UnparseableTimestamp,
    MalformedNumber,
    MalformedFlag,
    FieldCount,
}

impl DropReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingField => "missing_field",
            Self::UnparseableTimestamp => "unparseable_timestamp",
            Self::MalformedNumber => "malformed_number",
            Self::MalformedFlag => "malformed_flag",
            Self::FieldCount => "field_count",
        }
    }
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A dropped record and the column that caused it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordRejection {
    pub row: u64,
    pub reason: DropReason,
    /// `None` for structural failures such as a wrong field count.
    pub column: Option<String>,
    pub key: RecordKey,
}

/// An output value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FeatureValue {
    Integer(i64),
    Float(f64),
    Flag(bool),
}

/// A record ready to be written, aligned with the output columns.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedRecord {
    pub row: u64,
    pub values: Vec<FeatureValue>,
}

/// Processed records of one chunk, in source order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessedChunk {
    pub index: u64,
    pub records: Vec<ProcessedRecord>,
}

impl ProcessedChunk {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

// ============================================================================
// Run Accounting
// ============================================================================

/// Counters aggregated across the chunks of one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounters {
    pub records_read: u64,
    pub records_written: u64,
    pub records_dropped: u64,
    /// Drops keyed by [`DropReason::as_str`].
    pub dropped_by_reason: BTreeMap<String, u64>,
    /// Drops keyed by the offending column.
    pub dropped_by_column: BTreeMap<String, u64>,
    /// Optional fields replaced by their declared fallback.
    pub optional_fallbacks: u64,
    /// Categories mapped to the reserved unknown code.
    pub unknown_categories: u64,
    pub chunks: u64,
}

impl RunCounters {
    /// Count a dropped record.
    pub fn record_drop(&mut self, rejection: &RecordRejection) {
        self.records_dropped += 1;
        *self
            .dropped_by_reason
            .entry(rejection.reason.as_str().to_string())
            .or_insert(0) += 1;
        if let Some(column) = &rejection.column {
            *self.dropped_by_column.entry(column.clone()).or_insert(0) += 1;
        }
    }
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// At least one record was written.
    Completed,
    /// Every record was dropped; no output artifact was produced.
    Empty,
}

/// Whether the codec and scaler were trained by this run or imported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    Fit,
    Apply,
}

/// Statistics of a scaled numeric column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnStats {
    pub name: String,
    pub count: u64,
    pub mean: f64,
    pub std: f64,
}

/// Result of a pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub status: RunStatus,
    pub mode: RunMode,
    /// Number of passes over the source.
    pub passes: u8,
    /// Whether the run continued from a checkpoint.
    pub resumed: bool,
    /// Counters of the pass that wrote the output.
    pub counters: RunCounters,
    /// Output columns in write order.
    pub columns: Vec<String>,
    pub column_stats: Vec<ColumnStats>,
    /// Number of distinct codes per categorical column.
    pub category_cardinality: BTreeMap<String, usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_path: Option<PathBuf>,
    pub duration_ms: u64,
}

impl RunSummary {
    pub fn records_written(&self) -> u64 {
        self.counters.records_written
    }

    pub fn records_dropped(&self) -> u64 {
        self.counters.records_dropped
    }

    pub fn is_empty(&self) -> bool {
        self.status == RunStatus::Empty
    }

    /// Percentage of read records that were dropped.
    pub fn dropped_percentage(&self) -> f64 {
        if self.counters.records_read == 0 {
            0.0
        } else {
            self.counters.records_dropped as f64 / self.counters.records_read as f64 * 100.0
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn rejection(reason: DropReason, column: Option<&str>) -> RecordRejection {
        RecordRejection {
            row: 0,
            reason,
            column: column.map(str::to_string),
            key: RecordKey::default(),
        }
    }

    #[test]
    fn test_record_drop_counts() {
        let mut counters = RunCounters::default();
        counters.record_drop(&rejection(DropReason::MissingField, Some("User ID")));
        counters.record_drop(&rejection(DropReason::MissingField, Some("Country")));
        counters.record_drop(&rejection(DropReason::FieldCount, None));

        assert_eq!(counters.records_dropped, 3);
        assert_eq!(counters.dropped_by_reason["missing_field"], 2);
        assert_eq!(counters.dropped_by_reason["field_count"], 1);
        assert_eq!(counters.dropped_by_column["User ID"], 1);
        assert_eq!(counters.dropped_by_column.len(), 2);
    }

    #[test]
    fn test_record_key_display() {
        let key = RecordKey {
            user: Some("-4324475583306591935".to_string()),
            timestamp: None,
            address: Some("10.0.65.171".to_string()),
        };
        assert_eq!(
            key.to_string(),
            "(user=-4324475583306591935, timestamp=?, ip=10.0.65.171)"
        );
    }

    #[test]
    fn test_drop_reason_serialization() {
        let json = serde_json::to_string(&DropReason::UnparseableTimestamp).unwrap();
        assert_eq!(json, "\"unparseable_timestamp\"");
    }

    #[test]
    fn test_dropped_percentage() {
        let summary = RunSummary {
            status: RunStatus::Completed,
            mode: RunMode::Fit,
            passes: 2,
            resumed: false,
            counters: RunCounters {
                records_read: 5,
                records_written: 4,
                records_dropped: 1,
                ..Default::default()
            },
            columns: Vec::new(),
            column_stats: Vec::new(),
            category_cardinality: BTreeMap::new(),
            output_path: None,
            artifact_path: None,
            duration_ms: 0,
        };
        assert!((summary.dropped_percentage() - 20.0).abs() < 1e-9);
        assert!(!summary.is_empty());
    }
}
