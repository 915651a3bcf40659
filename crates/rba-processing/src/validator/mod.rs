//! Per-record structural and semantic checks.
//!
//! The validator is stateless: it turns a [`RawChunk`] into validated records
//! plus a list of rejections and never touches the codec or the scaler.
//!
//! Required fields that are missing or fail to coerce drop the record. Optional
//! fields fall back to a declared value instead:
//! - numeric: `0.0`
//! - flag: `false`
//! - categorical: the [`MISSING_CATEGORY`] token

mod coercion;

use crate::error::{PipelineError, Result};
use crate::schema::{ColumnKind, KeyRole, ResolvedColumn, ResolvedSchema};
use crate::types::{
    DropReason, FieldValue, RawChunk, RawRecord, RecordKey, RecordRejection, ValidatedRecord,
};
use coercion::{Coerced, coerce_category, coerce_flag, coerce_number, coerce_timestamp};
use tracing::debug;

/// Category substituted for a missing optional categorical field.
pub const MISSING_CATEGORY: &str = "Missing";

/// Output of validating one chunk.
#[derive(Debug, Clone, Default)]
pub struct ValidationOutcome {
    /// Valid records, in source order.
    pub records: Vec<ValidatedRecord>,
    pub rejections: Vec<RecordRejection>,
    /// Optional fields replaced by their fallback.
    pub fallbacks: u64,
}

impl ValidationOutcome {
    pub fn dropped(&self) -> u64 {
        self.rejections.len() as u64
    }

    fn extend(&mut self, other: ValidationOutcome) {
        self.records.extend(other.records);
        self.rejections.extend(other.rejections);
        self.fallbacks += other.fallbacks;
    }
}

/// Checks and coerces raw records against a resolved schema.
pub struct RecordValidator<'a> {
    schema: &'a ResolvedSchema,
    timestamp_format: &'a str,
}

impl<'a> RecordValidator<'a> {
    pub fn new(schema: &'a ResolvedSchema, timestamp_format: &'a str) -> Self {
        Self {
            schema,
            timestamp_format,
        }
    }

    /// Validate every record of a chunk in order.
    pub fn validate(&self, chunk: &RawChunk) -> ValidationOutcome {
        self.validate_records(&chunk.records)
    }

    /// Validate a chunk on up to `workers` threads.
    ///
    /// The chunk is split into contiguous slices and the partial results are
    /// concatenated in slice order, so the outcome equals [`Self::validate`].
    pub fn validate_parallel(&self, chunk: &RawChunk, workers: usize) -> Result<ValidationOutcome> {
        if workers <= 1 || chunk.len() < 2 {
            return Ok(self.validate(chunk));
        }

        let slice_len = chunk.len().div_ceil(workers);
        std::thread::scope(|scope| {
            let handles: Vec<_> = chunk
                .records
                .chunks(slice_len)
                .map(|slice| scope.spawn(move || self.validate_records(slice)))
                .collect();

            let mut outcome = ValidationOutcome::default();
            for handle in handles {
                let part = handle.join().map_err(|_| {
                    PipelineError::Internal("validation worker panicked".to_string())
                })?;
                outcome.extend(part);
            }
            Ok(outcome)
        })
    }

    fn validate_records(&self, records: &[RawRecord]) -> ValidationOutcome {
        let mut outcome = ValidationOutcome {
            records: Vec::with_capacity(records.len()),
            ..Default::default()
        };

        for raw in records {
            match self.validate_record(raw, &mut outcome.fallbacks) {
                Ok(record) => outcome.records.push(record),
                Err(rejection) => {
                    debug!(
                        "Dropping row {} {}: {} ({})",
                        rejection.row,
                        rejection.key,
                        rejection.reason,
                        rejection.column.as_deref().unwrap_or("record")
                    );
                    outcome.rejections.push(rejection);
                }
            }
        }

        outcome
    }

    /// Validate a single record. Fallback substitutions are added to `fallbacks`
    /// only when the record is kept.
    pub fn validate_record(
        &self,
        raw: &RawRecord,
        fallbacks: &mut u64,
    ) -> std::result::Result<ValidatedRecord, RecordRejection> {
        let key = self.key_of(raw);

        if raw.fields.len() != self.schema.header_len() {
            return Err(RecordRejection {
                row: raw.row,
                reason: DropReason::FieldCount,
                column: None,
                key,
            });
        }

        let mut values = Vec::with_capacity(self.schema.columns().len());
        let mut record_fallbacks = 0u64;

        for column in self.schema.columns() {
            let field = raw.fields.get(column.position).unwrap_or("");
            let value = match self.coerce_field(column, field) {
                Ok(FieldOutcome::Value(value)) => value,
                Ok(FieldOutcome::Fallback(value)) => {
                    record_fallbacks += 1;
                    value
                }
                Err(reason) => {
                    return Err(RecordRejection {
                        row: raw.row,
                        reason,
                        column: Some(column.spec.name.clone()),
                        key,
                    });
                }
            };
            values.push(value);
        }

        *fallbacks += record_fallbacks;
        Ok(ValidatedRecord {
            row: raw.row,
            key,
            values,
        })
    }

    fn coerce_field(
        &self,
        column: &ResolvedColumn,
        field: &str,
    ) -> std::result::Result<FieldOutcome, DropReason> {
        let required = column.spec.required;

        match column.spec.kind {
            ColumnKind::Timestamp => match coerce_timestamp(field, self.timestamp_format) {
                Coerced::Value(ts) => Ok(FieldOutcome::Value(FieldValue::Instant(ts))),
                Coerced::Missing if required => Err(DropReason::MissingField),
                Coerced::Malformed if required => Err(DropReason::UnparseableTimestamp),
                // Ordering matters downstream, so even optional timestamps never get a fill value.
                Coerced::Missing | Coerced::Malformed => Err(DropReason::UnparseableTimestamp),
            },
            ColumnKind::Numeric { .. } => match coerce_number(field) {
                Coerced::Value(v) => Ok(FieldOutcome::Value(FieldValue::Number(v))),
                Coerced::Missing if required => Err(DropReason::MissingField),
                Coerced::Malformed if required => Err(DropReason::MalformedNumber),
                Coerced::Missing | Coerced::Malformed => {
                    Ok(FieldOutcome::Fallback(FieldValue::Number(0.0)))
                }
            },
            ColumnKind::Categorical => match coerce_category(field) {
                Coerced::Value(v) => Ok(FieldOutcome::Value(FieldValue::Category(v))),
                _ if required => Err(DropReason::MissingField),
                _ => Ok(FieldOutcome::Fallback(FieldValue::Category(
                    MISSING_CATEGORY.to_string(),
                ))),
            },
            ColumnKind::Flag => match coerce_flag(field) {
                Coerced::Value(v) => Ok(FieldOutcome::Value(FieldValue::Flag(v))),
                Coerced::Missing if required => Err(DropReason::MissingField),
                Coerced::Malformed if required => Err(DropReason::MalformedFlag),
                Coerced::Missing | Coerced::Malformed => {
                    Ok(FieldOutcome::Fallback(FieldValue::Flag(false)))
                }
            },
            ColumnKind::Text => {
                if required && field.trim().is_empty() {
                    Err(DropReason::MissingField)
                } else {
                    Ok(FieldOutcome::Value(FieldValue::Omitted))
                }
            }
        }
    }

    fn key_of(&self, raw: &RawRecord) -> RecordKey {
        let field = |role: KeyRole| {
            self.schema
                .role_position(role)
                .and_then(|position| raw.fields.get(position))
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        RecordKey {
            user: field(KeyRole::User),
            timestamp: field(KeyRole::Timestamp),
            address: field(KeyRole::Address),
        }
    }
}

enum FieldOutcome {
    Value(FieldValue),
    Fallback(FieldValue),
}

static_assertions::assert_impl_all!(RecordValidator<'static>: Send, Sync);
