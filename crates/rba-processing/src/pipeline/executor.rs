//! Chunk execution: encoding and scaling of validated records.
//!
//! Codec and scaler are only touched here, on the pipeline thread, one chunk at
//! a time and in source order. Within a chunk every column is encoded in row
//! order, which gives the same codes as observing record by record.

use crate::encoding::CategoryCodec;
use crate::error::{PipelineError, Result};
use crate::scaling::RunningScaler;
use crate::schema::{ColumnKind, ResolvedColumn, ResolvedSchema};
use crate::types::{FeatureValue, FieldValue, ProcessedChunk, ProcessedRecord, ValidatedRecord};
use tracing::debug;

/// Encodes validated chunks against a resolved schema.
pub struct ChunkProcessor<'a> {
    schema: &'a ResolvedSchema,
}

impl<'a> ChunkProcessor<'a> {
    pub fn new(schema: &'a ResolvedSchema) -> Self {
        Self { schema }
    }

    /// Fit step: assign codes to new categories and accumulate scaled columns.
    ///
    /// Numbers are emitted as read; they are only normalized by [`Self::transform`].
    /// The returned chunk is empty unless `emit` is set.
    pub fn fit(
        &self,
        index: u64,
        records: &[ValidatedRecord],
        codec: &mut CategoryCodec,
        scaler: &mut RunningScaler,
        emit: bool,
    ) -> Result<ProcessedChunk> {
        let mut output = Vec::new();

        for (position, column) in self.emitted() {
            let name = column.spec.name.as_str();
            let values = match column.spec.kind {
                ColumnKind::Categorical => {
                    let raw = categories(records, position, name)?;
                    codec
                        .encode(name, &raw)
                        .into_iter()
                        .map(FeatureValue::Integer)
                        .collect()
                }
                ColumnKind::Numeric { scale } => {
                    let raw = numbers(records, position, name)?;
                    if scale {
                        scaler.update(name, &raw);
                    }
                    raw.into_iter().map(FeatureValue::Float).collect()
                }
                _ => passthrough(records, position, column)?,
            };
            if emit {
                output.push(values);
            }
        }

        if !emit {
            return Ok(ProcessedChunk {
                index,
                records: Vec::new(),
            });
        }
        assemble(index, records, output)
    }

    /// Transform step: frozen codes and, when `scaler` is given, normalized numbers.
    ///
    /// Returns the chunk and the number of categories mapped to the unknown code.
    pub fn transform(
        &self,
        index: u64,
        records: &[ValidatedRecord],
        codec: &CategoryCodec,
        scaler: Option<&RunningScaler>,
    ) -> Result<(ProcessedChunk, u64)> {
        let mut output = Vec::new();
        let mut unknown = 0u64;

        for (position, column) in self.emitted() {
            let name = column.spec.name.as_str();
            let values = match column.spec.kind {
                ColumnKind::Categorical => {
                    let raw = categories(records, position, name)?;
                    let (codes, misses) = codec.apply(name, &raw);
                    if misses > 0 {
                        debug!("{} unseen categories in '{}' (chunk {})", misses, name, index);
                    }
                    unknown += misses;
                    codes.into_iter().map(FeatureValue::Integer).collect()
                }
                ColumnKind::Numeric { scale } => {
                    let raw = numbers(records, position, name)?;
                    let values = match scaler {
                        Some(scaler) if scale => scaler.normalize(name, &raw)?,
                        _ => raw,
                    };
                    values.into_iter().map(FeatureValue::Float).collect()
                }
                _ => passthrough(records, position, column)?,
            };
            output.push(values);
        }

        Ok((assemble(index, records, output)?, unknown))
    }

    /// Emitted columns with their index in [`ValidatedRecord::values`].
    fn emitted(&self) -> impl Iterator<Item = (usize, &'a ResolvedColumn)> + 'a {
        self.schema
            .columns()
            .iter()
            .enumerate()
            .filter(|(_, column)| column.spec.emit)
    }
}

fn categories<'r>(
    records: &'r [ValidatedRecord],
    position: usize,
    column: &str,
) -> Result<Vec<&'r str>> {
    records
        .iter()
        .map(|record| match record.values.get(position) {
            Some(FieldValue::Category(value)) => Ok(value.as_str()),
            other => Err(unexpected(column, record, other)),
        })
        .collect()
}

fn numbers(records: &[ValidatedRecord], position: usize, column: &str) -> Result<Vec<f64>> {
    records
        .iter()
        .map(|record| match record.values.get(position) {
            Some(FieldValue::Number(value)) => Ok(*value),
            other => Err(unexpected(column, record, other)),
        })
        .collect()
}

/// Timestamps as epoch milliseconds and flags as-is.
fn passthrough(
    records: &[ValidatedRecord],
    position: usize,
    column: &ResolvedColumn,
) -> Result<Vec<FeatureValue>> {
    let name = column.spec.name.as_str();
    records
        .iter()
        .map(|record| match record.values.get(position) {
            Some(FieldValue::Instant(ts)) => Ok(FeatureValue::Integer(ts.timestamp_millis())),
            Some(FieldValue::Flag(flag)) => Ok(FeatureValue::Flag(*flag)),
            other => Err(unexpected(name, record, other)),
        })
        .collect()
}

fn unexpected(column: &str, record: &ValidatedRecord, value: Option<&FieldValue>) -> PipelineError {
    PipelineError::Internal(format!(
        "row {} has {:?} in column '{}'",
        record.row, value, column
    ))
}

/// Turn column vectors back into rows.
fn assemble(
    index: u64,
    records: &[ValidatedRecord],
    columns: Vec<Vec<FeatureValue>>,
) -> Result<ProcessedChunk> {
    if let Some(column) = columns.iter().find(|c| c.len() != records.len()) {
        return Err(PipelineError::Internal(format!(
            "column has {} values for {} records",
            column.len(),
            records.len()
        )));
    }

    let processed = records
        .iter()
        .enumerate()
        .map(|(i, record)| ProcessedRecord {
            row: record.row,
            values: columns.iter().map(|column| column[i]).collect(),
        })
        .collect();

    Ok(ProcessedChunk {
        index,
        records: processed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::UNKNOWN_CODE;
    use crate::schema::{ColumnSpec, KeyRole, Schema};
    use crate::types::RecordKey;
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;

    fn schema() -> ResolvedSchema {
        let schema = Schema::new(vec![
            ColumnSpec::timestamp("Login Timestamp")
                .required()
                .role(KeyRole::Timestamp),
            ColumnSpec::numeric("Round-Trip Time [ms]", true).required(),
            ColumnSpec::text("IP Address").required(),
            ColumnSpec::categorical("Country").required(),
            ColumnSpec::flag("Is Attack IP"),
        ])
        .unwrap();
        let header: Vec<String> = ["Login Timestamp", "Round-Trip Time [ms]", "IP Address", "Country", "Is Attack IP"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        schema.resolve(&header).unwrap()
    }

    fn record(row: u64, rtt: f64, country: &str, attack: bool) -> ValidatedRecord {
        ValidatedRecord {
            row,
            key: RecordKey::default(),
            values: vec![
                FieldValue::Instant(
                    Utc.timestamp_millis_opt(1_580_733_810_772 + row as i64 * 50)
                        .unwrap(),
                ),
                FieldValue::Number(rtt),
                FieldValue::Omitted,
                FieldValue::Category(country.to_string()),
                FieldValue::Flag(attack),
            ],
        }
    }

    fn records() -> Vec<ValidatedRecord> {
        vec![
            record(0, 100.0, "US", false),
            record(1, 200.0, "US", false),
            record(2, 300.0, "FR", true),
            record(3, 400.0, "US", false),
            record(4, 500.0, "JP", false),
        ]
    }

    #[test]
    fn test_fit_assigns_codes_and_accumulates() {
        let schema = schema();
        let processor = ChunkProcessor::new(&schema);
        let mut codec = CategoryCodec::new();
        let mut scaler = RunningScaler::new();

        let chunk = processor
            .fit(0, &records(), &mut codec, &mut scaler, true)
            .unwrap();

        let countries: Vec<FeatureValue> = chunk.records.iter().map(|r| r.values[2]).collect();
        assert_eq!(
            countries,
            [0, 0, 1, 0, 2].map(FeatureValue::Integer).to_vec()
        );
        assert_eq!(chunk.records[0].values[0], FeatureValue::Integer(1_580_733_810_772));
        assert_eq!(chunk.records[0].values[1], FeatureValue::Float(100.0));
        assert_eq!(chunk.records[2].values[3], FeatureValue::Flag(true));
        assert_eq!(scaler.mean_of("Round-Trip Time [ms]").unwrap(), 300.0);
    }

    #[test]
    fn test_timestamps_keep_sub_second_order() {
        let schema = schema();
        let processor = ChunkProcessor::new(&schema);
        let mut codec = CategoryCodec::new();
        let mut scaler = RunningScaler::new();

        // All five records fall within the same second.
        let chunk = processor
            .fit(0, &records(), &mut codec, &mut scaler, true)
            .unwrap();

        let stamps: Vec<FeatureValue> = chunk.records.iter().map(|r| r.values[0]).collect();
        assert_eq!(
            stamps,
            [
                1_580_733_810_772,
                1_580_733_810_822,
                1_580_733_810_872,
                1_580_733_810_922,
                1_580_733_810_972
            ]
            .map(FeatureValue::Integer)
            .to_vec()
        );
    }

    #[test]
    fn test_fit_without_emit_returns_empty_chunk() {
        let schema = schema();
        let processor = ChunkProcessor::new(&schema);
        let mut codec = CategoryCodec::new();
        let mut scaler = RunningScaler::new();

        let chunk = processor
            .fit(7, &records(), &mut codec, &mut scaler, false)
            .unwrap();
        assert!(chunk.is_empty());
        assert_eq!(chunk.index, 7);
        assert_eq!(codec.cardinality("Country").unwrap(), 3);
    }

    #[test]
    fn test_transform_normalizes_with_global_stats() {
        let schema = schema();
        let processor = ChunkProcessor::new(&schema);
        let mut codec = CategoryCodec::new();
        let mut scaler = RunningScaler::new();
        let all = records();
        for chunk in all.chunks(2) {
            processor.fit(0, chunk, &mut codec, &mut scaler, false).unwrap();
        }

        let (chunk, unknown) = processor
            .transform(0, &all[4..], &codec, Some(&scaler))
            .unwrap();

        let std = scaler.std_of("Round-Trip Time [ms]").unwrap();
        assert_eq!(unknown, 0);
        assert_eq!(chunk.records[0].values[1], FeatureValue::Float(200.0 / std));
        assert_eq!(chunk.records[0].values[2], FeatureValue::Integer(2));
    }

    #[test]
    fn test_transform_maps_unseen_category_to_unknown() {
        let schema = schema();
        let processor = ChunkProcessor::new(&schema);
        let mut codec = CategoryCodec::new();
        codec.encode("Country", &["US", "FR", "JP"]);

        let (chunk, unknown) = processor
            .transform(0, &[record(0, 1.0, "DE", false)], &codec, None)
            .unwrap();

        assert_eq!(unknown, 1);
        assert_eq!(chunk.records[0].values[2], FeatureValue::Integer(UNKNOWN_CODE));
        // no scaler: numbers pass through
        assert_eq!(chunk.records[0].values[1], FeatureValue::Float(1.0));
        assert_eq!(codec.cardinality("Country").unwrap(), 3);
    }

    #[test]
    fn test_misaligned_record_is_internal_error() {
        let schema = schema();
        let processor = ChunkProcessor::new(&schema);
        let mut bad = record(9, 1.0, "US", false);
        bad.values.truncate(2);

        let result = processor.transform(0, &[bad], &CategoryCodec::new(), None);
        assert!(matches!(result, Err(PipelineError::Internal(_))));
    }
}
