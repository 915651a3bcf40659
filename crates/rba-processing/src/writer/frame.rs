use crate::error::{PipelineError, Result};
use crate::schema::{OutputColumn, OutputType};
use crate::types::{FeatureValue, ProcessedChunk};
use polars::prelude::*;

/// Materialize a processed chunk as a `DataFrame` with one typed column per
/// output column: integers as `i64`, floats as `f64`, flags as `0`/`1` `i32`.
pub fn chunk_to_frame(columns: &[OutputColumn], chunk: &ProcessedChunk) -> Result<DataFrame> {
    let height = chunk.len();
    let mut frame_columns = Vec::with_capacity(columns.len());

    for (position, column) in columns.iter().enumerate() {
        let values = chunk.records.iter().map(|record| {
            record.values.get(position).copied().ok_or_else(|| {
                PipelineError::Internal(format!(
                    "row {} has {} values, expected {}",
                    record.row,
                    record.values.len(),
                    columns.len()
                ))
            })
        });

        let series = match column.output_type {
            OutputType::Integer => {
                let mut out = Vec::with_capacity(height);
                for value in values {
                    match value? {
                        FeatureValue::Integer(v) => out.push(v),
                        other => return Err(type_mismatch(column, other)),
                    }
                }
                Series::new(column.name.as_str().into(), out)
            }
            OutputType::Float => {
                let mut out = Vec::with_capacity(height);
                for value in values {
                    match value? {
                        FeatureValue::Float(v) => out.push(v),
                        other => return Err(type_mismatch(column, other)),
                    }
                }
                Series::new(column.name.as_str().into(), out)
            }
            OutputType::Flag => {
                let mut out = Vec::with_capacity(height);
                for value in values {
                    match value? {
                        FeatureValue::Flag(v) => out.push(v as i32),
                        other => return Err(type_mismatch(column, other)),
                    }
                }
                Series::new(column.name.as_str().into(), out)
            }
        };
        frame_columns.push(Column::from(series));
    }

    Ok(DataFrame::new(frame_columns)?)
}

fn type_mismatch(column: &OutputColumn, value: FeatureValue) -> PipelineError {
    PipelineError::Internal(format!(
        "column '{}' expects {:?} values, got {:?}",
        column.name, column.output_type, value
    ))
}
