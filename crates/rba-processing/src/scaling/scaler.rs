use super::welford::WelfordAccumulator;
use crate::error::{PipelineError, Result};
use crate::types::ColumnStats;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Exported scaler: the accumulator of each column.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScalerState {
    pub columns: BTreeMap<String, WelfordAccumulator>,
}

/// Per-column running statistics over the whole stream.
///
/// `normalize` uses whatever has been accumulated so far, so callers must finish
/// accumulating over the full source before normalizing anything that is written.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ScalerState", into = "ScalerState")]
pub struct RunningScaler {
    columns: BTreeMap<String, WelfordAccumulator>,
}

impl RunningScaler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scaler with an empty accumulator for each column.
    pub fn with_columns<'a>(columns: impl IntoIterator<Item = &'a str>) -> Self {
        let mut scaler = Self::new();
        for column in columns {
            scaler.columns.entry(column.to_string()).or_default();
        }
        scaler
    }

    /// Accumulate a sequence of values for `column`.
    pub fn update(&mut self, column: &str, values: &[f64]) {
        let acc = self.columns.entry(column.to_string()).or_default();
        for &value in values {
            acc.push(value);
        }
    }

    /// Accumulate a single value.
    pub fn push(&mut self, column: &str, value: f64) {
        match self.columns.get_mut(column) {
            Some(acc) => acc.push(value),
            None => self
                .columns
                .entry(column.to_string())
                .or_default()
                .push(value),
        }
    }

    fn accumulator(&self, column: &str) -> Result<&WelfordAccumulator> {
        self.columns
            .get(column)
            .ok_or_else(|| PipelineError::ColumnNotFound(column.to_string()))
    }

    pub fn mean_of(&self, column: &str) -> Result<f64> {
        Ok(self.accumulator(column)?.mean)
    }

    /// Population standard deviation of `column`.
    pub fn std_of(&self, column: &str) -> Result<f64> {
        Ok(self.accumulator(column)?.std())
    }

    pub fn count_of(&self, column: &str) -> Result<u64> {
        Ok(self.accumulator(column)?.count)
    }

    /// `(value - mean) / std`, with a divisor of 1 when `count <= 1` or `std == 0`.
    pub fn normalize(&self, column: &str, values: &[f64]) -> Result<Vec<f64>> {
        let acc = self.accumulator(column)?;
        let divisor = acc.divisor();
        Ok(values.iter().map(|v| (v - acc.mean) / divisor).collect())
    }

    pub fn normalize_value(&self, column: &str, value: f64) -> Result<f64> {
        let acc = self.accumulator(column)?;
        Ok((value - acc.mean) / acc.divisor())
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.columns.contains_key(column)
    }

    /// Per-column statistics for reporting.
    pub fn stats(&self) -> Vec<ColumnStats> {
        self.columns
            .iter()
            .map(|(name, acc)| ColumnStats {
                name: name.clone(),
                count: acc.count,
                mean: acc.mean,
                std: acc.std(),
            })
            .collect()
    }

    pub fn export(&self) -> ScalerState {
        ScalerState {
            columns: self.columns.clone(),
        }
    }

    /// Rebuild a scaler from exported state. Non-finite or negative state is rejected.
    pub fn import(state: ScalerState) -> Result<Self> {
        if let Some((name, _)) = state.columns.iter().find(|(_, acc)| !acc.is_consistent()) {
            return Err(PipelineError::ArtifactMismatch(format!(
                "scaler state for '{}' is not finite",
                name
            )));
        }
        Ok(Self {
            columns: state.columns,
        })
    }
}

impl TryFrom<ScalerState> for RunningScaler {
    type Error = PipelineError;

    fn try_from(state: ScalerState) -> Result<Self> {
        Self::import(state)
    }
}

impl From<RunningScaler> for ScalerState {
    fn from(scaler: RunningScaler) -> Self {
        Self {
            columns: scaler.columns,
        }
    }
}
