use crate::error::{PipelineError, Result};
use crate::types::{RunStatus, RunSummary};
use chrono::Local;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

/// Report of a single pipeline run, for CLI and library output.
///
/// Use this for both JSON output (`--json`) and file writing (`--report`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// Timestamp when the report was generated
    pub generated_at: String,
    /// Description of the source (file path or in-memory name)
    pub input_file: String,
    /// Path of the committed output, if any rows were written
    pub output_file: Option<String>,
    /// Path of the exported feature artifact
    pub artifact_file: Option<String>,
    pub summary: RunSummary,
    /// Notable conditions worth a second look
    pub warnings: Vec<String>,
}

impl RunReport {
    pub fn new(input_file: impl Into<String>, summary: RunSummary) -> Self {
        let warnings = collect_warnings(&summary);
        Self {
            generated_at: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            input_file: input_file.into(),
            output_file: path_string(summary.output_path.as_deref()),
            artifact_file: path_string(summary.artifact_path.as_deref()),
            summary,
            warnings,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Write the report as pretty JSON, creating parent directories.
    pub fn write_to_file(&self, path: impl AsRef<Path>) -> Result<PathBuf> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|e| PipelineError::write(parent, e))?;
        }

        let mut file = File::create(path).map_err(|e| PipelineError::write(path, e))?;
        file.write_all(self.to_json()?.as_bytes())
            .map_err(|e| PipelineError::write(path, e))?;

        info!("Report saved: {}", path.display());
        Ok(path.to_path_buf())
    }
}

fn path_string(path: Option<&Path>) -> Option<String> {
    path.map(|p| p.display().to_string())
}

fn collect_warnings(summary: &RunSummary) -> Vec<String> {
    let mut warnings = Vec::new();
    let counters = &summary.counters;

    if summary.status == RunStatus::Empty {
        warnings.push("Every record was dropped; no output file was written".to_string());
    }
    if counters.records_dropped > 0
        && let Some((reason, count)) = counters.dropped_by_reason.iter().max_by_key(|(_, c)| **c)
    {
        warnings.push(format!(
            "{} records dropped ({:.1}%), mostly {} ({})",
            counters.records_dropped,
            summary.dropped_percentage(),
            reason,
            count
        ));
    }
    if counters.unknown_categories > 0 {
        warnings.push(format!(
            "{} categories were not in the imported codec and were encoded as unknown",
            counters.unknown_categories
        ));
    }
    for stats in summary.column_stats.iter().filter(|s| s.count > 1 && s.std == 0.0) {
        warnings.push(format!(
            "'{}' is constant ({}), normalized values are all zero",
            stats.name, stats.mean
        ));
    }

    warnings
}
