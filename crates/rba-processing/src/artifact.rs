//! Sidecar persistence of a trained codec and scaler.
//!
//! A [`FeatureArtifact`] written after a fit run lets a later run (for example
//! over a held-out evaluation set) encode and normalize with exactly the same
//! mapping and statistics.

use crate::encoding::CategoryCodec;
use crate::error::{PipelineError, Result, ResultExt};
use crate::retry::RetryPolicy;
use crate::scaling::RunningScaler;
use crate::schema::{OutputColumn, ResolvedSchema};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::info;

/// Format version of the artifact file.
pub const ARTIFACT_VERSION: u32 = 1;

/// Trained encoding state, serialized as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureArtifact {
    pub version: u32,
    pub created_at: DateTime<Utc>,
    /// Output columns of the run that trained the state.
    pub columns: Vec<OutputColumn>,
    /// Whether scaled columns were normalized by that run.
    pub normalized: bool,
    pub codec: CategoryCodec,
    pub scaler: RunningScaler,
}

impl FeatureArtifact {
    pub fn new(
        columns: Vec<OutputColumn>,
        normalized: bool,
        codec: CategoryCodec,
        scaler: RunningScaler,
    ) -> Self {
        Self {
            version: ARTIFACT_VERSION,
            created_at: Utc::now(),
            columns,
            normalized,
            codec,
            scaler,
        }
    }

    /// Write the artifact atomically.
    pub fn save(&self, path: impl AsRef<Path>, retry: &RetryPolicy) -> Result<()> {
        let path = path.as_ref();
        write_json_atomic(path, self, retry)?;
        info!("Feature artifact saved: {}", path.display());
        Ok(())
    }

    /// Read and check an artifact.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .context(format!("Reading artifact '{}'", path.display()))?;
        let artifact: FeatureArtifact = serde_json::from_str(&content)
            .map_err(PipelineError::from)
            .context(format!("Parsing artifact '{}'", path.display()))?;

        if artifact.version != ARTIFACT_VERSION {
            return Err(PipelineError::ArtifactMismatch(format!(
                "unsupported artifact version {} (expected {})",
                artifact.version, ARTIFACT_VERSION
            )));
        }

        Ok(artifact)
    }

    /// SHA-256 of the trained state, in lowercase hex.
    ///
    /// `created_at` is left out, so re-saving the same state keeps the digest.
    pub fn digest(&self) -> Result<String> {
        let state = serde_json::to_vec(&(
            self.version,
            &self.columns,
            self.normalized,
            &self.codec,
            &self.scaler,
        ))?;
        let mut hasher = Sha256::new();
        hasher.update(&state);
        Ok(format!("{:x}", hasher.finalize()))
    }

    /// Check that the artifact was trained for the same output as this run.
    ///
    /// The output columns must match in name, type and order, the normalization
    /// setting must be the same, and every categorical column (and every scaled
    /// column when normalizing) needs trained state.
    pub fn ensure_covers(&self, schema: &ResolvedSchema, normalize: bool) -> Result<()> {
        if self.normalized != normalize {
            return Err(PipelineError::ArtifactMismatch(format!(
                "artifact was trained with normalize = {}, this run has normalize = {}",
                self.normalized, normalize
            )));
        }

        let columns = schema.output_columns();
        if columns != self.columns {
            let names = |cols: &[OutputColumn]| {
                cols.iter()
                    .map(|c| c.name.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            };
            return Err(PipelineError::ArtifactMismatch(format!(
                "output columns differ: artifact has [{}], source gives [{}]",
                names(&self.columns[..]),
                names(&columns[..])
            )));
        }

        let missing: Vec<&str> = schema
            .categorical_columns()
            .filter(|c| !self.codec.has_column(c))
            .chain(
                schema
                    .scaled_columns()
                    .filter(|c| normalize && !self.scaler.has_column(c)),
            )
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(PipelineError::ArtifactMismatch(format!(
                "no trained state for: {}",
                missing.join(", ")
            )))
        }
    }
}

/// Serialize `value` to `<path>.tmp`, fsync, then rename over `path`.
pub(crate) fn write_json_atomic<T: Serialize>(
    path: &Path,
    value: &T,
    retry: &RetryPolicy,
) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(|e| PipelineError::write(parent, e))?;
    }

    let mut tmp_name = path.file_name().map(|n| n.to_os_string()).ok_or_else(|| {
        PipelineError::InvalidConfig(format!("'{}' has no file name", path.display()))
    })?;
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);

    let file = File::create(&tmp).map_err(|e| PipelineError::write(&tmp, e))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value)?;
    writer
        .flush()
        .map_err(|e| PipelineError::write(&tmp, e))?;
    writer
        .get_ref()
        .sync_all()
        .map_err(|e| PipelineError::write(&tmp, e))?;
    drop(writer);

    retry
        .run("Committing JSON file", || fs::rename(&tmp, path))
        .map_err(|e| PipelineError::write(path, e))
}

/// Read a JSON file written by [`write_json_atomic`].
pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}
