//! Resumable run state.
//!
//! A checkpoint is written after every committed chunk. It records how far the
//! current pass got, the codec and scaler state at that point and how many bytes
//! of staged output belong to it. Restoring it and skipping the consumed rows
//! never accumulates a record twice.

use crate::artifact::{read_json, write_json_atomic};
use crate::encoding::CategoryCodec;
use crate::error::{PipelineError, Result};
use crate::retry::RetryPolicy;
use crate::scaling::RunningScaler;
use crate::types::{RunCounters, RunMode};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

/// Format version of the checkpoint file.
pub const CHECKPOINT_VERSION: u32 = 2;

/// Pass a checkpoint was taken in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Accumulating; codec and scaler still change.
    Fit,
    /// Writing with frozen state.
    Transform,
}

/// Identifies the run a checkpoint belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointFingerprint {
    pub source: String,
    pub header: Vec<String>,
    pub mode: RunMode,
    pub normalize: bool,
    /// Timestamp format the records were parsed with.
    pub timestamp_format: String,
    /// Digest of the imported artifact, for apply runs.
    pub artifact: Option<String>,
}

/// A checkpoint read back from disk.
#[derive(Debug, Clone, Deserialize)]
pub struct Checkpoint {
    pub version: u32,
    pub fingerprint: CheckpointFingerprint,
    pub phase: Phase,
    /// Source data rows fully handled by the current pass.
    pub rows_consumed: u64,
    /// Chunks those rows formed.
    pub chunks: u64,
    pub counters: RunCounters,
    pub codec: CategoryCodec,
    pub scaler: RunningScaler,
    /// Length of the staging file at the time of the checkpoint.
    pub staged_bytes: u64,
    pub updated_at: DateTime<Utc>,
}

/// Borrowed view of the run state, serialized in the [`Checkpoint`] layout.
#[derive(Debug, Serialize)]
pub struct CheckpointRef<'a> {
    pub version: u32,
    pub fingerprint: &'a CheckpointFingerprint,
    pub phase: Phase,
    pub rows_consumed: u64,
    pub chunks: u64,
    pub counters: &'a RunCounters,
    pub codec: &'a CategoryCodec,
    pub scaler: &'a RunningScaler,
    pub staged_bytes: u64,
    pub updated_at: DateTime<Utc>,
}

impl<'a> CheckpointRef<'a> {
    pub fn new(
        fingerprint: &'a CheckpointFingerprint,
        phase: Phase,
        counters: &'a RunCounters,
        codec: &'a CategoryCodec,
        scaler: &'a RunningScaler,
    ) -> Self {
        Self {
            version: CHECKPOINT_VERSION,
            fingerprint,
            phase,
            rows_consumed: 0,
            chunks: 0,
            counters,
            codec,
            scaler,
            staged_bytes: 0,
            updated_at: Utc::now(),
        }
    }

    pub fn progress(mut self, rows_consumed: u64, chunks: u64, staged_bytes: u64) -> Self {
        self.rows_consumed = rows_consumed;
        self.chunks = chunks;
        self.staged_bytes = staged_bytes;
        self
    }

    /// Atomically replace the checkpoint at `path`.
    pub fn save(&self, path: &Path, retry: &RetryPolicy) -> Result<()> {
        write_json_atomic(path, self, retry).map_err(|e| {
            PipelineError::Checkpoint(format!("cannot save '{}': {}", path.display(), e))
        })?;
        debug!(
            "Checkpoint saved: {:?} pass, {} rows, {} staged bytes",
            self.phase, self.rows_consumed, self.staged_bytes
        );
        Ok(())
    }
}

impl Checkpoint {
    /// Load the checkpoint at `path` if it belongs to the run described by `fingerprint`.
    ///
    /// A missing file yields `None`. An unreadable, outdated or foreign checkpoint
    /// is removed with a warning and also yields `None`.
    pub fn load_matching(path: &Path, fingerprint: &CheckpointFingerprint) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }

        let checkpoint: Checkpoint = match read_json(path) {
            Ok(checkpoint) => checkpoint,
            Err(e) => {
                warn!("Discarding unreadable checkpoint {}: {}", path.display(), e);
                Self::remove(path)?;
                return Ok(None);
            }
        };

        if checkpoint.version != CHECKPOINT_VERSION {
            warn!(
                "Discarding checkpoint {} with version {}",
                path.display(),
                checkpoint.version
            );
            Self::remove(path)?;
            return Ok(None);
        }

        if &checkpoint.fingerprint != fingerprint {
            warn!(
                "Discarding checkpoint {}: it was taken for '{}' in {:?} mode",
                path.display(),
                checkpoint.fingerprint.source,
                checkpoint.fingerprint.mode
            );
            Self::remove(path)?;
            return Ok(None);
        }

        info!(
            "Resuming {:?} pass after {} rows ({} chunks)",
            checkpoint.phase, checkpoint.rows_consumed, checkpoint.chunks
        );
        Ok(Some(checkpoint))
    }

    /// Remove the checkpoint at `path` if present.
    pub fn remove(path: &Path) -> Result<()> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PipelineError::Checkpoint(format!(
                "cannot remove '{}': {}",
                path.display(),
                e
            ))),
        }
    }
}
