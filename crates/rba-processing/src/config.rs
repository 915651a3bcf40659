//! Configuration types for the feature pipeline.
//!
//! This module provides configuration options using the builder pattern.
//! None of these settings changes the produced values except `normalize`
//! and `timestamp_format`; chunk size and worker count only bound memory
//! and parallelism.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default number of records per chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 100_000;

/// Default timestamp format of the RBA login dataset (`2020-02-03 12:43:30.772`).
pub const DEFAULT_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Configuration for the feature pipeline.
///
/// Use [`PipelineConfig::builder()`] to create a new configuration
/// with fluent API.
///
/// # Example
///
/// ```rust,ignore
/// use rba_processing::config::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .chunk_size(50_000)
///     .output_path("data/processed_rba-dataset.csv")
///     .artifact_path("data/rba-features.json")
///     .build()?;
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Maximum number of source records held in memory at once.
    /// Default: 100 000
    pub chunk_size: usize,

    /// Destination of the processed CSV.
    /// Default: "outputs/processed_rba-dataset.csv"
    pub output_path: PathBuf,

    /// Where to export the trained codec and scaler after a fit run.
    /// Default: None (not exported)
    pub artifact_path: Option<PathBuf>,

    /// Where to keep the resumable checkpoint.
    /// Default: None (no checkpointing, a failed run restarts from scratch)
    pub checkpoint_path: Option<PathBuf>,

    /// `chrono` format string used to parse the timestamp column.
    pub timestamp_format: String,

    /// Field delimiter of the source file. Output is always comma-separated.
    /// Default: b','
    pub delimiter: u8,

    /// Number of threads validating a chunk.
    /// Default: 1
    pub workers: usize,

    /// Whether scaled numeric columns are normalized with the stream statistics.
    /// Default: true
    pub normalize: bool,

    /// How many times opening the source or committing the output is retried.
    /// Default: 3
    pub io_retries: u32,

    /// Base delay of the exponential retry backoff, in milliseconds.
    /// Default: 100
    pub retry_base_delay_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            output_path: PathBuf::from("outputs/processed_rba-dataset.csv"),
            artifact_path: None,
            checkpoint_path: None,
            timestamp_format: DEFAULT_TIMESTAMP_FORMAT.to_string(),
            delimiter: b',',
            workers: 1,
            normalize: true,
            io_retries: 3,
            retry_base_delay_ms: 100,
        }
    }
}

impl PipelineConfig {
    /// Create a new configuration builder.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::default()
    }

    /// Load a configuration from a JSON file. Missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: PipelineConfig = serde_json::from_str(&content)?;
        config
            .validate()
            .map_err(|e| crate::error::PipelineError::InvalidConfig(e.to_string()))?;
        Ok(config)
    }

    /// Base delay of the retry backoff.
    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    /// Validate the configuration and return errors if invalid.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.chunk_size == 0 {
            return Err(ConfigValidationError::InvalidChunkSize(self.chunk_size));
        }

        if self.workers == 0 {
            return Err(ConfigValidationError::InvalidWorkers(self.workers));
        }

        if self.timestamp_format.trim().is_empty() {
            return Err(ConfigValidationError::EmptyTimestampFormat);
        }

        if !self.delimiter.is_ascii() || matches!(self.delimiter, b'"' | b'\n' | b'\r') {
            return Err(ConfigValidationError::InvalidDelimiter(self.delimiter));
        }

        if self.output_path.as_os_str().is_empty() {
            return Err(ConfigValidationError::EmptyOutputPath);
        }

        for (field, path) in [
            ("artifact_path", &self.artifact_path),
            ("checkpoint_path", &self.checkpoint_path),
        ] {
            if path.as_deref() == Some(self.output_path.as_path()) {
                return Err(ConfigValidationError::PathCollision {
                    field: field.to_string(),
                });
            }
        }

        Ok(())
    }
}

/// Errors that can occur during configuration validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Invalid chunk size: {0} (must be at least 1)")]
    InvalidChunkSize(usize),

    #[error("Invalid worker count: {0} (must be at least 1)")]
    InvalidWorkers(usize),

    #[error("Timestamp format must not be empty")]
    EmptyTimestampFormat,

    #[error("Invalid delimiter byte: {0:#04x}")]
    InvalidDelimiter(u8),

    #[error("Output path must not be empty")]
    EmptyOutputPath,

    #[error("'{field}' must differ from the output path")]
    PathCollision { field: String },
}

/// Builder for [`PipelineConfig`] with fluent API.
#[derive(Debug, Default)]
pub struct PipelineConfigBuilder {
    chunk_size: Option<usize>,
    output_path: Option<PathBuf>,
    artifact_path: Option<PathBuf>,
    checkpoint_path: Option<PathBuf>,
    timestamp_format: Option<String>,
    delimiter: Option<u8>,
    workers: Option<usize>,
    normalize: Option<bool>,
    io_retries: Option<u32>,
    retry_base_delay_ms: Option<u64>,
}

impl PipelineConfigBuilder {
    /// Set the number of records read per chunk.
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = Some(size);
        self
    }

    /// Set the destination of the processed CSV.
    pub fn output_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_path = Some(path.into());
        self
    }

    /// Export the trained codec and scaler to this path after a successful fit run.
    pub fn artifact_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.artifact_path = Some(path.into());
        self
    }

    /// Enable checkpointing at this path.
    pub fn checkpoint_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.checkpoint_path = Some(path.into());
        self
    }

    /// Set the `chrono` format used to parse timestamps.
    pub fn timestamp_format(mut self, format: impl Into<String>) -> Self {
        self.timestamp_format = Some(format.into());
        self
    }

    /// Set the source field delimiter.
    pub fn delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = Some(delimiter);
        self
    }

    /// Set the number of validation threads.
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    /// Enable or disable normalization of scaled numeric columns.
    pub fn normalize(mut self, normalize: bool) -> Self {
        self.normalize = Some(normalize);
        self
    }

    /// Set the retry budget for opening the source and committing the output.
    pub fn io_retries(mut self, retries: u32) -> Self {
        self.io_retries = Some(retries);
        self
    }

    /// Set the base backoff delay in milliseconds.
    pub fn retry_base_delay_ms(mut self, millis: u64) -> Self {
        self.retry_base_delay_ms = Some(millis);
        self
    }

    /// Build the configuration.
    ///
    /// Returns a validated `PipelineConfig` or an error if validation fails.
    pub fn build(self) -> Result<PipelineConfig, ConfigValidationError> {
        let defaults = PipelineConfig::default();
        let config = PipelineConfig {
            chunk_size: self.chunk_size.unwrap_or(defaults.chunk_size),
            output_path: self.output_path.unwrap_or(defaults.output_path),
            artifact_path: self.artifact_path,
            checkpoint_path: self.checkpoint_path,
            timestamp_format: self.timestamp_format.unwrap_or(defaults.timestamp_format),
            delimiter: self.delimiter.unwrap_or(defaults.delimiter),
            workers: self.workers.unwrap_or(defaults.workers),
            normalize: self.normalize.unwrap_or(defaults.normalize),
            io_retries: self.io_retries.unwrap_or(defaults.io_retries),
            retry_base_delay_ms: self
                .retry_base_delay_ms
                .unwrap_or(defaults.retry_base_delay_ms),
        };

        config.validate()?;
        Ok(config)
    }
}
