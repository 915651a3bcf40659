//! RBA Feature Pipeline Library
//!
//! A streaming feature-engineering library for risk-based-authentication login
//! telemetry, built with Rust and Polars.
//!
//! # Overview
//!
//! The pipeline turns a large CSV of login events into a model-ready numeric
//! dataset without holding the source in memory:
//!
//! - **Validation**: Records missing a required field are dropped and counted
//! - **Categorical Encoding**: Stable first-seen integer codes per column
//! - **Normalization**: Global mean/std accumulated over the whole stream
//! - **Atomic Output**: The destination only ever holds a complete dataset
//! - **Artifacts**: Trained codec and scaler can be exported and re-applied
//! - **Checkpointing**: Interrupted runs resume from the last committed chunk
//! - **Progress Reporting**: Per-chunk progress updates with cancellation support
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use rba_processing::{FileSource, Pipeline, PipelineConfig};
//!
//! let config = PipelineConfig::builder()
//!     .chunk_size(100_000)
//!     .output_path("output/processed_rba-dataset.csv")
//!     .artifact_path("output/rba-features.json")
//!     .build()?;
//!
//! let summary = Pipeline::builder()
//!     .config(config)
//!     .on_progress(|update| {
//!         println!("[{:.0}%] {}", update.progress * 100.0, update.message);
//!     })
//!     .build()?
//!     .run(&FileSource::new("data/rba-dataset.csv"))?;
//!
//! println!("Wrote {} records ({} dropped)", summary.records_written(), summary.records_dropped());
//! ```
//!
//! # Passes
//!
//! With normalization enabled a fit run reads the source twice: the first pass
//! assigns category codes and accumulates statistics, the second encodes with
//! the frozen codec, normalizes with the final statistics and writes. Without
//! normalization, or when applying an imported [`FeatureArtifact`], a single
//! pass is enough.
//!
//! # Configuration
//!
//! Use [`PipelineConfig`] to customize the run. Chunk size and worker count
//! bound memory and parallelism; they never change the produced values.
//!
//! ```rust,ignore
//! use rba_processing::config::*;
//!
//! let config = PipelineConfig::builder()
//!     .chunk_size(50_000)
//!     .workers(4)
//!     .normalize(false)
//!     .checkpoint_path("output/run.checkpoint.json")
//!     .timestamp_format("%Y-%m-%d %H:%M:%S%.f")
//!     .build()?;
//! ```

// Core modules
pub mod artifact;
pub mod config;
pub mod encoding;
pub mod error;
pub mod ingest;
pub mod pipeline;
pub mod reporting;
pub mod retry;
pub mod scaling;
pub mod schema;
pub mod types;
pub mod utils;
pub mod validator;
pub mod writer;

// Re-exports for convenient access
pub use artifact::FeatureArtifact;
pub use config::{ConfigValidationError, PipelineConfig, PipelineConfigBuilder};
pub use encoding::{CategoryCodec, UNKNOWN_CODE};
pub use error::{PipelineError, Result as PipelineResult, ResultExt};
pub use ingest::{ChunkReader, FileSource, MemorySource, RecordSource};
pub use pipeline::{
    CancellationToken, ChunkProcessor, ClosureProgressReporter, Pipeline, PipelineBuilder,
    PipelineStage, ProgressReporter, ProgressUpdate,
};
pub use reporting::RunReport;
pub use retry::RetryPolicy;
pub use scaling::RunningScaler;
pub use schema::{ColumnKind, ColumnSpec, KeyRole, OutputColumn, OutputType, Schema};
pub use types::{
    ColumnStats, DropReason, FeatureValue, RunCounters, RunMode, RunStatus, RunSummary,
};
pub use validator::{MISSING_CATEGORY, RecordValidator};
pub use writer::{DatasetWriter, WriteOutcome};
