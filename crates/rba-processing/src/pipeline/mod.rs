//! Pipeline module.
//!
//! This module provides the chunked feature pipeline and related components.

mod builder;
pub mod checkpoint;
mod executor;
pub mod progress;

pub use builder::{Pipeline, PipelineBuilder};
pub use checkpoint::{Checkpoint, CheckpointFingerprint, Phase};
pub use executor::ChunkProcessor;
pub use progress::{
    CancellationToken, ClosureProgressReporter, PipelineStage, ProgressReporter, ProgressUpdate,
};
