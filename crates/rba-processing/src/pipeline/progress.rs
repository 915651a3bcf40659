//! Progress reporting and cancellation support for the feature pipeline.
//!
//! Progress is reported once per committed chunk, measured in source bytes.
//! Cancellation is checked between chunks, so a cancelled run always stops on
//! a chunk boundary.
//!
//! # Example
//!
//! ```rust,ignore
//! use rba_processing::{CancellationToken, FileSource, Pipeline};
//!
//! let token = CancellationToken::new();
//! let token_clone = token.clone();
//!
//! std::thread::spawn(move || {
//!     std::thread::sleep(std::time::Duration::from_secs(60));
//!     token_clone.cancel();
//! });
//!
//! let summary = Pipeline::builder()
//!     .cancellation_token(token)
//!     .on_progress(|update| {
//!         println!("[{:?}] {}", update.stage, update.message);
//!     })
//!     .build()?
//!     .run(&FileSource::new("rba-dataset.csv"))?;
//! ```

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Stages of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    /// Opening the source and resolving the header
    Initializing,
    /// Accumulating codec and scaler state
    Fitting,
    /// Encoding, normalizing and writing records
    Transforming,
    /// Committing the output and exporting the artifact
    Finalizing,
    /// Run completed
    Complete,
    /// Run was cancelled
    Cancelled,
    /// Run failed with an error
    Failed,
}

impl PipelineStage {
    /// Returns a human-readable name for the stage.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Initializing => "Initializing",
            Self::Fitting => "Fitting Encoders",
            Self::Transforming => "Transforming Records",
            Self::Finalizing => "Finalizing Output",
            Self::Complete => "Complete",
            Self::Cancelled => "Cancelled",
            Self::Failed => "Failed",
        }
    }

    /// Share of the overall run taken by this stage.
    ///
    /// A single-pass run reports its only pass as `Fitting`, so it never
    /// reaches the `Transforming` range.
    pub fn weight(&self) -> f32 {
        match self {
            Self::Initializing => 0.02,
            Self::Fitting => 0.45,
            Self::Transforming => 0.45,
            Self::Finalizing => 0.08,
            Self::Complete | Self::Cancelled | Self::Failed => 0.0,
        }
    }

    /// Returns the cumulative progress at the start of this stage.
    pub fn base_progress(&self) -> f32 {
        match self {
            Self::Initializing => 0.0,
            Self::Fitting => 0.02,
            Self::Transforming => 0.47,
            Self::Finalizing => 0.92,
            Self::Complete => 1.0,
            Self::Cancelled | Self::Failed => 0.0,
        }
    }
}

/// A progress update sent to a [`ProgressReporter`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub stage: PipelineStage,

    /// Optional detail such as "Chunk 3"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_stage: Option<String>,

    /// Overall progress (0.0 - 1.0)
    pub progress: f32,

    /// Progress within current stage (0.0 - 1.0)
    pub stage_progress: f32,

    pub message: String,

    /// Source bytes consumed by the current pass
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes_processed: Option<u64>,

    /// Source size, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes_total: Option<u64>,
}

impl ProgressUpdate {
    /// Creates a new progress update for a stage.
    pub fn new(stage: PipelineStage, stage_progress: f32, message: impl Into<String>) -> Self {
        let stage_progress = stage_progress.clamp(0.0, 1.0);
        Self {
            stage,
            sub_stage: None,
            progress: (stage.base_progress() + stage.weight() * stage_progress).clamp(0.0, 1.0),
            stage_progress,
            message: message.into(),
            bytes_processed: None,
            bytes_total: None,
        }
    }

    /// Creates a per-chunk update. Without a known total, stage progress stays at 0.
    pub fn for_chunk(
        stage: PipelineStage,
        chunk: u64,
        bytes_processed: u64,
        bytes_total: Option<u64>,
        message: impl Into<String>,
    ) -> Self {
        let stage_progress = match bytes_total {
            Some(total) if total > 0 => bytes_processed as f32 / total as f32,
            _ => 0.0,
        };
        Self {
            sub_stage: Some(format!("Chunk {}", chunk + 1)),
            bytes_processed: Some(bytes_processed),
            bytes_total,
            ..Self::new(stage, stage_progress, message)
        }
    }

    /// Creates a completion progress update.
    pub fn complete(message: impl Into<String>) -> Self {
        Self::new(PipelineStage::Complete, 1.0, message)
    }

    /// Creates a cancelled progress update.
    pub fn cancelled() -> Self {
        Self::new(PipelineStage::Cancelled, 0.0, "Pipeline cancelled by user")
    }

    /// Creates a failed progress update.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::new(PipelineStage::Failed, 0.0, message)
    }
}

/// Receiver of progress updates.
///
/// Reporters are called on the pipeline thread once per chunk and must not block.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, update: ProgressUpdate);
}

/// [`ProgressReporter`] backed by a closure.
pub struct ClosureProgressReporter<F>
where
    F: Fn(ProgressUpdate) + Send + Sync,
{
    callback: F,
}

impl<F> ClosureProgressReporter<F>
where
    F: Fn(ProgressUpdate) + Send + Sync,
{
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F> ProgressReporter for ClosureProgressReporter<F>
where
    F: Fn(ProgressUpdate) + Send + Sync,
{
    fn report(&self, update: ProgressUpdate) {
        (self.callback)(update);
    }
}

/// Token for cancelling a running pipeline from any thread.
///
/// A cancelled run returns
/// [`PipelineError::Cancelled`](crate::error::PipelineError::Cancelled) at the
/// next chunk boundary. Without checkpointing the staged output is removed;
/// with checkpointing it is kept so the next run resumes from the last
/// committed chunk.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

static_assertions::assert_impl_all!(CancellationToken: Send, Sync);
static_assertions::assert_impl_all!(ProgressUpdate: Send, Sync);

impl CancellationToken {
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Request cancellation. Visible to every clone of the token.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Clear the flag so the token can be reused for another run.
    pub fn reset(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_cancellation_token_clone_shares_state() {
        let token1 = CancellationToken::new();
        let token2 = token1.clone();
        assert!(!token2.is_cancelled());

        token1.cancel();
        assert!(token2.is_cancelled());

        token2.reset();
        assert!(!token1.is_cancelled());
    }

    #[test]
    fn test_progress_update_for_chunk() {
        let update = ProgressUpdate::for_chunk(
            PipelineStage::Transforming,
            2,
            500,
            Some(1000),
            "Transformed chunk 3",
        );
        assert_eq!(update.sub_stage.as_deref(), Some("Chunk 3"));
        assert_eq!(update.stage_progress, 0.5);
        assert!((update.progress - (0.47 + 0.45 * 0.5)).abs() < 1e-6);
        assert_eq!(update.bytes_total, Some(1000));
    }

    #[test]
    fn test_progress_update_unknown_total() {
        let update = ProgressUpdate::for_chunk(PipelineStage::Fitting, 0, 500, None, "Fitted");
        assert_eq!(update.stage_progress, 0.0);
        assert_eq!(update.progress, PipelineStage::Fitting.base_progress());
    }

    #[test]
    fn test_progress_update_complete() {
        let update = ProgressUpdate::complete("Done!");
        assert_eq!(update.stage, PipelineStage::Complete);
        assert_eq!(update.progress, 1.0);
    }

    #[test]
    fn test_closure_progress_reporter() {
        let call_count = Arc::new(AtomicUsize::new(0));
        let call_count_clone = call_count.clone();

        let reporter = ClosureProgressReporter::new(move |_update| {
            call_count_clone.fetch_add(1, Ordering::SeqCst);
        });

        reporter.report(ProgressUpdate::new(PipelineStage::Fitting, 0.5, "Test"));
        reporter.report(ProgressUpdate::complete("Done"));

        assert_eq!(call_count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_stage_weights_sum() {
        let total: f32 = [
            PipelineStage::Initializing,
            PipelineStage::Fitting,
            PipelineStage::Transforming,
            PipelineStage::Finalizing,
        ]
        .iter()
        .map(|s| s.weight())
        .sum();
        assert!((total - 1.0).abs() < 0.01, "Weights should sum to ~1.0");
    }

    #[test]
    fn test_stage_json_values() {
        for (stage, expected) in [
            (PipelineStage::Initializing, "\"initializing\""),
            (PipelineStage::Fitting, "\"fitting\""),
            (PipelineStage::Transforming, "\"transforming\""),
            (PipelineStage::Finalizing, "\"finalizing\""),
            (PipelineStage::Complete, "\"complete\""),
            (PipelineStage::Cancelled, "\"cancelled\""),
            (PipelineStage::Failed, "\"failed\""),
        ] {
            assert_eq!(serde_json::to_string(&stage).unwrap(), expected);
        }
    }
}
