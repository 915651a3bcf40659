//! Main feature pipeline module.
//!
//! This module provides the core `Pipeline` struct and builder for
//! orchestrating the chunked fit and transform passes over a login-event source.

use crate::artifact::FeatureArtifact;
use crate::config::{ConfigValidationError, PipelineConfig};
use crate::encoding::CategoryCodec;
use crate::error::{PipelineError, Result, ResultExt};
use crate::ingest::{ChunkReader, RecordSource};
use crate::pipeline::checkpoint::{Checkpoint, CheckpointFingerprint, CheckpointRef, Phase};
use crate::pipeline::executor::ChunkProcessor;
use crate::pipeline::progress::{
    CancellationToken, ClosureProgressReporter, PipelineStage, ProgressReporter, ProgressUpdate,
};
use crate::retry::RetryPolicy;
use crate::scaling::RunningScaler;
use crate::schema::{ResolvedSchema, Schema};
use crate::types::{RunCounters, RunMode, RunStatus, RunSummary};
use crate::validator::RecordValidator;
use crate::writer::{DatasetWriter, WriteOutcome, staging_path};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Share of dropped records above which a completed run is flagged.
const DROP_WARNING_THRESHOLD: f64 = 30.0;

/// One pass over the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Pass {
    phase: Phase,
    /// Whether this pass writes the output.
    emit: bool,
}

impl Pass {
    fn stage(&self) -> PipelineStage {
        match self.phase {
            Phase::Fit => PipelineStage::Fitting,
            Phase::Transform => PipelineStage::Transforming,
        }
    }
}

/// Passes needed for a run.
///
/// Normalizing needs the final statistics before the first write, so a fit run
/// that normalizes reads the source twice. Codes never change once assigned,
/// so without normalization the fit pass writes directly.
fn plan(mode: RunMode, normalize: bool) -> Vec<Pass> {
    match (mode, normalize) {
        (RunMode::Apply, _) => vec![Pass {
            phase: Phase::Transform,
            emit: true,
        }],
        (RunMode::Fit, true) => vec![
            Pass {
                phase: Phase::Fit,
                emit: false,
            },
            Pass {
                phase: Phase::Transform,
                emit: true,
            },
        ],
        (RunMode::Fit, false) => vec![Pass {
            phase: Phase::Fit,
            emit: true,
        }],
    }
}

/// Mutable state carried across chunks and passes.
struct RunState {
    codec: CategoryCodec,
    scaler: RunningScaler,
    /// Counters of the current pass.
    counters: RunCounters,
}

/// Where a run picks up after restoring a checkpoint.
#[derive(Debug, Clone, Copy, Default)]
struct ResumePoint {
    pass: usize,
    rows: u64,
    chunks: u64,
    staged_bytes: u64,
}

/// What [`Pipeline::execute`] hands back once the output is committed.
struct Execution {
    outcome: WriteOutcome,
    resumed: bool,
}

/// The main feature pipeline.
///
/// Use [`Pipeline::builder()`] to create a new pipeline with custom configuration.
///
/// # Example
///
/// ```rust,ignore
/// use rba_processing::{FeatureArtifact, FileSource, Pipeline, PipelineConfig};
///
/// // Fit on the training split and export the trained state
/// let config = PipelineConfig::builder()
///     .output_path("data/train_features.csv")
///     .artifact_path("data/rba-features.json")
///     .build()?;
/// let summary = Pipeline::builder()
///     .config(config)
///     .build()?
///     .run(&FileSource::new("data/train.csv"))?;
///
/// // Apply the same encoding to the evaluation split
/// let summary = Pipeline::builder()
///     .config(PipelineConfig::builder().output_path("data/eval_features.csv").build()?)
///     .artifact(FeatureArtifact::load("data/rba-features.json")?)
///     .build()?
///     .run(&FileSource::new("data/eval.csv"))?;
/// ```
pub struct Pipeline {
    config: PipelineConfig,
    schema: Schema,
    artifact: Option<FeatureArtifact>,
    progress_reporter: Option<Arc<dyn ProgressReporter>>,
    cancellation_token: CancellationToken,
}

// Ensure Pipeline is Send (can be moved to a worker thread)
static_assertions::assert_impl_all!(Pipeline: Send);

impl Pipeline {
    /// Create a new pipeline builder.
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Whether the codec and scaler are trained by this pipeline or imported.
    pub fn mode(&self) -> RunMode {
        if self.artifact.is_some() {
            RunMode::Apply
        } else {
            RunMode::Fit
        }
    }

    /// Run the pipeline over `source` and commit the output.
    ///
    /// # Errors
    ///
    /// Returns `Err(PipelineError::Cancelled)` if the run was cancelled via the
    /// cancellation token. Header, ingestion and write failures abort the run;
    /// in every failure case the destination is left untouched.
    pub fn run(&self, source: &dyn RecordSource) -> Result<RunSummary> {
        match self.run_internal(source) {
            Ok(summary) => {
                let message = match summary.status {
                    RunStatus::Completed => "Pipeline completed successfully",
                    RunStatus::Empty => "Pipeline completed without output",
                };
                self.report_progress(ProgressUpdate::complete(message));
                Ok(summary)
            }
            Err(e) => {
                if e.is_cancelled() {
                    self.report_progress(ProgressUpdate::cancelled());
                } else {
                    self.report_progress(ProgressUpdate::failed(e.to_string()));
                }
                error!("Pipeline error: {}", e);
                Err(e)
            }
        }
    }

    /// Check if cancellation has been requested.
    fn check_cancelled(&self) -> Result<()> {
        if self.cancellation_token.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        Ok(())
    }

    /// Report progress if a reporter is configured.
    fn report_progress(&self, update: ProgressUpdate) {
        if let Some(reporter) = &self.progress_reporter {
            reporter.report(update);
        }
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.config.io_retries, self.config.retry_base_delay())
    }

    fn run_internal(&self, source: &dyn RecordSource) -> Result<RunSummary> {
        let start_time = Instant::now();
        let mode = self.mode();

        info!(
            "Starting feature pipeline on '{}' ({:?} mode)...",
            source.describe(),
            mode
        );
        self.report_progress(ProgressUpdate::new(
            PipelineStage::Initializing,
            0.0,
            "Reading source header...",
        ));

        self.schema.validate()?;
        let retry = self.retry_policy();
        let reader = ChunkReader::open(
            source,
            self.config.delimiter,
            self.config.chunk_size,
            &retry,
        )?;
        let schema = self.schema.resolve(reader.header())?;
        debug!(
            "Resolved {} of {} declared columns",
            schema.columns().len(),
            self.schema.columns().len()
        );

        let mut state = match &self.artifact {
            Some(artifact) => {
                artifact.ensure_covers(&schema, self.config.normalize)?;
                RunState {
                    codec: artifact.codec.clone(),
                    scaler: artifact.scaler.clone(),
                    counters: RunCounters::default(),
                }
            }
            None => RunState {
                codec: CategoryCodec::with_columns(schema.categorical_columns()),
                scaler: RunningScaler::with_columns(schema.scaled_columns()),
                counters: RunCounters::default(),
            },
        };

        let passes = plan(mode, self.config.normalize);
        let fingerprint = CheckpointFingerprint {
            source: source.describe(),
            header: reader.header().to_vec(),
            mode,
            normalize: self.config.normalize,
            timestamp_format: self.config.timestamp_format.clone(),
            artifact: self
                .artifact
                .as_ref()
                .map(FeatureArtifact::digest)
                .transpose()?,
        };
        let resume = self.restore(&fingerprint, &passes, &mut state)?;

        self.report_progress(ProgressUpdate::new(
            PipelineStage::Initializing,
            1.0,
            format!("Resolved {} output columns", schema.output_columns().len()),
        ));

        let mut writer = None;
        let execution = match self.execute(
            source,
            reader,
            &schema,
            &passes,
            &fingerprint,
            resume,
            &mut state,
            &mut writer,
            &retry,
        ) {
            Ok(execution) => execution,
            Err(e) => {
                self.discard_staging(writer);
                return Err(e);
            }
        };

        let (status, output_path) = match execution.outcome {
            WriteOutcome::Committed { path, .. } => (RunStatus::Completed, Some(path)),
            WriteOutcome::Empty => (RunStatus::Empty, None),
        };

        let mut artifact_path = None;
        if mode == RunMode::Fit
            && status == RunStatus::Completed
            && let Some(path) = &self.config.artifact_path
        {
            FeatureArtifact::new(
                schema.output_columns(),
                self.config.normalize,
                state.codec.clone(),
                state.scaler.clone(),
            )
            .save(path, &retry)
            .context("Exporting feature artifact")?;
            artifact_path = Some(path.clone());
        }

        if let Some(path) = &self.config.checkpoint_path {
            Checkpoint::remove(path)?;
        }

        let summary = RunSummary {
            status,
            mode,
            passes: passes.len() as u8,
            resumed: execution.resumed,
            columns: schema.output_columns().into_iter().map(|c| c.name).collect(),
            column_stats: state.scaler.stats(),
            category_cardinality: state.codec.cardinalities(),
            counters: state.counters,
            output_path,
            artifact_path,
            duration_ms: start_time.elapsed().as_millis() as u64,
        };

        info!(
            "Pipeline finished: {} read, {} written, {} dropped in {}ms",
            summary.counters.records_read,
            summary.counters.records_written,
            summary.counters.records_dropped,
            summary.duration_ms
        );
        if summary.dropped_percentage() > DROP_WARNING_THRESHOLD {
            warn!(
                "{:.1}% of records were dropped, check the source and timestamp format",
                summary.dropped_percentage()
            );
        }
        if summary.status == RunStatus::Empty {
            warn!("Every record was dropped, no output was written");
        }

        Ok(summary)
    }

    /// Restore state from a matching checkpoint, if checkpointing is enabled.
    fn restore(
        &self,
        fingerprint: &CheckpointFingerprint,
        passes: &[Pass],
        state: &mut RunState,
    ) -> Result<Option<ResumePoint>> {
        let Some(path) = &self.config.checkpoint_path else {
            return Ok(None);
        };
        let Some(checkpoint) = Checkpoint::load_matching(path, fingerprint)? else {
            return Ok(None);
        };

        let Some(pass) = passes.iter().position(|p| p.phase == checkpoint.phase) else {
            warn!(
                "Discarding checkpoint for a {:?} pass this run does not make",
                checkpoint.phase
            );
            Checkpoint::remove(path)?;
            return Ok(None);
        };

        if passes[pass].emit
            && checkpoint.staged_bytes > 0
            && !staging_path(&self.config.output_path)?.exists()
        {
            warn!("Discarding checkpoint, its staged output is gone");
            Checkpoint::remove(path)?;
            return Ok(None);
        }

        state.codec = checkpoint.codec;
        state.scaler = checkpoint.scaler;
        state.counters = checkpoint.counters;

        Ok(Some(ResumePoint {
            pass,
            rows: checkpoint.rows_consumed,
            chunks: checkpoint.chunks,
            staged_bytes: checkpoint.staged_bytes,
        }))
    }

    /// Run the planned passes and commit the output.
    #[allow(clippy::too_many_arguments)]
    fn execute(
        &self,
        source: &dyn RecordSource,
        reader: ChunkReader,
        schema: &ResolvedSchema,
        passes: &[Pass],
        fingerprint: &CheckpointFingerprint,
        resume: Option<ResumePoint>,
        state: &mut RunState,
        writer: &mut Option<DatasetWriter>,
        retry: &RetryPolicy,
    ) -> Result<Execution> {
        let validator = RecordValidator::new(schema, &self.config.timestamp_format);
        let processor = ChunkProcessor::new(schema);
        let start_pass = resume.map_or(0, |r| r.pass);
        let mut first_reader = Some(reader);

        for (index, pass) in passes.iter().enumerate().skip(start_pass) {
            self.check_cancelled()?;

            let mut reader = match first_reader.take() {
                Some(reader) => reader,
                None => self.reopen(source, &fingerprint.header, retry)?,
            };

            let resume_here = resume.filter(|r| r.pass == index);
            if let Some(point) = resume_here {
                reader.skip(point.rows, point.chunks)?;
            } else {
                state.counters = RunCounters::default();
            }

            if pass.emit {
                *writer = Some(match resume_here {
                    Some(point) if point.staged_bytes > 0 => DatasetWriter::resume(
                        &self.config.output_path,
                        schema.output_columns(),
                        point.staged_bytes,
                        state.counters.records_written,
                        *retry,
                    )?,
                    _ => DatasetWriter::create(
                        &self.config.output_path,
                        schema.output_columns(),
                        *retry,
                    )?,
                });
            }

            info!(
                "Pass {}/{}: {}...",
                index + 1,
                passes.len(),
                pass.stage().display_name()
            );
            self.run_pass(
                *pass,
                &mut reader,
                source.len_hint(),
                &validator,
                &processor,
                fingerprint,
                state,
                writer.as_mut(),
                retry,
            )?;

            if pass.phase == Phase::Fit && !pass.emit {
                info!(
                    "Fit pass done: {} records accumulated, {} dropped",
                    state.counters.records_read - state.counters.records_dropped,
                    state.counters.records_dropped
                );
                if let Some(path) = &self.config.checkpoint_path {
                    // Start of the transform pass, with the final state.
                    CheckpointRef::new(
                        fingerprint,
                        Phase::Transform,
                        &RunCounters::default(),
                        &state.codec,
                        &state.scaler,
                    )
                    .save(path, retry)?;
                }
            }
        }

        self.check_cancelled()?;
        self.report_progress(ProgressUpdate::new(
            PipelineStage::Finalizing,
            0.0,
            "Committing output...",
        ));

        let writer = writer
            .take()
            .ok_or_else(|| PipelineError::Internal("no pass wrote the output".to_string()))?;
        let outcome = writer.flush()?;

        self.report_progress(ProgressUpdate::new(
            PipelineStage::Finalizing,
            1.0,
            "Output committed",
        ));

        Ok(Execution {
            outcome,
            resumed: resume.is_some(),
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn run_pass(
        &self,
        pass: Pass,
        reader: &mut ChunkReader,
        bytes_total: Option<u64>,
        validator: &RecordValidator<'_>,
        processor: &ChunkProcessor<'_>,
        fingerprint: &CheckpointFingerprint,
        state: &mut RunState,
        mut writer: Option<&mut DatasetWriter>,
        retry: &RetryPolicy,
    ) -> Result<()> {
        loop {
            self.check_cancelled()?;
            let Some(chunk) = reader.next_chunk()? else {
                break;
            };

            let outcome = validator.validate_parallel(&chunk, self.config.workers)?;
            let counters = &mut state.counters;
            counters.records_read += chunk.len() as u64;
            counters.chunks += 1;
            counters.optional_fallbacks += outcome.fallbacks;
            for rejection in &outcome.rejections {
                counters.record_drop(rejection);
            }

            let processed = match pass.phase {
                Phase::Fit => processor.fit(
                    chunk.index,
                    &outcome.records,
                    &mut state.codec,
                    &mut state.scaler,
                    pass.emit,
                )?,
                Phase::Transform => {
                    let scaler = self.config.normalize.then_some(&state.scaler);
                    let (processed, unknown) =
                        processor.transform(chunk.index, &outcome.records, &state.codec, scaler)?;
                    state.counters.unknown_categories += unknown;
                    processed
                }
            };

            let mut staged_bytes = 0;
            if pass.emit
                && let Some(writer) = writer.as_deref_mut()
            {
                writer.append(&processed)?;
                state.counters.records_written += processed.len() as u64;
                if self.config.checkpoint_path.is_some() {
                    staged_bytes = writer.committed_bytes()?;
                }
            }

            if let Some(path) = &self.config.checkpoint_path {
                CheckpointRef::new(
                    fingerprint,
                    pass.phase,
                    &state.counters,
                    &state.codec,
                    &state.scaler,
                )
                .progress(reader.rows_read(), chunk.index + 1, staged_bytes)
                .save(path, retry)?;
            }

            debug!(
                "Chunk {}: {} records, {} kept, {} dropped",
                chunk.index,
                chunk.len(),
                outcome.records.len(),
                outcome.dropped()
            );
            self.report_progress(ProgressUpdate::for_chunk(
                pass.stage(),
                chunk.index,
                reader.bytes_read(),
                bytes_total,
                format!(
                    "{} chunk {} ({} records)",
                    pass.stage().display_name(),
                    chunk.index + 1,
                    chunk.len()
                ),
            ));
        }

        Ok(())
    }

    /// Open the source for a later pass. The header must not have changed.
    fn reopen(
        &self,
        source: &dyn RecordSource,
        header: &[String],
        retry: &RetryPolicy,
    ) -> Result<ChunkReader> {
        let reader = ChunkReader::open(
            source,
            self.config.delimiter,
            self.config.chunk_size,
            retry,
        )?;
        if reader.header() != header {
            return Err(PipelineError::Ingestion {
                chunk: 0,
                byte_offset: 0,
                reason: format!("header of '{}' changed between passes", source.describe()),
            });
        }
        Ok(reader)
    }

    /// Remove the staged output of a failed run unless it can be resumed.
    fn discard_staging(&self, writer: Option<DatasetWriter>) {
        let Some(writer) = writer else {
            return;
        };
        if self.config.checkpoint_path.is_some() {
            info!(
                "Keeping {} for the next run to resume",
                writer.staging_path().display()
            );
            return;
        }
        if let Err(e) = writer.abort() {
            warn!("Could not remove staged output: {}", e);
        }
    }
}

/// Builder for creating a [`Pipeline`] instance.
///
/// Use [`Pipeline::builder()`] to get started.
///
/// # Example
///
/// ```rust,ignore
/// use rba_processing::{Pipeline, PipelineConfig, CancellationToken};
///
/// let token = CancellationToken::new();
///
/// let pipeline = Pipeline::builder()
///     .config(PipelineConfig::default())
///     .cancellation_token(token)
///     .on_progress(|update| {
///         println!("[{:.0}%] {}", update.progress * 100.0, update.message);
///     })
///     .build()?;
/// ```
#[derive(Default)]
pub struct PipelineBuilder {
    config: Option<PipelineConfig>,
    schema: Option<Schema>,
    artifact: Option<FeatureArtifact>,
    progress_reporter: Option<Arc<dyn ProgressReporter>>,
    cancellation_token: Option<CancellationToken>,
}

// Ensure PipelineBuilder is Send (can be moved to another thread during construction)
static_assertions::assert_impl_all!(PipelineBuilder: Send);

impl PipelineBuilder {
    /// Set the pipeline configuration.
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the column schema. Defaults to [`Schema::rba()`].
    pub fn schema(mut self, schema: Schema) -> Self {
        self.schema = Some(schema);
        self
    }

    /// Encode with a previously exported codec and scaler instead of fitting.
    ///
    /// The artifact is frozen: categories it has not seen are encoded as
    /// [`UNKNOWN_CODE`](crate::encoding::UNKNOWN_CODE) and the scaler keeps its
    /// statistics.
    pub fn artifact(mut self, artifact: FeatureArtifact) -> Self {
        self.artifact = Some(artifact);
        self
    }

    /// Set a progress reporter for receiving updates during processing.
    ///
    /// Use this when you need a custom progress reporter implementation.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// use rba_processing::{ProgressReporter, ProgressUpdate};
    /// use std::sync::Arc;
    ///
    /// struct MyReporter;
    ///
    /// impl ProgressReporter for MyReporter {
    ///     fn report(&self, update: ProgressUpdate) {
    ///         println!("{}: {}", update.stage.display_name(), update.message);
    ///     }
    /// }
    ///
    /// let pipeline = Pipeline::builder()
    ///     .progress_reporter(Arc::new(MyReporter))
    ///     .build()?;
    /// ```
    pub fn progress_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.progress_reporter = Some(reporter);
        self
    }

    /// Set a progress callback closure.
    ///
    /// This is a convenience method for simple progress handling.
    /// For more complex scenarios, use [`progress_reporter`](Self::progress_reporter).
    pub fn on_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(ProgressUpdate) + Send + Sync + 'static,
    {
        self.progress_reporter = Some(Arc::new(ClosureProgressReporter::new(callback)));
        self
    }

    /// Set a cancellation token for stopping the pipeline.
    ///
    /// Clone the token and call [`CancellationToken::cancel()`] from
    /// any thread to request cancellation. The pipeline checks the token
    /// between chunks and returns [`PipelineError::Cancelled`].
    pub fn cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancellation_token = Some(token);
        self
    }

    /// Build the pipeline.
    ///
    /// Returns an error if the configuration is invalid.
    pub fn build(self) -> std::result::Result<Pipeline, ConfigValidationError> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        Ok(Pipeline {
            config,
            schema: self.schema.unwrap_or_default(),
            artifact: self.artifact,
            progress_reporter: self.progress_reporter,
            cancellation_token: self.cancellation_token.unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::MemorySource;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    const HEADER: &str = "Login Timestamp,User ID,Round-Trip Time [ms],IP Address,Country";

    fn source(rows: &[&str]) -> MemorySource {
        let mut text = String::from(HEADER);
        for row in rows {
            text.push('\n');
            text.push_str(row);
        }
        text.push('\n');
        MemorySource::new("logins.csv", text)
    }

    fn config(dir: &TempDir) -> PipelineConfig {
        PipelineConfig::builder()
            .output_path(dir.path().join("out.csv"))
            .chunk_size(2)
            .build()
            .unwrap()
    }

    #[test]
    fn test_plan() {
        assert_eq!(plan(RunMode::Fit, true).len(), 2);
        assert_eq!(
            plan(RunMode::Fit, false),
            vec![Pass {
                phase: Phase::Fit,
                emit: true
            }]
        );
        assert_eq!(
            plan(RunMode::Apply, true),
            vec![Pass {
                phase: Phase::Transform,
                emit: true
            }]
        );
    }

    #[test]
    fn test_pipeline_builder_default() {
        let pipeline = Pipeline::builder().build().unwrap();
        assert_eq!(pipeline.mode(), RunMode::Fit);
        assert!(pipeline.config.normalize);
        assert_eq!(pipeline.schema, Schema::rba());
    }

    #[test]
    fn test_pipeline_builder_rejects_invalid_config() {
        let config = PipelineConfig {
            chunk_size: 0,
            ..Default::default()
        };
        assert!(Pipeline::builder().config(config).build().is_err());
    }

    #[test]
    fn test_check_cancelled() {
        let token = CancellationToken::new();

        let pipeline = Pipeline::builder()
            .cancellation_token(token.clone())
            .build()
            .unwrap();

        assert!(pipeline.check_cancelled().is_ok());

        token.cancel();
        assert!(matches!(
            pipeline.check_cancelled(),
            Err(PipelineError::Cancelled)
        ));
    }

    #[test]
    fn test_run_two_passes() {
        let dir = TempDir::new().unwrap();
        let stages = Arc::new(Mutex::new(Vec::new()));
        let stages_clone = stages.clone();

        let summary = Pipeline::builder()
            .config(config(&dir))
            .on_progress(move |update| stages_clone.lock().unwrap().push(update.stage))
            .build()
            .unwrap()
            .run(&source(&[
                "2020-02-03 12:43:30.772,u1,100,10.0.0.1,US",
                "2020-02-03 12:43:31.000,,200,10.0.0.2,US",
                "2020-02-03 12:43:32.000,u2,300,10.0.0.3,FR",
            ]))
            .unwrap();

        assert_eq!(summary.status, RunStatus::Completed);
        assert_eq!(summary.passes, 2);
        assert_eq!(summary.counters.records_read, 3);
        assert_eq!(summary.counters.records_written, 2);
        assert_eq!(summary.counters.dropped_by_column["User ID"], 1);
        assert_eq!(summary.category_cardinality["Country"], 2);
        assert!(dir.path().join("out.csv").exists());

        let stages = stages.lock().unwrap();
        assert!(stages.contains(&PipelineStage::Fitting));
        assert!(stages.contains(&PipelineStage::Transforming));
        assert_eq!(stages.last(), Some(&PipelineStage::Complete));
    }

    #[test]
    fn test_run_all_dropped_is_empty() {
        let dir = TempDir::new().unwrap();
        let summary = Pipeline::builder()
            .config(config(&dir))
            .build()
            .unwrap()
            .run(&source(&["not a time,u1,100,10.0.0.1,US"]))
            .unwrap();

        assert!(summary.is_empty());
        assert!(summary.output_path.is_none());
        assert!(!dir.path().join("out.csv").exists());
        assert!(!dir.path().join("out.csv.partial").exists());
    }

    #[test]
    fn test_cancelled_run_reports_cancelled() {
        let dir = TempDir::new().unwrap();
        let token = CancellationToken::new();
        token.cancel();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();

        let result = Pipeline::builder()
            .config(config(&dir))
            .cancellation_token(token)
            .on_progress(move |update| {
                if update.stage == PipelineStage::Cancelled {
                    calls_clone.fetch_add(1, Ordering::SeqCst);
                }
            })
            .build()
            .unwrap()
            .run(&source(&["2020-02-03 12:43:30.772,u1,100,10.0.0.1,US"]));

        assert!(matches!(result, Err(PipelineError::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!dir.path().join("out.csv").exists());
    }
}
