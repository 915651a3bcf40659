//! Atomic, append-only output of processed chunks.
//!
//! Rows are staged in `<output>.partial` next to the destination and the staging
//! file is renamed over the destination only by [`DatasetWriter::flush`]. A
//! destination path therefore only ever holds a complete artifact.
//!
//! Output is comma-separated whatever the source delimiter was.

mod frame;

pub use frame::chunk_to_frame;

use crate::error::{PipelineError, Result};
use crate::retry::RetryPolicy;
use crate::schema::OutputColumn;
use crate::types::ProcessedChunk;
use polars::prelude::*;
use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Suffix of the staging file.
pub const STAGING_SUFFIX: &str = ".partial";

/// Result of [`DatasetWriter::flush`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The destination now holds `rows` data rows.
    Committed { path: PathBuf, rows: u64 },
    /// Nothing was written; no destination was created or replaced.
    Empty,
}

/// Staging path of a destination file.
pub fn staging_path(destination: &Path) -> Result<PathBuf> {
    let mut name = destination
        .file_name()
        .ok_or_else(|| {
            PipelineError::InvalidConfig(format!(
                "output path '{}' has no file name",
                destination.display()
            ))
        })?
        .to_os_string();
    name.push(STAGING_SUFFIX);
    Ok(destination.with_file_name(name))
}

/// Writes processed chunks in arrival order under a fixed column schema.
pub struct DatasetWriter {
    destination: PathBuf,
    staging: PathBuf,
    columns: Vec<OutputColumn>,
    file: File,
    rows_written: u64,
    header_written: bool,
    retry: RetryPolicy,
}

impl DatasetWriter {
    /// Start a fresh staging file, discarding any leftover one.
    pub fn create(
        destination: impl Into<PathBuf>,
        columns: Vec<OutputColumn>,
        retry: RetryPolicy,
    ) -> Result<Self> {
        let destination = destination.into();
        let staging = staging_path(&destination)?;

        if let Some(parent) = destination.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|e| PipelineError::write(parent, e))?;
        }

        let file = retry
            .run("Creating staging file", || File::create(&staging))
            .map_err(|e| PipelineError::write(&staging, e))?;

        debug!("Staging output in {}", staging.display());

        Ok(Self {
            destination,
            staging,
            columns,
            file,
            rows_written: 0,
            header_written: false,
            retry,
        })
    }

    /// Reopen a staging file left by an interrupted run.
    ///
    /// Anything past `committed_bytes` was written after the last checkpoint and
    /// is cut off.
    pub fn resume(
        destination: impl Into<PathBuf>,
        columns: Vec<OutputColumn>,
        committed_bytes: u64,
        rows_written: u64,
        retry: RetryPolicy,
    ) -> Result<Self> {
        let destination = destination.into();
        let staging = staging_path(&destination)?;

        let mut file = retry
            .run("Reopening staging file", || {
                OpenOptions::new().read(true).write(true).open(&staging)
            })
            .map_err(|e| PipelineError::Checkpoint(format!(
                "cannot reopen '{}': {}",
                staging.display(),
                e
            )))?;

        let staged = file
            .metadata()
            .map_err(|e| PipelineError::write(&staging, e))?
            .len();
        if staged < committed_bytes {
            return Err(PipelineError::Checkpoint(format!(
                "staging file has {} bytes, checkpoint committed {}",
                staged, committed_bytes
            )));
        }
        if staged > committed_bytes {
            warn!(
                "Discarding {} uncommitted bytes from {}",
                staged - committed_bytes,
                staging.display()
            );
        }

        file.set_len(committed_bytes)
            .and_then(|_| file.seek(SeekFrom::End(0)))
            .map_err(|e| PipelineError::write(&staging, e))?;

        Ok(Self {
            destination,
            staging,
            columns,
            file,
            rows_written,
            header_written: committed_bytes > 0,
            retry,
        })
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    pub fn staging_path(&self) -> &Path {
        &self.staging
    }

    pub fn columns(&self) -> &[OutputColumn] {
        &self.columns
    }

    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }

    /// Append a chunk. The header goes out with the first non-empty chunk.
    pub fn append(&mut self, chunk: &ProcessedChunk) -> Result<()> {
        if chunk.is_empty() {
            return Ok(());
        }

        let mut df = chunk_to_frame(&self.columns, chunk)?;
        CsvWriter::new(&mut self.file)
            .include_header(!self.header_written)
            .with_separator(b',')
            .finish(&mut df)
            .map_err(|e| PipelineError::write(&self.staging, e))?;

        self.header_written = true;
        self.rows_written += chunk.len() as u64;
        debug!(
            "Appended chunk {} ({} rows) to {}",
            chunk.index,
            chunk.len(),
            self.staging.display()
        );
        Ok(())
    }

    /// Make the staged rows durable and return the staging file length.
    pub fn committed_bytes(&mut self) -> Result<u64> {
        self.file
            .flush()
            .and_then(|_| self.file.sync_data())
            .and_then(|_| self.file.metadata())
            .map(|m| m.len())
            .map_err(|e| PipelineError::write(&self.staging, e))
    }

    /// Publish the staged file at the destination.
    ///
    /// With no rows written the staging file is removed and
    /// [`WriteOutcome::Empty`] is returned instead.
    pub fn flush(mut self) -> Result<WriteOutcome> {
        if self.rows_written == 0 {
            let destination = self.destination.clone();
            self.abort()?;
            info!("No rows to write, {} left untouched", destination.display());
            return Ok(WriteOutcome::Empty);
        }

        self.file
            .flush()
            .and_then(|_| self.file.sync_all())
            .map_err(|e| PipelineError::write(&self.staging, e))?;

        let Self {
            destination,
            staging,
            file,
            rows_written,
            retry,
            ..
        } = self;
        drop(file);

        retry
            .run("Committing output", || fs::rename(&staging, &destination))
            .map_err(|e| PipelineError::write(&destination, e))?;

        info!(
            "Dataset saved: {} ({} rows)",
            destination.display(),
            rows_written
        );
        Ok(WriteOutcome::Committed {
            path: destination,
            rows: rows_written,
        })
    }

    /// Drop everything staged so far. The destination is never touched.
    pub fn abort(self) -> Result<()> {
        let Self { staging, file, .. } = self;
        drop(file);
        remove_staging(&staging)
    }
}

/// Remove a staging file if it exists.
pub(crate) fn remove_staging(staging: &Path) -> Result<()> {
    match fs::remove_file(staging) {
        Ok(()) => {
            debug!("Removed staging file {}", staging.display());
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(PipelineError::write(staging, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::OutputType;
    use crate::types::{FeatureValue, ProcessedRecord};
    use polars::io::csv::read::CsvReadOptions;
    use tempfile::TempDir;

    fn columns() -> Vec<OutputColumn> {
        vec![
            OutputColumn {
                name: "Country".to_string(),
                output_type: OutputType::Integer,
            },
            OutputColumn {
                name: "Round-Trip Time [ms]".to_string(),
                output_type: OutputType::Float,
            },
            OutputColumn {
                name: "Is Attack IP".to_string(),
                output_type: OutputType::Flag,
            },
        ]
    }

    fn chunk(index: u64, rows: &[(i64, f64, bool)]) -> ProcessedChunk {
        ProcessedChunk {
            index,
            records: rows
                .iter()
                .enumerate()
                .map(|(i, &(code, rtt, flag))| ProcessedRecord {
                    row: i as u64,
                    values: vec![
                        FeatureValue::Integer(code),
                        FeatureValue::Float(rtt),
                        FeatureValue::Flag(flag),
                    ],
                })
                .collect(),
        }
    }

    fn read_back(path: &Path) -> DataFrame {
        CsvReadOptions::default()
            .with_has_header(true)
            .try_into_reader_with_file_path(Some(path.to_path_buf()))
            .unwrap()
            .finish()
            .unwrap()
    }

    #[test]
    fn test_staging_path() {
        let path = staging_path(Path::new("out/data.csv")).unwrap();
        assert_eq!(path, PathBuf::from("out/data.csv.partial"));
        assert!(staging_path(Path::new("/")).is_err());
    }

    #[test]
    fn test_append_and_flush() {
        let dir = TempDir::new().unwrap();
        let destination = dir.path().join("nested/processed.csv");

        let mut writer =
            DatasetWriter::create(&destination, columns(), RetryPolicy::none()).unwrap();
        writer.append(&chunk(0, &[(0, 1.5, false), (1, -0.5, true)])).unwrap();
        writer.append(&ProcessedChunk::default()).unwrap();
        writer.append(&chunk(2, &[(0, 0.0, false)])).unwrap();

        assert!(!destination.exists());
        let staging = writer.staging_path().to_path_buf();

        let outcome = writer.flush().unwrap();
        assert_eq!(
            outcome,
            WriteOutcome::Committed {
                path: destination.clone(),
                rows: 3
            }
        );
        assert!(!staging.exists());

        let df = read_back(&destination);
        assert_eq!(df.height(), 3);
        assert_eq!(
            df.get_column_names_str(),
            vec!["Country", "Round-Trip Time [ms]", "Is Attack IP"]
        );

        let content = fs::read_to_string(&destination).unwrap();
        assert_eq!(content.matches("Country").count(), 1);
    }

    #[test]
    fn test_empty_run_creates_nothing() {
        let dir = TempDir::new().unwrap();
        let destination = dir.path().join("processed.csv");

        let writer = DatasetWriter::create(&destination, columns(), RetryPolicy::none()).unwrap();
        let staging = writer.staging_path().to_path_buf();
        assert!(staging.exists());

        assert_eq!(writer.flush().unwrap(), WriteOutcome::Empty);
        assert!(!destination.exists());
        assert!(!staging.exists());
    }

    #[test]
    fn test_abort_keeps_previous_artifact() {
        let dir = TempDir::new().unwrap();
        let destination = dir.path().join("processed.csv");
        fs::write(&destination, "previous\n").unwrap();

        let mut writer =
            DatasetWriter::create(&destination, columns(), RetryPolicy::none()).unwrap();
        writer.append(&chunk(0, &[(0, 1.0, true)])).unwrap();
        writer.abort().unwrap();

        assert_eq!(fs::read_to_string(&destination).unwrap(), "previous\n");
        assert!(!staging_path(&destination).unwrap().exists());
    }

    #[test]
    fn test_resume_truncates_uncommitted_bytes() {
        let dir = TempDir::new().unwrap();
        let destination = dir.path().join("processed.csv");

        let mut writer =
            DatasetWriter::create(&destination, columns(), RetryPolicy::none()).unwrap();
        writer.append(&chunk(0, &[(0, 1.0, true)])).unwrap();
        let committed = writer.committed_bytes().unwrap();
        writer.append(&chunk(1, &[(5, 5.0, false)])).unwrap();
        drop(writer);

        let mut resumed = DatasetWriter::resume(
            &destination,
            columns(),
            committed,
            1,
            RetryPolicy::none(),
        )
        .unwrap();
        resumed.append(&chunk(1, &[(1, 2.0, false)])).unwrap();
        resumed.flush().unwrap();

        let df = read_back(&destination);
        assert_eq!(df.height(), 2);
        let codes: Vec<Option<i64>> = df.column("Country").unwrap().i64().unwrap().into_iter().collect();
        assert_eq!(codes, vec![Some(0), Some(1)]);
    }

    #[test]
    fn test_resume_rejects_short_staging_file() {
        let dir = TempDir::new().unwrap();
        let destination = dir.path().join("processed.csv");
        fs::write(staging_path(&destination).unwrap(), "abc").unwrap();

        let result = DatasetWriter::resume(&destination, columns(), 100, 1, RetryPolicy::none());
        assert!(matches!(result, Err(PipelineError::Checkpoint(_))));
    }
}
