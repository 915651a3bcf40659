//! Error types for the feature pipeline.
//!
//! Only fatal conditions surface as [`PipelineError`]. Record-level problems
//! (missing or malformed required fields) and unseen categories at apply-time
//! are recovered locally and aggregated into the run summary counters.
//!
//! Errors are serializable so a caller can forward them as `{code, message}`.

use serde::Serialize;
use serde::ser::SerializeStruct;
use std::path::PathBuf;
use thiserror::Error;

/// The main error type for the feature pipeline.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Pipeline was cancelled by the caller.
    #[error("Pipeline cancelled")]
    Cancelled,

    /// Invalid configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The source header does not match the declared schema.
    #[error("Malformed header: {0}")]
    MalformedHeader(String),

    /// The source could not be read. Aborts the run.
    #[error("Ingestion failed in chunk {chunk} at byte {byte_offset}: {reason}")]
    Ingestion {
        chunk: u64,
        byte_offset: u64,
        reason: String,
    },

    /// The destination could not be written. Aborts the run.
    #[error("Failed to write '{}': {reason}", .path.display())]
    Write { path: PathBuf, reason: String },

    /// Column is not known to the codec or scaler.
    #[error("Column '{0}' not found")]
    ColumnNotFound(String),

    /// An imported feature artifact does not cover the resolved schema.
    #[error("Feature artifact does not match the schema: {0}")]
    ArtifactMismatch(String),

    /// Checkpoint could not be read or written.
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// Internal error (e.g., worker thread panic).
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO error wrapper.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Polars error wrapper.
    #[error("Polars error: {0}")]
    Polars(#[from] polars::error::PolarsError),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with context.
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<PipelineError>,
    },
}

impl PipelineError {
    /// Add context to an error.
    pub fn with_context(self, context: impl Into<String>) -> Self {
        PipelineError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Build a write error for `path`.
    pub fn write(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        PipelineError::Write {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Get a stable error code for callers.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Cancelled => "CANCELLED",
            Self::InvalidConfig(_) => "INVALID_CONFIG",
            Self::MalformedHeader(_) => "MALFORMED_HEADER",
            Self::Ingestion { .. } => "INGESTION_FAILED",
            Self::Write { .. } => "WRITE_FAILED",
            Self::ColumnNotFound(_) => "COLUMN_NOT_FOUND",
            Self::ArtifactMismatch(_) => "ARTIFACT_MISMATCH",
            Self::Checkpoint(_) => "CHECKPOINT_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
            Self::Io(_) => "IO_ERROR",
            Self::Polars(_) => "POLARS_ERROR",
            Self::Json(_) => "JSON_ERROR",
            Self::WithContext { source, .. } => source.error_code(),
        }
    }

    /// Check if this error represents a cancellation.
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::WithContext { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }

    /// Check if this error aborts the run because the source or destination failed.
    ///
    /// Configuration errors and cancellation are not counted as I/O failures;
    /// a caller may retry a fatal error, but fixing the input is required for the others.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Ingestion { .. } | Self::Write { .. } | Self::Io(_) => true,
            Self::WithContext { source, .. } => source.is_fatal(),
            _ => false,
        }
    }
}

/// Serialize as a struct with `code` and `message` fields.
impl Serialize for PipelineError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut state = serializer.serialize_struct("PipelineError", 2)?;
        state.serialize_field("code", &self.error_code())?;
        state.serialize_field("message", &self.to_string())?;
        state.end()
    }
}

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Extension trait for adding context to Results.
pub trait ResultExt<T> {
    /// Add context to an error result.
    fn context(self, context: impl Into<String>) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, std::io::Error> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| PipelineError::Io(e).with_context(context))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code() {
        assert_eq!(PipelineError::Cancelled.error_code(), "CANCELLED");
        assert_eq!(
            PipelineError::MalformedHeader("missing 'Country'".to_string()).error_code(),
            "MALFORMED_HEADER"
        );
        let err = PipelineError::Ingestion {
            chunk: 3,
            byte_offset: 1024,
            reason: "invalid UTF-8".to_string(),
        };
        assert_eq!(err.error_code(), "INGESTION_FAILED");
        assert!(err.to_string().contains("byte 1024"));
    }

    #[test]
    fn test_is_cancelled() {
        assert!(PipelineError::Cancelled.is_cancelled());
        assert!(
            PipelineError::Cancelled
                .with_context("During transform pass")
                .is_cancelled()
        );
        assert!(!PipelineError::Internal("x".to_string()).is_cancelled());
    }

    #[test]
    fn test_is_fatal() {
        assert!(PipelineError::write("/tmp/out.csv", "disk full").is_fatal());
        assert!(
            PipelineError::Ingestion {
                chunk: 0,
                byte_offset: 0,
                reason: "truncated".to_string()
            }
            .is_fatal()
        );
        assert!(!PipelineError::Cancelled.is_fatal());
        assert!(!PipelineError::InvalidConfig("chunk_size".to_string()).is_fatal());
    }

    #[test]
    fn test_error_serialization() {
        let error = PipelineError::ColumnNotFound("ASN".to_string());
        let json = serde_json::to_string(&error).unwrap();
        assert!(json.contains("COLUMN_NOT_FOUND"));
        assert!(json.contains("ASN"));
    }

    #[test]
    fn test_with_context() {
        let error = PipelineError::ColumnNotFound("Country".to_string())
            .with_context("During fit pass");
        assert!(error.to_string().contains("During fit pass"));
        assert_eq!(error.error_code(), "COLUMN_NOT_FOUND");
    }
}
