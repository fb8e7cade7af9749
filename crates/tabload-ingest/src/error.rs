//! Error types for the ingestion pipeline

use crate::schema::ColumnType;
use tabload_common::CommonError;

/// Result type for ingestion operations
pub type Result<T> = std::result::Result<T, IngestError>;

/// Everything that can end an ingestion run
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("Source unreachable: {uri}: {reason}")]
    UnreachableSource { uri: String, reason: String },

    #[error("Unsupported source format: {0}")]
    UnsupportedFormat(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error(
        "Cannot coerce value {value:?} in column '{column}' to {target} (batch {batch}, row {row})"
    )]
    Coercion {
        batch: usize,
        row: usize,
        column: String,
        value: String,
        target: ColumnType,
    },

    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl From<CommonError> for IngestError {
    fn from(err: CommonError) -> Self {
        match err {
            CommonError::ChecksumMismatch { expected, actual } => {
                IngestError::ChecksumMismatch { expected, actual }
            },
            CommonError::Io(e) => IngestError::Io(e),
            other => IngestError::Config(other.to_string()),
        }
    }
}

impl IngestError {
    /// Whether retrying the same database operation may succeed
    ///
    /// Only connection-level failures qualify. Constraint violations,
    /// type errors and everything outside the database never do.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            IngestError::Database(
                sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::WorkerCrashed
            )
        )
    }
}

/// Pipeline stage a run failed in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Validate,
    Fetch,
    Normalize,
    Connect,
    Schema,
    Load,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Phase::Validate => "validate",
            Phase::Fetch => "fetch",
            Phase::Normalize => "normalize",
            Phase::Connect => "connect",
            Phase::Schema => "schema",
            Phase::Load => "load",
        };
        f.write_str(name)
    }
}

/// A failed run: the error plus the phase it surfaced in
#[derive(Debug, thiserror::Error)]
#[error("{phase} failed: {source}")]
pub struct RunError {
    pub phase: Phase,
    #[source]
    pub source: IngestError,
}

impl RunError {
    pub fn new(phase: Phase, source: IngestError) -> Self {
        Self { phase, source }
    }
}

/// Attach a [`Phase`] to a fallible step
pub(crate) trait InPhase<T> {
    fn in_phase(self, phase: Phase) -> std::result::Result<T, RunError>;
}

impl<T> InPhase<T> for Result<T> {
    fn in_phase(self, phase: Phase) -> std::result::Result<T, RunError> {
        self.map_err(|e| RunError::new(phase, e))
    }
}
