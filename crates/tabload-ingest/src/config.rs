// Ingestion run configuration

use crate::error::{IngestError, Result};
use crate::schema::ColumnCoercion;
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgConnectOptions;
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;
use tabload_common::checksum::validate_hex_digest;

pub const DEFAULT_CHUNK_SIZE: usize = 100_000;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_TIMEOUT_SECS: u64 = 600;
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 2_000;
pub const MAX_RETRY_BACKOFF_MS: u64 = 60_000;
pub const DEFAULT_APPEND_RETRIES: u32 = 3;
pub const DEFAULT_PIPELINE_DEPTH: usize = 1;
pub const MAX_PIPELINE_DEPTH: usize = 2;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_PG_PORT: u16 = 5432;

/// Exponential backoff before retry number `attempt` (1-based), capped
pub fn backoff_delay(base_ms: u64, attempt: u32) -> Duration {
    let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
    Duration::from_millis(base_ms.saturating_mul(factor).min(MAX_RETRY_BACKOFF_MS))
}

/// PostgreSQL connection parameters
#[derive(Clone, Serialize, Deserialize)]
pub struct DestinationConfig {
    pub user: String,
    #[serde(skip_serializing, default)]
    pub password: String,
    pub host: String,
    pub port: u16,
    pub database: String,
}

impl DestinationConfig {
    pub fn new(
        user: impl Into<String>,
        password: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        database: impl Into<String>,
    ) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
            host: host.into(),
            port,
            database: database.into(),
        }
    }

    pub fn connect_options(&self) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .password(&self.password)
            .database(&self.database)
    }

    /// Connection URL with the password masked, for logs and diagnostics
    pub fn redacted_url(&self) -> String {
        format!(
            "postgresql://{}:***@{}:{}/{}",
            self.user, self.host, self.port, self.database
        )
    }

    pub fn validate(&self) -> Result<()> {
        if self.user.is_empty() {
            return Err(IngestError::Config("database user cannot be empty".to_string()));
        }
        if self.host.is_empty() {
            return Err(IngestError::Config("database host cannot be empty".to_string()));
        }
        if self.database.is_empty() {
            return Err(IngestError::Config("database name cannot be empty".to_string()));
        }
        if self.port == 0 {
            return Err(IngestError::Config("database port must be greater than 0".to_string()));
        }
        Ok(())
    }
}

impl std::fmt::Debug for DestinationConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DestinationConfig")
            .field("user", &self.user)
            .field("password", &"***")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .finish()
    }
}

/// Configuration for one ingestion run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Destination table, optionally `schema.table`
    pub table: String,

    /// Rows per batch
    pub chunk_size: usize,

    /// Explicit column types; every other column is text or inferred
    pub coercions: Vec<ColumnCoercion>,

    /// Rows sampled for type inference (0 = disabled)
    pub infer_rows: usize,

    /// Where fetched and converted artifacts are written
    pub data_dir: PathBuf,

    /// Download attempts before giving up
    pub max_retries: u32,

    /// HTTP timeout per attempt in seconds
    pub timeout_secs: u64,

    /// Base delay for exponential backoff in milliseconds
    pub retry_backoff_ms: u64,

    /// Extra attempts for a batch append after a transient database error
    pub append_retries: u32,

    /// Batches buffered between the reader and the appender
    pub pipeline_depth: usize,

    /// Destination connect timeout in seconds
    pub connect_timeout_secs: u64,

    /// Expected SHA-256 of the fetched file
    pub expected_sha256: Option<String>,

    /// Draw a download progress bar on stderr
    pub show_progress: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        IngestConfig {
            table: String::new(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            coercions: ColumnCoercion::defaults(),
            infer_rows: 0,
            data_dir: PathBuf::from("."),
            max_retries: DEFAULT_MAX_RETRIES,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            retry_backoff_ms: DEFAULT_RETRY_BACKOFF_MS,
            append_retries: DEFAULT_APPEND_RETRIES,
            pipeline_depth: DEFAULT_PIPELINE_DEPTH,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            expected_sha256: None,
            show_progress: false,
        }
    }
}

impl IngestConfig {
    /// Create new config with builder pattern
    pub fn builder() -> IngestConfigBuilder {
        IngestConfigBuilder::default()
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.table.trim().is_empty() {
            return Err(IngestError::Config("table name cannot be empty".to_string()));
        }

        if self.chunk_size == 0 {
            return Err(IngestError::Config("chunk size must be greater than 0".to_string()));
        }

        if self.max_retries == 0 {
            return Err(IngestError::Config("max retries must be at least 1".to_string()));
        }

        if self.timeout_secs == 0 {
            return Err(IngestError::Config("timeout must be greater than 0".to_string()));
        }

        if self.connect_timeout_secs == 0 {
            return Err(IngestError::Config(
                "connect timeout must be greater than 0".to_string(),
            ));
        }

        if !(1..=MAX_PIPELINE_DEPTH).contains(&self.pipeline_depth) {
            return Err(IngestError::Config(format!(
                "pipeline depth must be between 1 and {}",
                MAX_PIPELINE_DEPTH
            )));
        }

        let mut seen = HashSet::new();
        for coercion in &self.coercions {
            if !seen.insert(coercion.column.as_str()) {
                return Err(IngestError::Config(format!(
                    "column '{}' is coerced more than once",
                    coercion.column
                )));
            }
        }

        if let Some(digest) = &self.expected_sha256 {
            validate_hex_digest(digest)?;
        }

        Ok(())
    }
}

/// Builder for IngestConfig
#[derive(Debug, Default)]
pub struct IngestConfigBuilder {
    table: Option<String>,
    chunk_size: Option<usize>,
    coercions: Option<Vec<ColumnCoercion>>,
    infer_rows: Option<usize>,
    data_dir: Option<PathBuf>,
    max_retries: Option<u32>,
    timeout_secs: Option<u64>,
    retry_backoff_ms: Option<u64>,
    append_retries: Option<u32>,
    pipeline_depth: Option<usize>,
    connect_timeout_secs: Option<u64>,
    expected_sha256: Option<String>,
    show_progress: Option<bool>,
}

impl IngestConfigBuilder {
    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    pub fn chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = Some(size);
        self
    }

    pub fn coercions(mut self, coercions: Vec<ColumnCoercion>) -> Self {
        self.coercions = Some(coercions);
        self
    }

    pub fn infer_rows(mut self, rows: usize) -> Self {
        self.infer_rows = Some(rows);
        self
    }

    pub fn data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(dir.into());
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.retry_backoff_ms = Some(ms);
        self
    }

    pub fn append_retries(mut self, retries: u32) -> Self {
        self.append_retries = Some(retries);
        self
    }

    pub fn pipeline_depth(mut self, depth: usize) -> Self {
        self.pipeline_depth = Some(depth);
        self
    }

    pub fn connect_timeout_secs(mut self, secs: u64) -> Self {
        self.connect_timeout_secs = Some(secs);
        self
    }

    pub fn expected_sha256(mut self, digest: impl Into<String>) -> Self {
        self.expected_sha256 = Some(digest.into());
        self
    }

    pub fn show_progress(mut self, show: bool) -> Self {
        self.show_progress = Some(show);
        self
    }

    pub fn build(self) -> IngestConfig {
        let default = IngestConfig::default();
        IngestConfig {
            table: self.table.unwrap_or(default.table),
            chunk_size: self.chunk_size.unwrap_or(default.chunk_size),
            coercions: self.coercions.unwrap_or(default.coercions),
            infer_rows: self.infer_rows.unwrap_or(default.infer_rows),
            data_dir: self.data_dir.unwrap_or(default.data_dir),
            max_retries: self.max_retries.unwrap_or(default.max_retries),
            timeout_secs: self.timeout_secs.unwrap_or(default.timeout_secs),
            retry_backoff_ms: self.retry_backoff_ms.unwrap_or(default.retry_backoff_ms),
            append_retries: self.append_retries.unwrap_or(default.append_retries),
            pipeline_depth: self.pipeline_depth.unwrap_or(default.pipeline_depth),
            connect_timeout_secs: self
                .connect_timeout_secs
                .unwrap_or(default.connect_timeout_secs),
            expected_sha256: self.expected_sha256.or(default.expected_sha256),
            show_progress: self.show_progress.unwrap_or(default.show_progress),
        }
    }
}
