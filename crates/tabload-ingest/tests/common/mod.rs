//! Shared helpers for tabload-ingest integration tests
//!
//! - [`MemorySink`]: in-memory [`TableSink`] that records every call
//! - [`Captured`]: writer that keeps progress output for assertions
//! - Fixture writers for trip-record CSV files
//! - [`TestPostgres`]: PostgreSQL container for the sink tests
//!
//! Container tests are ignored by default:
//!
//! ```text
//! cargo test -p tabload-ingest -- --ignored
//! ```

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;
use tabload_ingest::batch::{CellValue, RowBatch};
use tabload_ingest::config::DestinationConfig;
use tabload_ingest::error::Result as IngestResult;
use tabload_ingest::progress::ProgressReporter;
use tabload_ingest::schema::TableSchema;
use tabload_ingest::sink::TableSink;
use testcontainers::core::IntoContainerPort;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use tracing::{debug, info};

// ============================================================================
// Tracing
// ============================================================================

static TRACING: Once = Once::new();

/// Route test logs through the test harness writer
pub fn init_test_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    });
}

// ============================================================================
// In-memory sink
// ============================================================================

/// Table contents held by [`MemorySink`]
#[derive(Debug, Clone)]
pub struct MemoryTable {
    pub schema: TableSchema,
    pub rows: Vec<Vec<CellValue>>,
}

/// [`TableSink`] backed by a map of tables
#[derive(Debug, Default)]
pub struct MemorySink {
    pub tables: HashMap<String, MemoryTable>,
    /// Batch indexes in the order they were appended
    pub appended_batches: Vec<usize>,
    pub replace_calls: usize,
    pub closed: bool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sink that already holds `rows` in `table`
    pub fn with_existing(table: &str, schema: TableSchema, rows: Vec<Vec<CellValue>>) -> Self {
        let mut sink = Self::default();
        sink.tables
            .insert(table.to_string(), MemoryTable { schema, rows });
        sink
    }

    pub fn table(&self, name: &str) -> &MemoryTable {
        self.tables
            .get(name)
            .unwrap_or_else(|| panic!("table {} does not exist", name))
    }

    pub fn row_count(&self, name: &str) -> usize {
        self.table(name).rows.len()
    }
}

#[async_trait]
impl TableSink for MemorySink {
    async fn replace_table(&mut self, schema: &TableSchema) -> IngestResult<()> {
        self.replace_calls += 1;
        self.tables.insert(
            schema.table.clone(),
            MemoryTable {
                schema: schema.clone(),
                rows: Vec::new(),
            },
        );
        Ok(())
    }

    async fn append(&mut self, schema: &TableSchema, batch: &RowBatch) -> IngestResult<u64> {
        let table = self.tables.get_mut(&schema.table).ok_or_else(|| {
            tabload_ingest::IngestError::SchemaMismatch(format!("no table {}", schema.table))
        })?;
        table.rows.extend(batch.rows.iter().cloned());
        self.appended_batches.push(batch.index);
        Ok(batch.len() as u64)
    }

    async fn reset(&mut self) -> IngestResult<()> {
        Ok(())
    }

    async fn close(&mut self) -> IngestResult<()> {
        self.closed = true;
        Ok(())
    }
}

// ============================================================================
// Progress capture
// ============================================================================

/// Clonable writer whose contents can be read back
#[derive(Clone, Default)]
pub struct Captured(Arc<Mutex<Vec<u8>>>);

impl Captured {
    pub fn reporter(&self) -> ProgressReporter {
        ProgressReporter::new(Box::new(self.clone()))
    }

    pub fn lines(&self) -> Vec<String> {
        let bytes = self.0.lock().unwrap().clone();
        String::from_utf8(bytes)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }
}

impl Write for Captured {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

// ============================================================================
// Fixtures
// ============================================================================

pub const TRIP_HEADER: &str =
    "VendorID,tpep_pickup_datetime,tpep_dropoff_datetime,passenger_count,trip_distance,store_and_fwd_flag,total_amount";

/// Write a trip-record CSV with `rows` data rows
///
/// Row `n` (1-based) gets `trip_distance = n`. When `bad_pickup_row` is set,
/// that row's pickup timestamp is unparseable.
pub fn write_trip_csv(path: &Path, rows: usize, bad_pickup_row: Option<usize>) -> PathBuf {
    let file = std::fs::File::create(path).unwrap();
    let mut out = std::io::BufWriter::new(file);
    writeln!(out, "{}", TRIP_HEADER).unwrap();

    for n in 1..=rows {
        let pickup = if Some(n) == bad_pickup_row {
            "not-a-timestamp".to_string()
        } else {
            format!("2021-01-01 00:{:02}:{:02}", (n / 60) % 60, n % 60)
        };
        let passengers = if n % 10 == 0 { String::new() } else { (n % 4).to_string() };
        writeln!(
            out,
            "{},{},2021-01-01 01:00:00,{},{},N,{}.50",
            1 + n % 2,
            pickup,
            passengers,
            n,
            n
        )
        .unwrap();
    }

    out.flush().unwrap();
    path.to_path_buf()
}

pub fn file_uri(path: &Path) -> String {
    url::Url::from_file_path(path).unwrap().to_string()
}

/// Collect `trip_distance` (column 4, text) back as numbers
pub fn trip_distances(rows: &[Vec<CellValue>]) -> Vec<usize> {
    rows.iter()
        .map(|row| match &row[4] {
            CellValue::Text(v) => v.parse().unwrap(),
            other => panic!("unexpected trip_distance cell {:?}", other),
        })
        .collect()
}

/// Destination that refuses connections, for runs that must never connect
pub fn unreachable_destination() -> DestinationConfig {
    DestinationConfig::new("nobody", "nothing", "127.0.0.1", 1, "none")
}

// ============================================================================
// PostgreSQL Test Container
// ============================================================================

/// PostgreSQL test container wrapper
pub struct TestPostgres {
    container: ContainerAsync<Postgres>,
    pool: PgPool,
    destination: DestinationConfig,
}

impl TestPostgres {
    /// Start a new PostgreSQL container
    pub async fn start() -> Result<Self> {
        info!("Starting PostgreSQL test container...");

        let container = Postgres::default()
            .with_tag("16-alpine")
            .start()
            .await
            .context("Failed to start PostgreSQL container")?;

        let host = container
            .get_host()
            .await
            .context("Failed to get container host")?;
        let port = container
            .get_host_port_ipv4(5432.tcp())
            .await
            .context("Failed to get container port")?;

        let destination =
            DestinationConfig::new("postgres", "postgres", host.to_string(), port, "postgres");
        debug!("PostgreSQL connection: {}", destination.redacted_url());

        let pool = PgPoolOptions::new()
            .max_connections(2)
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(destination.connect_options())
            .await
            .context("Failed to connect to PostgreSQL")?;

        Ok(Self {
            container,
            pool,
            destination,
        })
    }

    /// Get a reference to the database pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn destination(&self) -> &DestinationConfig {
        &self.destination
    }

    pub async fn count(&self, table: &str) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}", tabload_ingest::schema::quote_ident(table));
        let count: (i64,) = sqlx::query_as(&sql).fetch_one(&self.pool).await?;
        Ok(count.0)
    }
}
