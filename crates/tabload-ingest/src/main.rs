//! tabload - load a remote CSV or Parquet file into a PostgreSQL table

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tabload_common::logging::{init_logging, LogConfig, LogLevel};
use tabload_ingest::config::{
    DestinationConfig, IngestConfig, DEFAULT_APPEND_RETRIES, DEFAULT_CHUNK_SIZE,
    DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_MAX_RETRIES, DEFAULT_PIPELINE_DEPTH,
    DEFAULT_TIMEOUT_SECS,
};
use tabload_ingest::progress::ProgressReporter;
use tabload_ingest::schema::ColumnCoercion;
use tabload_ingest::Pipeline;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "tabload-ingest")]
#[command(author, version, about = "Ingest a CSV or Parquet file into PostgreSQL")]
struct Cli {
    /// Database user
    #[arg(long, env = "PGUSER")]
    user: String,

    /// Database password
    #[arg(long, env = "PGPASSWORD", hide_env_values = true)]
    password: String,

    /// Database host
    #[arg(long, env = "PGHOST")]
    host: String,

    /// Database port
    #[arg(long, env = "PGPORT")]
    port: u16,

    /// Database name
    #[arg(long, env = "PGDATABASE")]
    db: String,

    /// Destination table (replaced on every run)
    #[arg(long, alias = "table_name", env = "TABLOAD_TABLE")]
    table_name: String,

    /// Source file URL (.csv, .csv.gz, .parquet)
    #[arg(long, env = "TABLOAD_URL")]
    url: String,

    /// Rows per batch
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
    chunk_size: usize,

    /// Column type override as COLUMN:TYPE; replaces the default list
    #[arg(long = "coerce", value_name = "COLUMN:TYPE")]
    coerce: Vec<ColumnCoercion>,

    /// Do not coerce the taxi pickup/dropoff columns to timestamps
    #[arg(long)]
    no_default_coercions: bool,

    /// Rows sampled to infer column types (0 keeps untyped columns as text)
    #[arg(long, default_value_t = 0)]
    infer_rows: usize,

    /// Directory for downloaded and converted files
    #[arg(long, default_value = ".")]
    data_dir: PathBuf,

    /// Download attempts
    #[arg(long, default_value_t = DEFAULT_MAX_RETRIES)]
    max_retries: u32,

    /// HTTP timeout per download attempt in seconds
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_SECS)]
    timeout_secs: u64,

    /// Extra attempts per batch after a transient database error
    #[arg(long, default_value_t = DEFAULT_APPEND_RETRIES)]
    append_retries: u32,

    /// Batches read ahead while the previous one is inserted (1 or 2)
    #[arg(long, default_value_t = DEFAULT_PIPELINE_DEPTH)]
    pipeline_depth: usize,

    /// Database connect timeout in seconds
    #[arg(long, default_value_t = DEFAULT_CONNECT_TIMEOUT_SECS)]
    connect_timeout_secs: u64,

    /// Expected SHA-256 of the downloaded file
    #[arg(long)]
    sha256: Option<String>,

    /// Hide the download progress bar
    #[arg(long)]
    no_progress: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn ingest_config(&self) -> IngestConfig {
        let coercions = if !self.coerce.is_empty() {
            self.coerce.clone()
        } else if self.no_default_coercions {
            Vec::new()
        } else {
            ColumnCoercion::defaults()
        };

        let mut builder = IngestConfig::builder()
            .table(self.table_name.clone())
            .chunk_size(self.chunk_size)
            .coercions(coercions)
            .infer_rows(self.infer_rows)
            .data_dir(self.data_dir.clone())
            .max_retries(self.max_retries)
            .timeout_secs(self.timeout_secs)
            .append_retries(self.append_retries)
            .pipeline_depth(self.pipeline_depth)
            .connect_timeout_secs(self.connect_timeout_secs)
            .show_progress(!self.no_progress);

        if let Some(digest) = &self.sha256 {
            builder = builder.expected_sha256(digest.clone());
        }

        builder.build()
    }

    fn destination(&self) -> DestinationConfig {
        DestinationConfig::new(
            self.user.clone(),
            self.password.clone(),
            self.host.clone(),
            self.port,
            self.db.clone(),
        )
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Initialize logging based on verbose flag
    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    // Environment variables take precedence
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("tabload-ingest")
        .build()
        .merge_env()?;

    let _guard = init_logging(&log_config)?;

    let pipeline = Pipeline::new(cli.ingest_config(), cli.destination());

    match pipeline.run(&cli.url, ProgressReporter::stdout()).await {
        Ok(report) => {
            info!(
                rows = report.summary.rows,
                batches = report.summary.batches,
                "Ingestion complete"
            );
            Ok(ExitCode::SUCCESS)
        },
        Err(e) => {
            error!(phase = %e.phase, "Ingestion failed: {}", e.source);
            eprintln!("tabload-ingest: {} phase failed: {}", e.phase, e.source);
            Ok(ExitCode::FAILURE)
        },
    }
}
