// Ingestion pipeline: fetch -> normalize -> schema -> load

use crate::config::{DestinationConfig, IngestConfig};
use crate::error::{InPhase, Phase, RunError};
use crate::loader::{ChunkedLoader, LoadSummary, LoaderOptions, LoaderState};
use crate::normalize::{self, CanonicalArtifact};
use crate::progress::ProgressReporter;
use crate::schema::{SchemaInitializer, TableSchema};
use crate::sink::{PostgresSink, TableSink};
use crate::source::{SourceDescriptor, SourceFetcher};
use std::sync::Arc;
use tracing::{info, warn};

/// Result of running the pipeline
#[derive(Debug, Clone)]
pub struct RunReport {
    pub artifact: CanonicalArtifact,
    pub schema: TableSchema,
    pub summary: LoadSummary,
}

impl RunReport {
    /// Whether the loader drained the whole artifact
    pub fn is_success(&self) -> bool {
        self.summary.final_state == LoaderState::Drained
    }

    /// Get a summary message
    pub fn summary_line(&self) -> String {
        format!(
            "Loaded {} rows in {} batches into {} from {}",
            self.summary.rows,
            self.summary.batches,
            self.schema.table,
            self.artifact.path.display()
        )
    }
}

/// Single-table ingestion run
pub struct Pipeline {
    config: IngestConfig,
    destination: DestinationConfig,
}

impl Pipeline {
    pub fn new(config: IngestConfig, destination: DestinationConfig) -> Self {
        Self {
            config,
            destination,
        }
    }

    /// Run against PostgreSQL
    ///
    /// The source is validated before the connection is opened, so an
    /// unsupported format never touches the network or the database.
    pub async fn run(&self, uri: &str, reporter: ProgressReporter) -> Result<RunReport, RunError> {
        let source = self.validate(uri)?;

        info!("Phase 1: Connecting to {}", self.destination.redacted_url());
        let mut sink = PostgresSink::connect(&self.destination, self.config.connect_timeout())
            .await
            .in_phase(Phase::Connect)?;

        self.drive(&source, &mut sink, reporter).await
    }

    /// Run against an already-open sink, which is closed afterwards
    pub async fn run_with_sink<S: TableSink + ?Sized>(
        &self,
        uri: &str,
        sink: &mut S,
        reporter: ProgressReporter,
    ) -> Result<RunReport, RunError> {
        let source = self.validate(uri)?;
        self.drive(&source, sink, reporter).await
    }

    fn validate(&self, uri: &str) -> Result<SourceDescriptor, RunError> {
        self.config.validate().in_phase(Phase::Validate)?;
        self.destination.validate().in_phase(Phase::Validate)?;
        let source = SourceDescriptor::from_uri(uri).in_phase(Phase::Validate)?;

        info!(
            "Starting ingestion of {} ({:?}, {:?}) into {}",
            source.file_name, source.format, source.compression, self.config.table
        );
        Ok(source)
    }

    /// Execute the stages, then close the sink whatever the outcome
    async fn drive<S: TableSink + ?Sized>(
        &self,
        source: &SourceDescriptor,
        sink: &mut S,
        reporter: ProgressReporter,
    ) -> Result<RunReport, RunError> {
        let result = self.stages(source, sink, reporter).await;
        let closed = sink.close().await;

        match (result, closed) {
            (Ok(report), Ok(())) => Ok(report),
            (Ok(report), Err(e)) => {
                warn!("Run succeeded but closing the destination failed: {}", e);
                Ok(report)
            },
            (Err(run_err), closed) => {
                if let Err(e) = closed {
                    warn!("Closing the destination after a failed run also failed: {}", e);
                }
                Err(run_err)
            },
        }
    }

    async fn stages<S: TableSink + ?Sized>(
        &self,
        source: &SourceDescriptor,
        sink: &mut S,
        reporter: ProgressReporter,
    ) -> Result<RunReport, RunError> {
        info!("Phase 2: Fetching {}", source.uri);
        let fetcher = SourceFetcher::new(&self.config).in_phase(Phase::Fetch)?;
        let fetched = fetcher
            .fetch(source, &self.config.data_dir)
            .await
            .in_phase(Phase::Fetch)?;

        info!("Phase 3: Normalizing {}", fetched.display());
        let artifact = normalize::normalize(source, &fetched)
            .await
            .in_phase(Phase::Normalize)?;

        info!("Phase 4: Recreating table {}", self.config.table);
        let schema = SchemaInitializer::new(self.config.coercions.clone(), self.config.infer_rows)
            .initialize(sink, &artifact, &self.config.table)
            .await
            .in_phase(Phase::Schema)?;

        info!(
            "Phase 5: Loading {} in batches of {}",
            artifact.path.display(),
            self.config.chunk_size
        );
        let schema = Arc::new(schema);
        let mut loader = ChunkedLoader::new(LoaderOptions::from(&self.config), reporter);
        let summary = loader
            .load(sink, &artifact, Arc::clone(&schema))
            .await
            .in_phase(Phase::Load)?;

        let report = RunReport {
            artifact,
            schema: Arc::unwrap_or_clone(schema),
            summary,
        };
        info!("{}", report.summary_line());

        Ok(report)
    }
}
