//! Chunked transfer of the canonical artifact into the destination table
//!
//! A blocking task reads and coerces batches and hands them over a bounded
//! channel; the async side appends each one in its own transaction and
//! reports its timing. The channel depth bounds how many batches are held
//! in memory at once.

use crate::batch::{BatchReader, RowBatch};
use crate::config::{backoff_delay, IngestConfig};
use crate::error::{IngestError, Result};
use crate::normalize::CanonicalArtifact;
use crate::progress::{ProgressRecord, ProgressReporter};
use crate::schema::TableSchema;
use crate::sink::TableSink;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

/// Where the loader is in its per-batch cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoaderState {
    Idle,
    /// Waiting for the next coerced batch from the reader
    FetchingBatch,
    /// Taking delivery of a batch result from the reader
    ///
    /// Cells are coerced on the reader thread as each batch is built. A
    /// coercion failure travels down the channel as an `Err` item and is
    /// raised in this state, after every earlier batch has been appended.
    Coercing,
    Appending,
    Reporting,
    Drained,
    Failed,
}

/// Outcome of a completed load
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadSummary {
    pub batches: usize,
    pub rows: u64,
    pub final_state: LoaderState,
}

#[derive(Debug, Clone, Copy)]
pub struct LoaderOptions {
    pub chunk_size: usize,
    pub pipeline_depth: usize,
    pub append_retries: u32,
    pub retry_backoff_ms: u64,
}

impl From<&IngestConfig> for LoaderOptions {
    fn from(config: &IngestConfig) -> Self {
        LoaderOptions {
            chunk_size: config.chunk_size,
            pipeline_depth: config.pipeline_depth,
            append_retries: config.append_retries,
            retry_backoff_ms: config.retry_backoff_ms,
        }
    }
}

pub struct ChunkedLoader {
    options: LoaderOptions,
    reporter: ProgressReporter,
    state: LoaderState,
    committed_batches: usize,
    committed_rows: u64,
}

impl ChunkedLoader {
    pub fn new(options: LoaderOptions, reporter: ProgressReporter) -> Self {
        ChunkedLoader {
            options,
            reporter,
            state: LoaderState::Idle,
            committed_batches: 0,
            committed_rows: 0,
        }
    }

    pub fn state(&self) -> LoaderState {
        self.state
    }

    /// Stream every row of `artifact` into the sink
    ///
    /// Batches committed before a failure stay in the table.
    pub async fn load<S: TableSink + ?Sized>(
        &mut self,
        sink: &mut S,
        artifact: &CanonicalArtifact,
        schema: Arc<TableSchema>,
    ) -> Result<LoadSummary> {
        self.committed_batches = 0;
        self.committed_rows = 0;

        match self.transfer(sink, artifact, schema).await {
            Ok(()) => {
                info!(
                    batches = self.committed_batches,
                    rows = self.committed_rows,
                    "Load drained"
                );
                Ok(LoadSummary {
                    batches: self.committed_batches,
                    rows: self.committed_rows,
                    final_state: self.state,
                })
            },
            Err(e) => {
                self.transition(LoaderState::Failed);
                error!(
                    committed_batches = self.committed_batches,
                    committed_rows = self.committed_rows,
                    "Load aborted: {}",
                    e
                );
                Err(e)
            },
        }
    }

    async fn transfer<S: TableSink + ?Sized>(
        &mut self,
        sink: &mut S,
        artifact: &CanonicalArtifact,
        schema: Arc<TableSchema>,
    ) -> Result<()> {
        let (tx, mut rx) = mpsc::channel::<Result<RowBatch>>(self.options.pipeline_depth.max(1));

        let path = artifact.path.clone();
        let reader_schema = Arc::clone(&schema);
        let chunk_size = self.options.chunk_size;
        let producer = tokio::task::spawn_blocking(move || {
            let reader = match BatchReader::open(&path, reader_schema, chunk_size) {
                Ok(reader) => reader,
                Err(e) => {
                    let _ = tx.blocking_send(Err(e));
                    return;
                },
            };

            for item in reader {
                if tx.blocking_send(item).is_err() {
                    // receiver dropped after a failure downstream
                    break;
                }
            }
        });

        let consumed = self.consume(sink, &schema, &mut rx).await;

        drop(rx);
        let joined = producer.await;

        consumed?;
        joined?;
        Ok(())
    }

    async fn consume<S: TableSink + ?Sized>(
        &mut self,
        sink: &mut S,
        schema: &TableSchema,
        rx: &mut mpsc::Receiver<Result<RowBatch>>,
    ) -> Result<()> {
        let expected_columns = schema.column_names();

        loop {
            self.transition(LoaderState::FetchingBatch);
            let started = Instant::now();

            let Some(item) = rx.recv().await else {
                break;
            };

            self.transition(LoaderState::Coercing);
            let batch = item?;

            self.transition(LoaderState::Appending);
            if batch.columns[..] != expected_columns[..] {
                return Err(IngestError::SchemaMismatch(format!(
                    "batch {} columns [{}] differ from table columns [{}]",
                    batch.index,
                    batch.columns.join(", "),
                    expected_columns.join(", ")
                )));
            }

            let written = self.append_with_retry(sink, schema, &batch).await?;
            self.committed_batches += 1;
            self.committed_rows += written;

            self.transition(LoaderState::Reporting);
            let record = ProgressRecord {
                batch_index: batch.index,
                rows: batch.len(),
                elapsed: started.elapsed(),
            };
            self.reporter.report(&record)?;
            debug!(
                batch = record.batch_index,
                rows = record.rows,
                elapsed_ms = record.elapsed.as_millis() as u64,
                "Batch committed"
            );
        }

        self.reporter.drained()?;
        self.transition(LoaderState::Drained);
        Ok(())
    }

    async fn append_with_retry<S: TableSink + ?Sized>(
        &self,
        sink: &mut S,
        schema: &TableSchema,
        batch: &RowBatch,
    ) -> Result<u64> {
        let mut attempt = 0u32;

        loop {
            match sink.append(schema, batch).await {
                Ok(written) => return Ok(written),
                Err(e) if e.is_transient() && attempt < self.options.append_retries => {
                    attempt += 1;
                    let delay = backoff_delay(self.options.retry_backoff_ms, attempt);
                    warn!(
                        batch = batch.index,
                        "Append attempt {}/{} failed: {}; retrying in {:.1} seconds",
                        attempt,
                        self.options.append_retries + 1,
                        e,
                        delay.as_secs_f64()
                    );
                    tokio::time::sleep(delay).await;
                    sink.reset().await?;
                },
                Err(e) => return Err(e),
            }
        }
    }

    fn transition(&mut self, next: LoaderState) {
        trace!(from = ?self.state, to = ?next, "Loader state");
        self.state = next;
    }
}
