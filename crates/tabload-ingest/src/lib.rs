//! tabload ingest library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Loads one tabular dataset file into one PostgreSQL table:
//!
//! 1. **Fetch** the file over HTTP(S) (or copy a `file://` URI)
//! 2. **Normalize** it to CSV (Parquet and gzip are converted)
//! 3. **Recreate** the destination table from the CSV header
//! 4. **Load** the rows in fixed-size batches, one transaction each
//!
//! # Example
//!
//! ```no_run
//! use tabload_ingest::config::{DestinationConfig, IngestConfig};
//! use tabload_ingest::pipeline::Pipeline;
//! use tabload_ingest::progress::ProgressReporter;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = IngestConfig::builder().table("yellow_taxi_data").build();
//!     let destination = DestinationConfig::new("root", "root", "localhost", 5432, "ny_taxi");
//!
//!     Pipeline::new(config, destination)
//!         .run(
//!             "https://d37ci6vzurychx.cloudfront.net/trip-data/yellow_tripdata_2021-01.parquet",
//!             ProgressReporter::stdout(),
//!         )
//!         .await?;
//!     Ok(())
//! }
//! ```

pub mod batch;
pub mod config;
pub mod error;
pub mod loader;
pub mod normalize;
pub mod pipeline;
pub mod progress;
pub mod schema;
pub mod sink;
pub mod source;

pub use error::{IngestError, Phase, Result, RunError};
pub use pipeline::{Pipeline, RunReport};
