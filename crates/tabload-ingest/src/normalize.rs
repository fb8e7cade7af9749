//! Conversion of fetched files into the canonical CSV artifact
//!
//! Plain CSV is used as-is. Gzip-compressed CSV is streamed through a
//! decoder. Parquet is decoded fully into Arrow record batches and written
//! back out as CSV with a header row.

use crate::error::Result;
use crate::source::{Compression, SourceDescriptor, SourceFormat};
use arrow::csv::WriterBuilder;
use arrow::record_batch::RecordBatch;
use flate2::read::MultiGzDecoder;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Parquet files above this size are still converted, with a warning
pub const LARGE_COLUMNAR_BYTES: u64 = 1024 * 1024 * 1024;

/// Timestamp layout written for Parquet timestamp columns
pub const CSV_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Layout for timezone-tagged timestamps (RFC 3339, read back as UTC)
pub const CSV_TIMESTAMP_TZ_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f%:z";

/// The CSV file every downstream stage reads
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalArtifact {
    pub path: PathBuf,
    /// False when the fetched file was used unchanged
    pub converted: bool,
}

/// Produce the canonical artifact for a fetched file
pub async fn normalize(source: &SourceDescriptor, fetched: &Path) -> Result<CanonicalArtifact> {
    let source = source.clone();
    let fetched = fetched.to_path_buf();
    tokio::task::spawn_blocking(move || normalize_blocking(&source, &fetched)).await?
}

/// Blocking form of [`normalize`]
pub fn normalize_blocking(source: &SourceDescriptor, fetched: &Path) -> Result<CanonicalArtifact> {
    match (source.format, source.compression) {
        (SourceFormat::DelimitedText, Compression::None) => Ok(CanonicalArtifact {
            path: fetched.to_path_buf(),
            converted: false,
        }),
        (SourceFormat::DelimitedText, Compression::Gzip) => {
            let output = fetched.with_file_name(source.canonical_file_name());
            let bytes = write_atomically(&output, |out| gunzip(fetched, out))?;
            info!("Decompressed {} to {} ({} bytes)", source.file_name, output.display(), bytes);
            Ok(CanonicalArtifact {
                path: output,
                converted: true,
            })
        },
        (SourceFormat::ColumnarBinary, _) => {
            let output = fetched.with_file_name(source.canonical_file_name());
            let rows = write_atomically(&output, |out| parquet_to_csv(fetched, out))?;
            info!("Converted {} to {} ({} rows)", source.file_name, output.display(), rows);
            Ok(CanonicalArtifact {
                path: output,
                converted: true,
            })
        },
    }
}

/// Write through `<output>.part` and rename on success
fn write_atomically<T>(
    output: &Path,
    write: impl FnOnce(&mut BufWriter<File>) -> Result<T>,
) -> Result<T> {
    let mut part_name = output.as_os_str().to_owned();
    part_name.push(".part");
    let part = PathBuf::from(part_name);

    let result = (|| -> Result<T> {
        let mut out = BufWriter::new(File::create(&part)?);
        let value = write(&mut out)?;
        out.flush()?;
        out.get_ref().sync_all()?;
        Ok(value)
    })();

    match result {
        Ok(value) => {
            std::fs::rename(&part, output)?;
            Ok(value)
        },
        Err(e) => {
            discard_partial(&part);
            Err(e)
        },
    }
}

fn discard_partial(part: &Path) {
    if let Err(e) = std::fs::remove_file(part) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %part.display(), "Failed to remove partial output: {}", e);
        }
    }
}

fn gunzip(input: &Path, out: &mut impl Write) -> Result<u64> {
    let mut decoder = MultiGzDecoder::new(BufReader::new(File::open(input)?));
    Ok(std::io::copy(&mut decoder, out)?)
}

/// Materialize a Parquet file and re-serialize it as CSV
///
/// Returns the number of data rows written.
fn parquet_to_csv(input: &Path, out: &mut impl Write) -> Result<usize> {
    let file = File::open(input)?;
    let size = file.metadata()?.len();
    if size > LARGE_COLUMNAR_BYTES {
        warn!(
            bytes = size,
            "Parquet source is larger than 1 GiB; conversion holds it fully in memory"
        );
    }

    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
    let schema = builder.schema().clone();
    let reader = builder.build()?;

    let batches = reader.collect::<std::result::Result<Vec<RecordBatch>, _>>()?;
    let rows = batches.iter().map(RecordBatch::num_rows).sum();

    let mut writer = WriterBuilder::new()
        .with_header(true)
        .with_timestamp_format(CSV_TIMESTAMP_FORMAT.to_string())
        .with_timestamp_tz_format(CSV_TIMESTAMP_TZ_FORMAT.to_string())
        .build(out);

    if batches.is_empty() {
        // header only
        writer.write(&RecordBatch::new_empty(schema))?;
    }
    for batch in &batches {
        writer.write(batch)?;
    }

    Ok(rows)
}
