//! Source descriptors and acquisition
//!
//! A [`SourceDescriptor`] is validated from the URI alone, so an
//! unsupported extension fails before any network or database work.

pub mod fetcher;

pub use fetcher::SourceFetcher;

use crate::error::{IngestError, Result};
use serde::{Deserialize, Serialize};
use url::Url;

/// On-disk layout of the fetched file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceFormat {
    /// Comma separated text with a header row
    DelimitedText,
    /// Parquet
    ColumnarBinary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Compression {
    None,
    Gzip,
}

/// Where the dataset lives and what shape it has
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    pub uri: Url,
    pub file_name: String,
    pub format: SourceFormat,
    pub compression: Compression,
}

impl SourceDescriptor {
    /// Parse and classify a source URI
    ///
    /// Accepts `http`, `https` and `file` URIs ending in `.csv`, `.csv.gz`,
    /// `.parquet` or `.pq` (case-insensitive).
    pub fn from_uri(uri: &str) -> Result<Self> {
        let uri = Url::parse(uri)
            .map_err(|e| IngestError::Config(format!("invalid source URL '{}': {}", uri, e)))?;

        if !matches!(uri.scheme(), "http" | "https" | "file") {
            return Err(IngestError::Config(format!(
                "unsupported URL scheme '{}'",
                uri.scheme()
            )));
        }

        let file_name = uri
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .ok_or_else(|| {
                IngestError::UnsupportedFormat(format!("no file name in '{}'", uri))
            })?;

        let (format, compression) = classify_extension(&file_name)
            .ok_or_else(|| IngestError::UnsupportedFormat(file_name.clone()))?;

        Ok(SourceDescriptor {
            uri,
            file_name,
            format,
            compression,
        })
    }

    /// File name with the format extension removed
    pub fn stem(&self) -> &str {
        let lower = self.file_name.to_lowercase();
        let ext_len = [".csv.gz", ".parquet", ".csv", ".pq"]
            .iter()
            .find(|ext| lower.ends_with(*ext))
            .map_or(0, |ext| ext.len());
        &self.file_name[..self.file_name.len() - ext_len]
    }

    /// Name of the CSV file downstream stages read
    pub fn canonical_file_name(&self) -> String {
        format!("{}.csv", self.stem())
    }

    pub fn is_local(&self) -> bool {
        self.uri.scheme() == "file"
    }
}

fn classify_extension(file_name: &str) -> Option<(SourceFormat, Compression)> {
    let lower = file_name.to_lowercase();
    if lower.ends_with(".csv.gz") {
        Some((SourceFormat::DelimitedText, Compression::Gzip))
    } else if lower.ends_with(".csv") {
        Some((SourceFormat::DelimitedText, Compression::None))
    } else if lower.ends_with(".parquet") || lower.ends_with(".pq") {
        Some((SourceFormat::ColumnarBinary, Compression::None))
    } else {
        None
    }
}
