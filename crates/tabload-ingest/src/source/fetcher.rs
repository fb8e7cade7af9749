// Source fetcher (HTTP(S) and local files)

use crate::config::{backoff_delay, IngestConfig};
use crate::error::{IngestError, Result};
use crate::progress::{create_download_progress, format_bytes};
use crate::source::SourceDescriptor;
use futures::StreamExt;
use reqwest::Client;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tabload_common::checksum::verify_file_checksum;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Materializes a source as a local file
///
/// Bytes land in `<name>.part` and are renamed into place only once the
/// body is complete (and its digest matches, when one is configured).
pub struct SourceFetcher {
    client: Client,
    max_retries: u32,
    retry_backoff_ms: u64,
    expected_sha256: Option<String>,
    show_progress: bool,
}

impl SourceFetcher {
    /// Create new fetcher with configuration
    pub fn new(config: &IngestConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("tabload/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| IngestError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(SourceFetcher {
            client,
            max_retries: config.max_retries.max(1),
            retry_backoff_ms: config.retry_backoff_ms,
            expected_sha256: config.expected_sha256.clone(),
            show_progress: config.show_progress,
        })
    }

    /// Fetch `source` into `dir`, returning the local path
    pub async fn fetch(&self, source: &SourceDescriptor, dir: &Path) -> Result<PathBuf> {
        tokio::fs::create_dir_all(dir).await?;

        let target = dir.join(&source.file_name);
        let part = dir.join(format!("{}.part", source.file_name));

        let result = if source.is_local() {
            self.copy_local(source, &part).await
        } else {
            self.download_with_retry(source, &part).await
        };

        let bytes = match result {
            Ok(bytes) => bytes,
            Err(e) => {
                discard_partial(&part).await;
                return Err(e);
            },
        };

        if let Some(expected) = &self.expected_sha256 {
            let path = part.clone();
            let expected = expected.clone();
            let verified = tokio::task::spawn_blocking(move || {
                verify_file_checksum(&path, &expected)
            })
            .await?;

            if let Err(e) = verified {
                discard_partial(&part).await;
                return Err(e.into());
            }
            debug!(file = %source.file_name, "SHA-256 verified");
        }

        tokio::fs::rename(&part, &target).await?;

        info!(
            "Fetched {} ({}) to {}",
            source.file_name,
            format_bytes(bytes),
            target.display()
        );

        Ok(target)
    }

    /// Download with retry logic
    async fn download_with_retry(&self, source: &SourceDescriptor, part: &Path) -> Result<u64> {
        let mut last_error = None;

        for attempt in 1..=self.max_retries {
            match self.download_once(source, part).await {
                Ok(bytes) => return Ok(bytes),
                Err(e) => {
                    warn!("Download attempt {}/{} failed: {}", attempt, self.max_retries, e);
                    last_error = Some(e);

                    if attempt < self.max_retries {
                        let delay = backoff_delay(self.retry_backoff_ms, attempt);
                        info!("Retrying in {:.1} seconds...", delay.as_secs_f64());
                        tokio::time::sleep(delay).await;
                    }
                },
            }
        }

        Err(last_error.unwrap_or_else(|| IngestError::UnreachableSource {
            uri: source.uri.to_string(),
            reason: "no download attempt was made".to_string(),
        }))
    }

    /// Stream one response body into `part`
    async fn download_once(&self, source: &SourceDescriptor, part: &Path) -> Result<u64> {
        let unreachable = |reason: String| IngestError::UnreachableSource {
            uri: source.uri.to_string(),
            reason,
        };

        let response = self
            .client
            .get(source.uri.clone())
            .send()
            .await
            .map_err(|e| unreachable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(unreachable(format!("HTTP error: {}", response.status())));
        }

        let pb = self
            .show_progress
            .then(|| create_download_progress(response.content_length(), &source.file_name));

        let mut file = tokio::fs::File::create(part).await?;
        let mut downloaded = 0u64;
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| unreachable(e.to_string()))?;
            file.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;
            if let Some(pb) = &pb {
                pb.set_position(downloaded);
            }
        }

        file.flush().await?;
        file.sync_all().await?;

        if let Some(pb) = pb {
            pb.finish_and_clear();
        }

        Ok(downloaded)
    }

    async fn copy_local(&self, source: &SourceDescriptor, part: &Path) -> Result<u64> {
        let path = source.uri.to_file_path().map_err(|_| IngestError::UnreachableSource {
            uri: source.uri.to_string(),
            reason: "not a local file path".to_string(),
        })?;

        debug!(from = %path.display(), "Copying local source");

        tokio::fs::copy(&path, part)
            .await
            .map_err(|e| IngestError::UnreachableSource {
                uri: source.uri.to_string(),
                reason: e.to_string(),
            })
    }
}

async fn discard_partial(part: &Path) {
    if let Err(e) = tokio::fs::remove_file(part).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %part.display(), "Failed to remove partial download: {}", e);
        }
    }
}
