//! Operator-facing progress output
//!
//! Per-batch lines go to stdout through [`ProgressReporter`]; everything
//! else is logged. The download bar draws on stderr.

use indicatif::{ProgressBar, ProgressStyle};
use std::io::Write;
use std::time::Duration;

/// Timing of one appended batch
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressRecord {
    pub batch_index: usize,
    pub rows: usize,
    pub elapsed: Duration,
}

impl ProgressRecord {
    /// `Inserted <rows> rows... took <seconds> seconds`
    pub fn line(&self) -> String {
        format!(
            "Inserted {} rows... took {:.3} seconds",
            self.rows,
            self.elapsed.as_secs_f64()
        )
    }
}

pub const DRAINED_LINE: &str = "No more data to process.";

/// Writes progress lines to a console-like sink
pub struct ProgressReporter {
    out: Box<dyn Write + Send>,
}

impl ProgressReporter {
    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Self { out }
    }

    pub fn stdout() -> Self {
        Self::new(Box::new(std::io::stdout()))
    }

    pub fn report(&mut self, record: &ProgressRecord) -> std::io::Result<()> {
        writeln!(self.out, "{}", record.line())?;
        self.out.flush()
    }

    pub fn drained(&mut self) -> std::io::Result<()> {
        writeln!(self.out, "{}", DRAINED_LINE)?;
        self.out.flush()
    }
}

impl std::fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressReporter").finish_non_exhaustive()
    }
}

/// Create a progress bar for file downloads
///
/// Falls back to a spinner when the server sends no content length.
pub fn create_download_progress(size: Option<u64>, message: &str) -> ProgressBar {
    let pb = match size {
        Some(len) => {
            let pb = ProgressBar::new(len);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{msg}\n{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({eta})")
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("#>-"),
            );
            pb
        },
        None => {
            let pb = ProgressBar::new_spinner();
            pb.set_style(
                ProgressStyle::default_spinner()
                    .template("{spinner:.green} {msg} {bytes}")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner()),
            );
            pb
        },
    };
    pb.set_message(message.to_string());
    pb
}

/// Format bytes into human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    if unit_idx == 0 {
        format!("{} {}", size as u64, UNITS[unit_idx])
    } else {
        format!("{:.2} {}", size, UNITS[unit_idx])
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_progress_line_format() {
        let record = ProgressRecord {
            batch_index: 1,
            rows: 100_000,
            elapsed: Duration::from_millis(10_123),
        };
        assert_eq!(record.line(), "Inserted 100000 rows... took 10.123 seconds");
    }

    #[test]
    fn test_reporter_writes_lines() {
        let captured = Captured::default();
        let mut reporter = ProgressReporter::new(Box::new(captured.clone()));

        reporter
            .report(&ProgressRecord {
                batch_index: 1,
                rows: 5,
                elapsed: Duration::from_millis(2),
            })
            .unwrap();
        reporter.drained().unwrap();

        let text = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert_eq!(
            text,
            "Inserted 5 rows... took 0.002 seconds\nNo more data to process.\n"
        );
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(1073741824), "1.00 GB");
    }

    #[test]
    fn test_create_download_progress() {
        let pb = create_download_progress(Some(1024), "Downloading trips.parquet");
        assert_eq!(pb.length(), Some(1024));

        let spinner = create_download_progress(None, "Downloading");
        assert!(!spinner.is_finished());
        spinner.finish();
    }
}
