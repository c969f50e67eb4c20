use crate::{Error, ReportRecord, Result};
use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::Instant;

lazy_static! {
    static ref ALLOWED_EXTENSION: Regex = Regex::new(r"(?i)\.(xlsx|ods|csv|pdf)$").unwrap();
}

/// Suffixes browsers and fetchers use while a file is still being written
pub const IN_PROGRESS_SUFFIXES: &[&str] = &[".crdownload", ".tmp", ".part"];

/// Extension used when the download URL carries none
pub const DEFAULT_EXTENSION: &str = ".xlsx";

/// Whether a file name is a finished report artifact
pub fn is_completed_download(file_name: &str) -> bool {
    let lower = file_name.to_lowercase();
    ALLOWED_EXTENSION.is_match(file_name)
        && !IN_PROGRESS_SUFFIXES
            .iter()
            .any(|suffix| lower.ends_with(suffix))
}

/// Create the download directory and remove anything left from a previous run.
///
/// Files that cannot be removed are logged and skipped.
pub fn prepare_download_dir(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir)?;

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let removed = if path.is_dir() {
            std::fs::remove_dir_all(&path)
        } else {
            std::fs::remove_file(&path)
        };
        if let Err(e) = removed {
            tracing::warn!("Could not remove {}: {}", path.display(), e);
        }
    }

    tracing::debug!("Download directory ready: {}", dir.display());
    Ok(())
}

/// Sorted file names currently in `dir`; empty when it does not exist
pub fn list_downloads(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect(),
        Err(_) => Vec::new(),
    };
    names.sort();
    names
}

/// Output path for a directly fetched report.
///
/// The name embeds the report index and a millisecond timestamp; a numeric
/// suffix is appended if a file with that name already exists.
pub fn unique_report_path(dir: &Path, record: &ReportRecord, now: DateTime<Utc>) -> PathBuf {
    let extension = record_extension(record);
    let stem = format!("report_{}_{}", record.index, now.format("%Y%m%dT%H%M%S%3f"));

    let mut candidate = dir.join(format!("{}{}", stem, extension));
    let mut counter = 1;
    while candidate.exists() {
        candidate = dir.join(format!("{}-{}{}", stem, counter, extension));
        counter += 1;
    }
    candidate
}

fn record_extension(record: &ReportRecord) -> String {
    url::Url::parse(&record.url)
        .ok()
        .and_then(|u| {
            Path::new(u.path())
                .extension()
                .map(|e| format!(".{}", e.to_string_lossy()))
        })
        .unwrap_or_else(|| DEFAULT_EXTENSION.to_string())
}

/// Polls a directory until a finished report file shows up
#[derive(Debug, Clone)]
pub struct DownloadVerifier {
    dir: PathBuf,
    interval: Duration,
}

impl DownloadVerifier {
    pub fn new(dir: impl Into<PathBuf>, interval: Duration) -> Self {
        Self {
            dir: dir.into(),
            interval,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Wait up to `budget` for a qualifying file and return its name
    pub async fn wait(&self, budget: Duration) -> Result<String> {
        let started = Instant::now();

        loop {
            if let Some(name) = self.completed_file().await? {
                tracing::info!("Download completed: {}", name);
                return Ok(name);
            }

            let elapsed = started.elapsed();
            if elapsed >= budget {
                return Err(Error::DownloadTimeout {
                    dir: self.dir.clone(),
                    elapsed,
                });
            }

            tracing::debug!("No completed download yet in {}", self.dir.display());
            tokio::time::sleep(self.interval.min(budget - elapsed)).await;
        }
    }

    async fn completed_file(&self) -> Result<Option<String>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if is_completed_download(&name) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names.into_iter().next())
    }
}
