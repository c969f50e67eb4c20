use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Frame \"{frame}\" not available after {attempts} attempts ({elapsed:?})")]
    FrameUnavailable {
        frame: String,
        attempts: u32,
        elapsed: Duration,
    },

    #[error("Timed out after {timeout:?} waiting for '{selector}' to be {condition} in {scope}")]
    SelectorTimeout {
        selector: String,
        scope: String,
        condition: &'static str,
        timeout: Duration,
    },

    #[error("No element matched {target} (tried: {})", attempts.join("; "))]
    ElementNotFound {
        target: String,
        attempts: Vec<String>,
    },

    #[error("No new tab detected after {elapsed:?}; open tabs: [{}]", open_urls.join(", "))]
    TabDiscoveryTimeout {
        elapsed: Duration,
        open_urls: Vec<String>,
    },

    #[error("No completed download appeared in {} after {elapsed:?}", dir.display())]
    DownloadTimeout { dir: PathBuf, elapsed: Duration },

    #[error("Report generation did not finish within {timeout:?}")]
    GenerationIncomplete { timeout: Duration },

    #[error("{step} failed again after a full restart: {second} (first failure: {first})")]
    RecoveryExhausted {
        step: String,
        first: Box<Error>,
        second: Box<Error>,
    },

    #[error("Report {index} ({name}) has no download URL")]
    MissingDownloadUrl { index: usize, name: String },

    #[error("No tables found in frame \"{0}\"")]
    NoTables(String),

    #[error("No reports listed in the result tab")]
    NoReports,

    #[error("Browser driver error: {0}")]
    Driver(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Whether the orchestrator may continue past this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::GenerationIncomplete { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
