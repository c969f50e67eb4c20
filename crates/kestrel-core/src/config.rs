use crate::{Error, Result};
use std::path::PathBuf;
use std::time::Duration;

/// Default global timeout for navigations, protocol requests and fetches
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// How the selected report is retrieved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Retrieval {
    /// Fetch the report URL directly with the result tab's cookies
    #[default]
    Direct,
    /// Click the row's download action and watch the download directory
    Browser,
}

/// Delays, deadlines and attempt counts used across the workflow
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timings {
    pub frame_attempts: u32,
    /// Backoff when a frame exists but fails validation
    pub frame_invalid_backoff: Duration,
    /// Backoff when no frame with the name exists yet
    pub frame_missing_backoff: Duration,
    pub selector_poll: Duration,

    pub login_field_wait: Duration,
    pub menu_wait: Duration,
    pub submenu_wait: Duration,
    pub generator_wait: Duration,
    pub button_wait: Duration,

    pub animation_settle: Duration,
    pub menu_settle: Duration,
    pub generator_settle: Duration,
    pub table_settle: Duration,

    pub generation_timeout: Duration,
    pub generation_settle: Duration,

    pub mailbox_attempts: u32,
    pub mailbox_retry_delay: Duration,

    pub tab_deadline: Duration,
    pub tab_poll_interval: Duration,
    pub tab_event_window: Duration,

    pub report_table_wait: Duration,

    pub download_poll: Duration,
    pub download_budget: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            frame_attempts: 8,
            frame_invalid_backoff: Duration::from_millis(1500),
            frame_missing_backoff: Duration::from_millis(1000),
            selector_poll: Duration::from_millis(100),

            login_field_wait: Duration::from_secs(15),
            menu_wait: Duration::from_secs(40),
            submenu_wait: Duration::from_secs(30),
            generator_wait: Duration::from_secs(30),
            button_wait: Duration::from_secs(30),

            animation_settle: Duration::from_secs(1),
            menu_settle: Duration::from_secs(3),
            generator_settle: Duration::from_secs(5),
            table_settle: Duration::from_secs(3),

            generation_timeout: Duration::from_secs(120),
            generation_settle: Duration::from_secs(5),

            mailbox_attempts: 3,
            mailbox_retry_delay: Duration::from_secs(3),

            tab_deadline: Duration::from_secs(30),
            tab_poll_interval: Duration::from_secs(1),
            tab_event_window: Duration::from_secs(1),

            report_table_wait: Duration::from_secs(120),

            download_poll: Duration::from_secs(2),
            download_budget: Duration::from_secs(60),
        }
    }
}

/// Process-wide settings, passed by value into each component
#[derive(Debug, Clone)]
pub struct KestrelConfig {
    pub timeout: Duration,
    pub download_dir: PathBuf,
    pub retrieval: Retrieval,
    pub timings: Timings,
}

impl Default for KestrelConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            download_dir: PathBuf::from("downloads"),
            retrieval: Retrieval::default(),
            timings: Timings::default(),
        }
    }
}

impl KestrelConfig {
    pub fn with_download_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.download_dir = dir.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retrieval(mut self, retrieval: Retrieval) -> Self {
        self.retrieval = retrieval;
        self
    }

    /// Reject settings the workflow cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.timeout.is_zero() {
            return Err(Error::InvalidConfig("timeout must be greater than zero".to_string()));
        }
        if self.download_dir.as_os_str().is_empty() {
            return Err(Error::InvalidConfig("download directory is empty".to_string()));
        }
        if self.timings.frame_attempts == 0 || self.timings.mailbox_attempts == 0 {
            return Err(Error::InvalidConfig("attempt counts must be at least 1".to_string()));
        }
        Ok(())
    }
}
