pub mod config;
pub mod download;
pub mod error;
pub mod fallback;
pub mod model;
pub mod retry;

pub use config::{KestrelConfig, Retrieval, Timings};
pub use download::DownloadVerifier;
pub use error::{Error, Result};
pub use model::{Credentials, FrameInfo, RawReportRow, ReportRecord, TableEntry, WorkflowState};
