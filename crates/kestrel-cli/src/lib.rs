use clap::ValueEnum;
use kestrel_core::Retrieval;

pub mod auth;
pub mod commands;
pub mod diagnostics;
pub mod fetch;
pub mod prompt;
pub mod workflow;

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum RetrievalMode {
    /// Fetch the report URL with the browser's session cookies
    Direct,
    /// Click the download action and wait for the browser to save the file
    Browser,
}

impl RetrievalMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetrievalMode::Direct => "direct",
            RetrievalMode::Browser => "browser",
        }
    }
}

impl From<RetrievalMode> for Retrieval {
    fn from(mode: RetrievalMode) -> Self {
        match mode {
            RetrievalMode::Direct => Retrieval::Direct,
            RetrievalMode::Browser => Retrieval::Browser,
        }
    }
}
