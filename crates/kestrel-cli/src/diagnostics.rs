//! Failure dump: a JSON summary plus best-effort screenshots and HTML of every
//! open tab and frame.

use chrono::{DateTime, Utc};
use kestrel_browser::{BrowserSession, TabHandle};
use kestrel_core::download::list_downloads;
use kestrel_core::{FrameInfo, Result, WorkflowState};
use serde::Serialize;
use std::error::Error as StdError;
use std::path::PathBuf;
use std::sync::Arc;

/// What the workflow knew when it failed
#[derive(Default)]
pub struct FailureContext {
    pub state: Option<WorkflowState>,
    /// Last state reached before failing
    pub failed_after: Option<WorkflowState>,
    pub main_tab: Option<Arc<dyn TabHandle>>,
    pub dialogs: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct DebugReport {
    pub timestamp: String,
    /// Error message followed by each underlying cause
    pub error: Vec<String>,
    pub state: Option<WorkflowState>,
    pub failed_after: Option<WorkflowState>,
    pub session_url: Option<String>,
    pub frames: Vec<FrameInfo>,
    pub downloads: Vec<String>,
    pub dialogs: Vec<String>,
    pub open_tabs: Vec<String>,
}

/// Writes failure artifacts into one directory
pub struct DiagnosticCapture {
    dir: PathBuf,
    download_dir: PathBuf,
}

/// Timestamp usable in file names on every platform
fn file_timestamp(now: DateTime<Utc>) -> String {
    now.format("%Y-%m-%dT%H-%M-%S-%3fZ").to_string()
}

/// Error message and its `source()` chain
pub fn error_chain(error: &(dyn StdError + 'static)) -> Vec<String> {
    let mut chain = vec![error.to_string()];
    let mut source = error.source();
    while let Some(cause) = source {
        chain.push(cause.to_string());
        source = cause.source();
    }
    chain
}

impl DiagnosticCapture {
    pub fn new(dir: impl Into<PathBuf>, download_dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            download_dir: download_dir.into(),
        }
    }

    /// Write `debug-<timestamp>.json` and page artifacts; returns the JSON path
    pub async fn capture(
        &self,
        error: &(dyn StdError + 'static),
        context: &FailureContext,
        session: Option<&dyn BrowserSession>,
    ) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)?;
        let timestamp = file_timestamp(Utc::now());

        let (session_url, frames) = match &context.main_tab {
            Some(tab) => (tab.url().await.ok(), frame_inventory(tab.as_ref()).await),
            None => (None, Vec::new()),
        };

        let tabs = match session {
            Some(session) => session.tabs().await.unwrap_or_else(|e| {
                tracing::warn!("Could not list tabs for diagnostics: {}", e);
                Vec::new()
            }),
            None => Vec::new(),
        };

        let mut open_tabs = Vec::with_capacity(tabs.len());
        for tab in &tabs {
            open_tabs.push(tab.url().await.unwrap_or_else(|_| "<unknown>".to_string()));
        }

        let report = DebugReport {
            timestamp: timestamp.clone(),
            error: error_chain(error),
            state: context.state,
            failed_after: context.failed_after,
            session_url,
            frames,
            downloads: list_downloads(&self.download_dir),
            dialogs: context.dialogs.clone(),
            open_tabs,
        };

        let report_path = self.dir.join(format!("debug-{}.json", timestamp));
        std::fs::write(&report_path, serde_json::to_string_pretty(&report)?)?;
        println!("📝 Debug report written to: {}", report_path.display());

        for (i, tab) in tabs.iter().enumerate() {
            self.capture_tab(i, tab.as_ref(), &timestamp).await;
        }

        Ok(report_path)
    }

    async fn capture_tab(&self, index: usize, tab: &dyn TabHandle, timestamp: &str) {
        let stem = format!("error-page-{}-{}", index, timestamp);

        match tab.screenshot().await {
            Ok(png) => self.write_artifact(&format!("{}.png", stem), &png),
            Err(e) => tracing::warn!("Screenshot of tab {} failed: {}", index, e),
        }

        match tab.content().await {
            Ok(html) => self.write_artifact(&format!("{}.html", stem), html.as_bytes()),
            Err(e) => tracing::warn!("HTML of tab {} failed: {}", index, e),
        }

        let frames = match tab.frames().await {
            Ok(frames) => frames,
            Err(e) => {
                tracing::warn!("Frames of tab {} unavailable: {}", index, e);
                return;
            }
        };

        for (j, frame) in frames.iter().enumerate() {
            match frame.content().await {
                Ok(html) => self.write_artifact(
                    &format!("error-page-{}-frame-{}-{}.html", index, j, timestamp),
                    html.as_bytes(),
                ),
                Err(e) => tracing::warn!("HTML of frame {} in tab {} failed: {}", j, index, e),
            }
        }
    }

    fn write_artifact(&self, name: &str, bytes: &[u8]) {
        let path = self.dir.join(name);
        match std::fs::write(&path, bytes) {
            Ok(()) => tracing::info!("Saved {}", path.display()),
            Err(e) => tracing::warn!("Could not write {}: {}", path.display(), e),
        }
    }
}

async fn frame_inventory(tab: &dyn TabHandle) -> Vec<FrameInfo> {
    let frames = match tab.frames().await {
        Ok(frames) => frames,
        Err(e) => {
            tracing::warn!("Could not list frames: {}", e);
            return Vec::new();
        }
    };

    let mut inventory = Vec::with_capacity(frames.len());
    for frame in frames {
        inventory.push(FrameInfo {
            name: frame.name().to_string(),
            url: frame.url().await.unwrap_or_default(),
            detached: frame.is_detached().await,
        });
    }
    inventory
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_browser::testing::{FakeFrame, FakeSession, FakeTab};
    use kestrel_core::Error;
    use std::time::Duration;

    #[test]
    fn test_file_timestamp_has_no_colons() {
        let ts = file_timestamp(Utc::now());
        assert!(!ts.contains(':'));
        assert!(!ts.contains('.'));
    }

    #[tokio::test]
    async fn test_capture_writes_report_and_page_artifacts() {
        let out = tempfile::tempdir().unwrap();
        let downloads = tempfile::tempdir().unwrap();
        std::fs::write(downloads.path().join("partial.xlsx.crdownload"), b"x").unwrap();

        let session = FakeSession::new();
        let main = FakeTab::new("T1", "https://erp.example/menu.jsp");
        main.add_frame(FakeFrame::new("menu").with_url("https://erp.example/menu"));
        main.add_frame(FakeFrame::new("mainFrame"));
        session.add_tab(main.clone());
        session.add_tab(FakeTab::new("T2", "https://erp.example/buzon"));

        let context = FailureContext {
            state: Some(WorkflowState::Failed),
            failed_after: Some(WorkflowState::GenerationComplete),
            main_tab: Some(Arc::new(main)),
            dialogs: vec!["Informe solicitado".to_string()],
        };
        let error = Error::TabDiscoveryTimeout {
            elapsed: Duration::from_secs(30),
            open_urls: vec!["https://erp.example/menu.jsp".to_string()],
        };

        let capture = DiagnosticCapture::new(out.path(), downloads.path());
        let path = capture.capture(&error, &context, Some(&session)).await.unwrap();

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["state"], "failed");
        assert_eq!(json["failed_after"], "generation_complete");
        assert_eq!(json["session_url"], "https://erp.example/menu.jsp");
        assert_eq!(json["frames"][0]["name"], "menu");
        assert_eq!(json["frames"][0]["detached"], false);
        assert_eq!(json["downloads"][0], "partial.xlsx.crdownload");
        assert_eq!(json["dialogs"][0], "Informe solicitado");
        assert_eq!(json["open_tabs"].as_array().unwrap().len(), 2);
        assert!(json["error"][0].as_str().unwrap().contains("No new tab"));

        let names: Vec<String> = std::fs::read_dir(out.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert!(names.iter().any(|n| n.starts_with("error-page-0-") && n.ends_with(".png")));
        assert!(names.iter().any(|n| n.starts_with("error-page-1-") && n.ends_with(".html")));
        assert!(names.iter().any(|n| n.starts_with("error-page-0-frame-1-")));
    }

    #[tokio::test]
    async fn test_capture_without_browser_still_writes_report() {
        let out = tempfile::tempdir().unwrap();
        let error = Error::InvalidConfig("timeout must be greater than zero".to_string());

        let path = DiagnosticCapture::new(out.path(), out.path().join("missing"))
            .capture(&error, &FailureContext::default(), None)
            .await
            .unwrap();

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert!(json["session_url"].is_null());
        assert_eq!(json["downloads"].as_array().unwrap().len(), 0);
    }

    #[test]
    fn test_error_chain_follows_sources() {
        let io = std::io::Error::other("disk full");
        let err = Error::Io(io);
        let chain = error_chain(&err);
        assert_eq!(chain[0], "IO error: disk full");
    }
}
