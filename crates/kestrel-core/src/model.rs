use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use url::Url;

/// Steps of the report retrieval workflow, in the order they are reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    Init,
    Authenticated,
    ReportsMenuOpen,
    GeneratorSelected,
    TableListed,
    TableChosen,
    GenerationTriggered,
    GenerationComplete,
    ResultTabFound,
    ReportListed,
    ReportChosen,
    Downloaded,
    Done,
    Cancelled,
    Failed,
}

impl WorkflowState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowState::Init => "init",
            WorkflowState::Authenticated => "authenticated",
            WorkflowState::ReportsMenuOpen => "reports_menu_open",
            WorkflowState::GeneratorSelected => "generator_selected",
            WorkflowState::TableListed => "table_listed",
            WorkflowState::TableChosen => "table_chosen",
            WorkflowState::GenerationTriggered => "generation_triggered",
            WorkflowState::GenerationComplete => "generation_complete",
            WorkflowState::ResultTabFound => "result_tab_found",
            WorkflowState::ReportListed => "report_listed",
            WorkflowState::ReportChosen => "report_chosen",
            WorkflowState::Downloaded => "downloaded",
            WorkflowState::Done => "done",
            WorkflowState::Cancelled => "cancelled",
            WorkflowState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkflowState::Done | WorkflowState::Cancelled | WorkflowState::Failed
        )
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Login credentials for the target application
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Inventory entry for one frame of a tab
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FrameInfo {
    pub name: String,
    pub url: String,
    pub detached: bool,
}

/// A selectable row of the table navigation list, keyed by its display text
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableEntry {
    pub text: String,
}

impl TableEntry {
    /// Build a snapshot from raw element texts.
    ///
    /// Texts are trimmed, empty ones dropped and duplicates collapsed so the
    /// display text stays a usable correlation key.
    pub fn snapshot<I, S>(texts: I) -> Vec<TableEntry>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen = HashSet::new();
        texts
            .into_iter()
            .map(|t| t.as_ref().trim().to_string())
            .filter(|t| !t.is_empty())
            .filter(|t| seen.insert(t.clone()))
            .map(|text| TableEntry { text })
            .collect()
    }
}

/// Row scraped from the report listing before numbering
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawReportRow {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub url: String,
}

/// A generated report offered for download in the result tab
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportRecord {
    /// 1-based position within the listing
    pub index: usize,
    pub name: String,
    pub date: String,
    /// Absolute download URL, empty when the row exposes no action
    pub url: String,
}

impl ReportRecord {
    /// Number scraped rows in listing order
    pub fn from_rows(rows: Vec<RawReportRow>) -> Vec<ReportRecord> {
        rows.into_iter()
            .enumerate()
            .map(|(i, row)| {
                let index = i + 1;
                let name = match row.name.trim() {
                    "" => format!("Report {}", index),
                    n => n.to_string(),
                };
                ReportRecord {
                    index,
                    name,
                    date: row.date.trim().to_string(),
                    url: row.url.chars().filter(|c| !c.is_whitespace()).collect(),
                }
            })
            .collect()
    }

    /// Parse the download URL, failing when the row had none
    pub fn download_url(&self) -> Result<Url> {
        if self.url.is_empty() {
            return Err(Error::MissingDownloadUrl {
                index: self.index,
                name: self.name.clone(),
            });
        }
        Url::parse(&self.url)
            .map_err(|e| Error::Http(format!("Invalid download URL '{}': {}", self.url, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_snapshot_dedupes_and_trims() {
        let entries = TableEntry::snapshot(["  Alumnado ", "", "Profesorado", "Alumnado", "   "]);
        let texts: Vec<_> = entries.iter().map(|e| e.text.as_str()).collect();

        assert_eq!(texts, vec!["Alumnado", "Profesorado"]);
    }

    #[test]
    fn test_report_rows_are_numbered_from_one() {
        let rows = vec![
            RawReportRow {
                name: "Informe A".to_string(),
                date: "2024-01-01".to_string(),
                url: String::new(),
            },
            RawReportRow {
                name: " ".to_string(),
                date: " 2024-02-02 ".to_string(),
                url: "https://x/ y".to_string(),
            },
        ];

        let records = ReportRecord::from_rows(rows);
        assert_eq!(records[0].index, 1);
        assert_eq!(records[1].index, 2);
        assert_eq!(records[1].name, "Report 2");
        assert_eq!(records[1].date, "2024-02-02");
        assert_eq!(records[1].url, "https://x/y");
    }

    #[test]
    fn test_empty_url_is_rejected() {
        let record = ReportRecord {
            index: 1,
            name: "Informe A".to_string(),
            date: "2024-01-01".to_string(),
            url: String::new(),
        };

        let err = record.download_url().unwrap_err();
        assert!(matches!(err, Error::MissingDownloadUrl { index: 1, .. }));
    }

    #[test]
    fn test_raw_rows_deserialize_with_missing_fields() {
        let rows: Vec<RawReportRow> =
            serde_json::from_str(r#"[{"name":"A"},{"url":"https://x/y","date":"d"}]"#).unwrap();
        assert_eq!(rows[0].url, "");
        assert_eq!(rows[1].name, "");
    }

    #[test]
    fn test_state_labels() {
        assert_eq!(WorkflowState::ResultTabFound.to_string(), "result_tab_found");
        assert!(WorkflowState::Cancelled.is_terminal());
        assert!(!WorkflowState::ReportChosen.is_terminal());
    }

    #[test]
    fn test_credentials_debug_hides_password() {
        let creds = Credentials::new("user", "hunter2");
        assert!(!format!("{:?}", creds).contains("hunter2"));
    }
}
