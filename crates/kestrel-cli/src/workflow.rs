//! The report workflow as an explicit state machine.
//!
//! Each transition re-resolves the frames it needs. Generator selection is the
//! only step with restart recovery; every other failure ends the run.

use crate::auth::Authenticator;
use crate::diagnostics::FailureContext;
use crate::fetch::{FetchRequest, ReportFetcher};
use crate::prompt::Operator;
use chrono::Utc;
use kestrel_browser::tab_discovery::RESULT_ACTION_SELECTOR;
use kestrel_browser::{
    BrowserSession, ClickPlan, DialogLog, DiscoveryOptions, FrameHandle, FrameResolver,
    Locator, SelectorActions, TabDiscovery, TabHandle, TabId, Visibility,
};
use kestrel_core::download::unique_report_path;
use kestrel_core::retry::RetryPolicy;
use kestrel_core::{
    Credentials, DownloadVerifier, Error, KestrelConfig, RawReportRow, ReportRecord, Result,
    Retrieval, TableEntry, WorkflowState,
};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub const MENU_FRAME: &str = "menu";
pub const TABLE_FRAME: &str = "leftFrame";
pub const CONTENT_FRAME: &str = "mainFrame";

const REPORTS_MENU: &str = "#menu_05";
const REPORTS_ITEM: &str = "#HM_Item5_1";
const GENERATOR_ITEM: &str = "#submenu_06";
const MENU_ENTRY: &str = ".menuItem";
const GENERATOR_LABELS: [&str; 2] = ["Xerador", "Generador"];
/// 0-based position of the generator among the menu entries
const GENERATOR_POSITION: usize = 5;
const TABLE_ENTRY: &str = "div";
const GENERATE_BUTTON: &str = "#BotonObterInforme";
const LOADING_OVERLAY: &str = "#loaderOverlay";
const MAILBOX_BUTTON: &str = "#BotonIrBuzon";
const REPORT_TABLE: &str = "#fila";

/// Rows of the report table as `{name, date, url}`
const REPORT_ROWS: &str = r#"Array.from(document.querySelectorAll('#fila tbody tr')).map(row => {
    const cells = row.querySelectorAll('td');
    const last = cells[cells.length - 1];
    const action = last ? last.querySelector('a[id="accionDescargar"]') : null;
    return {
        name: cells[1] ? cells[1].textContent.trim() : '',
        date: cells[4] ? cells[4].textContent.trim() : '',
        url: action ? action.href : ''
    };
})"#;

/// How a run ended without error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Downloaded(PathBuf),
    Cancelled,
}

/// Collaborators a workflow is wired with
pub struct WorkflowParts {
    pub session: Arc<dyn BrowserSession>,
    pub tab: Arc<dyn TabHandle>,
    pub authenticator: Arc<dyn Authenticator>,
    pub operator: Arc<dyn Operator>,
    pub fetcher: Arc<dyn ReportFetcher>,
}

pub struct Workflow {
    session: Arc<dyn BrowserSession>,
    tab: Arc<dyn TabHandle>,
    authenticator: Arc<dyn Authenticator>,
    operator: Arc<dyn Operator>,
    fetcher: Arc<dyn ReportFetcher>,
    config: KestrelConfig,
    url: String,
    credentials: Credentials,
    resolver: FrameResolver,
    actions: SelectorActions,
    dialogs: DialogLog,
    dialogs_installed: bool,
    state: WorkflowState,
    failed_after: Option<WorkflowState>,
}

impl Workflow {
    pub fn new(
        parts: WorkflowParts,
        config: KestrelConfig,
        url: impl Into<String>,
        credentials: Credentials,
    ) -> Self {
        Self {
            session: parts.session,
            tab: parts.tab,
            authenticator: parts.authenticator,
            operator: parts.operator,
            fetcher: parts.fetcher,
            resolver: FrameResolver::new(&config.timings),
            actions: SelectorActions::new(config.timings.selector_poll),
            config,
            url: url.into(),
            credentials,
            dialogs: DialogLog::new(),
            dialogs_installed: false,
            state: WorkflowState::Init,
            failed_after: None,
        }
    }

    pub fn state(&self) -> WorkflowState {
        self.state
    }

    pub fn dialogs(&self) -> &DialogLog {
        &self.dialogs
    }

    /// Snapshot for the failure dump
    pub fn failure_context(&self) -> FailureContext {
        FailureContext {
            state: Some(self.state),
            failed_after: self.failed_after,
            main_tab: Some(self.tab.clone()),
            dialogs: self.dialogs.messages(),
        }
    }

    /// Drive the workflow from `Init` to a terminal state
    pub async fn run(&mut self) -> Result<Outcome> {
        self.state = WorkflowState::Init;
        self.failed_after = None;

        match self.execute().await {
            Ok(outcome) => {
                let terminal = match outcome {
                    Outcome::Downloaded(_) => WorkflowState::Done,
                    Outcome::Cancelled => WorkflowState::Cancelled,
                };
                self.enter(terminal);
                Ok(outcome)
            }
            Err(e) => {
                tracing::error!("Workflow failed after {}: {}", self.state, e);
                self.failed_after = Some(self.state);
                self.state = WorkflowState::Failed;
                Err(e)
            }
        }
    }

    fn enter(&mut self, state: WorkflowState) {
        tracing::info!("{} -> {}", self.state, state);
        self.state = state;
    }

    async fn execute(&mut self) -> Result<Outcome> {
        println!("🔐 Logging in...");
        self.authenticate().await?;
        self.enter(WorkflowState::Authenticated);

        println!("📂 Opening reports menu...");
        self.open_reports_menu().await?;
        self.enter(WorkflowState::ReportsMenuOpen);

        self.select_generator_with_recovery().await?;
        self.enter(WorkflowState::GeneratorSelected);

        let tables = self.list_tables().await?;
        self.enter(WorkflowState::TableListed);

        let table = self.operator.choose_table(&tables).await?;
        self.choose_table(&table).await?;
        self.enter(WorkflowState::TableChosen);

        println!("⚙️  Generating report for {}...", table.text);
        self.trigger_generation().await?;
        self.enter(WorkflowState::GenerationTriggered);

        self.await_generation().await?;
        self.enter(WorkflowState::GenerationComplete);

        println!("📬 Opening result mailbox...");
        let result_tab = self.open_result_tab().await?;
        self.enter(WorkflowState::ResultTabFound);

        let reports = self.list_reports(result_tab.as_ref()).await?;
        self.enter(WorkflowState::ReportListed);

        let Some(record) = self.operator.choose_report(&reports).await? else {
            return Ok(Outcome::Cancelled);
        };
        self.enter(WorkflowState::ReportChosen);

        let path = self.retrieve(result_tab.as_ref(), &record).await?;
        self.enter(WorkflowState::Downloaded);

        Ok(Outcome::Downloaded(path))
    }

    async fn authenticate(&self) -> Result<()> {
        self.authenticator
            .login(self.tab.as_ref(), &self.url, &self.credentials)
            .await
    }

    async fn frame(&self, name: &str) -> Result<Arc<dyn FrameHandle>> {
        self.resolver.resolve(self.tab.as_ref(), name).await
    }

    async fn settle(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    async fn open_reports_menu(&self) -> Result<()> {
        let timings = &self.config.timings;
        let menu = self.frame(MENU_FRAME).await?;

        self.actions
            .click(menu.as_ref(), REPORTS_MENU, timings.menu_wait)
            .await?;
        self.actions
            .wait_for(menu.as_ref(), REPORTS_ITEM, Visibility::Visible, timings.submenu_wait)
            .await?;
        self.settle(timings.animation_settle).await;

        self.actions
            .click(menu.as_ref(), REPORTS_ITEM, timings.submenu_wait)
            .await?;
        self.settle(timings.menu_settle).await;
        Ok(())
    }

    async fn select_generator(&self) -> Result<()> {
        let menu = self.frame(MENU_FRAME).await?;
        let plan = ClickPlan::new(GENERATOR_ITEM, self.config.timings.generator_wait)
            .or_text(MENU_ENTRY, GENERATOR_LABELS)
            .or_nth(MENU_ENTRY, GENERATOR_POSITION);

        let strategy = self.actions.click_with_fallback(menu.as_ref(), &plan).await?;
        tracing::debug!("Report generator opened via {}", strategy);

        self.settle(self.config.timings.generator_settle).await;
        Ok(())
    }

    async fn select_generator_with_recovery(&self) -> Result<()> {
        let first = match self.select_generator().await {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };

        tracing::warn!("Generator selection failed ({}); restarting the session", first);
        println!("⚠️  Report generator not found, restarting from the login page...");

        match self.restart_and_select_generator().await {
            Ok(()) => Ok(()),
            Err(second) => Err(Error::RecoveryExhausted {
                step: "generator selection".to_string(),
                first: Box::new(first),
                second: Box::new(second),
            }),
        }
    }

    async fn restart_and_select_generator(&self) -> Result<()> {
        self.tab.goto(&self.url).await?;
        self.authenticate().await?;
        self.open_reports_menu().await?;
        self.select_generator().await
    }

    async fn list_tables(&self) -> Result<Vec<TableEntry>> {
        let frame = self.frame(TABLE_FRAME).await?;
        let tables = TableEntry::snapshot(frame.texts(TABLE_ENTRY).await?);

        if tables.is_empty() {
            return Err(Error::NoTables(TABLE_FRAME.to_string()));
        }
        tracing::debug!("{} tables listed", tables.len());
        Ok(tables)
    }

    async fn choose_table(&self, table: &TableEntry) -> Result<()> {
        let frame = self.frame(TABLE_FRAME).await?;
        let locator = Locator::ExactText {
            container: TABLE_ENTRY.to_string(),
            text: table.text.clone(),
        };

        if !frame.click(&locator).await? {
            return Err(Error::ElementNotFound {
                target: locator.to_string(),
                attempts: vec![format!("exact text in {}", frame.label())],
            });
        }

        self.settle(self.config.timings.table_settle).await;
        Ok(())
    }

    async fn trigger_generation(&mut self) -> Result<()> {
        let frame = self.frame(CONTENT_FRAME).await?;

        if !self.dialogs_installed {
            self.tab.auto_accept_dialogs(self.dialogs.clone()).await?;
            self.dialogs_installed = true;
        }

        self.actions
            .click(frame.as_ref(), GENERATE_BUTTON, self.config.timings.button_wait)
            .await
    }

    /// Wait for the loading overlay to go away.
    ///
    /// An overlay that never hides is reported and tolerated: the mailbox
    /// usually has the report by the time it is opened. The settle only runs
    /// when the overlay was never seen hiding.
    async fn await_generation(&self) -> Result<()> {
        let timings = &self.config.timings;
        let frame = self.frame(CONTENT_FRAME).await?;

        let outcome = self
            .actions
            .wait_for(frame.as_ref(), LOADING_OVERLAY, Visibility::Hidden, timings.generation_timeout)
            .await
            .map_err(|e| match e {
                Error::SelectorTimeout { .. } => Error::GenerationIncomplete {
                    timeout: timings.generation_timeout,
                },
                other => other,
            });

        match outcome {
            Ok(outcome) if outcome.observed => {
                tracing::info!("Report generated in {:?}", outcome.waited);
                return Ok(());
            }
            Ok(_) => tracing::debug!("Loading overlay never appeared"),
            Err(e) if e.is_recoverable() => {
                tracing::warn!("{}; continuing", e);
                println!("⚠️  {}", e);
            }
            Err(e) => return Err(e),
        }

        self.settle(timings.generation_settle).await;
        Ok(())
    }

    async fn open_result_tab(&self) -> Result<Arc<dyn TabHandle>> {
        let timings = &self.config.timings;
        let policy = RetryPolicy::fixed(timings.mailbox_attempts, timings.mailbox_retry_delay);

        let frame = policy
            .run("mailbox button", |_| async move {
                let frame = self.frame(CONTENT_FRAME).await?;
                self.actions
                    .wait_for(frame.as_ref(), MAILBOX_BUTTON, Visibility::Visible, timings.button_wait)
                    .await?;
                Ok::<_, Error>(frame)
            })
            .await?;

        let reference: HashSet<TabId> = self
            .session
            .tabs()
            .await?
            .iter()
            .map(|tab| tab.id().to_string())
            .collect();

        self.actions
            .click(frame.as_ref(), MAILBOX_BUTTON, timings.button_wait)
            .await?;

        let discovered = TabDiscovery::new(
            self.session.as_ref(),
            DiscoveryOptions::from_timings(timings),
        )
        .discover(&reference)
        .await?;

        discovered.tab.bring_to_front().await?;
        println!(
            "🎯 Result tab found ({}): {}",
            discovered.signal,
            discovered.tab.url().await.unwrap_or_default()
        );
        Ok(discovered.tab)
    }

    async fn list_reports(&self, tab: &dyn TabHandle) -> Result<Vec<ReportRecord>> {
        self.actions
            .wait_for(tab, REPORT_TABLE, Visibility::Visible, self.config.timings.report_table_wait)
            .await?;

        let rows: Vec<RawReportRow> = match tab.evaluate(REPORT_ROWS).await? {
            serde_json::Value::Null => Vec::new(),
            value => serde_json::from_value(value)?,
        };

        let reports = ReportRecord::from_rows(rows);
        if reports.is_empty() {
            return Err(Error::NoReports);
        }
        Ok(reports)
    }

    async fn retrieve(&self, tab: &dyn TabHandle, record: &ReportRecord) -> Result<PathBuf> {
        match self.config.retrieval {
            Retrieval::Direct => self.fetch_directly(tab, record).await,
            Retrieval::Browser => self.download_in_browser(tab, record).await,
        }
    }

    async fn fetch_directly(&self, tab: &dyn TabHandle, record: &ReportRecord) -> Result<PathBuf> {
        let url = record.download_url()?;
        let destination = unique_report_path(&self.config.download_dir, record, Utc::now());

        println!("⬇️  Downloading {}...", record.name);
        let request = FetchRequest {
            url,
            cookies: tab.cookies().await?,
            referer: tab.url().await?,
            destination,
        };
        let size = self.fetcher.fetch(&request).await?;

        tracing::debug!("{} bytes written", size);
        Ok(request.destination)
    }

    async fn download_in_browser(&self, tab: &dyn TabHandle, record: &ReportRecord) -> Result<PathBuf> {
        let timings = &self.config.timings;
        let locator = Locator::css(format!(
            "{} tbody tr:nth-child({}) {}",
            REPORT_TABLE, record.index, RESULT_ACTION_SELECTOR
        ));

        println!("⬇️  Downloading {} through the browser...", record.name);
        if !tab.click(&locator).await? {
            return Err(Error::ElementNotFound {
                target: locator.to_string(),
                attempts: vec![format!("download action in {}", tab.label())],
            });
        }

        let verifier = DownloadVerifier::new(&self.config.download_dir, timings.download_poll);
        let name = verifier.wait(timings.download_budget).await?;
        Ok(verifier.dir().join(name))
    }
}
