use crate::auth::FormLogin;
use crate::diagnostics::{DiagnosticCapture, FailureContext};
use crate::fetch::HttpFetcher;
use crate::prompt::ConsoleOperator;
use crate::workflow::{Outcome, Workflow, WorkflowParts};
use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use kestrel_browser::{
    BrowserSession, CdpSession, ChromeFinder, ChromeLauncher, ProfileManager, TabHandle,
};
use kestrel_core::download::prepare_download_dir;
use kestrel_core::{Credentials, KestrelConfig, Retrieval};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Everything the command line provides for one run
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub credentials: Credentials,
    pub url: String,
    pub download_dir: PathBuf,
    pub timeout: Duration,
    pub chrome_path: Option<PathBuf>,
    pub profile: Option<String>,
    pub debugging_port: u16,
    pub retrieval: Retrieval,
    pub diagnostics_dir: PathBuf,
}

pub fn execute(options: RunOptions) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    let result = runtime.block_on(run(options));

    // Blocking prompt reads may still be parked on stdin
    runtime.shutdown_timeout(Duration::from_millis(100));

    result
}

async fn run(options: RunOptions) -> Result<()> {
    let config = KestrelConfig::default()
        .with_download_dir(&options.download_dir)
        .with_timeout(options.timeout)
        .with_retrieval(options.retrieval);
    config.validate()?;

    prepare_download_dir(&config.download_dir).with_context(|| {
        format!(
            "Could not prepare download directory {}",
            config.download_dir.display()
        )
    })?;

    // Step 1: Find Chrome binary
    println!("🔍 Locating Chrome...");
    let chrome_binary = ChromeFinder::new(options.chrome_path.clone()).find()?;
    println!("✅ Found Chrome at: {}", chrome_binary.display());

    // Step 2: Setup profile
    let profile = match &options.profile {
        Some(name) => {
            let profile = ProfileManager::named(name)?;
            println!("📁 Using profile: {}", profile.path().display());
            profile
        }
        None => {
            println!("📁 Using temporary profile");
            ProfileManager::temporary()?
        }
    };
    let download_dir = std::fs::canonicalize(&config.download_dir)?;
    let profile = profile.with_download_dir(&download_dir)?;

    // Step 3: Launch Chrome and attach
    let launcher = ChromeLauncher::new(chrome_binary, profile.path().to_path_buf())
        .with_debugging_port(options.debugging_port);

    println!("🚀 Launching Chrome...");
    let mut chrome_process = launcher.launch()?;

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::with_template("{spinner} {msg}")?);
    spinner.set_message("Connecting to Chrome DevTools...");
    spinner.enable_steady_tick(Duration::from_millis(120));

    let session = match CdpSession::connect(launcher.debugging_port(), config.timeout).await {
        Ok(session) => Arc::new(session),
        Err(e) => {
            spinner.finish_and_clear();
            let _ = chrome_process.kill();
            let _ = chrome_process.wait();
            return Err(e.into());
        }
    };
    spinner.finish_and_clear();
    session.attach_process(chrome_process).await;
    println!("✅ Chrome started successfully");

    // Step 4: Run the workflow, dumping diagnostics once on failure
    let diagnostics = DiagnosticCapture::new(&options.diagnostics_dir, &config.download_dir);
    let outcome = drive(&session, config, &options).await;

    let result = match outcome {
        Ok(Outcome::Downloaded(path)) => {
            report_download(&path);
            println!("🎉 Done");
            Ok(())
        }
        Ok(Outcome::Cancelled) => {
            println!("🚫 No report retrieved");
            Ok(())
        }
        Err((error, context)) => {
            eprintln!("❌ {}", error);
            let session_ref: &dyn BrowserSession = session.as_ref();
            if let Err(e) = diagnostics.capture(&error, &context, Some(session_ref)).await {
                tracing::warn!("Could not write diagnostics: {}", e);
            }
            Err(anyhow::Error::new(error))
        }
    };

    // Step 5: Release the browser
    println!("🧹 Closing Chrome...");
    if let Err(e) = session.close().await {
        tracing::warn!("Error closing Chrome: {}", e);
    }

    result
}

async fn drive(
    session: &Arc<CdpSession>,
    config: KestrelConfig,
    options: &RunOptions,
) -> std::result::Result<Outcome, (kestrel_core::Error, FailureContext)> {
    let tab: Arc<dyn TabHandle> = match prepare_session(session, &config).await {
        Ok(tab) => tab,
        Err(e) => return Err((e, FailureContext::default())),
    };

    let fetcher = match HttpFetcher::new(config.timeout) {
        Ok(fetcher) => fetcher,
        Err(e) => return Err((e, FailureContext::default())),
    };

    let parts = WorkflowParts {
        session: session.clone(),
        tab,
        authenticator: Arc::new(FormLogin::new(&config.timings)),
        operator: Arc::new(ConsoleOperator::new()),
        fetcher: Arc::new(fetcher),
    };
    let mut workflow = Workflow::new(
        parts,
        config,
        options.url.clone(),
        options.credentials.clone(),
    );

    workflow
        .run()
        .await
        .map_err(|e| (e, workflow.failure_context()))
}

async fn prepare_session(
    session: &CdpSession,
    config: &KestrelConfig,
) -> kestrel_core::Result<Arc<dyn TabHandle>> {
    session.set_download_dir(&config.download_dir).await?;
    Ok(session.main_tab().await?)
}

fn report_download(path: &std::path::Path) {
    println!("📁 Download completed: {}", path.display());
    if let Ok(metadata) = std::fs::metadata(path) {
        println!("📏 Size: {:.2} KB", metadata.len() as f64 / 1024.0);
    }
}
