use anyhow::Result;
use clap::Parser;
use kestrel_browser::DEFAULT_DEBUGGING_PORT;
use kestrel_cli::RetrievalMode;
use kestrel_cli::commands::run::{self, RunOptions};
use kestrel_core::Credentials;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "kestrel")]
#[command(author, version, long_about = None)]
#[command(
    about = "Generate and download reports from a frame-based web application",
    long_about = "Kestrel drives Chrome through a report workflow: it logs in, opens the report \
                  generator, lets you pick a table, waits for the report and retrieves the one you choose."
)]
struct Cli {
    /// Account user name
    #[arg(value_name = "USERNAME")]
    username: String,

    /// Account password
    #[arg(value_name = "PASSWORD")]
    password: String,

    /// Login page URL
    #[arg(value_name = "URL")]
    url: String,

    /// Directory downloads are written to (emptied before each run)
    #[arg(long, env = "KESTREL_DOWNLOAD_DIR", default_value = "downloads")]
    download_dir: PathBuf,

    /// Navigation, protocol and download timeout in seconds
    #[arg(long, env = "KESTREL_TIMEOUT", default_value_t = 120)]
    timeout: u64,

    /// Path to the Chrome binary
    #[arg(long)]
    chrome_path: Option<PathBuf>,

    /// Named Chrome profile to reuse (temporary profile when omitted)
    #[arg(long)]
    profile: Option<String>,

    /// Chrome remote debugging port
    #[arg(long, default_value_t = DEFAULT_DEBUGGING_PORT)]
    debugging_port: u16,

    /// How the chosen report is retrieved
    #[arg(long, value_enum, default_value = "direct")]
    retrieval: RetrievalMode,

    /// Directory failure diagnostics are written to
    #[arg(long, env = "KESTREL_DIAGNOSTICS_DIR", default_value = ".")]
    diagnostics_dir: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.verbose);
    tracing::debug!("Retrieval mode: {}", cli.retrieval.as_str());

    run::execute(RunOptions {
        credentials: Credentials::new(cli.username, cli.password),
        url: cli.url,
        download_dir: cli.download_dir,
        timeout: Duration::from_secs(cli.timeout),
        chrome_path: cli.chrome_path,
        profile: cli.profile,
        debugging_port: cli.debugging_port,
        retrieval: cli.retrieval.into(),
        diagnostics_dir: cli.diagnostics_dir,
    })
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if verbose {
        EnvFilter::new("kestrel=debug,kestrel_cli=debug,kestrel_core=debug,kestrel_browser=debug")
    } else {
        EnvFilter::new("kestrel=info,kestrel_cli=info,kestrel_core=info,kestrel_browser=info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .init();
}
