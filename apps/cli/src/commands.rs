//! CLI command definitions, routing, and tracing setup.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use sitekb_core::SiteKb;
use sitekb_shared::{AppConfig, CrawlJob, JobStatus, init_config, load_config, load_config_from};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// SiteKB: crawl documentation sites into a searchable knowledge base.
#[derive(Parser)]
#[command(
    name = "sitekb",
    version,
    about = "Crawl documentation sites into Markdown archives and answer questions over them.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file to use instead of ~/.sitekb/sitekb.toml.
    #[arg(long, global = true, env = "SITEKB_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Run the HTTP API server.
    Serve {
        /// Address to bind (overrides [server] host).
        #[arg(long)]
        host: Option<String>,

        /// Port to bind (overrides [server] port).
        #[arg(long)]
        port: Option<u16>,
    },

    /// Crawl a site in-process and write its archive.
    Crawl {
        /// Seed URL; only URLs under it are followed.
        url: String,

        /// Maximum number of pages to visit.
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output root (overrides [crawl] output_dir).
        #[arg(short, long)]
        out: Option<String>,
    },

    /// Ask a question against the indexed pages.
    Ask {
        /// The question.
        question: String,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "sitekb=info,tower_http=info",
        1 => "sitekb=debug,tower_http=debug",
        _ => "sitekb=trace,tower_http=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt().with_env_filter(env_filter).with_target(false).init();
        }
        LogFormat::Json => {
            fmt().json().with_env_filter(env_filter).init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config;
    match cli.command {
        Command::Serve { host, port } => {
            cmd_serve(resolve_config(config_path.as_ref())?, host, port).await
        }
        Command::Crawl { url, limit, out } => {
            cmd_crawl(resolve_config(config_path.as_ref())?, &url, limit, out).await
        }
        Command::Ask { question } => cmd_ask(resolve_config(config_path.as_ref())?, &question).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(config_path.as_ref()),
        },
    }
}

fn resolve_config(path: Option<&PathBuf>) -> Result<AppConfig> {
    Ok(match path {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    })
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_serve(mut config: AppConfig, host: Option<String>, port: Option<u16>) -> Result<()> {
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .map_err(|e| eyre!("invalid bind address: {e}"))?;

    let kb = SiteKb::from_config(config).await?;
    info!(%addr, "starting SiteKB server");

    sitekb_api::serve(kb, addr, async {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
        }
    })
    .await?;
    Ok(())
}

async fn cmd_crawl(
    mut config: AppConfig,
    url: &str,
    limit: Option<usize>,
    out: Option<String>,
) -> Result<()> {
    if let Some(out) = out {
        config.crawl.output_dir = out;
    }
    let limit = limit.unwrap_or(config.crawl.default_limit);

    let kb = SiteKb::from_config(config).await?;
    let job = kb.supervisor.submit(url, limit).await?;
    info!(job_id = %job.id, url = %job.base_url, limit, "crawl started");

    let progress = CrawlProgress::new(limit);
    let finished = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                progress.spinner.set_message("Cancelling...");
                kb.supervisor.shutdown().await;
                break kb.supervisor.registry().get(&job.id).await;
            }
            _ = tokio::time::sleep(Duration::from_millis(100)) => {
                let Some(snapshot) = kb.supervisor.registry().get(&job.id).await else {
                    break None;
                };
                if snapshot.status.is_terminal() {
                    break Some(snapshot);
                }
                progress.update(&snapshot);
            }
        }
    };
    progress.spinner.finish_and_clear();

    let job = finished.ok_or_else(|| eyre!("job {} disappeared", job.id))?;
    match job.status {
        JobStatus::Completed => {
            let archive = kb.supervisor.archive_path(&job.id);
            let entries = sitekb_artifacts::list_archive(&archive)?;

            println!();
            println!("  Crawl completed!");
            println!("  Job:      {}", job.id);
            println!("  Visited:  {}", job.total_pages);
            println!("  Ingested: {}", job.pages_ingested);
            println!("  Archive:  {}", archive.display());
            for entry in entries {
                println!("    - {entry}");
            }
            println!();
            Ok(())
        }
        JobStatus::Cancelled => {
            println!("Crawl cancelled after {} pages.", job.progress);
            Ok(())
        }
        _ => Err(eyre!(
            "crawl failed: {}",
            job.error.as_deref().unwrap_or("unknown error")
        )),
    }
}

async fn cmd_ask(config: AppConfig, question: &str) -> Result<()> {
    let kb = SiteKb::from_config(config).await?;
    let result = kb.query.answer(question).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(path: Option<&PathBuf>) -> Result<()> {
    let config = resolve_config(path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress display
// ---------------------------------------------------------------------------

/// Spinner fed from registry snapshots.
struct CrawlProgress {
    spinner: ProgressBar,
    limit: usize,
}

impl CrawlProgress {
    fn new(limit: usize) -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        spinner.enable_steady_tick(Duration::from_millis(80));
        spinner.set_message("Starting...");
        Self { spinner, limit }
    }

    fn update(&self, job: &CrawlJob) {
        let current = job.current_url.as_deref().unwrap_or("");
        self.spinner.set_message(format!(
            "Crawling [{}/{}] {current}",
            job.progress, self.limit
        ));
    }
}
