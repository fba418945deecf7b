//! pubtrack - researcher publication and citation tracker
//!
//! ## Usage
//!
//! ```bash
//! pubtrack crawl                  # publications of researchers not crawled in 30 days
//! pubtrack citations --force      # refresh every citation count now
//! pubtrack run                    # both, in order
//! pubtrack cookies import < cookies.json
//! ```

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use pubtrack::config::Config;
use pubtrack::cookies::CookieManager;
use pubtrack::pipeline::{self, RunSummary};
use pubtrack::pubmed::PubMedClient;
use pubtrack::scholar::{CitationProber, ScholarSession};
use pubtrack::store::{CsvPublicationStore, CsvRosterStore};
use std::io::Read;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::{fmt, EnvFilter};

// ============================================================================
// CLI Definition
// ============================================================================

/// Researcher publication and citation tracker
#[derive(Parser)]
#[command(name = "pubtrack")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Log as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    /// JSON configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Data directory holding researchers.csv and publications/
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Proxy URL (e.g., http://127.0.0.1:7890)
    #[arg(long, global = true)]
    proxy: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl PubMed for researchers due a publication refresh
    Crawl {
        /// Ignore last-crawl dates
        #[arg(long)]
        force: bool,

        /// Researchers crawled in parallel
        #[arg(short, long)]
        workers: Option<usize>,
    },

    /// Refresh citation counts from Google Scholar
    Citations {
        /// Ignore last-refresh dates
        #[arg(long)]
        force: bool,
    },

    /// Publication crawl followed by citation refresh
    Run {
        /// Ignore both last-run dates
        #[arg(long)]
        force: bool,
    },

    /// Manage citation session cookies
    Cookies {
        #[command(subcommand)]
        action: CookieAction,
    },
}

#[derive(Subcommand)]
enum CookieAction {
    /// Show cookie file path
    Path,
    /// Clear stored cookies
    Clear,
    /// Read a JSON cookie array from stdin and store it
    Import,
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.debug { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));

    let subscriber = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false);
    if cli.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    let mut config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }
    if cli.proxy.is_some() {
        config.proxy = cli.proxy;
    }

    let today = Local::now().date_naive();

    match cli.command {
        Commands::Crawl { force, workers } => {
            if let Some(workers) = workers {
                config.publication_workers = workers;
            }
            config.validate().context("Invalid configuration")?;
            let summary = crawl(&config, today, force).await?;
            print_summary("Publication crawl", &summary);
        }
        Commands::Citations { force } => {
            config.validate().context("Invalid configuration")?;
            let summary = citations(&config, today, force).await?;
            print_summary("Citation refresh", &summary);
        }
        Commands::Run { force } => {
            config.validate().context("Invalid configuration")?;
            let crawled = crawl(&config, today, force).await?;
            print_summary("Publication crawl", &crawled);
            let refreshed = citations(&config, today, force).await?;
            print_summary("Citation refresh", &refreshed);
        }
        Commands::Cookies { action } => handle_cookies(&config, action)?,
    }

    Ok(())
}

// ============================================================================
// Runs
// ============================================================================

async fn crawl(config: &Config, today: NaiveDate, force: bool) -> Result<RunSummary> {
    let client = PubMedClient::new(config).context("Failed to create PubMed client")?;
    let roster = CsvRosterStore::new(config.roster_path());
    let publications = CsvPublicationStore::new(config.publications_dir());

    info!(data_dir = %config.data_dir.display(), force = force, "Publication crawl");

    pipeline::run_publication_crawl(&roster, &publications, &client, &client, config, today, force)
        .await
        .context("Publication crawl failed")
}

async fn citations(config: &Config, today: NaiveDate, force: bool) -> Result<RunSummary> {
    let cookies = CookieManager::from_option(config.cookie_file.clone())?.load();
    let roster = CsvRosterStore::new(config.roster_path());
    let publications = CsvPublicationStore::new(config.publications_dir());

    let session = ScholarSession::open(config, &cookies).context("Failed to open citation session")?;
    let mut prober = CitationProber::new(session, config.pacing.clone(), config.probe_timeout())?;

    info!(data_dir = %config.data_dir.display(), force = force, "Citation refresh");

    pipeline::run_citation_refresh(&roster, &publications, &mut prober, config, today, force)
        .await
        .context("Citation refresh failed")
}

fn print_summary(stage: &str, summary: &RunSummary) {
    println!("{}: {}", stage, summary);
}

// ============================================================================
// Cookie Management
// ============================================================================

fn handle_cookies(config: &Config, action: CookieAction) -> Result<()> {
    let manager = CookieManager::from_option(config.cookie_file.clone())?;

    match action {
        CookieAction::Path => {
            println!("Cookie file: {:?}", manager.path());
        }
        CookieAction::Clear => {
            manager.clear()?;
            println!("Cookies cleared.");
        }
        CookieAction::Import => {
            let mut input = String::new();
            std::io::stdin()
                .read_to_string(&mut input)
                .context("Failed to read cookies from stdin")?;
            let count = manager
                .import(&input)
                .context("Expected a JSON array like [{\"name\":\"NID\",\"value\":\"xxx\",\"domain\":\".google.com\"}]")?;
            println!("Saved {} cookies to {:?}", count, manager.path());
        }
    }

    Ok(())
}
