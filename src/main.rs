//! Leakwatch main entry point
//!
//! This is the command-line interface for the Leakwatch crawl pipeline.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use leakwatch::config::{load_config_with_hash, Config};
use leakwatch::output::{load_queue_depths, load_statistics, print_statistics};
use leakwatch::pipeline::{Role, Runtime};
use leakwatch::state::ScannerType;
use leakwatch::storage::{lock_shared, NewSite, Storage};
use leakwatch::StageStatus;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Leakwatch: a distributed crawl pipeline
///
/// Leakwatch discovers pages on tracked sites through their sitemaps, crawls them
/// through a durable work queue, and keeps task, site and frontier state in a
/// local document store.
#[derive(Parser, Debug)]
#[command(name = "leakwatch")]
#[command(version = "1.0.0")]
#[command(about = "A distributed crawl pipeline", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose", global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run worker and processor pools until interrupted
    Run {
        /// Pools to run (default: all)
        #[arg(long = "role", value_enum)]
        roles: Vec<Role>,
    },

    /// Register a site to crawl
    AddSite {
        /// Site domain, e.g. example.com
        domain: String,

        /// Known sitemap URL (repeatable)
        #[arg(long = "sitemap")]
        sitemaps: Vec<String>,

        /// Fetch capability the site needs (http or browser)
        #[arg(long, default_value = "http")]
        scanner: String,

        /// Captcha classification of the site
        #[arg(long)]
        captcha_type: Option<String>,
    },

    /// Create a scan task for a site and publish its sitemap task
    Enqueue {
        /// Site ID or domain
        site: String,

        /// Stop after the sitemap stage until `trigger-page` is called
        #[arg(long)]
        no_auto_continue: bool,

        /// Base URL of an external frontier query API
        #[arg(long, default_value = "")]
        frontier_api: String,
    },

    /// Start the page stage of a task completed without it
    TriggerPage {
        task_id: String,
    },

    /// Cancel every unfinished stage of a task
    Cancel {
        task_id: String,
    },

    /// Show statistics from the store and queue and exit
    Stats,

    /// Validate the configuration and exit
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    match cli.command {
        Command::Check => handle_check(&config),
        Command::Run { roles } => handle_run(config, roles).await,
        Command::AddSite {
            domain,
            sitemaps,
            scanner,
            captcha_type,
        } => handle_add_site(config, domain, sitemaps, &scanner, captcha_type),
        Command::Enqueue {
            site,
            no_auto_continue,
            frontier_api,
        } => handle_enqueue(config, &site, !no_auto_continue, &frontier_api).await,
        Command::TriggerPage { task_id } => handle_trigger_page(config, &task_id).await,
        Command::Cancel { task_id } => handle_cancel(config, &task_id),
        Command::Stats => handle_stats(config).await,
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("leakwatch=info,warn"),
            1 => EnvFilter::new("leakwatch=debug,info"),
            2 => EnvFilter::new("leakwatch=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles `check`: prints the effective configuration
fn handle_check(config: &Config) -> anyhow::Result<()> {
    println!("=== Leakwatch Configuration ===\n");

    println!("Queue:");
    println!("  Database: {}", config.queue.database_path);
    println!("  Max deliver: {}", config.queue.max_deliver);
    println!("  Ack wait: {}s", config.queue.ack_wait_secs);
    println!("  Max ack pending: {}", config.queue.max_ack_pending);

    println!("\nStore:");
    println!("  Database: {}", config.store.database_path);

    println!("\nFetch:");
    println!("  Pool size: {}", config.fetch.pool_size);
    println!("  Request timeout: {}s", config.fetch.request_timeout_secs);

    println!("\nSitemap workers: {}", config.sitemap.workers);
    println!(
        "  Inactivity timeout: {}s, hard deadline: {}s, max depth: {}",
        config.sitemap.inactivity_timeout_secs,
        config.sitemap.hard_deadline_secs,
        config.sitemap.max_depth
    );
    println!("  Blacklist: {}", config.sitemap.blacklist.join(", "));

    println!("\nPage workers: {}", config.page.workers);
    println!(
        "  Batch size: {}, max link depth: {}",
        config.page.batch_size, config.page.max_link_depth
    );

    println!("\nProcessor workers: {}", config.processors.workers);
    println!(
        "Scheduler: {} (every {}s)",
        if config.scheduler.enabled { "enabled" } else { "disabled" },
        config.scheduler.interval_secs
    );

    println!("\n✓ Configuration is valid");
    Ok(())
}

/// Handles `run`: starts the pools and stops them on Ctrl-C
async fn handle_run(config: Config, roles: Vec<Role>) -> anyhow::Result<()> {
    let roles = if roles.is_empty() { Role::all() } else { roles };
    let runtime = Runtime::open(config)?;

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, shutting down");
        }
        signal.cancel();
    });

    runtime.run(&roles, shutdown).await?;
    Ok(())
}

fn handle_add_site(
    config: Config,
    domain: String,
    sitemap_urls: Vec<String>,
    scanner: &str,
    captcha_type: Option<String>,
) -> anyhow::Result<()> {
    let Some(scanner_type) = ScannerType::from_db_string(scanner) else {
        bail!("unknown scanner type {:?} (expected http or browser)", scanner);
    };
    let runtime = Runtime::open(config)?;
    let site = lock_shared(runtime.storage())?.insert_site(&NewSite {
        domain,
        sitemap_urls,
        scanner_type,
        captcha_type,
    })?;
    println!("✓ Site {} registered with id {}", site.domain, site.id);
    Ok(())
}

async fn handle_enqueue(
    config: Config,
    site: &str,
    auto_continue: bool,
    frontier_api: &str,
) -> anyhow::Result<()> {
    let runtime = Runtime::open(config)?;
    let site_id = {
        let storage = lock_shared(runtime.storage())?;
        match storage.get_site(site)? {
            Some(found) => found.id,
            None => storage
                .get_site_by_domain(site)?
                .map(|found| found.id)
                .with_context(|| format!("no site with id or domain {}", site))?,
        }
    };

    let task = runtime
        .enqueuer()
        .enqueue_site(&site_id, auto_continue, frontier_api)
        .await?;
    println!("✓ Task {} enqueued for {}", task.id, task.domain);
    Ok(())
}

async fn handle_trigger_page(config: Config, task_id: &str) -> anyhow::Result<()> {
    let runtime = Runtime::open(config)?;
    let task = runtime.enqueuer().trigger_page_stage(task_id).await?;
    println!("✓ Page stage of task {} published", task.id);
    Ok(())
}

fn handle_cancel(config: Config, task_id: &str) -> anyhow::Result<()> {
    let runtime = Runtime::open(config)?;
    if runtime.enqueuer().cancel_task(task_id)?.is_applied() {
        println!("✓ Task {} cancelled", task_id);
    } else {
        let status = lock_shared(runtime.storage())?
            .get_task(task_id)?
            .map(|task| task.status())
            .unwrap_or(StageStatus::Cancelled);
        println!("Task {} already settled ({})", task_id, status);
    }
    Ok(())
}

/// Handles `stats`: shows statistics from the store and queue
async fn handle_stats(config: Config) -> anyhow::Result<()> {
    println!("Store: {}", config.store.database_path);
    println!("Queue: {}\n", config.queue.database_path);

    let runtime = Runtime::open(config)?;
    let mut stats = {
        let storage = lock_shared(runtime.storage())?;
        load_statistics(&*storage)?
    };
    stats.queue_depths = load_queue_depths(runtime.queue().as_ref()).await?;

    print_statistics(&stats);
    Ok(())
}
