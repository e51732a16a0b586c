//! Pricewatch main entry point
//!
//! This is the command-line interface for the Pricewatch catalog crawler.

use anyhow::Context;
use clap::Parser;
use pricewatch::config::{load_config_with_hash, Config, CrawlMode};
use pricewatch::crawler::{run_crawl, CrawlOptions};
use pricewatch::output::{load_statistics, print_statistics};
use pricewatch::storage::{RunStatus, SqliteStorage};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Pricewatch: a resumable e-commerce catalog crawler
///
/// Pricewatch walks a shop's catalog (or refreshes prices for a feed of item
/// ids), rotating sessions across proxies and browser fingerprints, and
/// writes deduplicated price records as JSON lines.
#[derive(Parser, Debug)]
#[command(name = "pricewatch")]
#[command(version = "1.0.0")]
#[command(about = "A resumable e-commerce catalog crawler", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Resume an interrupted crawl (default behavior)
    #[arg(long, conflicts_with = "fresh")]
    resume: bool,

    /// Start a fresh crawl, ignoring previous state
    #[arg(long, conflicts_with = "resume")]
    fresh: bool,

    /// Crawl mode overriding the config (full, test, price, promo)
    #[arg(long, value_name = "MODE")]
    mode: Option<CrawlMode>,

    /// Validate config and show what would be crawled without actually crawling
    #[arg(long, conflicts_with = "stats")]
    dry_run: bool,

    /// Show statistics from the database and exit
    #[arg(long, conflicts_with = "dry_run")]
    stats: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    if cli.dry_run {
        handle_dry_run(&config, cli.mode);
    } else if cli.stats {
        handle_stats(&config)?;
    } else {
        handle_crawl(config, &config_hash, cli.fresh, cli.mode).await?;
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("pricewatch=info,warn"),
            1 => EnvFilter::new("pricewatch=debug,info"),
            2 => EnvFilter::new("pricewatch=trace,debug"),
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

/// Handles the --dry-run mode: shows the effective settings and seeds
fn handle_dry_run(config: &Config, mode: Option<CrawlMode>) {
    let mode = mode.unwrap_or(config.seeds.mode);
    println!("=== Pricewatch Dry Run ===\n");

    println!("Crawler Configuration:");
    println!("  Mode: {}", mode);
    println!("  Workers: {}", config.crawler.max_concurrency);
    println!("  Max retries: {}", config.crawler.max_request_retries);
    println!("  Fetch timeout: {}s", config.crawler.fetch_timeout_secs);
    println!(
        "  Jitter: {}-{}ms",
        config.crawler.jitter_ms[0], config.crawler.jitter_ms[1]
    );

    println!("\nSessions:");
    println!("  Pool size: {}", config.session.max_pool_size);
    println!(
        "  Retire after {} consecutive errors",
        config.session.max_consecutive_errors
    );
    if config.proxy.pool_names.is_empty() {
        println!("  Proxies: none (direct)");
    } else {
        for name in &config.proxy.pool_names {
            let count = config.proxy.pools.get(name).map_or(0, Vec::len);
            println!("  Proxy pool {}: {} endpoints", name, count);
        }
    }

    println!("\nChallenges:");
    match (&config.challenge.solver_url, config.challenge.enabled) {
        (Some(url), true) => println!("  Solver: {}", url),
        _ => println!("  Solving disabled"),
    }

    println!("\nSeeds:");
    match mode {
        CrawlMode::Full => {
            for url in config.seeds.start_urls.iter().chain(&config.seeds.sublist_urls) {
                println!("  - {}", url);
            }
        }
        CrawlMode::Test => println!("  - {}", config.seeds.test_url.as_deref().unwrap_or("(missing)")),
        CrawlMode::Promo => println!("  - {}", config.seeds.promo_url.as_deref().unwrap_or("(missing)")),
        CrawlMode::Price => {
            println!(
                "  Feed: {}",
                config.seeds.price_feed_url.as_deref().unwrap_or("(missing)")
            );
            println!("  Batch size: {}", config.seeds.price_batch_size);
        }
    }

    println!("\nOutput:");
    println!("  Database: {}", config.output.database_path);
    println!("  Dataset: {}", config.output.dataset_path);
    if config.post_processing.development {
        println!("  Post-processing: skipped (development)");
    }

    println!("\n✓ Configuration is valid");
}

/// Handles the --stats mode: shows statistics from the database
fn handle_stats(config: &Config) -> anyhow::Result<()> {
    println!("Database: {}\n", config.output.database_path);

    let storage = SqliteStorage::new(Path::new(&config.output.database_path))
        .context("Failed to open database")?;
    let statistics = load_statistics(&storage)?;
    print_statistics(&statistics);

    Ok(())
}

/// Handles the main crawl operation
async fn handle_crawl(
    config: Config,
    config_hash: &str,
    fresh: bool,
    mode: Option<CrawlMode>,
) -> anyhow::Result<()> {
    if fresh {
        tracing::info!("Starting fresh crawl (ignoring previous state)");
    } else {
        tracing::info!("Starting crawl (will resume if interrupted run exists)");
    }

    let report = run_crawl(config, config_hash, CrawlOptions { fresh, mode })
        .await
        .context("Crawl failed to start")?;

    match report.status {
        RunStatus::Completed => tracing::info!(
            "Run {} completed: {} items emitted, {} duplicates, {} failed requests",
            report.run_id,
            report.stats.items_emitted,
            report.stats.items_duplicate,
            report.stats.items_failed
        ),
        status => tracing::info!("Run {} stopped ({})", report.run_id, status.to_db_string()),
    }

    Ok(())
}
