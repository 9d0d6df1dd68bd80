use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use classifieds_watcher::plugins::notifiers::TelegramNotifier;
use classifieds_watcher::plugins::SourceFetcher;
use classifieds_watcher::scraper::ListingScraper;
use classifieds_watcher::{
    AppConfig, CycleOutcome, CycleScheduler, DedupStore, Pacing, PollingScheduler,
    SqliteDedupStore, Trigger,
};

#[derive(Debug, Parser)]
#[command(name = "classifieds-watcher", version, about)]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(short, long, env = "CONFIG_PATH", default_value = "config.yaml")]
    config: PathBuf,

    /// Also write daily rotated log files into this directory
    #[arg(long, env = "LOG_DIR")]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Clone, Copy, Subcommand)]
enum Command {
    /// Check now, then keep checking on the configured interval (default)
    Run,
    /// Run a single check cycle and exit
    Check,
    /// Delete every sent-ad record
    Clear,
    /// Send a test message to the default Telegram target
    TestNotify,
    /// Scrape every filter once and print what was found
    TestScrape,
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is fine
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let _log_guard = init_tracing(cli.log_dir.as_deref());

    let config = AppConfig::from_file(&cli.config)
        .with_context(|| format!("Failed to load config from {}", cli.config.display()))?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(config).await,
        Command::Check => check_once(config).await,
        Command::Clear => clear(config).await,
        Command::TestNotify => test_notify(config).await,
        Command::TestScrape => test_scrape(config).await,
    }
}

fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("classifieds_watcher=info"));
    let registry = tracing_subscriber::registry().with(filter).with(fmt::layer());

    match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "classifieds-watcher.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            registry
                .with(fmt::layer().with_ansi(false).with_writer(writer))
                .init();
            Some(guard)
        }
        None => {
            registry.init();
            None
        }
    }
}

fn build_cycle(config: &AppConfig, store: Arc<SqliteDedupStore>) -> Result<CycleScheduler> {
    let fetcher = ListingScraper::new(&config.scraper)?;
    let notifier = TelegramNotifier::from_config(&config.telegram)?;

    Ok(CycleScheduler::new(
        config.resolved_filters(),
        Arc::new(fetcher),
        Arc::new(notifier),
        store,
        Pacing::from(&config.scraper),
    ))
}

async fn run(config: AppConfig) -> Result<()> {
    if config.filters.is_empty() {
        warn!("No filters configured. Exiting.");
        return Ok(());
    }

    info!("Starting classifieds watcher with {} filter(s)", config.filters.len());

    let store = Arc::new(SqliteDedupStore::open(&config.database).await?);
    let result = poll_until_signal(&config, Arc::clone(&store)).await;
    store.close().await;
    result
}

async fn poll_until_signal(config: &AppConfig, store: Arc<SqliteDedupStore>) -> Result<()> {
    let cycle = Arc::new(build_cycle(config, store)?);

    let mut polling = PollingScheduler::new(cycle, config.scraper.interval()).await?;
    polling.start().await?;

    shutdown_signal().await?;

    // In-flight cycles are dropped with the runtime; already marked ads stay marked.
    if let Err(e) = polling.shutdown().await {
        warn!("Failed to stop polling scheduler cleanly: {}", e);
    }
    Ok(())
}

async fn check_once(config: AppConfig) -> Result<()> {
    if config.filters.is_empty() {
        warn!("No filters configured. Exiting.");
        return Ok(());
    }

    let store = Arc::new(SqliteDedupStore::open(&config.database).await?);
    let cycle = build_cycle(&config, Arc::clone(&store));

    let result = match cycle {
        Ok(cycle) => {
            let interrupted = async {
                if let Err(e) = shutdown_signal().await {
                    warn!("Signal handling unavailable: {}", e);
                    std::future::pending::<()>().await;
                }
            };
            match cycle.trigger_or_cancel(Trigger::Manual, interrupted).await {
                Some(CycleOutcome::Completed(report)) => {
                    info!(?report, "Check complete");
                    Ok(())
                }
                Some(CycleOutcome::Skipped) => Ok(()),
                Some(CycleOutcome::Aborted(message)) => {
                    Err(anyhow::anyhow!("Check cycle aborted: {}", message))
                }
                None => {
                    warn!("Check interrupted; ads handled so far stay marked");
                    Ok(())
                }
            }
        }
        Err(e) => Err(e),
    };

    store.close().await;
    result
}

async fn clear(config: AppConfig) -> Result<()> {
    info!("Clearing database at: {}", config.database.path);

    let store = SqliteDedupStore::open(&config.database).await?;
    let before = store.count().await?;
    info!("Found {} ads in database", before);

    let deleted = store.clear_all().await?;
    info!("Deleted {} ads from database", deleted);

    let after = store.count().await?;
    info!("Database now contains {} ads", after);

    store.close().await;
    Ok(())
}

async fn test_notify(config: AppConfig) -> Result<()> {
    let target = config.default_target();
    info!(chat_id = %target.chat_id, thread_id = ?target.thread_id, "Sending test message");

    let notifier = TelegramNotifier::from_config(&config.telegram)?;
    match notifier.send_test_message(&target).await {
        Ok(()) => {
            info!("Test message sent successfully");
            Ok(())
        }
        Err(e) => {
            error!("Error sending test message: {}", e);
            Err(e.into())
        }
    }
}

async fn test_scrape(config: AppConfig) -> Result<()> {
    let scraper = ListingScraper::new(&config.scraper)?;
    let pacing = Pacing::from(&config.scraper);
    let filters = config.resolved_filters();
    info!("Found {} filter(s)", filters.len());

    for (index, filter) in filters.iter().enumerate() {
        if index > 0 {
            tokio::time::sleep(pacing.inter_filter_delay).await;
        }

        println!("\nFilter: {}\nURL: {}", filter.name, filter.url);
        match scraper.fetch(&filter.url).await {
            Ok(listings) => {
                println!("Found {} ads", listings.len());
                for (i, listing) in listings.iter().take(3).enumerate() {
                    println!("  {}. {}", i + 1, listing.title);
                    println!("     Price: {}", listing.price);
                    println!("     Location: {}", listing.location);
                    println!("     URL: {}", listing.url);
                }
            }
            Err(e) => error!(filter = %filter.name, "Error testing filter: {}", e),
        }
    }

    Ok(())
}

async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                info!("Shutting down...");
            }
            _ = terminate.recv() => {
                info!("Received SIGTERM, shutting down gracefully...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Shutting down...");
    }

    Ok(())
}
