use anyhow::Context;
use clap::{Parser, Subcommand};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

use show_scraper::batch::BatchRunner;
use show_scraper::config::AppConfig;
use show_scraper::logging;
use show_scraper::pipeline::VenueStatus;
use show_scraper::registry::{self, VenueConfig};
use show_scraper::renderer::{BrowserSession, ChromeRenderer, PageRenderer};
use show_scraper::scheduler::{Scheduler, Trigger};
use show_scraper::server::{self, AppState};
use show_scraper::storage::{CacheStore, InMemoryCacheStore, SqliteCacheStore};

#[derive(Parser)]
#[command(name = "show_scraper")]
#[command(about = "Scrapes today's shows from venue websites and serves them over HTTP")]
#[command(version)]
struct Cli {
    /// Configuration file; defaults apply when it does not exist
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the API and run the daily scrape
    Serve,
    /// Run one batch now and print the records
    Scrape {
        /// Venues to scrape (comma-separated names). Defaults to all
        #[arg(long)]
        venues: Option<String>,
        /// Write the result to the cache as well
        #[arg(long)]
        store: bool,
    },
    /// Print the cached batch
    ShowCache,
    /// List the configured venues
    Venues,
}

fn venue_list(config: &AppConfig) -> anyhow::Result<Vec<VenueConfig>> {
    let venues = match &config.venues_path {
        Some(path) => registry::load_venues(path)?,
        None => registry::builtin_venues()?,
    };
    Ok(venues)
}

fn open_store(config: &AppConfig) -> anyhow::Result<Arc<dyn CacheStore>> {
    if config.uses_memory_cache() {
        info!("Using in-memory scrape cache");
        return Ok(Arc::new(InMemoryCacheStore::new()));
    }
    let store = SqliteCacheStore::open(&config.cache.path)
        .with_context(|| format!("opening scrape cache at {}", config.cache.path))?;
    Ok(Arc::new(store))
}

async fn launch_browser(config: &AppConfig) -> anyhow::Result<(Arc<BrowserSession>, Arc<dyn PageRenderer>)> {
    let session = Arc::new(
        BrowserSession::launch(&config.browser_options())
            .await
            .context("launching the browser")?,
    );
    let renderer: Arc<dyn PageRenderer> = Arc::new(ChromeRenderer::new(Arc::clone(&session)));
    Ok((session, renderer))
}

async fn serve(config: AppConfig) -> anyhow::Result<()> {
    let metrics = match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!("Metrics recorder unavailable: {}", e);
            None
        }
    };

    let venues = venue_list(&config)?;
    let store = open_store(&config)?;
    let (session, renderer) = launch_browser(&config).await?;

    let runner = BatchRunner::new(renderer, config.batch_settings());
    let scheduler = Arc::new(Scheduler::new(runner, Arc::clone(&store), venues));

    let mut cron = if config.schedule.enabled {
        Some(scheduler.start_daily(config.daily_at()?).await?)
    } else {
        info!("Daily scrape disabled");
        None
    };

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .with_context(|| format!("invalid listen address {}:{}", config.host, config.port))?;

    let state = AppState { scheduler, store, metrics };
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Listening for shutdown signal failed: {}", e);
        }
        info!("Shutdown signal received");
    };

    let served = server::start_server(state, addr, config.static_dir.as_deref(), shutdown).await;

    if let Some(cron) = cron.as_mut() {
        if let Err(e) = cron.shutdown().await {
            warn!("Stopping the daily scrape failed: {}", e);
        }
    }
    session.close().await?;

    served.context("HTTP server failed")?;
    Ok(())
}

async fn scrape(config: AppConfig, names: Option<String>, store_result: bool) -> anyhow::Result<()> {
    let all = venue_list(&config)?;
    let venues = match names {
        Some(list) => {
            let names: Vec<String> = list.split(',').map(|s| s.trim().to_string()).collect();
            registry::select_venues(&all, &names)?
        }
        None => all,
    };

    let (session, renderer) = launch_browser(&config).await?;
    let runner = BatchRunner::new(renderer, config.batch_settings());

    let outcome = if store_result {
        let store = open_store(&config)?;
        let scheduler = Scheduler::new(runner, store, venues);
        scheduler.run_and_store(Trigger::Manual).await.map(|summary| {
            println!("📊 Run {}", summary.run_id);
            println!("   Records: {}", summary.records);
            println!("   Venues failed: {} of {}", summary.failed_venues, summary.venues);
            match summary.cached_at {
                Some(at) => println!("   Cached at: {}", at.to_rfc3339()),
                None => println!("   ⚠️  Cache left unchanged"),
            }
        })
    } else {
        let report = runner.run_all(&venues).await;
        for venue in &report.venues {
            let mark = match venue.status {
                VenueStatus::Succeeded => "✅",
                VenueStatus::Failed => "❌",
            };
            eprintln!("{} {}: {} records", mark, venue.venue, venue.records.len());
            for failure in &venue.failures {
                eprintln!("   - {:?}: {}", failure.stage, failure.reason);
            }
        }
        serde_json::to_string_pretty(&report.into_result())
            .map(|json| println!("{json}"))
            .map_err(Into::into)
    };

    session.close().await?;
    outcome?;
    Ok(())
}

async fn show_cache(config: AppConfig) -> anyhow::Result<()> {
    let store = open_store(&config)?;
    match store.get_latest().await? {
        Some(entry) => println!("{}", serde_json::to_string_pretty(&entry)?),
        None => println!("No data found"),
    }
    Ok(())
}

fn list_venues(config: &AppConfig) -> anyhow::Result<()> {
    for venue in venue_list(config)? {
        let kind = if venue.is_two_stage() { "listing + detail" } else { "listing" };
        println!("{:<24} {:<18} {}", venue.name, kind, venue.url);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load(&cli.config)?;

    logging::init_logging(config.mode);
    info!(mode = ?config.mode, "Configuration loaded from {}", cli.config.display());

    match cli.command {
        Commands::Serve => serve(config).await,
        Commands::Scrape { venues, store } => scrape(config, venues, store).await,
        Commands::ShowCache => show_cache(config).await,
        Commands::Venues => list_venues(&config),
    }
}
