use anyhow::{Context, Result};
use chess_crawler::apis::ChessComClient;
use chess_crawler::config::{Config, StorageBackend};
use chess_crawler::constants::{DEFAULT_CONFIG_PATH, ENV_CONFIG_PATH};
use chess_crawler::infra::ReqwestHttp;
use chess_crawler::pipeline::selectors::ListSelector;
use chess_crawler::pipeline::PlayerSelector;
use chess_crawler::rate_limiter::RateLimiter;
use chess_crawler::storage::{InMemoryStore, ProfileStore, SqliteStore};
use chess_crawler::types::PlayerIdentity;
use chess_crawler::{logging, metrics, Crawler, StopCondition};
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "chess_crawler")]
#[command(about = "Walks chess.com players through their opponents and stores the ones worth keeping")]
#[command(version)]
struct Cli {
    /// Path to the TOML config (default: config.toml or $CHESS_CRAWLER_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Serve Prometheus metrics on this address, e.g. 127.0.0.1:9898
    #[arg(long, global = true)]
    metrics_addr: Option<SocketAddr>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl from a seed player through their opponents
    Crawl {
        /// Starting player; defaults to run.seed_identity, then the latest stored profile
        #[arg(long)]
        seed: Option<String>,
        /// Stop after this many visits
        #[arg(long)]
        iterations: Option<u64>,
        /// Stop after this many seconds
        #[arg(long)]
        duration_secs: Option<u64>,
    },
    /// Refresh every stored profile
    Recrawl,
    /// Remove duplicate profile rows and install the unique username index
    Dedupe,
}

fn open_store(config: &Config) -> Result<Arc<dyn ProfileStore>> {
    let store: Arc<dyn ProfileStore> = match config.storage.backend {
        StorageBackend::Sqlite => Arc::new(
            SqliteStore::open(&config.storage.database_path).with_context(|| {
                format!("opening {}", config.storage.database_path.display())
            })?,
        ),
        StorageBackend::Memory => {
            warn!("Using the in-memory store; nothing survives this run");
            Arc::new(InMemoryStore::new())
        }
    };
    Ok(store)
}

fn build_crawler(
    config: &Config,
    store: Arc<dyn ProfileStore>,
    selector: Box<dyn PlayerSelector>,
) -> Result<Crawler> {
    let http = ReqwestHttp::new(
        &config.http.user_agent,
        Duration::from_secs(config.retry.timeout_secs),
    )?;
    let client = Arc::new(ChessComClient::new(
        Arc::new(http),
        RateLimiter::new(config.rate_limits()),
    ));
    let retry = config.retry_policy();

    let getter = config.pipeline.build_getter(
        client,
        retry.clone(),
        config.run.fetch_concurrency_limit,
        &config.run.required_fetchers,
    );
    let discriminator = config.pipeline.build_discriminator();
    let saver = config.pipeline.build_saver(store, retry);
    info!(
        "Pipeline: fetchers [{}], savers [{}], selector {}",
        getter.names().join(", "),
        saver.names().join(", "),
        selector.name()
    );

    Ok(Crawler::new(
        getter,
        discriminator,
        saver,
        selector,
        config.run.max_selection_attempts,
    )?)
}

async fn run_crawl(
    mut crawler: Crawler,
    seed: PlayerIdentity,
    stop: &StopCondition,
) -> Result<()> {
    let cancel = crawler.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Ctrl-C received, stopping after the current player");
            cancel.cancel();
        }
    });

    let report = crawler.run(Some(seed), stop).await;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let _guard = logging::init_logging();

    let cli = Cli::parse();
    let config_path = cli
        .config
        .or_else(|| std::env::var(ENV_CONFIG_PATH).ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    let mut config = Config::load_or_default(&config_path)?;

    if let Some(addr) = cli.metrics_addr {
        metrics::init_metrics(addr)?;
    }
    let store = open_store(&config)?;

    match cli.command {
        Commands::Crawl {
            seed,
            iterations,
            duration_secs,
        } => {
            if iterations.is_some() {
                config.run.max_iterations = iterations;
            }
            if duration_secs.is_some() {
                config.run.max_duration_secs = duration_secs;
            }

            let seed = match seed {
                Some(name) => Some(PlayerIdentity::new(name)?),
                None => config.seed()?,
            };
            let seed = match seed {
                Some(seed) => seed,
                None => {
                    let latest = store
                        .latest_profile()
                        .await?
                        .context("no seed given and no stored profile to start from")?;
                    info!("Starting from the latest stored profile {}", latest.username);
                    latest.username
                }
            };

            let crawler = build_crawler(&config, store, config.pipeline.build_selector())?;
            run_crawl(crawler, seed, &config.stop_condition()).await?;
        }
        Commands::Recrawl => {
            let identities = store.identities().await?;
            let total = identities.len();
            let mut selector = ListSelector::new(identities);
            let Some(seed) = selector.take_first() else {
                println!("No stored profiles to refresh");
                return Ok(());
            };
            info!("Refreshing {} stored profile(s)", total);

            let crawler = build_crawler(&config, store, Box::new(selector))?;
            let mut stop = config.stop_condition();
            stop.max_iterations = None;
            run_crawl(crawler, seed, &stop).await?;
        }
        Commands::Dedupe => {
            let removed = store.remove_duplicate_profiles().await?;
            println!("Removed {} duplicate profile row(s)", removed);
        }
    }
    Ok(())
}
