use clap::{Parser, Subcommand};
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use poolwatch_indexer::cache::Cache;
use poolwatch_indexer::config::{load_chain_configs, ChainConfig, Settings};
use poolwatch_indexer::db::{progress, Database};
use poolwatch_indexer::indexer::supervisor::run_chain;
use poolwatch_indexer::rpc::RpcClient;
use poolwatch_indexer::sink::Sinks;

#[derive(Parser)]
#[command(
    name = "poolwatch-indexer",
    about = "Multi-chain DEX pool, swap, and token-launch event indexer"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the indexer workers
    Start {
        /// Only index this chain id
        #[arg(long)]
        chain_id: Option<u64>,
        /// Drop the selected chains' progress cursors and start fresh
        #[arg(long)]
        reset_progress: bool,
        /// Log level override (trace, debug, info, warn, error)
        #[arg(long)]
        log_level: Option<String>,
        /// Log output format
        #[arg(long, value_parser = ["json", "console"])]
        log_format: Option<String>,
    },
    /// Load and print the resolved configuration
    Config,
    /// Probe RPC, database, and cache health for every chain
    Health,
    /// Show per-endpoint RPC statistics
    RpcStats {
        #[arg(long)]
        chain_id: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    match cli.command {
        Command::Start {
            chain_id,
            reset_progress,
            log_level,
            log_format,
        } => {
            init_tracing(log_level.as_deref(), log_format.as_deref());
            run_start(chain_id, reset_progress).await
        }
        Command::Config => {
            init_tracing(None, None);
            run_config().await
        }
        Command::Health => {
            init_tracing(None, None);
            run_health().await
        }
        Command::RpcStats { chain_id } => {
            init_tracing(None, None);
            run_rpc_stats(chain_id).await
        }
    }
}

fn init_tracing(log_level: Option<&str>, log_format: Option<&str>) {
    let filter = match log_level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    match log_format {
        Some("json") => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .init(),
        _ => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init(),
    }
}

fn select_chains(
    chains: Vec<ChainConfig>,
    chain_id: Option<u64>,
) -> eyre::Result<Vec<ChainConfig>> {
    let selected: Vec<ChainConfig> = match chain_id {
        Some(id) => chains.into_iter().filter(|c| c.chain_id == id).collect(),
        None => chains,
    };
    if selected.is_empty() {
        return Err(eyre::eyre!(
            "no configured chain matches the requested chain id"
        ));
    }
    Ok(selected)
}

async fn run_start(chain_id: Option<u64>, reset_progress: bool) -> eyre::Result<()> {
    tracing::info!("Poolwatch indexer starting");

    let settings = Arc::new(Settings::from_env()?);
    let chains = select_chains(load_chain_configs(&settings.chains_dir)?, chain_id)?;

    let db = Database::connect(&settings.database_url, settings.database_max_connections).await?;
    db.migrate().await?;
    let cache = Cache::connect(&settings.redis_url, &settings.redis_key_prefix).await?;
    let sinks = Arc::new(Sinks::init(&settings).await);

    if reset_progress {
        for chain in &chains {
            let deleted = progress::reset_chain_progress(db.pool(), chain.chain_id as i64).await?;
            tracing::info!(
                chain = %chain.name,
                chain_id = chain.chain_id,
                cursors_deleted = deleted,
                "Progress reset"
            );
        }
    }

    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    let mut handles = Vec::new();
    for chain in chains {
        let settings = settings.clone();
        let db = db.clone();
        let cache = cache.clone();
        let sinks = sinks.clone();
        let cancel = cancel.clone();
        let chain_name = chain.name.clone();

        handles.push(tokio::spawn(async move {
            if let Err(e) = run_chain(settings, chain, db, cache, sinks, cancel).await {
                tracing::error!(chain = %chain_name, error = %e, "Chain indexer failed");
            }
        }));
    }

    tracing::info!(
        chains = handles.len(),
        "All chain indexers started, send SIGINT/SIGTERM to stop"
    );

    for handle in handles {
        let _ = handle.await;
    }

    // Disconnect collaborators independently; one failing must not keep the
    // others connected.
    db.close().await;
    sinks.close();

    tracing::info!("Poolwatch indexer stopped gracefully");
    Ok(())
}

/// First signal cancels the workers, a second forces exit(1), a third
/// hard-exits with 2.
fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(stream) => Some(stream),
            Err(e) => {
                tracing::warn!(error = %e, "SIGTERM handler unavailable, relying on Ctrl+C");
                None
            }
        };

        let mut received = 0u32;
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = async {
                    match sigterm.as_mut() {
                        Some(stream) => { stream.recv().await; }
                        None => futures::future::pending::<()>().await,
                    }
                } => {}
            }

            received += 1;
            match received {
                1 => {
                    tracing::info!("Shutdown signal received, stopping workers gracefully");
                    cancel.cancel();
                }
                2 => {
                    tracing::warn!("Second shutdown signal, forcing exit");
                    std::process::exit(1);
                }
                _ => {
                    tracing::error!("Third shutdown signal, hard exit");
                    std::process::exit(2);
                }
            }
        }
    });
}

async fn run_config() -> eyre::Result<()> {
    let settings = Settings::from_env()?;
    let chains = load_chain_configs(&settings.chains_dir)?;

    println!("database_url: {}", settings.database_url);
    println!("redis_url: {}", settings.redis_url);
    println!(
        "worker_interval_seconds: {}",
        settings.worker_interval_seconds
    );
    println!("max_blocks_per_request: {}", settings.max_blocks_per_request);
    println!(
        "kafka: {}",
        settings
            .kafka_bootstrap_servers
            .as_deref()
            .unwrap_or("disabled")
    );
    println!(
        "notifier: {}",
        if settings.telegram_bot_token.is_some() {
            "configured"
        } else {
            "disabled"
        }
    );
    println!("chains ({}):", chains.len());
    for chain in &chains {
        println!(
            "  {} (chain_id={}) rpc_urls={} backup={} protocols={} contracts={} confirmations={}",
            chain.name,
            chain.chain_id,
            chain.primary_rpc_urls().len(),
            chain.backup_rpc_urls.len(),
            chain.pools.len(),
            chain.contracts.len(),
            chain.confirmation_blocks,
        );
    }
    Ok(())
}

async fn run_health() -> eyre::Result<()> {
    let settings = Settings::from_env()?;
    let chains = load_chain_configs(&settings.chains_dir)?;
    let mut healthy = true;

    match Database::connect(&settings.database_url, 2).await {
        Ok(db) => {
            let ok = db.ping().await;
            println!("database: {}", if ok { "healthy" } else { "unhealthy" });
            healthy &= ok;
            db.close().await;
        }
        Err(e) => {
            println!("database: unhealthy ({e})");
            healthy = false;
        }
    }

    match Cache::connect(&settings.redis_url, &settings.redis_key_prefix).await {
        Ok(cache) => {
            let ok = cache.ping().await;
            println!("cache: {}", if ok { "healthy" } else { "unhealthy" });
            healthy &= ok;
        }
        Err(e) => {
            println!("cache: unhealthy ({e})");
            healthy = false;
        }
    }

    for chain in &chains {
        let rpc = RpcClient::new(chain, &settings, CancellationToken::new());
        match rpc.connect().await {
            Ok(()) => match rpc.latest_block().await {
                Ok(block) => println!(
                    "chain {} ({}): healthy, head={block}",
                    chain.name, chain.chain_id
                ),
                Err(e) => {
                    println!("chain {} ({}): unhealthy ({e})", chain.name, chain.chain_id);
                    healthy = false;
                }
            },
            Err(e) => {
                println!("chain {} ({}): unhealthy ({e})", chain.name, chain.chain_id);
                healthy = false;
            }
        }
    }

    if !healthy {
        std::process::exit(1);
    }
    println!("status: healthy");
    Ok(())
}

async fn run_rpc_stats(chain_id: Option<u64>) -> eyre::Result<()> {
    let settings = Settings::from_env()?;
    let chains = select_chains(load_chain_configs(&settings.chains_dir)?, chain_id)?;

    for chain in &chains {
        let rpc = RpcClient::new(chain, &settings, CancellationToken::new());
        if let Err(e) = rpc.connect().await {
            println!("chain {} ({}): {e}", chain.name, chain.chain_id);
            continue;
        }
        // One real call so the counters show live behavior.
        let head = rpc.latest_block().await.ok();

        println!(
            "chain {} ({}) head={}:",
            chain.name,
            chain.chain_id,
            head.map(|h| h.to_string())
                .unwrap_or_else(|| "?".to_string())
        );
        println!("{}", serde_json::to_string_pretty(&rpc.stats())?);
    }
    Ok(())
}
