//! `tollgate` -- usage-metering and credit-ledger server.
//!
//! Subcommands:
//!
//! - `tollgate serve` -- connect to the ledger substrate and serve the RPC
//!   surface until interrupted.
//! - `tollgate status` -- print the resolved configuration.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tollgate_api::{ApiState, Authenticator};
use tollgate_core::{BillingEngine, ExchangeService, Monitor, PricingService};
use tollgate_ledger::{LedgerStore, RedisLedger};
use tollgate_types::Config;

mod config;

/// tollgate billing server CLI.
#[derive(Parser)]
#[command(name = "tollgate", about = "usage-metering and credit-ledger server", version)]
struct Cli {
    /// Enable verbose (debug-level) logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to the TOML config file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the billing RPC surface.
    Serve,
    /// Print the resolved configuration and exit.
    Status,
}

fn init_tracing(verbose: bool, json: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = config::load(cli.config.clone())?;
    init_tracing(cli.verbose, config.log_json);

    match cli.command {
        Commands::Serve => serve(config).await,
        Commands::Status => status(&config),
    }
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let addr: SocketAddr = config
        .listen_addr
        .parse()
        .with_context(|| format!("invalid listen_addr {:?}", config.listen_addr))?;
    if config.auth.secret.is_empty() {
        anyhow::bail!("auth.secret is not set (config file or TOLLGATE_AUTH_SECRET)");
    }

    let ledger: Arc<dyn LedgerStore> = Arc::new(
        RedisLedger::connect(&config.redis_url)
            .await
            .with_context(|| format!("failed to connect to substrate at {}", config.redis_url))?,
    );
    let pricing = Arc::new(PricingService::load(ledger.clone()).await?);
    let exchange = Arc::new(ExchangeService::load(ledger.clone(), config.exchange.clone()).await?);
    let monitor = Arc::new(Monitor::new(ledger.clone(), config.thresholds.clone()));
    let engine = Arc::new(BillingEngine::new(
        ledger.clone(),
        pricing.clone(),
        exchange.clone(),
        monitor.clone(),
        config.reservation_ttl_secs,
        config.committed_ttl_secs,
    ));

    let shutdown = CancellationToken::new();
    let refresher = tokio::spawn(exchange.clone().run_refresher(shutdown.child_token()));

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            signal_token.cancel();
        }
    });

    let state = ApiState {
        engine,
        pricing,
        exchange,
        monitor,
        ledger,
        auth: Arc::new(Authenticator::new(&config.auth.secret, &config.auth.admin_key)),
        pricing_feed_url: config.pricing_feed_url.clone(),
    };
    tollgate_api::serve(state, addr, shutdown.clone()).await?;

    shutdown.cancel();
    let _ = refresher.await;
    info!("shutdown complete");
    Ok(())
}

fn status(config: &Config) -> anyhow::Result<()> {
    println!("listen_addr:          {}", config.listen_addr);
    println!("redis_url:            {}", config.redis_url);
    println!(
        "auth.secret:          {}",
        if config.auth.secret.is_empty() { "(unset)" } else { "(set)" }
    );
    println!(
        "auth.admin_key:       {}",
        if config.auth.admin_key.is_empty() { "(unset)" } else { "(set)" }
    );
    println!("reservation_ttl_secs: {}", config.reservation_ttl_secs);
    println!("committed_ttl_secs:   {}", config.committed_ttl_secs);
    println!(
        "exchange.feed_url:    {}",
        config.exchange.feed_url.as_deref().unwrap_or("(none)")
    );
    println!(
        "pricing_feed_url:     {}",
        config.pricing_feed_url.as_deref().unwrap_or("(none)")
    );
    Ok(())
}
