//! Exposure Balancer - Main Entry Point

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use exposure_balancer::bus::{InMemoryBus, MessageBus, Subject};
use exposure_balancer::config::Config;
use exposure_balancer::engine::Engine;
use exposure_balancer::exchange::{BinanceClient, BinanceWebSocket, ExchangeGateway, PaperExchange};
use exposure_balancer::feed::{BalanceFeed, CandleFeed};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinSet};
use tracing::{error, info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

/// Exposure Balancer CLI
#[derive(Parser)]
#[command(name = "exposure-balancer")]
#[command(version, about = "Keeps a fixed quote-currency exposure per token on Binance margin")]
struct Cli {
    /// Log orders instead of sending them
    #[arg(long, global = true)]
    paper: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run feeds, ingestion and rebalancing until Ctrl-C (default)
    Run,

    /// Sync the ledger from the exchange, print it and exit
    Snapshot,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging()?;

    let config = Config::load().context("Failed to load configuration")?;
    config.validate()?;
    log_config(&config, cli.paper);

    let client = Arc::new(BinanceClient::new(&config.exchange)?);
    let gateway: Arc<dyn ExchangeGateway> = if cli.paper {
        info!("📝 PAPER MODE - orders are logged, not sent");
        Arc::new(PaperExchange::new(client.clone()))
    } else {
        warn!("⚠️  LIVE MODE - orders are sent to the exchange");
        client.clone()
    };

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Snapshot => snapshot(config, gateway).await,
        Commands::Run => run(config, client, gateway).await,
    }
}

async fn run(
    config: Config,
    client: Arc<BinanceClient>,
    gateway: Arc<dyn ExchangeGateway>,
) -> Result<()> {
    info!("╔════════════════════════════════════════════════════════════╗");
    info!(
        "║            Exposure Balancer v{}                        ║",
        env!("CARGO_PKG_VERSION")
    );
    info!("╚════════════════════════════════════════════════════════════╝");

    let symbols = config.portfolio.trade_symbols();
    let bus = Arc::new(InMemoryBus::new(&config.bus));
    let engine = Engine::new(config.clone(), gateway);

    let (shutdown_tx, shutdown) = watch::channel(false);

    // Consumers bind before producers start so nothing is published unrouted
    let balances = bus.subscribe(Subject::Balance).await?;
    let candles = bus.subscribe(Subject::Candle).await?;
    let router = engine.router();
    let router_task = tokio::spawn(router.run(balances, candles, shutdown.clone()));

    let publisher: Arc<dyn MessageBus> = bus.clone();
    let candle_feed = CandleFeed::new(
        BinanceWebSocket::new(config.exchange.testnet),
        publisher.clone(),
        symbols,
        config.portfolio.kline_interval.clone(),
    );
    let balance_feed = BalanceFeed::new(
        client,
        BinanceWebSocket::new(config.exchange.testnet),
        publisher,
        config.portfolio.clone(),
        config.bootstrap.clone(),
    );

    let mut feeds = JoinSet::new();
    let candle_shutdown = shutdown.clone();
    feeds.spawn(async move { ("candle feed", candle_feed.run(candle_shutdown).await) });
    let balance_shutdown = shutdown.clone();
    feeds.spawn(async move { ("balance feed", balance_feed.run(balance_shutdown).await) });

    if let Err(e) = engine.bootstrap().await {
        error!(error = %e, "❌ Startup sync failed, exiting");
        feeds.abort_all();
        router_task.abort();
        return Err(e.into());
    }

    info!("🚀 Balancer running, press Ctrl-C to stop");
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    // Without live feeds the ledger goes stale: losing one stops the balancer
    let outcome = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("🛑 Shutdown signal received");
            Ok(())
        }
        Some(joined) = feeds.join_next() => {
            let err = match feed_exit(joined) {
                Ok(name) => anyhow!("{} stopped unexpectedly", name),
                Err(e) => e,
            };
            error!(error = %err, "❌ Feed lost, shutting down");
            Err(err)
        }
    };

    shutdown_tx.send_replace(true);
    while let Some(joined) = feeds.join_next().await {
        if let Err(e) = feed_exit(joined) {
            warn!(error = %e, "Feed failed during shutdown");
        }
    }

    bus.close().await;
    let router_stats = router_task.await.context("Router task panicked")?;
    let dispatch_stats = engine.dispatch_stats();

    info!("📊 Session summary:");
    info!(
        "   Balances applied: {}, prices evaluated: {}",
        router_stats.balances_applied, router_stats.prices_evaluated
    );
    info!(
        "   Decisions: {}, accepted: {}, rejected: {}, failed: {}",
        router_stats.decisions,
        dispatch_stats.accepted,
        dispatch_stats.rejected,
        dispatch_stats.failed
    );
    info!(
        "   Malformed: {}, ignored: {}, errors: {}",
        router_stats.malformed, router_stats.ignored, router_stats.errors
    );
    info!("👋 Exposure Balancer shutdown complete");

    outcome
}

/// Name of a feed that returned cleanly, or why it did not.
fn feed_exit(joined: Result<(&'static str, Result<()>), JoinError>) -> Result<&'static str> {
    match joined {
        Ok((name, Ok(()))) => Ok(name),
        Ok((name, Err(e))) => Err(e.context(format!("{} failed", name))),
        Err(e) => Err(anyhow!("feed task panicked: {}", e)),
    }
}

async fn snapshot(config: Config, gateway: Arc<dyn ExchangeGateway>) -> Result<()> {
    let engine = Engine::new(config, gateway);
    let report = engine.bootstrap().await?;

    info!("📋 Ledger snapshot:");
    for (symbol, entry) in engine.ledger().snapshot() {
        let available = entry.available.map(|v| v.to_string());
        let lot = entry.lot_increment.map(|v| v.to_string());
        info!(
            "   {:<12} available={:<18} lot={}",
            symbol,
            available.as_deref().unwrap_or("-"),
            lot.as_deref().unwrap_or("-")
        );
    }
    if !report.unlisted.is_empty() {
        warn!("   Unlisted: {}", report.unlisted.join(", "));
    }

    Ok(())
}

/// Initialize logging to stdout and an hourly rolling file.
fn init_logging() -> Result<()> {
    use tracing_subscriber::fmt::writer::MakeWriterExt;

    std::fs::create_dir_all("logs")?;

    let file_appender = tracing_appender::rolling::hourly("logs", "exposure-balancer.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    // Keep the writer alive for the whole process
    Box::leak(Box::new(guard));

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("exposure_balancer=debug".parse()?)
                .add_directive(Level::INFO.into()),
        )
        .with_writer(std::io::stdout.and(file_writer))
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .init();

    Ok(())
}

/// Log configuration on startup.
fn log_config(config: &Config, paper: bool) {
    info!("📋 Configuration:");
    info!(
        "   Target Exposure: {} {}",
        config.portfolio.target_exposure, config.portfolio.quote_asset
    );
    info!("   Symbols: {}", config.portfolio.trade_symbols().join(", "));
    if !config.portfolio.ignore_assets.is_empty() {
        info!("   Ignored: {}", config.portfolio.ignore_assets.join(", "));
    }
    info!("   Kline Interval: {}", config.portfolio.kline_interval);
    info!(
        "   Router: {} concurrent symbols, queue {}",
        config.router.max_concurrency, config.router.queue_capacity
    );
    info!("   Max Deliver: {}", config.bus.max_deliver);
    info!("   Testnet: {}, Paper: {}", config.exchange.testnet, paper);
}
