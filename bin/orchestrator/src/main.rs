use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use common::{open_database, Config, DescriptorStore, LedgerSink};
use engine::{
    CommandDiscovery, Cycle, EngineHandle, EngineSettings, HttpSnapshotSource, IntegrationCycle,
    NoopDiscovery, Scheduler, SignalEngine, TradingCycle, TradingCycleSettings,
};
use integrator::{
    AutoIntegrator, IntegratorSettings, MemoryDescriptorStore, SqliteDescriptorStore,
};
use paper::{Ledger, LogSink, SinkDispatcher, SqliteLedgerSink};
use risk::ThresholdExit;
use strategy::{StrategyCatalog, StrategyFileConfig, StrategyRegistry};

/// Ledger events buffered for the sink before new ones are dropped.
const SINK_BACKLOG: usize = 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── Logging ──────────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // ── Config ────────────────────────────────────────────────────────────────
    let cfg = Config::from_env().context("invalid configuration")?;
    info!(market_id = %cfg.market_id, feed = %cfg.feed_url, "Orchestrator starting");

    // ── Persistence ───────────────────────────────────────────────────────────
    let (store, sink): (Arc<dyn DescriptorStore>, Arc<dyn LedgerSink>) = match &cfg.database_url {
        Some(url) => {
            let db = open_database(url)
                .await
                .with_context(|| format!("failed to open database {url}"))?;
            (
                Arc::new(SqliteDescriptorStore::new(db.clone())),
                Arc::new(SqliteLedgerSink::new(db)),
            )
        }
        None => {
            warn!("DATABASE_URL not set, descriptors and trades are kept in memory only");
            (Arc::new(MemoryDescriptorStore::new()), Arc::new(LogSink))
        }
    };

    // ── Shared state ──────────────────────────────────────────────────────────
    let (dispatcher, sink_tx) = SinkDispatcher::new(sink, SINK_BACKLOG);
    let sink_task = tokio::spawn(dispatcher.run());
    let ledger = Arc::new(Ledger::new().with_sink(sink_tx));
    let registry = Arc::new(StrategyRegistry::new());
    let engine_handle = EngineHandle::new();

    // ── Admission ─────────────────────────────────────────────────────────────
    let integrator = Arc::new(AutoIntegrator::new(
        registry.clone(),
        ledger.clone(),
        StrategyCatalog::builtin(),
        store,
        IntegratorSettings {
            initial_balance: cfg.trading.initial_capital_usd,
            min_hypothesis_confidence: cfg.integration.min_hypothesis_confidence,
            default_cooldown: cfg.trading.default_cooldown,
            min_trade_size: cfg.trading.min_trade_size_usd,
        },
    ));

    let base = StrategyFileConfig::load(&cfg.strategy_config_path)
        .and_then(|file| file.descriptors())
        .with_context(|| format!("failed to load {}", cfg.strategy_config_path))?;
    let report = integrator.admit_base(&base).await;
    info!(
        admitted = report.admitted.len(),
        rejected = report.rejected.len(),
        "Base strategies loaded"
    );

    // ── Engine ────────────────────────────────────────────────────────────────
    let source = Arc::new(
        HttpSnapshotSource::new(&cfg.feed_url, cfg.trading.feed_timeout)
            .context("failed to build market feed client")?,
    );
    let engine = SignalEngine::new(
        EngineSettings::from(&cfg),
        registry.clone(),
        ledger.clone(),
        source,
        Arc::new(ThresholdExit::from(&cfg.exit)),
    );
    let trading = TradingCycle::new(
        engine,
        ledger.clone(),
        engine_handle.clone(),
        TradingCycleSettings {
            feed_failure_halt_threshold: cfg.trading.feed_failure_halt_threshold,
            summary_every_ticks: cfg.trading.summary_every_ticks,
            min_trade_size: cfg.trading.min_trade_size_usd,
        },
    );

    let discovery: Arc<dyn Cycle> = match &cfg.discovery_command {
        Some(command) => Arc::new(CommandDiscovery::new(command.clone())),
        None => Arc::new(NoopDiscovery),
    };

    // ── Scheduler ─────────────────────────────────────────────────────────────
    let scheduler = Scheduler::new()
        .every(cfg.cadence.tick_interval, Arc::new(trading))
        .every(cfg.cadence.integration_interval, Arc::new(IntegrationCycle::new(integrator)))
        .every(cfg.cadence.discovery_interval, discovery)
        .spawn();

    // ── Inspection API ────────────────────────────────────────────────────────
    let (api_shutdown_tx, api_shutdown_rx) = watch::channel(false);
    let api_state = api::AppState {
        registry: registry.clone(),
        ledger: ledger.clone(),
        engine: engine_handle.clone(),
        control: engine::StrategyControl::new(registry.clone(), ledger.clone()),
        dashboard_token: cfg.dashboard_token.clone(),
        min_trade_size: cfg.trading.min_trade_size_usd,
    };
    if cfg.dashboard_token.is_none() {
        warn!("DASHBOARD_TOKEN not set, protected API routes will refuse every request");
    }
    let api_task = tokio::spawn(api::serve(api_state, cfg.dashboard_port, api_shutdown_rx));

    info!("All subsystems started. Waiting for shutdown signal.");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("Shutdown signal received, draining in-flight cycles");

    // ── Shutdown ──────────────────────────────────────────────────────────────
    scheduler.shutdown();
    scheduler.join().await;
    engine_handle.stop().await;

    let _ = api_shutdown_tx.send(true);
    match api_task.await {
        Ok(Err(e)) => warn!(error = %e, "Inspection API exited with error"),
        Err(e) => warn!(error = %e, "Inspection API task failed"),
        Ok(Ok(())) => {}
    }

    let summary = ledger.publish_summary(cfg.trading.min_trade_size_usd).await;
    info!(total_pnl = summary.total_realized_pnl(), "Final ledger summary");

    // Dropping the last ledger handle closes the sink channel.
    drop(ledger);
    let _ = sink_task.await;

    info!("Shutdown complete");
    Ok(())
}
