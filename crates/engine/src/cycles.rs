use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use common::{EngineState, Result};
use integrator::AutoIntegrator;
use paper::Ledger;

use crate::aggregator::{SignalEngine, TickDecision, TickOutcome};
use crate::lifecycle::EngineHandle;
use crate::scheduler::Cycle;

/// Ticks between heartbeat log lines.
const HEARTBEAT_EVERY_TICKS: u64 = 10;

#[derive(Debug, Clone)]
pub struct TradingCycleSettings {
    /// Consecutive unavailable-feed ticks before the engine halts.
    pub feed_failure_halt_threshold: u32,
    pub summary_every_ticks: u64,
    pub min_trade_size: f64,
}

#[derive(Debug, Default)]
struct TickCounters {
    ticks: u64,
    consecutive_feed_failures: u32,
}

// ─── Trading ─────────────────────────────────────────────────────────────────

/// The fast cadence: one engine tick plus the systemic health checks that
/// can halt trading.
pub struct TradingCycle {
    engine: SignalEngine,
    ledger: Arc<Ledger>,
    handle: EngineHandle,
    settings: TradingCycleSettings,
    counters: Mutex<TickCounters>,
}

impl TradingCycle {
    pub fn new(
        engine: SignalEngine,
        ledger: Arc<Ledger>,
        handle: EngineHandle,
        settings: TradingCycleSettings,
    ) -> Self {
        Self {
            engine,
            ledger,
            handle,
            settings,
            counters: Mutex::new(TickCounters::default()),
        }
    }

    /// Run one tick unless the engine is halted or stopped.
    pub async fn step(&self) -> Result<Option<TickOutcome>> {
        match self.handle.state().await {
            EngineState::Running => {}
            state @ (EngineState::Halted | EngineState::Stopped) => {
                warn!(cadence = "trading", %state, "Trading tick skipped");
                return Ok(None);
            }
        }

        let mut counters = self.counters.lock().await;
        counters.ticks += 1;
        let tick = counters.ticks;

        let outcome = self.engine.tick().await;

        if let TickDecision::FeedUnavailable(reason) = &outcome.decision {
            counters.consecutive_feed_failures += 1;
            if counters.consecutive_feed_failures >= self.settings.feed_failure_halt_threshold {
                counters.consecutive_feed_failures = 0;
                let reason = format!(
                    "market feed unavailable for {} consecutive ticks: {reason}",
                    self.settings.feed_failure_halt_threshold
                );
                self.handle.halt(&reason).await;
            }
        } else {
            counters.consecutive_feed_failures = 0;
        }

        if let Err(e) = self.ledger.check_conservation().await {
            if e.is_systemic() {
                self.handle.halt(&e.to_string()).await;
            }
            return Err(e);
        }

        if tick % HEARTBEAT_EVERY_TICKS == 0 {
            let open_positions = self.ledger.open_positions().await.len();
            info!(
                tick,
                evaluated = outcome.evaluated,
                open_positions,
                "Heartbeat"
            );
        }
        if tick % self.settings.summary_every_ticks == 0 {
            let summary = self.ledger.publish_summary(self.settings.min_trade_size).await;
            info!(
                tick,
                strategies = summary.strategies.len(),
                total_pnl = summary.total_realized_pnl(),
                "Performance summary published"
            );
        }

        Ok(Some(outcome))
    }
}

#[async_trait]
impl Cycle for TradingCycle {
    fn name(&self) -> &str {
        "trading"
    }

    async fn run_cycle(&self) -> Result<()> {
        self.step().await.map(|_| ())
    }
}

// ─── Integration ─────────────────────────────────────────────────────────────

pub struct IntegrationCycle {
    integrator: Arc<AutoIntegrator>,
}

impl IntegrationCycle {
    pub fn new(integrator: Arc<AutoIntegrator>) -> Self {
        Self { integrator }
    }
}

#[async_trait]
impl Cycle for IntegrationCycle {
    fn name(&self) -> &str {
        "integration"
    }

    async fn run_cycle(&self) -> Result<()> {
        let report = self.integrator.run_once().await?;
        debug!(
            admitted = report.admitted.len(),
            rejected = report.rejected.len(),
            "Integration cycle complete"
        );
        Ok(())
    }
}
