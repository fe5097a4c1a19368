use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, NaiveTime, TimeZone, Utc};
use futures_util::future::join_all;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use common::{
    Config, Error, LedgerEntry, MarketSource, MarketState, Position, Signal, StrategyId,
};
use paper::{Ledger, PaperFill};
use risk::{EntryActivity, EntryLimits, EntryRejection, ExitPolicy};
use strategy::{StrategyEntry, StrategyRegistry};

/// Per-tick knobs of the signal engine.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub market_id: String,
    pub min_confidence: f64,
    /// Fixed notional per trade before capping.
    pub trade_notional: f64,
    pub min_trade_size: f64,
    pub eval_timeout: Duration,
    pub worker_pool_size: usize,
    pub feed_timeout: Duration,
    pub slippage_bps: f64,
    pub entry_limits: EntryLimits,
}

impl From<&Config> for EngineSettings {
    fn from(config: &Config) -> Self {
        Self {
            market_id: config.market_id.clone(),
            min_confidence: config.trading.min_confidence,
            trade_notional: config.trading.trade_notional_usd,
            min_trade_size: config.trading.min_trade_size_usd,
            eval_timeout: config.trading.eval_timeout,
            worker_pool_size: config.trading.worker_pool_size,
            feed_timeout: config.trading.feed_timeout,
            slippage_bps: config.trading.paper_slippage_bps,
            entry_limits: EntryLimits::from(&config.entry),
        }
    }
}

/// What a tick ended up doing. At most one trade attempt per tick.
#[derive(Debug, Clone, PartialEq)]
pub enum TickDecision {
    /// No snapshot: nothing was evaluated and the ledger was not touched.
    FeedUnavailable(String),
    NoCandidate,
    Traded(Position),
    InsufficientCapital {
        strategy_id: StrategyId,
        available: f64,
        required: f64,
    },
    /// The winner failed the pre-trade risk limits. No other candidate is
    /// substituted.
    RiskRejected {
        strategy_id: StrategyId,
        rejection: EntryRejection,
    },
    /// The winner could not be traded for another reason (paused mid-tick,
    /// unusable price, capped notional below the minimum trade size). No
    /// other candidate is substituted.
    Aborted {
        strategy_id: StrategyId,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct TickOutcome {
    pub market_time: Option<DateTime<Utc>>,
    /// Strategies whose evaluation started on a worker this tick.
    pub evaluated: usize,
    /// Active strategies skipped because their previous evaluation is still
    /// running.
    pub busy: Vec<StrategyId>,
    /// Every well-formed signal produced this tick, in strategy id order.
    pub signals: Vec<Signal>,
    /// Signals that passed the confidence, cooldown and open-position
    /// filters, best first.
    pub candidates: Vec<Signal>,
    /// Positions closed by the exit policy at the start of the tick.
    pub exits: Vec<LedgerEntry>,
    pub decision: TickDecision,
}

impl TickOutcome {
    fn feed_unavailable(reason: String) -> Self {
        Self {
            market_time: None,
            evaluated: 0,
            busy: Vec::new(),
            signals: Vec::new(),
            candidates: Vec::new(),
            exits: Vec::new(),
            decision: TickDecision::FeedUnavailable(reason),
        }
    }

    pub fn winner(&self) -> Option<&Signal> {
        self.candidates.first()
    }
}

/// Result of one strategy's turn in a tick.
enum Evaluation {
    /// No worker freed up before the tick's queueing deadline.
    NoWorker,
    Ran(Option<Signal>),
}

type InFlightSet = Arc<Mutex<HashSet<StrategyId>>>;

/// Marks a strategy as having an evaluation on a worker thread. Moved into
/// the blocking task, so the mark is cleared only when the strategy code
/// actually returns, even after the tick gave up on it.
struct InFlight {
    set: InFlightSet,
    id: StrategyId,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}

/// Evaluates every Active strategy against one snapshot and turns the best
/// eligible signal into a paper position.
///
/// Cooldowns live in the registry and capital in the ledger. The only state
/// kept across ticks is the set of strategies whose evaluation thread has
/// not returned yet; those are skipped until it does, so a hung strategy
/// holds at most one thread and never a worker permit.
pub struct SignalEngine {
    settings: EngineSettings,
    registry: Arc<StrategyRegistry>,
    ledger: Arc<Ledger>,
    source: Arc<dyn MarketSource>,
    exit_policy: Arc<dyn ExitPolicy>,
    fill: PaperFill,
    workers: Arc<Semaphore>,
    in_flight: InFlightSet,
}

impl SignalEngine {
    pub fn new(
        settings: EngineSettings,
        registry: Arc<StrategyRegistry>,
        ledger: Arc<Ledger>,
        source: Arc<dyn MarketSource>,
        exit_policy: Arc<dyn ExitPolicy>,
    ) -> Self {
        let fill = PaperFill::new(settings.slippage_bps);
        let workers = Arc::new(Semaphore::new(settings.worker_pool_size.max(1)));
        Self {
            settings,
            registry,
            ledger,
            source,
            exit_policy,
            fill,
            workers,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Run one tick: snapshot → exits → evaluate → select → (maybe) trade.
    pub async fn tick(&self) -> TickOutcome {
        let market = match self.fetch_snapshot().await {
            Ok(market) => Arc::new(market),
            Err(e) => {
                warn!(market_id = %self.settings.market_id, error = %e, "Tick skipped");
                return TickOutcome::feed_unavailable(e.to_string());
            }
        };
        let now = market.timestamp;

        let exits = self.resolve_exits(&market).await;

        let snapshot = self.registry.snapshot();
        let active: Vec<Arc<StrategyEntry>> = snapshot.active().cloned().collect();

        let mut busy = Vec::new();
        let mut runnable = Vec::with_capacity(active.len());
        for entry in &active {
            match self.claim(entry.id()) {
                Some(mark) => runnable.push((entry.clone(), mark)),
                None => {
                    warn!(strategy_id = %entry.id(), "Previous evaluation still running, skipping");
                    busy.push(entry.id().to_string());
                }
            }
        }

        let queue_deadline = Instant::now() + self.queue_budget(runnable.len());
        let results = join_all(
            runnable
                .into_iter()
                .map(|(entry, mark)| self.evaluate(entry, mark, market.clone(), queue_deadline)),
        )
        .await;

        let mut evaluated = 0;
        let mut signals: Vec<Signal> = Vec::new();
        for result in results {
            if let Evaluation::Ran(signal) = result {
                evaluated += 1;
                signals.extend(signal);
            }
        }

        let candidates = self.filter(&active, &signals, now).await;

        // Every eligible candidate starts its cooldown, traded or not.
        let emitted: Vec<(StrategyId, DateTime<Utc>)> = candidates
            .iter()
            .map(|s| (s.strategy_id.clone(), s.timestamp))
            .collect();
        self.registry.record_signals(&emitted);

        let decision = match candidates.first() {
            None => TickDecision::NoCandidate,
            Some(winner) => {
                let profile_cap = active
                    .iter()
                    .find(|e| e.id() == winner.strategy_id)
                    .map_or(0.0, |e| e.profile.max_notional_per_trade);
                self.execute(winner, profile_cap, &market).await
            }
        };

        debug!(
            evaluated,
            busy = busy.len(),
            signals = signals.len(),
            candidates = candidates.len(),
            exits = exits.len(),
            "Tick complete"
        );

        TickOutcome {
            market_time: Some(now),
            evaluated,
            busy,
            signals,
            candidates,
            exits,
            decision,
        }
    }

    async fn fetch_snapshot(&self) -> Result<MarketState, Error> {
        match tokio::time::timeout(
            self.settings.feed_timeout,
            self.source.snapshot(&self.settings.market_id),
        )
        .await
        {
            Ok(Ok(market)) => Ok(market),
            Ok(Err(Error::FeedUnavailable(reason))) => Err(Error::FeedUnavailable(reason)),
            Ok(Err(e)) => Err(Error::FeedUnavailable(e.to_string())),
            Err(_) => Err(Error::FeedUnavailable(format!(
                "no snapshot within {}ms",
                self.settings.feed_timeout.as_millis()
            ))),
        }
    }

    /// Offer every open position on this market to the exit policy and close
    /// the ones it names at the mid.
    async fn resolve_exits(&self, market: &MarketState) -> Vec<LedgerEntry> {
        let mark = market.mid();
        if !(mark.is_finite() && mark >= 0.0) {
            return Vec::new();
        }

        let mut closed = Vec::new();
        for position in self.ledger.open_positions().await {
            if position.market_id != market.market_id {
                continue;
            }
            let Some(reason) = self
                .exit_policy
                .should_exit(&position, mark, market.timestamp)
            else {
                continue;
            };
            match self
                .ledger
                .close_position(&position, mark, reason.as_str(), market.timestamp)
                .await
            {
                Ok(entry) => closed.push(entry),
                Err(e) => {
                    warn!(strategy_id = %position.strategy_id, error = %e, "Failed to close position")
                }
            }
        }
        closed
    }

    fn claim(&self, id: &str) -> Option<InFlight> {
        let mut set = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if !set.insert(id.to_string()) {
            return None;
        }
        Some(InFlight {
            set: self.in_flight.clone(),
            id: id.to_string(),
        })
    }

    /// Longest a strategy may queue for a worker this tick: enough rounds of
    /// `eval_timeout` for every runnable strategy to get a turn.
    fn queue_budget(&self, runnable: usize) -> Duration {
        let rounds = runnable.div_ceil(self.settings.worker_pool_size.max(1)).max(1);
        self.settings.eval_timeout * u32::try_from(rounds).unwrap_or(u32::MAX)
    }

    /// Evaluate one strategy on a pool worker. Any failure, panic, timeout or
    /// malformed proposal counts as "no signal" for this strategy only.
    ///
    /// The strategy's own timeout starts once it holds a worker; queueing is
    /// bounded by the tick's `queue_deadline`. The worker permit is returned
    /// when the timeout fires, while `mark` stays with the thread.
    async fn evaluate(
        &self,
        entry: Arc<StrategyEntry>,
        mark: InFlight,
        market: Arc<MarketState>,
        queue_deadline: Instant,
    ) -> Evaluation {
        let id = entry.id().to_string();
        let timeout = self.settings.eval_timeout;

        let permit = match tokio::time::timeout_at(
            queue_deadline,
            self.workers.clone().acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Evaluation::NoWorker,
            Err(_) => {
                warn!(strategy_id = %id, "No evaluation worker freed up this tick, skipping");
                return Evaluation::NoWorker;
            }
        };

        let strategy = entry.strategy.clone();
        let snapshot = market.clone();
        let task = tokio::task::spawn_blocking(move || {
            let _mark = mark;
            strategy.evaluate(&snapshot)
        });
        let result = tokio::time::timeout(timeout, task).await;
        drop(permit);

        let proposal = match result {
            Ok(Ok(Ok(proposal))) => proposal,
            Ok(Ok(Err(e))) => {
                let err = Error::StrategyEvaluation {
                    strategy_id: id.clone(),
                    reason: e.to_string(),
                };
                warn!(strategy_id = %id, error = %err, "Evaluation failed, treating as no signal");
                return Evaluation::Ran(None);
            }
            Ok(Err(join_err)) => {
                warn!(strategy_id = %id, error = %join_err, "Evaluation panicked, treating as no signal");
                return Evaluation::Ran(None);
            }
            Err(_) => {
                warn!(
                    strategy_id = %id,
                    timeout_ms = timeout.as_millis() as u64,
                    "Evaluation timed out, treating as no signal"
                );
                return Evaluation::Ran(None);
            }
        };
        let Some(proposal) = proposal else {
            return Evaluation::Ran(None);
        };

        if !(0.0..=1.0).contains(&proposal.confidence) {
            warn!(strategy_id = %id, confidence = proposal.confidence, "Confidence outside [0, 1], ignoring signal");
            return Evaluation::Ran(None);
        }

        Evaluation::Ran(Some(Signal {
            strategy_id: id,
            direction: proposal.direction,
            confidence: proposal.confidence,
            reason: proposal.reason,
            timestamp: market.timestamp,
        }))
    }

    /// Keep signals above the confidence floor from strategies that are out
    /// of cooldown and hold no open position. Best first: highest confidence,
    /// ties to the lowest strategy id.
    async fn filter(
        &self,
        entries: &[Arc<StrategyEntry>],
        signals: &[Signal],
        now: DateTime<Utc>,
    ) -> Vec<Signal> {
        let holding: HashSet<StrategyId> = self
            .ledger
            .open_positions()
            .await
            .into_iter()
            .map(|p| p.strategy_id)
            .collect();

        let mut candidates: Vec<Signal> = signals
            .iter()
            .filter(|s| {
                if s.confidence < self.settings.min_confidence {
                    return false;
                }
                let in_cooldown = entries
                    .iter()
                    .find(|e| e.id() == s.strategy_id)
                    .is_some_and(|e| e.in_cooldown(now));
                if in_cooldown {
                    debug!(strategy_id = %s.strategy_id, "Signal suppressed by cooldown");
                    return false;
                }
                !holding.contains(&s.strategy_id)
            })
            .cloned()
            .collect();

        candidates.sort_by(|a, b| {
            b.confidence
                .total_cmp(&a.confidence)
                .then_with(|| a.strategy_id.cmp(&b.strategy_id))
        });
        candidates
    }

    async fn entry_activity(&self, now: DateTime<Utc>) -> EntryActivity {
        let midnight = Utc.from_utc_datetime(&now.date_naive().and_time(NaiveTime::MIN));
        EntryActivity {
            trades_last_hour: self.ledger.opened_since(now - chrono::Duration::hours(1)).await,
            realized_pnl_today: self.ledger.realized_pnl_since(midnight).await,
        }
    }

    async fn execute(&self, winner: &Signal, profile_cap: f64, market: &MarketState) -> TickDecision {
        let id = &winner.strategy_id;
        let Some(account) = self.ledger.account(id).await else {
            warn!(strategy_id = %id, "Winner has no capital account");
            return TickDecision::Aborted {
                strategy_id: id.clone(),
                reason: "no capital account".into(),
            };
        };

        let available = account.available_balance;
        if available < self.settings.min_trade_size {
            let err = Error::InsufficientCapital {
                strategy_id: id.clone(),
                available,
                required: self.settings.min_trade_size,
            };
            warn!(error = %err, "Trade rejected");
            return TickDecision::InsufficientCapital {
                strategy_id: id.clone(),
                available,
                required: self.settings.min_trade_size,
            };
        }

        let mut notional = self.settings.trade_notional.min(available);
        if profile_cap > 0.0 {
            notional = notional.min(profile_cap);
        }
        if notional < self.settings.min_trade_size {
            warn!(strategy_id = %id, notional, min_trade_size = self.settings.min_trade_size, "Capped notional below minimum trade size");
            return TickDecision::Aborted {
                strategy_id: id.clone(),
                reason: format!(
                    "notional {notional:.4} below minimum trade size {:.4}",
                    self.settings.min_trade_size
                ),
            };
        }

        let activity = self.entry_activity(market.timestamp).await;
        if let Err(rejection) = self.settings.entry_limits.check(market, &activity) {
            warn!(strategy_id = %id, reason = %rejection, "Entry refused by risk limits");
            return TickDecision::RiskRejected {
                strategy_id: id.clone(),
                rejection,
            };
        }

        let mid = market.mid();
        if !(mid.is_finite() && mid > 0.0) {
            return TickDecision::Aborted {
                strategy_id: id.clone(),
                reason: format!("unusable mid price {mid}"),
            };
        }
        let entry_price = self.fill.entry_price(winner.direction, mid);

        let registry = &self.registry;
        match self
            .ledger
            .open_position_gated(winner, &market.market_id, entry_price, notional, || {
                registry.is_active(id)
            })
            .await
        {
            Ok(position) => {
                info!(
                    strategy_id = %id,
                    direction = %winner.direction,
                    confidence = winner.confidence,
                    notional,
                    reason = %winner.reason,
                    "Trade opened"
                );
                TickDecision::Traded(position)
            }
            Err(Error::InsufficientCapital {
                strategy_id,
                available,
                required,
            }) => TickDecision::InsufficientCapital {
                strategy_id,
                available,
                required,
            },
            Err(e) => {
                warn!(strategy_id = %id, error = %e, "Trade aborted");
                TickDecision::Aborted {
                    strategy_id: id.clone(),
                    reason: e.to_string(),
                }
            }
        }
    }
}
