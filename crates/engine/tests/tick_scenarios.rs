use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use common::{
    BookLevel, Direction, EngineState, Error, MarketSource, MarketState, Position, Proposal,
    Result, StrategyProfile,
};
use engine::{
    EngineHandle, EngineSettings, SignalEngine, TickDecision, TradingCycle, TradingCycleSettings,
};
use paper::{Ledger, SinkEvent};
use risk::{EntryLimits, EntryRejection, ExitPolicy, ExitReason, ThresholdExit};
use strategy::{EvaluationError, Strategy, StrategyRegistry};

// ─── Test capabilities ───────────────────────────────────────────────────────

struct Fixed {
    direction: Direction,
    confidence: f64,
    calls: AtomicUsize,
}

fn fixed(direction: Direction, confidence: f64) -> Arc<Fixed> {
    Arc::new(Fixed {
        direction,
        confidence,
        calls: AtomicUsize::new(0),
    })
}

impl Strategy for Fixed {
    fn kind(&self) -> &str {
        "fixed"
    }

    fn evaluate(&self, _: &MarketState) -> std::result::Result<Option<Proposal>, EvaluationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Some(Proposal::new(self.direction, self.confidence, "fixed")))
    }
}

struct Failing;

impl Strategy for Failing {
    fn kind(&self) -> &str {
        "failing"
    }

    fn evaluate(&self, _: &MarketState) -> std::result::Result<Option<Proposal>, EvaluationError> {
        Err(EvaluationError::new("division by zero"))
    }
}

struct Panicking;

impl Strategy for Panicking {
    fn kind(&self) -> &str {
        "panicking"
    }

    fn evaluate(&self, _: &MarketState) -> std::result::Result<Option<Proposal>, EvaluationError> {
        panic!("strategy bug");
    }
}

struct Slow(Duration);

impl Strategy for Slow {
    fn kind(&self) -> &str {
        "slow"
    }

    fn evaluate(&self, _: &MarketState) -> std::result::Result<Option<Proposal>, EvaluationError> {
        std::thread::sleep(self.0);
        Ok(Some(Proposal::new(Direction::Up, 0.99, "slow")))
    }
}

struct NeverExit;

impl ExitPolicy for NeverExit {
    fn should_exit(&self, _: &Position, _: f64, _: DateTime<Utc>) -> Option<ExitReason> {
        None
    }
}

// ─── Market source ───────────────────────────────────────────────────────────

struct TestSource {
    at: DateTime<Utc>,
    state: Mutex<(bool, f64)>,
    book: Mutex<Option<(f64, f64)>>,
}

impl TestSource {
    fn new(mid: f64) -> Arc<Self> {
        Arc::new(Self {
            at: Utc::now(),
            state: Mutex::new((false, mid)),
            book: Mutex::new(None),
        })
    }

    fn set_book(&self, bid: f64, ask: f64) {
        *self.book.lock().unwrap() = Some((bid, ask));
    }

    fn set_failing(&self, failing: bool) {
        self.state.lock().unwrap().0 = failing;
    }

    fn set_mid(&self, mid: f64) {
        self.state.lock().unwrap().1 = mid;
    }
}

#[async_trait]
impl MarketSource for TestSource {
    async fn snapshot(&self, market_id: &str) -> Result<MarketState> {
        let (failing, mid) = *self.state.lock().unwrap();
        if failing {
            return Err(Error::FeedUnavailable("connection refused".into()));
        }
        let (bids, asks) = match *self.book.lock().unwrap() {
            Some((bid, ask)) => (
                vec![BookLevel { price: bid, size: 100.0 }],
                vec![BookLevel { price: ask, size: 100.0 }],
            ),
            None => (vec![], vec![]),
        };
        Ok(MarketState {
            market_id: market_id.into(),
            timestamp: self.at,
            price: mid,
            bids,
            asks,
        })
    }
}

// ─── Harness ─────────────────────────────────────────────────────────────────

fn settings() -> EngineSettings {
    EngineSettings {
        market_id: "m".into(),
        min_confidence: 0.6,
        trade_notional: 5.0,
        min_trade_size: 5.0,
        eval_timeout: Duration::from_millis(200),
        worker_pool_size: 4,
        feed_timeout: Duration::from_secs(1),
        slippage_bps: 0.0,
        entry_limits: EntryLimits::default(),
    }
}

struct Harness {
    registry: Arc<StrategyRegistry>,
    ledger: Arc<Ledger>,
    source: Arc<TestSource>,
}

impl Harness {
    fn new() -> Self {
        Self {
            registry: Arc::new(StrategyRegistry::new()),
            ledger: Arc::new(Ledger::new()),
            source: TestSource::new(0.5),
        }
    }

    async fn add(&self, id: &str, strategy: Arc<dyn Strategy>, cooldown_secs: u64, balance: f64) {
        self.registry
            .register(
                StrategyProfile {
                    id: id.into(),
                    name: id.into(),
                    cooldown: Duration::from_secs(cooldown_secs),
                    max_notional_per_trade: 0.0,
                    origin: format!("test:{id}"),
                },
                strategy,
            )
            .unwrap();
        self.ledger.open_account(id, balance).await.unwrap();
        self.registry.activate(id).unwrap();
    }

    fn engine_with(&self, settings: EngineSettings, exit: Arc<dyn ExitPolicy>) -> SignalEngine {
        SignalEngine::new(
            settings,
            self.registry.clone(),
            self.ledger.clone(),
            self.source.clone(),
            exit,
        )
    }

    fn engine(&self) -> SignalEngine {
        self.engine_with(settings(), Arc::new(NeverExit))
    }

    async fn available(&self, id: &str) -> f64 {
        self.ledger.account(id).await.unwrap().available_balance
    }
}

fn traded(decision: &TickDecision) -> &Position {
    match decision {
        TickDecision::Traded(position) => position,
        other => panic!("expected a trade, got {other:?}"),
    }
}

// ─── Scenarios ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn highest_confidence_wins_and_debits_only_the_winner() {
    let h = Harness::new();
    h.add("a", fixed(Direction::Up, 0.9), 0, 100.0).await;
    h.add("b", fixed(Direction::Down, 0.7), 0, 100.0).await;

    let outcome = h.engine().tick().await;

    let position = traded(&outcome.decision);
    assert_eq!(position.strategy_id, "a");
    assert_eq!(position.direction, Direction::Up);
    assert_eq!(position.notional, 5.0);
    assert_eq!(h.available("a").await, 95.0);
    assert_eq!(h.available("b").await, 100.0);
    assert!(h.ledger.position("b").await.is_none());
    h.ledger.check_conservation().await.unwrap();
}

#[tokio::test]
async fn signal_inside_cooldown_is_filtered() {
    let h = Harness::new();
    h.add("a", fixed(Direction::Up, 0.95), 30, 100.0).await;
    h.registry
        .record_signals(&[("a".into(), h.source.at - chrono::Duration::seconds(10))]);

    let outcome = h.engine().tick().await;

    assert_eq!(outcome.signals.len(), 1);
    assert!(outcome.candidates.is_empty());
    assert_eq!(outcome.decision, TickDecision::NoCandidate);
    assert_eq!(h.available("a").await, 100.0);
}

#[tokio::test]
async fn low_balance_is_insufficient_capital_without_substitution() {
    let h = Harness::new();
    h.add("c", fixed(Direction::Up, 0.9), 0, 3.0).await;
    h.add("d", fixed(Direction::Up, 0.8), 0, 100.0).await;

    let outcome = h.engine().tick().await;

    assert!(matches!(
        &outcome.decision,
        TickDecision::InsufficientCapital { strategy_id, available, .. }
            if strategy_id == "c" && *available == 3.0
    ));
    assert_eq!(h.available("c").await, 3.0);
    assert!(h.ledger.position("c").await.is_none());
    // At most one trade attempt per tick.
    assert!(h.ledger.position("d").await.is_none());
    assert_eq!(h.available("d").await, 100.0);
}

#[tokio::test]
async fn feed_outage_skips_the_tick_then_recovers() {
    let h = Harness::new();
    let a = fixed(Direction::Up, 0.9);
    h.add("a", a.clone(), 0, 100.0).await;
    let engine = h.engine();

    h.source.set_failing(true);
    let outcome = engine.tick().await;
    assert!(matches!(outcome.decision, TickDecision::FeedUnavailable(_)));
    assert_eq!(outcome.evaluated, 0);
    assert_eq!(a.calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.available("a").await, 100.0);
    assert!(h.ledger.open_positions().await.is_empty());

    h.source.set_failing(false);
    let outcome = engine.tick().await;
    assert_eq!(traded(&outcome.decision).strategy_id, "a");
}

#[tokio::test]
async fn failing_and_panicking_strategies_are_isolated() {
    let h = Harness::new();
    h.add("a", Arc::new(Failing), 0, 100.0).await;
    h.add("b", Arc::new(Panicking), 0, 100.0).await;
    h.add("c", fixed(Direction::Down, 0.7), 0, 100.0).await;

    let outcome = h.engine().tick().await;

    assert_eq!(outcome.evaluated, 3);
    assert_eq!(outcome.signals.len(), 1);
    assert_eq!(traded(&outcome.decision).strategy_id, "c");
}

#[tokio::test]
async fn slow_strategy_times_out_without_stalling_the_tick() {
    let h = Harness::new();
    h.add("a", Arc::new(Slow(Duration::from_millis(500))), 0, 100.0).await;
    h.add("b", fixed(Direction::Up, 0.7), 0, 100.0).await;
    let engine = h.engine_with(
        EngineSettings {
            eval_timeout: Duration::from_millis(50),
            ..settings()
        },
        Arc::new(NeverExit),
    );

    let started = Instant::now();
    let outcome = engine.tick().await;

    assert!(started.elapsed() < Duration::from_millis(400));
    assert_eq!(traded(&outcome.decision).strategy_id, "b");
}

#[tokio::test]
async fn equal_confidence_goes_to_lowest_id() {
    for _ in 0..5 {
        let h = Harness::new();
        h.add("b", fixed(Direction::Up, 0.8), 0, 100.0).await;
        h.add("c", fixed(Direction::Up, 0.7), 0, 100.0).await;
        h.add("a", fixed(Direction::Down, 0.8), 0, 100.0).await;

        let outcome = h.engine().tick().await;
        let ranked: Vec<&str> = outcome
            .candidates
            .iter()
            .map(|s| s.strategy_id.as_str())
            .collect();
        assert_eq!(ranked, vec!["a", "b", "c"]);
        assert_eq!(traded(&outcome.decision).strategy_id, "a");
    }
}

#[tokio::test]
async fn confidence_floor_filters_weak_signals() {
    let h = Harness::new();
    h.add("a", fixed(Direction::Up, 0.59), 0, 100.0).await;

    let outcome = h.engine().tick().await;

    assert_eq!(outcome.signals.len(), 1);
    assert_eq!(outcome.decision, TickDecision::NoCandidate);
}

#[tokio::test]
async fn eligible_loser_starts_cooldown_and_holder_is_excluded() {
    let h = Harness::new();
    h.add("a", fixed(Direction::Up, 0.9), 30, 100.0).await;
    h.add("b", fixed(Direction::Down, 0.7), 30, 100.0).await;
    let engine = h.engine();

    traded(&engine.tick().await.decision);
    let snapshot = h.registry.snapshot();
    assert!(snapshot.get("b").unwrap().last_signal_at.is_some());

    let outcome = engine.tick().await;
    assert_eq!(outcome.decision, TickDecision::NoCandidate);
    assert_eq!(h.available("b").await, 100.0);
}

#[tokio::test]
async fn paused_strategy_is_not_evaluated() {
    let h = Harness::new();
    let a = fixed(Direction::Up, 0.9);
    h.add("a", a.clone(), 0, 100.0).await;
    h.registry.pause("a").unwrap();

    let outcome = h.engine().tick().await;

    assert_eq!(outcome.evaluated, 0);
    assert_eq!(a.calls.load(Ordering::SeqCst), 0);
    assert_eq!(outcome.decision, TickDecision::NoCandidate);
}

async fn add_capped(h: &Harness, id: &str, cap: f64) {
    h.registry
        .register(
            StrategyProfile {
                id: id.into(),
                name: id.into(),
                cooldown: Duration::ZERO,
                max_notional_per_trade: cap,
                origin: format!("test:{id}"),
            },
            fixed(Direction::Up, 0.9),
        )
        .unwrap();
    h.ledger.open_account(id, 100.0).await.unwrap();
    h.registry.activate(id).unwrap();
}

#[tokio::test]
async fn profile_cap_limits_notional() {
    let h = Harness::new();
    add_capped(&h, "a", 2.0).await;
    let engine = h.engine_with(
        EngineSettings {
            min_trade_size: 1.0,
            ..settings()
        },
        Arc::new(NeverExit),
    );

    let outcome = engine.tick().await;

    assert_eq!(traded(&outcome.decision).notional, 2.0);
    assert_eq!(h.available("a").await, 98.0);
}

#[tokio::test]
async fn cap_below_minimum_trade_size_aborts_without_debit() {
    let h = Harness::new();
    add_capped(&h, "a", 2.0).await;

    let outcome = h.engine().tick().await;

    assert!(matches!(
        &outcome.decision,
        TickDecision::Aborted { strategy_id, reason }
            if strategy_id == "a" && reason.contains("minimum trade size")
    ));
    assert_eq!(h.available("a").await, 100.0);
    assert!(h.ledger.position("a").await.is_none());
}

#[tokio::test]
async fn hourly_trade_limit_rejects_winner_without_substitution() {
    let h = Harness::new();
    h.add("a", fixed(Direction::Up, 0.9), 0, 100.0).await;
    h.add("b", fixed(Direction::Down, 0.7), 0, 100.0).await;
    let engine = h.engine_with(
        EngineSettings {
            entry_limits: EntryLimits {
                max_trades_per_hour: 1,
                ..EntryLimits::default()
            },
            ..settings()
        },
        Arc::new(NeverExit),
    );

    assert_eq!(traded(&engine.tick().await.decision).strategy_id, "a");

    // a holds its position, so b wins the next tick and hits the limit.
    let outcome = engine.tick().await;
    assert_eq!(
        outcome.decision,
        TickDecision::RiskRejected {
            strategy_id: "b".into(),
            rejection: EntryRejection::TradeRateLimit { trades: 1, limit: 1 },
        }
    );
    assert_eq!(h.available("b").await, 100.0);
    assert_eq!(h.ledger.open_positions().await.len(), 1);
}

#[tokio::test]
async fn spread_outside_band_rejects_entry() {
    let h = Harness::new();
    h.add("a", fixed(Direction::Up, 0.9), 0, 100.0).await;
    h.source.set_book(0.30, 0.70);

    let outcome = h.engine().tick().await;
    assert!(matches!(
        &outcome.decision,
        TickDecision::RiskRejected { strategy_id, rejection: EntryRejection::SpreadTooWide { .. } }
            if strategy_id == "a"
    ));
    assert_eq!(h.available("a").await, 100.0);

    h.source.set_book(0.49, 0.51);
    let outcome = h.engine().tick().await;
    assert_eq!(traded(&outcome.decision).strategy_id, "a");
}

#[tokio::test]
async fn daily_loss_limit_blocks_new_entries() {
    let h = Harness::new();
    h.add("a", fixed(Direction::Up, 0.9), 0, 100.0).await;
    let engine = h.engine_with(
        EngineSettings {
            entry_limits: EntryLimits {
                max_daily_loss: 1.0,
                ..EntryLimits::default()
            },
            ..settings()
        },
        Arc::new(ThresholdExit {
            stop_loss_pct: 0.1,
            take_profit_pct: 0.1,
            max_hold: Duration::from_secs(3600),
        }),
    );

    assert_eq!(traded(&engine.tick().await.decision).entry_price, 0.5);

    // 0.5 -> 0.3 stops out the 5.0 position for a 2.0 loss.
    h.source.set_mid(0.3);
    let outcome = engine.tick().await;
    assert_eq!(outcome.exits.len(), 1);
    assert!(matches!(
        outcome.decision,
        TickDecision::RiskRejected { rejection: EntryRejection::DailyLossLimit { .. }, .. }
    ));
    assert!(h.ledger.open_positions().await.is_empty());
}

#[tokio::test]
async fn exit_policy_closes_positions_at_the_mark() {
    let h = Harness::new();
    h.add("a", fixed(Direction::Up, 0.9), 3600, 100.0).await;
    let engine = h.engine_with(
        settings(),
        Arc::new(ThresholdExit {
            stop_loss_pct: 0.1,
            take_profit_pct: 0.1,
            max_hold: Duration::from_secs(3600),
        }),
    );

    let first = engine.tick().await;
    assert_eq!(traded(&first.decision).entry_price, 0.5);

    h.source.set_mid(0.6);
    let second = engine.tick().await;
    assert_eq!(second.exits.len(), 1);
    let exit = &second.exits[0];
    assert_eq!(exit.exit_reason, "take_profit");
    assert!((exit.pnl - 1.0).abs() < 1e-9);
    assert!((h.available("a").await - 101.0).abs() < 1e-9);
    assert_eq!(h.ledger.history("a").await.len(), 1);
    h.ledger.check_conservation().await.unwrap();
}

// ─── Trading cycle ───────────────────────────────────────────────────────────

#[tokio::test]
async fn repeated_feed_outage_halts_until_resumed() {
    let h = Harness::new();
    h.add("a", fixed(Direction::Up, 0.9), 0, 100.0).await;
    let handle = EngineHandle::new();
    let cycle = TradingCycle::new(
        h.engine(),
        h.ledger.clone(),
        handle.clone(),
        TradingCycleSettings {
            feed_failure_halt_threshold: 3,
            summary_every_ticks: 50,
            min_trade_size: 5.0,
        },
    );

    h.source.set_failing(true);
    for _ in 0..3 {
        assert!(cycle.step().await.unwrap().is_some());
    }
    assert_eq!(handle.state().await, EngineState::Halted);

    h.source.set_failing(false);
    assert!(cycle.step().await.unwrap().is_none());
    assert!(h.ledger.open_positions().await.is_empty());

    assert!(handle.resume().await);
    let outcome = cycle.step().await.unwrap().unwrap();
    assert_eq!(traded(&outcome.decision).strategy_id, "a");
}

#[tokio::test]
async fn summaries_are_sent_to_the_sink_on_schedule() {
    let (tx, mut rx) = tokio::sync::mpsc::channel(16);
    let h = Harness {
        registry: Arc::new(StrategyRegistry::new()),
        ledger: Arc::new(Ledger::new().with_sink(tx)),
        source: TestSource::new(0.5),
    };
    h.add("a", fixed(Direction::Up, 0.4), 0, 100.0).await;
    let cycle = TradingCycle::new(
        h.engine(),
        h.ledger.clone(),
        EngineHandle::new(),
        TradingCycleSettings {
            feed_failure_halt_threshold: 3,
            summary_every_ticks: 2,
            min_trade_size: 5.0,
        },
    );

    cycle.step().await.unwrap();
    assert!(rx.try_recv().is_err());
    cycle.step().await.unwrap();

    match tokio::time::timeout(Duration::from_secs(1), rx.recv()).await {
        Ok(Some(SinkEvent::Summary(summary))) => {
            assert_eq!(summary.strategies.len(), 1);
            assert_eq!(summary.strategies[0].strategy_id, "a");
        }
        other => panic!("expected a summary, got {other:?}"),
    }
}
