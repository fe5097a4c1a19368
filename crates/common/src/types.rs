use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique strategy identifier. Ordering is used as the deterministic
/// tie-breaker during signal selection.
pub type StrategyId = String;

/// One price level of an order book side.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BookLevel {
    pub price: f64,
    pub size: f64,
}

/// Immutable market snapshot. One instance per tick, shared read-only by
/// every strategy evaluated during that tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketState {
    pub market_id: String,
    pub timestamp: DateTime<Utc>,
    /// Last traded (or reference) price.
    pub price: f64,
    /// Best bid first.
    pub bids: Vec<BookLevel>,
    /// Best ask first.
    pub asks: Vec<BookLevel>,
}

impl MarketState {
    pub fn best_bid(&self) -> Option<f64> {
        self.bids.first().map(|l| l.price)
    }

    pub fn best_ask(&self) -> Option<f64> {
        self.asks.first().map(|l| l.price)
    }

    /// Mid of the top of book, or the reference price when a side is empty.
    pub fn mid(&self) -> f64 {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => (bid + ask) / 2.0,
            _ => self.price,
        }
    }

    pub fn spread(&self) -> Option<f64> {
        Some(self.best_ask()? - self.best_bid()?)
    }

    pub fn bid_depth(&self) -> f64 {
        self.bids.iter().map(|l| l.size).sum()
    }

    pub fn ask_depth(&self) -> f64 {
        self.asks.iter().map(|l| l.size).sum()
    }
}

/// Direction of a signal / position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Up,
    Down,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Up => write!(f, "UP"),
            Direction::Down => write!(f, "DOWN"),
        }
    }
}

/// What an evaluation capability returns. The engine turns it into a
/// [`Signal`] stamped with the evaluating strategy's id and the tick time.
#[derive(Debug, Clone, PartialEq)]
pub struct Proposal {
    pub direction: Direction,
    pub confidence: f64,
    pub reason: String,
}

impl Proposal {
    pub fn new(direction: Direction, confidence: f64, reason: impl Into<String>) -> Self {
        Self {
            direction,
            confidence,
            reason: reason.into(),
        }
    }
}

/// Directional, confidence-scored proposal from one strategy for one tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub strategy_id: StrategyId,
    pub direction: Direction,
    /// In `[0, 1]`.
    pub confidence: f64,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

/// An open paper position. At most one per strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: String,
    pub strategy_id: StrategyId,
    pub market_id: String,
    pub direction: Direction,
    pub notional: f64,
    pub entry_price: f64,
    pub confidence: f64,
    pub reason: String,
    pub opened_at: DateTime<Utc>,
}

/// Append-only trade record produced when a position closes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub position_id: String,
    pub strategy_id: StrategyId,
    pub market_id: String,
    pub direction: Direction,
    pub notional: f64,
    pub entry_price: f64,
    pub exit_price: f64,
    pub pnl: f64,
    pub exit_reason: String,
    pub opened_at: DateTime<Utc>,
    pub closed_at: DateTime<Utc>,
}

/// Isolated per-strategy capital.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapitalAccount {
    pub strategy_id: StrategyId,
    pub initial_balance: f64,
    pub available_balance: f64,
}

/// Lifecycle of a strategy record.
///
/// `Candidate → Active ⇄ Paused → Retired`, or `Candidate → Rejected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    Candidate,
    Active,
    Paused,
    Retired,
    Rejected,
}

impl LifecycleState {
    pub fn can_transition_to(self, next: LifecycleState) -> bool {
        use LifecycleState::*;
        matches!(
            (self, next),
            (Candidate, Active)
                | (Candidate, Rejected)
                | (Active, Paused)
                | (Paused, Active)
                | (Active, Retired)
                | (Paused, Retired)
        )
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LifecycleState::Candidate => "candidate",
            LifecycleState::Active => "active",
            LifecycleState::Paused => "paused",
            LifecycleState::Retired => "retired",
            LifecycleState::Rejected => "rejected",
        };
        write!(f, "{s}")
    }
}

/// Registry-owned parameters of one strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyProfile {
    pub id: StrategyId,
    pub name: String,
    #[serde(with = "duration_secs")]
    pub cooldown: Duration,
    /// `0.0` means "no per-strategy cap beyond the global trade notional".
    pub max_notional_per_trade: f64,
    /// Descriptor id (or `config:<id>`) that produced this strategy.
    pub origin: String,
}

/// Reference to a compiled-in evaluation logic plus its parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogicRef {
    pub kind: String,
    #[serde(default)]
    pub params: BTreeMap<String, serde_json::Value>,
}

/// Interface a descriptor claims to implement.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct InterfaceDecl {
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub input: String,
    #[serde(default)]
    pub output: String,
}

impl InterfaceDecl {
    /// The shape every admitted strategy must declare.
    pub fn evaluator() -> Self {
        Self {
            capabilities: vec!["evaluate".to_string()],
            input: "market_state".to_string(),
            output: "signal".to_string(),
        }
    }
}

/// Externally produced, unvalidated proposal for a new strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyDescriptor {
    pub descriptor_id: String,
    pub strategy_id: StrategyId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub logic: Option<LogicRef>,
    #[serde(default)]
    pub interface: InterfaceDecl,
    /// `None` takes the configured default cooldown.
    #[serde(default)]
    pub cooldown_seconds: Option<i64>,
    #[serde(default)]
    pub max_notional_per_trade: f64,
    #[serde(default)]
    pub hypothesis_confidence: f64,
    /// Where the hypothesis came from (e.g. a wallet address).
    #[serde(default)]
    pub source: Option<String>,
}

/// Record kept for a descriptor that failed admission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectedRecord {
    pub descriptor_id: String,
    pub strategy_id: StrategyId,
    pub reason: String,
    pub rejected_at: DateTime<Utc>,
}

/// Per-strategy performance and capital summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategySummary {
    pub strategy_id: StrategyId,
    pub initial_balance: f64,
    pub available_balance: f64,
    pub open_notional: f64,
    pub realized_pnl: f64,
    pub trades: usize,
    pub wins: usize,
    pub win_rate: f64,
    /// Available balance is below the minimum trade size.
    pub depleted: bool,
}

/// Periodic aggregate summary sent to the report sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerSummary {
    pub generated_at: DateTime<Utc>,
    pub strategies: Vec<StrategySummary>,
}

impl LedgerSummary {
    pub fn total_realized_pnl(&self) -> f64 {
        self.strategies.iter().map(|s| s.realized_pnl).sum()
    }
}

/// Current state of the trading cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    #[default]
    Running,
    /// Systemic failure; trading ticks are skipped until an operator resumes.
    Halted,
    Stopped,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineState::Running => write!(f, "running"),
            EngineState::Halted => write!(f, "halted"),
            EngineState::Stopped => write!(f, "stopped"),
        }
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn book(bids: &[(f64, f64)], asks: &[(f64, f64)]) -> MarketState {
        MarketState {
            market_id: "m".into(),
            timestamp: Utc::now(),
            price: 0.42,
            bids: bids.iter().map(|&(price, size)| BookLevel { price, size }).collect(),
            asks: asks.iter().map(|&(price, size)| BookLevel { price, size }).collect(),
        }
    }

    #[test]
    fn mid_uses_top_of_book() {
        let m = book(&[(0.48, 10.0), (0.47, 5.0)], &[(0.52, 3.0)]);
        assert!((m.mid() - 0.50).abs() < 1e-12);
        assert!((m.spread().unwrap() - 0.04).abs() < 1e-12);
        assert_eq!(m.bid_depth(), 15.0);
    }

    #[test]
    fn mid_falls_back_to_price_on_one_sided_book() {
        let m = book(&[(0.48, 10.0)], &[]);
        assert_eq!(m.mid(), 0.42);
        assert!(m.spread().is_none());
    }

    #[test]
    fn lifecycle_transitions() {
        use LifecycleState::*;
        assert!(Candidate.can_transition_to(Active));
        assert!(Candidate.can_transition_to(Rejected));
        assert!(Paused.can_transition_to(Retired));
        assert!(!Rejected.can_transition_to(Active));
        assert!(!Retired.can_transition_to(Active));
        assert!(!Candidate.can_transition_to(Paused));
    }

    #[test]
    fn descriptor_without_logic_deserializes() {
        let d: StrategyDescriptor = serde_json::from_str(
            r#"{"descriptor_id":"d1","strategy_id":"s1","hypothesis_confidence":0.7}"#,
        )
        .unwrap();
        assert!(d.logic.is_none());
        assert_eq!(d.interface, InterfaceDecl::default());
    }
}
