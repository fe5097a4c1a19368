use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use common::{
    CapitalAccount, Direction, Error, LedgerEntry, LedgerSummary, Position, Result, Signal,
    StrategyId, StrategySummary,
};

use crate::sink::SinkEvent;

/// Relative tolerance for the conservation identity.
const CONSERVATION_EPSILON: f64 = 1e-9;

#[derive(Debug)]
struct AccountBook {
    account: CapitalAccount,
    position: Option<Position>,
    history: Vec<LedgerEntry>,
    realized_pnl: f64,
}

impl AccountBook {
    fn open_notional(&self) -> f64 {
        self.position.as_ref().map_or(0.0, |p| p.notional)
    }

    fn conservation_gap(&self) -> f64 {
        (self.account.available_balance + self.open_notional())
            - (self.account.initial_balance + self.realized_pnl)
    }

    fn summary(&self, min_trade_size: f64) -> StrategySummary {
        let trades = self.history.len();
        let wins = self.history.iter().filter(|e| e.pnl > 0.0).count();
        StrategySummary {
            strategy_id: self.account.strategy_id.clone(),
            initial_balance: self.account.initial_balance,
            available_balance: self.account.available_balance,
            open_notional: self.open_notional(),
            realized_pnl: self.realized_pnl,
            trades,
            wins,
            win_rate: if trades > 0 {
                wins as f64 / trades as f64
            } else {
                0.0
            },
            depleted: self.account.available_balance < min_trade_size,
        }
    }
}

/// Profit or loss of closing `notional` opened at `entry` at `exit`.
///
/// A paper position never loses more than its stake.
pub fn compute_pnl(direction: Direction, notional: f64, entry: f64, exit: f64) -> f64 {
    let raw = match direction {
        Direction::Up => notional * (exit - entry) / entry,
        Direction::Down => notional * (entry - exit) / entry,
    };
    raw.max(-notional)
}

/// Per-strategy isolated capital, open positions and trade history.
///
/// Every mutation happens under one lock, so a position is either fully
/// opened (balance debited, position recorded) or not at all. For every
/// account, at all times:
/// `available + open notional == initial + realized pnl`.
/// Capital never moves between strategies.
pub struct Ledger {
    book: Mutex<BTreeMap<StrategyId, AccountBook>>,
    sink_tx: Option<mpsc::Sender<SinkEvent>>,
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new()
    }
}

impl Ledger {
    pub fn new() -> Self {
        Self {
            book: Mutex::new(BTreeMap::new()),
            sink_tx: None,
        }
    }

    /// Forward closed trades and summaries to a sink dispatcher.
    pub fn with_sink(mut self, sink_tx: mpsc::Sender<SinkEvent>) -> Self {
        self.sink_tx = Some(sink_tx);
        self
    }

    pub async fn open_account(&self, strategy_id: &str, initial_balance: f64) -> Result<()> {
        if !initial_balance.is_finite() || initial_balance < 0.0 {
            return Err(Error::Other(format!(
                "initial balance must be finite and >= 0, got {initial_balance}"
            )));
        }
        let mut book = self.book.lock().await;
        if book.contains_key(strategy_id) {
            return Err(Error::RegistryConflict(strategy_id.to_string()));
        }
        book.insert(
            strategy_id.to_string(),
            AccountBook {
                account: CapitalAccount {
                    strategy_id: strategy_id.to_string(),
                    initial_balance,
                    available_balance: initial_balance,
                },
                position: None,
                history: Vec::new(),
                realized_pnl: 0.0,
            },
        );
        info!(strategy_id, balance = initial_balance, "Capital account opened");
        Ok(())
    }

    pub async fn open_position(
        &self,
        signal: &Signal,
        market_id: &str,
        entry_price: f64,
        notional: f64,
    ) -> Result<Position> {
        self.open_position_gated(signal, market_id, entry_price, notional, || true)
            .await
    }

    /// Open a position for `signal.strategy_id`, debiting `notional`.
    ///
    /// `gate` is evaluated under the ledger lock; returning `false` (e.g. the
    /// strategy was paused mid-tick) aborts with `StrategyInactive` and
    /// leaves the account untouched.
    pub async fn open_position_gated<F>(
        &self,
        signal: &Signal,
        market_id: &str,
        entry_price: f64,
        notional: f64,
        gate: F,
    ) -> Result<Position>
    where
        F: FnOnce() -> bool,
    {
        let id = &signal.strategy_id;
        if !notional.is_finite() || notional <= 0.0 {
            return Err(Error::Other(format!("notional must be > 0, got {notional}")));
        }
        if !entry_price.is_finite() || entry_price <= 0.0 {
            return Err(Error::Other(format!("entry price must be > 0, got {entry_price}")));
        }

        let mut book = self.book.lock().await;
        let entry = book
            .get_mut(id)
            .ok_or_else(|| Error::UnknownStrategy(id.clone()))?;

        if entry.position.is_some() {
            return Err(Error::PositionAlreadyOpen(id.clone()));
        }
        if notional > entry.account.available_balance + CONSERVATION_EPSILON {
            return Err(Error::InsufficientCapital {
                strategy_id: id.clone(),
                available: entry.account.available_balance,
                required: notional,
            });
        }
        if !gate() {
            return Err(Error::StrategyInactive(id.clone()));
        }

        let notional = notional.min(entry.account.available_balance);
        let position = Position {
            id: uuid::Uuid::new_v4().to_string(),
            strategy_id: id.clone(),
            market_id: market_id.to_string(),
            direction: signal.direction,
            notional,
            entry_price,
            confidence: signal.confidence,
            reason: signal.reason.clone(),
            opened_at: signal.timestamp,
        };
        entry.account.available_balance -= notional;
        entry.position = Some(position.clone());

        info!(
            strategy_id = %id,
            direction = %position.direction,
            notional,
            entry_price,
            available = entry.account.available_balance,
            "Position opened"
        );
        Ok(position)
    }

    /// Close `position` at `exit_price`, crediting `notional + pnl` and
    /// appending one ledger entry.
    pub async fn close_position(
        &self,
        position: &Position,
        exit_price: f64,
        exit_reason: &str,
        closed_at: DateTime<Utc>,
    ) -> Result<LedgerEntry> {
        if !exit_price.is_finite() || exit_price < 0.0 {
            return Err(Error::Other(format!("exit price must be >= 0, got {exit_price}")));
        }

        let mut book = self.book.lock().await;
        let id = &position.strategy_id;
        let entry = book
            .get_mut(id)
            .ok_or_else(|| Error::UnknownStrategy(id.clone()))?;

        let open = match entry.position.take() {
            Some(open) if open.id == position.id => open,
            other => {
                entry.position = other;
                return Err(Error::NoOpenPosition(id.clone()));
            }
        };

        // Entries are strictly time-ordered per strategy.
        let mut closed_at = closed_at.max(open.opened_at);
        if let Some(last) = entry.history.last() {
            if closed_at <= last.closed_at {
                closed_at = last.closed_at + chrono::Duration::microseconds(1);
            }
        }

        let pnl = compute_pnl(open.direction, open.notional, open.entry_price, exit_price);
        entry.account.available_balance += open.notional + pnl;
        entry.realized_pnl += pnl;

        let record = LedgerEntry {
            position_id: open.id,
            strategy_id: id.clone(),
            market_id: open.market_id,
            direction: open.direction,
            notional: open.notional,
            entry_price: open.entry_price,
            exit_price,
            pnl,
            exit_reason: exit_reason.to_string(),
            opened_at: open.opened_at,
            closed_at,
        };
        entry.history.push(record.clone());

        info!(
            strategy_id = %id,
            pnl,
            exit_price,
            reason = exit_reason,
            available = entry.account.available_balance,
            "Position closed"
        );
        drop(book);

        self.emit(SinkEvent::Entry(record.clone()));
        Ok(record)
    }

    /// Run `f` with the ledger locked, passing whether `strategy_id` holds an
    /// open position. No position can be opened or closed while `f` runs.
    pub async fn with_position_lock<F, T>(&self, strategy_id: &str, f: F) -> T
    where
        F: FnOnce(bool) -> T,
    {
        let book = self.book.lock().await;
        let holds_position = book
            .get(strategy_id)
            .is_some_and(|entry| entry.position.is_some());
        f(holds_position)
    }

    pub async fn account(&self, strategy_id: &str) -> Option<CapitalAccount> {
        self.book
            .lock()
            .await
            .get(strategy_id)
            .map(|e| e.account.clone())
    }

    pub async fn accounts(&self) -> Vec<CapitalAccount> {
        self.book
            .lock()
            .await
            .values()
            .map(|e| e.account.clone())
            .collect()
    }

    pub async fn position(&self, strategy_id: &str) -> Option<Position> {
        self.book
            .lock()
            .await
            .get(strategy_id)
            .and_then(|e| e.position.clone())
    }

    pub async fn open_positions(&self) -> Vec<Position> {
        self.book
            .lock()
            .await
            .values()
            .filter_map(|e| e.position.clone())
            .collect()
    }

    pub async fn history(&self, strategy_id: &str) -> Vec<LedgerEntry> {
        self.book
            .lock()
            .await
            .get(strategy_id)
            .map(|e| e.history.clone())
            .unwrap_or_default()
    }

    /// Most recent closed trades across all strategies, newest first.
    pub async fn recent_entries(&self, limit: usize) -> Vec<LedgerEntry> {
        let book = self.book.lock().await;
        let mut entries: Vec<LedgerEntry> = book
            .values()
            .flat_map(|e| e.history.iter().cloned())
            .collect();
        entries.sort_by(|a, b| b.closed_at.cmp(&a.closed_at));
        entries.truncate(limit);
        entries
    }

    /// Positions opened at or after `since`, across all strategies, whether
    /// still open or already closed.
    pub async fn opened_since(&self, since: DateTime<Utc>) -> usize {
        let book = self.book.lock().await;
        book.values()
            .map(|e| {
                let closed = e.history.iter().filter(|t| t.opened_at >= since).count();
                let open = e
                    .position
                    .as_ref()
                    .map_or(0, |p| usize::from(p.opened_at >= since));
                closed + open
            })
            .sum()
    }

    /// Realized pnl of trades closed at or after `since`, across all
    /// strategies.
    pub async fn realized_pnl_since(&self, since: DateTime<Utc>) -> f64 {
        let book = self.book.lock().await;
        book.values()
            .flat_map(|e| e.history.iter())
            .filter(|t| t.closed_at >= since)
            .map(|t| t.pnl)
            .sum()
    }

    pub async fn summary(&self, min_trade_size: f64) -> LedgerSummary {
        let book = self.book.lock().await;
        LedgerSummary {
            generated_at: Utc::now(),
            strategies: book.values().map(|e| e.summary(min_trade_size)).collect(),
        }
    }

    /// Send the current summary to the sink, best-effort.
    pub async fn publish_summary(&self, min_trade_size: f64) -> LedgerSummary {
        let summary = self.summary(min_trade_size).await;
        self.emit(SinkEvent::Summary(summary.clone()));
        summary
    }

    /// Verify the conservation identity for every account.
    pub async fn check_conservation(&self) -> Result<()> {
        let book = self.book.lock().await;
        for entry in book.values() {
            let gap = entry.conservation_gap();
            let scale = entry
                .account
                .initial_balance
                .max(entry.account.available_balance)
                .max(entry.realized_pnl.abs())
                .max(1.0);
            if gap.abs() > CONSERVATION_EPSILON * scale {
                return Err(Error::LedgerCorrupted(format!(
                    "strategy '{}' off by {gap:e}",
                    entry.account.strategy_id
                )));
            }
        }
        Ok(())
    }

    fn emit(&self, event: SinkEvent) {
        let Some(tx) = &self.sink_tx else {
            return;
        };
        match tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!(kind = event.kind(), "Ledger sink backlog full, dropping event");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("Ledger sink closed, dropping event");
            }
        }
    }
}
