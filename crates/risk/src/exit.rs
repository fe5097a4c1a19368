use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use common::{Direction, ExitConfig, Position};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
    MaxHold,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::StopLoss => "stop_loss",
            ExitReason::TakeProfit => "take_profit",
            ExitReason::MaxHold => "max_hold",
        }
    }
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decides whether an open position should be closed at `mark`.
pub trait ExitPolicy: Send + Sync {
    fn should_exit(&self, position: &Position, mark: f64, now: DateTime<Utc>) -> Option<ExitReason>;
}

/// Closes on a fractional adverse or favourable move from entry, or once the
/// position has been held for `max_hold`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdExit {
    /// Adverse move that closes the position (e.g. 0.5 = 50% of entry).
    pub stop_loss_pct: f64,
    /// Favourable move that closes the position.
    pub take_profit_pct: f64,
    pub max_hold: Duration,
}

impl From<&ExitConfig> for ThresholdExit {
    fn from(config: &ExitConfig) -> Self {
        Self {
            stop_loss_pct: config.stop_loss_pct,
            take_profit_pct: config.take_profit_pct,
            max_hold: config.max_hold,
        }
    }
}

impl Default for ThresholdExit {
    fn default() -> Self {
        Self::from(&ExitConfig::default())
    }
}

impl ThresholdExit {
    /// Fractional return of `position` marked at `mark`; `None` when the
    /// entry price is unusable.
    pub fn return_pct(position: &Position, mark: f64) -> Option<f64> {
        let entry = position.entry_price;
        if !(entry.is_finite() && entry > 0.0 && mark.is_finite()) {
            return None;
        }
        Some(match position.direction {
            Direction::Up => (mark - entry) / entry,
            Direction::Down => (entry - mark) / entry,
        })
    }
}

impl ExitPolicy for ThresholdExit {
    fn should_exit(&self, position: &Position, mark: f64, now: DateTime<Utc>) -> Option<ExitReason> {
        if let Some(ret) = Self::return_pct(position, mark) {
            if ret <= -self.stop_loss_pct {
                info!(strategy_id = %position.strategy_id, return_pct = ret, "Stop-loss triggered");
                return Some(ExitReason::StopLoss);
            }
            if ret >= self.take_profit_pct {
                info!(strategy_id = %position.strategy_id, return_pct = ret, "Take-profit triggered");
                return Some(ExitReason::TakeProfit);
            }
        }

        let held = (now - position.opened_at).to_std().unwrap_or_default();
        if held >= self.max_hold {
            info!(strategy_id = %position.strategy_id, held_secs = held.as_secs(), "Max hold reached");
            return Some(ExitReason::MaxHold);
        }
        None
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
