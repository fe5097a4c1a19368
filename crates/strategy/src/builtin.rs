//! Built-in evaluation logics.
//!
//! Each strategy keeps its rolling history behind its own mutex; nothing is
//! shared between instances.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use common::{Direction, MarketState, Proposal};

use crate::catalog::LogicParams;
use crate::indicators::{RsiIndicator, RsiZone};
use crate::{EvaluationError, Strategy};

fn push_bounded(history: &Mutex<VecDeque<f64>>, value: f64, cap: usize) -> Vec<f64> {
    let mut history = history.lock().unwrap_or_else(PoisonError::into_inner);
    history.push_back(value);
    while history.len() > cap {
        history.pop_front();
    }
    history.iter().copied().collect()
}

fn checked_mid(market: &MarketState) -> Result<f64, EvaluationError> {
    let mid = market.mid();
    if mid.is_finite() && mid > 0.0 {
        Ok(mid)
    } else {
        Err(EvaluationError::new(format!("unusable mid price {mid}")))
    }
}

// ─── Momentum ─────────────────────────────────────────────────────────────────

/// Follows the direction of the short SMA relative to the full-window SMA,
/// gated on the total change across the window.
pub struct MomentumStrategy {
    window: usize,
    short_window: usize,
    long_window: usize,
    /// Minimum window change, in percent.
    min_change_pct: f64,
    history: Mutex<VecDeque<f64>>,
}

impl MomentumStrategy {
    pub fn from_params(p: &LogicParams) -> Result<Self, String> {
        let window = p.usize("window", 10)?;
        let short_window = p.usize("short_window", 2)?;
        let long_window = p.usize("long_window", 5)?;
        let min_change_pct = p.f64("min_change_pct", 0.01)?;
        if short_window == 0 || short_window > long_window || long_window > window {
            return Err(format!(
                "momentum windows must satisfy 0 < short <= long <= window, got {short_window}/{long_window}/{window}"
            ));
        }
        if min_change_pct < 0.0 {
            return Err("min_change_pct must be >= 0".into());
        }
        Ok(Self {
            window,
            short_window,
            long_window,
            min_change_pct,
            history: Mutex::new(VecDeque::with_capacity(window)),
        })
    }
}

impl Strategy for MomentumStrategy {
    fn kind(&self) -> &str {
        "momentum"
    }

    fn evaluate(&self, market: &MarketState) -> Result<Option<Proposal>, EvaluationError> {
        let prices = push_bounded(&self.history, checked_mid(market)?, self.window);
        if prices.len() < self.long_window {
            return Ok(None);
        }

        let sma_short =
            prices[prices.len() - self.short_window..].iter().sum::<f64>() / self.short_window as f64;
        let sma_long = prices.iter().sum::<f64>() / prices.len() as f64;
        let first = prices[0];
        let last = prices[prices.len() - 1];
        let change_pct = (last - first) / first * 100.0;
        let confidence = (change_pct.abs() * 10.0).min(0.9);

        let proposal = if sma_short > sma_long * 1.001 && change_pct > self.min_change_pct {
            Some(Proposal::new(
                Direction::Up,
                confidence,
                format!("upward momentum {change_pct:.3}% over {} samples", prices.len()),
            ))
        } else if sma_short < sma_long * 0.999 && change_pct < -self.min_change_pct {
            Some(Proposal::new(
                Direction::Down,
                confidence,
                format!("downward momentum {change_pct:.3}% over {} samples", prices.len()),
            ))
        } else {
            None
        };
        Ok(proposal)
    }
}

// ─── Order book imbalance ────────────────────────────────────────────────────

/// Leans toward the heavier side of the book.
pub struct OrderBookImbalanceStrategy {
    threshold: f64,
    min_depth: f64,
}

impl OrderBookImbalanceStrategy {
    pub fn from_params(p: &LogicParams) -> Result<Self, String> {
        let threshold = p.f64("threshold", 0.3)?;
        let min_depth = p.f64("min_depth", 1.0)?;
        if !(0.0 < threshold && threshold < 1.0) {
            return Err(format!("threshold must be within (0, 1), got {threshold}"));
        }
        if min_depth < 0.0 {
            return Err("min_depth must be >= 0".into());
        }
        Ok(Self {
            threshold,
            min_depth,
        })
    }
}

impl Strategy for OrderBookImbalanceStrategy {
    fn kind(&self) -> &str {
        "orderbook_imbalance"
    }

    fn evaluate(&self, market: &MarketState) -> Result<Option<Proposal>, EvaluationError> {
        let bid = market.bid_depth();
        let ask = market.ask_depth();
        let total = bid + ask;
        if total < self.min_depth || total <= 0.0 {
            return Ok(None);
        }

        let imbalance = (bid - ask) / total;
        if imbalance.abs() < self.threshold {
            return Ok(None);
        }

        let direction = if imbalance > 0.0 {
            Direction::Up
        } else {
            Direction::Down
        };
        let confidence = (0.5 + imbalance.abs() / 2.0).min(0.95);
        Ok(Some(Proposal::new(
            direction,
            confidence,
            format!("book imbalance {imbalance:+.3} (bids {bid:.1} / asks {ask:.1})"),
        )))
    }
}

// ─── RSI reversion ───────────────────────────────────────────────────────────

/// Fades RSI extremes: oversold → Up, overbought → Down.
pub struct RsiReversionStrategy {
    indicator: RsiIndicator,
    max_history: usize,
    history: Mutex<VecDeque<f64>>,
}

impl RsiReversionStrategy {
    const DEFAULT_MAX_HISTORY: usize = 200;

    pub fn from_params(p: &LogicParams) -> Result<Self, String> {
        let indicator = RsiIndicator::new(
            p.usize("period", 14)?,
            p.f64("overbought", 70.0)?,
            p.f64("oversold", 30.0)?,
        )?;
        let max_history = Self::DEFAULT_MAX_HISTORY.max(indicator.period + 1);
        Ok(Self {
            indicator,
            max_history,
            history: Mutex::new(VecDeque::new()),
        })
    }
}

impl Strategy for RsiReversionStrategy {
    fn kind(&self) -> &str {
        "rsi_reversion"
    }

    fn evaluate(&self, market: &MarketState) -> Result<Option<Proposal>, EvaluationError> {
        let prices = push_bounded(&self.history, checked_mid(market)?, self.max_history);
        let Some(rsi) = self.indicator.compute(&prices) else {
            return Ok(None);
        };

        let proposal = match self.indicator.zone(rsi) {
            RsiZone::Oversold => {
                let depth = (self.indicator.oversold - rsi) / self.indicator.oversold;
                Some(Proposal::new(
                    Direction::Up,
                    (0.6 + depth * 0.4).min(0.95),
                    format!("RSI {rsi:.1} oversold"),
                ))
            }
            RsiZone::Overbought => {
                let depth = (rsi - self.indicator.overbought) / (100.0 - self.indicator.overbought);
                Some(Proposal::new(
                    Direction::Down,
                    (0.6 + depth * 0.4).min(0.95),
                    format!("RSI {rsi:.1} overbought"),
                ))
            }
            RsiZone::Neutral => None,
        };
        Ok(proposal)
    }
}
