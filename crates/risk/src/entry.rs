use std::fmt;

use serde::{Deserialize, Serialize};

use common::{EntryConfig, MarketState};

/// Recent trading activity across all strategies, read from the ledger.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EntryActivity {
    /// Positions opened during the last hour, open or closed.
    pub trades_last_hour: usize,
    /// Realized pnl of trades closed since UTC midnight.
    pub realized_pnl_today: f64,
}

/// Why an entry was refused.
#[derive(Debug, Clone, PartialEq)]
pub enum EntryRejection {
    SpreadTooNarrow { spread_pct: f64, min: f64 },
    SpreadTooWide { spread_pct: f64, max: f64 },
    TradeRateLimit { trades: usize, limit: usize },
    DailyLossLimit { loss: f64, limit: f64 },
}

impl fmt::Display for EntryRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryRejection::SpreadTooNarrow { spread_pct, min } => write!(
                f,
                "spread {:.2}% below minimum {:.2}%",
                spread_pct * 100.0,
                min * 100.0
            ),
            EntryRejection::SpreadTooWide { spread_pct, max } => write!(
                f,
                "spread {:.2}% above maximum {:.2}%",
                spread_pct * 100.0,
                max * 100.0
            ),
            EntryRejection::TradeRateLimit { trades, limit } => {
                write!(f, "{trades} trades in the last hour, limit {limit}")
            }
            EntryRejection::DailyLossLimit { loss, limit } => {
                write!(f, "daily loss ${loss:.2} exceeds limit ${limit:.2}")
            }
        }
    }
}

/// Pre-trade checks on the market and on recent activity.
///
/// The spread band only applies to a two-sided book; a snapshot without
/// both sides carries no spread to judge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryLimits {
    pub min_spread_pct: f64,
    pub max_spread_pct: f64,
    pub max_trades_per_hour: usize,
    pub max_daily_loss: f64,
}

impl From<&EntryConfig> for EntryLimits {
    fn from(config: &EntryConfig) -> Self {
        Self {
            min_spread_pct: config.min_spread_pct,
            max_spread_pct: config.max_spread_pct,
            max_trades_per_hour: config.max_trades_per_hour,
            max_daily_loss: config.max_daily_loss_usd,
        }
    }
}

impl Default for EntryLimits {
    fn default() -> Self {
        Self::from(&EntryConfig::default())
    }
}

impl EntryLimits {
    pub fn check(
        &self,
        market: &MarketState,
        activity: &EntryActivity,
    ) -> Result<(), EntryRejection> {
        if let Some(spread) = market.spread() {
            let mid = market.mid();
            if mid > 0.0 {
                let spread_pct = spread / mid;
                if spread_pct < self.min_spread_pct {
                    return Err(EntryRejection::SpreadTooNarrow {
                        spread_pct,
                        min: self.min_spread_pct,
                    });
                }
                if spread_pct > self.max_spread_pct {
                    return Err(EntryRejection::SpreadTooWide {
                        spread_pct,
                        max: self.max_spread_pct,
                    });
                }
            }
        }

        if activity.realized_pnl_today < -self.max_daily_loss {
            return Err(EntryRejection::DailyLossLimit {
                loss: -activity.realized_pnl_today,
                limit: self.max_daily_loss,
            });
        }

        if activity.trades_last_hour >= self.max_trades_per_hour {
            return Err(EntryRejection::TradeRateLimit {
                trades: activity.trades_last_hour,
                limit: self.max_trades_per_hour,
            });
        }

        Ok(())
    }
}
