use std::str::FromStr;
use std::time::Duration;

use crate::{Error, Result};

/// Engine parameters for one trading tick.
#[derive(Debug, Clone)]
pub struct TradingConfig {
    pub initial_capital_usd: f64,
    /// Fixed notional committed per trade.
    pub trade_notional_usd: f64,
    /// Below this available balance a winning signal is rejected.
    pub min_trade_size_usd: f64,
    pub min_confidence: f64,
    /// Cooldown for base strategies that do not declare one.
    pub default_cooldown: Duration,
    pub eval_timeout: Duration,
    pub worker_pool_size: usize,
    pub feed_timeout: Duration,
    pub paper_slippage_bps: f64,
    /// Consecutive unavailable-feed ticks before the engine halts.
    pub feed_failure_halt_threshold: u32,
    pub summary_every_ticks: u64,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            initial_capital_usd: 100.0,
            trade_notional_usd: 5.0,
            min_trade_size_usd: 1.0,
            min_confidence: 0.6,
            default_cooldown: Duration::from_secs(30),
            eval_timeout: Duration::from_millis(200),
            worker_pool_size: 4,
            feed_timeout: Duration::from_secs(2),
            paper_slippage_bps: 10.0,
            feed_failure_halt_threshold: 12,
            summary_every_ticks: 50,
        }
    }
}

impl TradingConfig {
    pub fn validate(&self) -> Result<()> {
        positive("INITIAL_CAPITAL_USD", self.initial_capital_usd)?;
        positive("TRADE_NOTIONAL_USD", self.trade_notional_usd)?;
        positive("MIN_TRADE_SIZE_USD", self.min_trade_size_usd)?;
        if self.trade_notional_usd < self.min_trade_size_usd {
            return Err(Error::Config(format!(
                "TRADE_NOTIONAL_USD ({}) must be at least MIN_TRADE_SIZE_USD ({})",
                self.trade_notional_usd, self.min_trade_size_usd
            )));
        }
        unit_interval("MIN_CONFIDENCE", self.min_confidence)?;
        non_zero("EVAL_TIMEOUT_MS", self.eval_timeout)?;
        non_zero("FEED_TIMEOUT_MS", self.feed_timeout)?;
        if self.worker_pool_size == 0 {
            return Err(Error::Config("WORKER_POOL_SIZE must be at least 1".into()));
        }
        if !self.paper_slippage_bps.is_finite() || self.paper_slippage_bps < 0.0 {
            return Err(Error::Config("PAPER_SLIPPAGE_BPS must be >= 0".into()));
        }
        if self.feed_failure_halt_threshold == 0 {
            return Err(Error::Config("FEED_FAILURE_HALT_THRESHOLD must be at least 1".into()));
        }
        if self.summary_every_ticks == 0 {
            return Err(Error::Config("SUMMARY_EVERY_TICKS must be at least 1".into()));
        }
        Ok(())
    }
}

/// Periods of the three independent cadences.
#[derive(Debug, Clone)]
pub struct CadenceConfig {
    pub tick_interval: Duration,
    pub integration_interval: Duration,
    pub discovery_interval: Duration,
}

impl Default for CadenceConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(5),
            integration_interval: Duration::from_secs(5 * 60),
            discovery_interval: Duration::from_secs(30 * 60),
        }
    }
}

impl CadenceConfig {
    pub fn validate(&self) -> Result<()> {
        non_zero("TICK_INTERVAL_SECS", self.tick_interval)?;
        non_zero("INTEGRATION_INTERVAL_SECS", self.integration_interval)?;
        non_zero("DISCOVERY_INTERVAL_SECS", self.discovery_interval)
    }
}

#[derive(Debug, Clone)]
pub struct IntegrationConfig {
    /// Descriptors whose hypothesis confidence is below this are rejected.
    pub min_hypothesis_confidence: f64,
}

impl Default for IntegrationConfig {
    fn default() -> Self {
        Self {
            min_hypothesis_confidence: 0.5,
        }
    }
}

impl IntegrationConfig {
    pub fn validate(&self) -> Result<()> {
        unit_interval("MIN_HYPOTHESIS_CONFIDENCE", self.min_hypothesis_confidence)
    }
}

/// Threshold exit policy applied to open positions.
#[derive(Debug, Clone)]
pub struct ExitConfig {
    /// Adverse price move (fraction of entry) that closes a position.
    pub stop_loss_pct: f64,
    /// Favourable price move (fraction of entry) that closes a position.
    pub take_profit_pct: f64,
    pub max_hold: Duration,
}

impl Default for ExitConfig {
    fn default() -> Self {
        Self {
            stop_loss_pct: 0.5,
            take_profit_pct: 0.5,
            max_hold: Duration::from_secs(5 * 60),
        }
    }
}

impl ExitConfig {
    pub fn validate(&self) -> Result<()> {
        positive("STOP_LOSS_PCT", self.stop_loss_pct)?;
        positive("TAKE_PROFIT_PCT", self.take_profit_pct)?;
        non_zero("MAX_HOLD_SECS", self.max_hold)
    }
}

/// Limits checked before a winning signal is allowed to open a position.
/// They apply across all strategies.
#[derive(Debug, Clone)]
pub struct EntryConfig {
    /// Minimum bid/ask spread as a fraction of the mid (e.g. 0.005 = 0.5%).
    pub min_spread_pct: f64,
    /// Maximum bid/ask spread as a fraction of the mid; wider books are
    /// treated as illiquid.
    pub max_spread_pct: f64,
    pub max_trades_per_hour: usize,
    /// Realized loss since UTC midnight above which new entries stop.
    pub max_daily_loss_usd: f64,
}

impl Default for EntryConfig {
    fn default() -> Self {
        Self {
            min_spread_pct: 0.005,
            max_spread_pct: 0.10,
            max_trades_per_hour: 20,
            max_daily_loss_usd: 100.0,
        }
    }
}

impl EntryConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.min_spread_pct.is_finite() || self.min_spread_pct < 0.0 {
            return Err(Error::Config("MIN_SPREAD_PCT must be >= 0".into()));
        }
        if !(self.max_spread_pct.is_finite() && self.max_spread_pct > self.min_spread_pct) {
            return Err(Error::Config(format!(
                "MAX_SPREAD_PCT must be greater than MIN_SPREAD_PCT ({})",
                self.min_spread_pct
            )));
        }
        if self.max_trades_per_hour == 0 {
            return Err(Error::Config("MAX_TRADES_PER_HOUR must be at least 1".into()));
        }
        positive("MAX_DAILY_LOSS_USD", self.max_daily_loss_usd)
    }
}

/// All configuration loaded from environment variables at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub market_id: String,
    pub feed_url: String,

    pub trading: TradingConfig,
    pub cadence: CadenceConfig,
    pub integration: IntegrationConfig,
    pub exit: ExitConfig,
    pub entry: EntryConfig,

    /// `None` keeps descriptors in memory and disables the persistent sink.
    pub database_url: Option<String>,
    pub strategy_config_path: String,
    /// External discovery command run on the discovery cadence.
    pub discovery_command: Option<String>,

    // Dashboard
    pub dashboard_port: u16,
    pub dashboard_token: Option<String>,
}

impl Config {
    /// Load all configuration from environment variables.
    /// Loads `.env` if present. Any missing or malformed value is an error.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv(); // ignore error if .env not present

        let defaults = TradingConfig::default();
        let trading = TradingConfig {
            initial_capital_usd: parsed_env("INITIAL_CAPITAL_USD", defaults.initial_capital_usd)?,
            trade_notional_usd: parsed_env("TRADE_NOTIONAL_USD", defaults.trade_notional_usd)?,
            min_trade_size_usd: parsed_env("MIN_TRADE_SIZE_USD", defaults.min_trade_size_usd)?,
            min_confidence: parsed_env("MIN_CONFIDENCE", defaults.min_confidence)?,
            default_cooldown: secs_env("DEFAULT_COOLDOWN_SECS", defaults.default_cooldown)?,
            eval_timeout: millis_env("EVAL_TIMEOUT_MS", defaults.eval_timeout)?,
            worker_pool_size: parsed_env("WORKER_POOL_SIZE", defaults.worker_pool_size)?,
            feed_timeout: millis_env("FEED_TIMEOUT_MS", defaults.feed_timeout)?,
            paper_slippage_bps: parsed_env("PAPER_SLIPPAGE_BPS", defaults.paper_slippage_bps)?,
            feed_failure_halt_threshold: parsed_env(
                "FEED_FAILURE_HALT_THRESHOLD",
                defaults.feed_failure_halt_threshold,
            )?,
            summary_every_ticks: parsed_env("SUMMARY_EVERY_TICKS", defaults.summary_every_ticks)?,
        };

        let defaults = CadenceConfig::default();
        let cadence = CadenceConfig {
            tick_interval: secs_env("TICK_INTERVAL_SECS", defaults.tick_interval)?,
            integration_interval: secs_env(
                "INTEGRATION_INTERVAL_SECS",
                defaults.integration_interval,
            )?,
            discovery_interval: secs_env("DISCOVERY_INTERVAL_SECS", defaults.discovery_interval)?,
        };

        let integration = IntegrationConfig {
            min_hypothesis_confidence: parsed_env(
                "MIN_HYPOTHESIS_CONFIDENCE",
                IntegrationConfig::default().min_hypothesis_confidence,
            )?,
        };

        let defaults = ExitConfig::default();
        let exit = ExitConfig {
            stop_loss_pct: parsed_env("STOP_LOSS_PCT", defaults.stop_loss_pct)?,
            take_profit_pct: parsed_env("TAKE_PROFIT_PCT", defaults.take_profit_pct)?,
            max_hold: secs_env("MAX_HOLD_SECS", defaults.max_hold)?,
        };

        let defaults = EntryConfig::default();
        let entry = EntryConfig {
            min_spread_pct: parsed_env("MIN_SPREAD_PCT", defaults.min_spread_pct)?,
            max_spread_pct: parsed_env("MAX_SPREAD_PCT", defaults.max_spread_pct)?,
            max_trades_per_hour: parsed_env("MAX_TRADES_PER_HOUR", defaults.max_trades_per_hour)?,
            max_daily_loss_usd: parsed_env("MAX_DAILY_LOSS_USD", defaults.max_daily_loss_usd)?,
        };

        let config = Config {
            market_id: required_env("MARKET_ID")?,
            feed_url: optional_env("FEED_URL")
                .unwrap_or_else(|| "https://clob.polymarket.com".to_string()),
            trading,
            cadence,
            integration,
            exit,
            entry,
            database_url: optional_env("DATABASE_URL"),
            strategy_config_path: optional_env("STRATEGY_CONFIG_PATH")
                .unwrap_or_else(|| "config/strategies.toml".to_string()),
            discovery_command: optional_env("DISCOVERY_COMMAND"),
            dashboard_port: parsed_env("DASHBOARD_PORT", 8080)?,
            dashboard_token: optional_env("DASHBOARD_TOKEN"),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.market_id.trim().is_empty() {
            return Err(Error::Config("MARKET_ID must not be empty".into()));
        }
        self.trading.validate()?;
        self.cadence.validate()?;
        self.integration.validate()?;
        self.exit.validate()?;
        self.entry.validate()
    }
}

fn required_env(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| {
        Error::Config(format!(
            "Required environment variable '{key}' is not set. Check your .env file."
        ))
    })
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parsed_env<T: FromStr>(key: &str, default: T) -> Result<T> {
    match optional_env(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| Error::Config(format!("{key} has an invalid value: '{raw}'"))),
    }
}

fn secs_env(key: &str, default: Duration) -> Result<Duration> {
    parsed_env(key, default.as_secs()).map(Duration::from_secs)
}

fn millis_env(key: &str, default: Duration) -> Result<Duration> {
    parsed_env(key, default.as_millis() as u64).map(Duration::from_millis)
}

fn positive(key: &str, value: f64) -> Result<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(Error::Config(format!("{key} must be a positive number, got {value}")))
    }
}

fn unit_interval(key: &str, value: f64) -> Result<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(Error::Config(format!("{key} must be within [0, 1], got {value}")))
    }
}

fn non_zero(key: &str, value: Duration) -> Result<()> {
    if value.is_zero() {
        Err(Error::Config(format!("{key} must be greater than zero")))
    } else {
        Ok(())
    }
}
