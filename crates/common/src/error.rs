use thiserror::Error;

use crate::{LifecycleState, StrategyId};

#[derive(Debug, Error)]
pub enum Error {
    /// A single strategy failed to evaluate. Treated as "no signal".
    #[error("strategy '{strategy_id}' evaluation failed: {reason}")]
    StrategyEvaluation {
        strategy_id: StrategyId,
        reason: String,
    },

    #[error("insufficient capital for '{strategy_id}': available {available:.4}, minimum {required:.4}")]
    InsufficientCapital {
        strategy_id: StrategyId,
        available: f64,
        required: f64,
    },

    #[error("strategy id '{0}' is already registered")]
    RegistryConflict(StrategyId),

    #[error("descriptor '{descriptor_id}' failed validation: {reason}")]
    Validation {
        descriptor_id: String,
        reason: String,
    },

    #[error("{cadence} cycle still running, firing skipped")]
    SchedulerOverrun { cadence: String },

    #[error("market feed unavailable: {0}")]
    FeedUnavailable(String),

    #[error("unknown strategy '{0}'")]
    UnknownStrategy(StrategyId),

    #[error("strategy '{id}' cannot move from {from} to {to}")]
    InvalidTransition {
        id: StrategyId,
        from: LifecycleState,
        to: LifecycleState,
    },

    #[error("strategy '{0}' already has an open position")]
    PositionAlreadyOpen(StrategyId),

    #[error("strategy '{0}' has no open position")]
    NoOpenPosition(StrategyId),

    #[error("strategy '{0}' still has an open position")]
    PositionStillOpen(StrategyId),

    #[error("strategy '{0}' is not active")]
    StrategyInactive(StrategyId),

    #[error("ledger corrupted: {0}")]
    LedgerCorrupted(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Systemic failures escalate to halt-and-alert; everything else is
    /// contained to the cycle or strategy that produced it.
    pub fn is_systemic(&self) -> bool {
        matches!(self, Error::LedgerCorrupted(_))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
