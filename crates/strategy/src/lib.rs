pub mod builtin;
pub mod catalog;
pub mod config;
pub mod indicators;
pub mod registry;

pub use catalog::{LogicParams, StrategyCatalog};
pub use config::{StrategyConfig, StrategyFileConfig};
pub use registry::{RegistrySnapshot, StrategyEntry, StrategyRegistry};

use common::{MarketState, Proposal};

/// Failure inside one strategy's evaluation. Contained to that strategy.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct EvaluationError(pub String);

impl EvaluationError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// The single evaluation capability every strategy implements.
///
/// Implementations own only their parameters and private rolling state.
/// `evaluate` may be called from a blocking worker thread and must not
/// assume anything about other strategies.
pub trait Strategy: Send + Sync {
    /// Logic kind, used in logs.
    fn kind(&self) -> &str;

    /// Evaluate the tick's snapshot and optionally propose a trade.
    fn evaluate(&self, market: &MarketState) -> Result<Option<Proposal>, EvaluationError>;
}
