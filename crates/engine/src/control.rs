use std::sync::Arc;

use tracing::info;

use common::{Error, LifecycleState, Result};
use paper::Ledger;
use strategy::StrategyRegistry;

/// Operator lifecycle commands for admitted strategies.
///
/// Retirement is checked against the ledger while its lock is held, so a
/// strategy can only be retired with no open position and none can be
/// opened while the transition runs.
#[derive(Clone)]
pub struct StrategyControl {
    registry: Arc<StrategyRegistry>,
    ledger: Arc<Ledger>,
}

impl StrategyControl {
    pub fn new(registry: Arc<StrategyRegistry>, ledger: Arc<Ledger>) -> Self {
        Self { registry, ledger }
    }

    pub fn pause(&self, id: &str) -> Result<LifecycleState> {
        self.registry.pause(id)?;
        info!(strategy_id = id, "Strategy paused by operator");
        Ok(LifecycleState::Paused)
    }

    /// Resume a paused strategy. Candidates are only promoted by the
    /// integrator, once their capital account exists.
    pub fn activate(&self, id: &str) -> Result<LifecycleState> {
        match self.registry.state(id) {
            None => return Err(Error::UnknownStrategy(id.to_string())),
            Some(LifecycleState::Candidate) => {
                return Err(Error::InvalidTransition {
                    id: id.to_string(),
                    from: LifecycleState::Candidate,
                    to: LifecycleState::Active,
                })
            }
            Some(_) => {}
        }
        self.registry.activate(id)?;
        info!(strategy_id = id, "Strategy activated by operator");
        Ok(LifecycleState::Active)
    }

    pub async fn retire(&self, id: &str) -> Result<LifecycleState> {
        let registry = &self.registry;
        self.ledger
            .with_position_lock(id, |holds_position| registry.retire(id, holds_position))
            .await?;
        info!(strategy_id = id, "Strategy retired by operator");
        Ok(LifecycleState::Retired)
    }
}
