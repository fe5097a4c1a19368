use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{error, info, warn};

use common::EngineState;

/// Cloneable handle to the engine's run state, shared with the API.
#[derive(Clone, Default)]
pub struct EngineHandle {
    state: Arc<RwLock<EngineState>>,
}

impl EngineHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn state(&self) -> EngineState {
        *self.state.read().await
    }

    /// Enter the halted state. Trading ticks are skipped until an operator
    /// resumes the engine.
    pub async fn halt(&self, reason: &str) {
        let mut state = self.state.write().await;
        if *state == EngineState::Running {
            error!(reason, "Engine halted, operator intervention required");
            *state = EngineState::Halted;
        }
    }

    /// Leave the halted state. Returns `false` if the engine was not halted.
    pub async fn resume(&self) -> bool {
        let mut state = self.state.write().await;
        if *state == EngineState::Halted {
            info!("Engine resumed by operator");
            *state = EngineState::Running;
            true
        } else {
            warn!(state = %*state, "Resume received but engine is not halted");
            false
        }
    }

    pub async fn stop(&self) {
        info!("Engine stopping");
        *self.state.write().await = EngineState::Stopped;
    }
}
