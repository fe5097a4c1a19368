use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};

use common::{
    DescriptorStore, Error, RejectedRecord, Result, StrategyDescriptor, StrategyId,
    StrategyProfile,
};
use paper::Ledger;
use strategy::{Strategy, StrategyCatalog, StrategyRegistry};

/// Capability a descriptor must declare to be evaluable.
const REQUIRED_CAPABILITY: &str = "evaluate";
const REQUIRED_INPUT: &str = "market_state";
const REQUIRED_OUTPUT: &str = "signal";

#[derive(Debug, Clone)]
pub struct IntegratorSettings {
    /// Balance of every new capital account.
    pub initial_balance: f64,
    pub min_hypothesis_confidence: f64,
    /// Cooldown for descriptors that do not declare one.
    pub default_cooldown: Duration,
    /// A non-zero per-trade cap below this could never trade.
    pub min_trade_size: f64,
}

/// Outcome of one admission attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    Admitted(StrategyId),
    Rejected(String),
}

#[derive(Debug, Default)]
pub struct IntegrationReport {
    pub admitted: Vec<StrategyId>,
    /// `(descriptor_id, reason)`
    pub rejected: Vec<(String, String)>,
}

/// Validates descriptors and promotes the valid ones to Active strategies
/// with a freshly funded capital account.
///
/// Every descriptor id is processed at most once per process; the store
/// records the outcome so it is not offered again after a restart.
pub struct AutoIntegrator {
    registry: Arc<StrategyRegistry>,
    ledger: Arc<Ledger>,
    catalog: StrategyCatalog,
    store: Arc<dyn DescriptorStore>,
    settings: IntegratorSettings,
    processed: Mutex<HashSet<String>>,
}

impl AutoIntegrator {
    pub fn new(
        registry: Arc<StrategyRegistry>,
        ledger: Arc<Ledger>,
        catalog: StrategyCatalog,
        store: Arc<dyn DescriptorStore>,
        settings: IntegratorSettings,
    ) -> Self {
        Self {
            registry,
            ledger,
            catalog,
            store,
            settings,
            processed: Mutex::new(HashSet::new()),
        }
    }

    /// Pending descriptors not yet processed by this integrator.
    pub async fn poll_pending(&self) -> Result<Vec<StrategyDescriptor>> {
        let pending = self.store.list_pending().await?;
        let processed = self.processed.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(pending
            .into_iter()
            .filter(|d| !processed.contains(&d.descriptor_id))
            .collect())
    }

    /// Check the descriptor's shape and parameters and build its capability.
    /// Does not touch the registry or ledger.
    pub fn validate(
        &self,
        descriptor: &StrategyDescriptor,
    ) -> Result<(StrategyProfile, Arc<dyn Strategy>)> {
        let fail = |reason: String| Error::Validation {
            descriptor_id: descriptor.descriptor_id.clone(),
            reason,
        };

        if descriptor.strategy_id.trim().is_empty() {
            return Err(fail("strategy id must not be empty".into()));
        }

        let interface = &descriptor.interface;
        if !interface.capabilities.iter().any(|c| c == REQUIRED_CAPABILITY) {
            return Err(fail(format!("missing '{REQUIRED_CAPABILITY}' capability")));
        }
        if interface.input != REQUIRED_INPUT || interface.output != REQUIRED_OUTPUT {
            return Err(fail(format!(
                "interface must map {REQUIRED_INPUT} -> {REQUIRED_OUTPUT}, got {} -> {}",
                interface.input, interface.output
            )));
        }

        let cooldown = match descriptor.cooldown_seconds {
            None => self.settings.default_cooldown,
            Some(secs) if secs >= 0 => Duration::from_secs(secs as u64),
            Some(secs) => return Err(fail(format!("cooldown_seconds must be >= 0, got {secs}"))),
        };
        let max_notional = descriptor.max_notional_per_trade;
        if !max_notional.is_finite() || max_notional < 0.0 {
            return Err(fail(format!(
                "max_notional_per_trade must be finite and >= 0, got {max_notional}"
            )));
        }
        if max_notional > 0.0 && max_notional < self.settings.min_trade_size {
            return Err(fail(format!(
                "max_notional_per_trade {max_notional} below minimum trade size {}",
                self.settings.min_trade_size
            )));
        }

        let confidence = descriptor.hypothesis_confidence;
        if !(0.0..=1.0).contains(&confidence) {
            return Err(fail(format!(
                "hypothesis_confidence must be within [0, 1], got {confidence}"
            )));
        }
        if confidence < self.settings.min_hypothesis_confidence {
            return Err(fail(format!(
                "hypothesis_confidence {confidence} below minimum {}",
                self.settings.min_hypothesis_confidence
            )));
        }

        let logic = descriptor
            .logic
            .as_ref()
            .ok_or_else(|| fail("missing logic reference".into()))?;
        let strategy = self.catalog.build(logic).map_err(fail)?;

        let name = if descriptor.name.trim().is_empty() {
            descriptor.strategy_id.clone()
        } else {
            descriptor.name.clone()
        };
        let profile = StrategyProfile {
            id: descriptor.strategy_id.clone(),
            name,
            cooldown,
            max_notional_per_trade: max_notional,
            origin: descriptor.descriptor_id.clone(),
        };
        Ok((profile, strategy))
    }

    /// Validate, register, fund and activate. Never returns an error: every
    /// failure becomes a rejection with a recorded reason.
    pub async fn admit(&self, descriptor: &StrategyDescriptor) -> Admission {
        let (profile, strategy) = match self.validate(descriptor) {
            Ok(built) => built,
            Err(e) => return self.reject_unregistered(descriptor, e.to_string()),
        };

        let id = match self.registry.register(profile, strategy) {
            Ok(id) => id,
            Err(e) => return self.reject_unregistered(descriptor, e.to_string()),
        };

        if let Err(e) = self
            .ledger
            .open_account(&id, self.settings.initial_balance)
            .await
        {
            let reason = format!("capital account could not be opened: {e}");
            return self.reject_candidate(&id, descriptor, reason);
        }

        if let Err(e) = self.registry.activate(&id) {
            let reason = format!("activation failed: {e}");
            return self.reject_candidate(&id, descriptor, reason);
        }

        info!(
            strategy_id = %id,
            descriptor_id = %descriptor.descriptor_id,
            balance = self.settings.initial_balance,
            "Strategy admitted"
        );
        Admission::Admitted(id)
    }

    /// One integration poll: admit every new pending descriptor and record
    /// the outcome in the store.
    pub async fn run_once(&self) -> Result<IntegrationReport> {
        let pending = self.poll_pending().await?;
        let mut report = IntegrationReport::default();

        for descriptor in pending {
            let descriptor_id = descriptor.descriptor_id.clone();
            // Claim first so a concurrent poll cannot process it twice.
            if !self.claim(&descriptor_id) {
                continue;
            }

            let admission = self.admit(&descriptor).await;
            let marked = match &admission {
                Admission::Admitted(_) => self.store.mark_admitted(&descriptor_id).await,
                Admission::Rejected(reason) => {
                    self.store.mark_rejected(&descriptor_id, reason).await
                }
            };
            if let Err(e) = marked {
                warn!(descriptor_id = %descriptor_id, error = %e, "Failed to record admission outcome");
            }

            match admission {
                Admission::Admitted(id) => report.admitted.push(id),
                Admission::Rejected(reason) => report.rejected.push((descriptor_id, reason)),
            }
        }

        if !report.admitted.is_empty() || !report.rejected.is_empty() {
            info!(
                admitted = report.admitted.len(),
                rejected = report.rejected.len(),
                "Integration poll complete"
            );
        }
        Ok(report)
    }

    /// Admit the statically configured base strategies through the same
    /// validation path. Not recorded in the store.
    pub async fn admit_base(&self, descriptors: &[StrategyDescriptor]) -> IntegrationReport {
        let mut report = IntegrationReport::default();
        for descriptor in descriptors {
            if !self.claim(&descriptor.descriptor_id) {
                continue;
            }
            match self.admit(descriptor).await {
                Admission::Admitted(id) => report.admitted.push(id),
                Admission::Rejected(reason) => report
                    .rejected
                    .push((descriptor.descriptor_id.clone(), reason)),
            }
        }
        report
    }

    fn claim(&self, descriptor_id: &str) -> bool {
        self.processed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(descriptor_id.to_string())
    }

    fn reject_unregistered(&self, descriptor: &StrategyDescriptor, reason: String) -> Admission {
        warn!(
            descriptor_id = %descriptor.descriptor_id,
            strategy_id = %descriptor.strategy_id,
            reason = %reason,
            "Descriptor rejected"
        );
        self.registry.record_rejection(RejectedRecord {
            descriptor_id: descriptor.descriptor_id.clone(),
            strategy_id: descriptor.strategy_id.clone(),
            reason: reason.clone(),
            rejected_at: Utc::now(),
        });
        Admission::Rejected(reason)
    }

    fn reject_candidate(&self, id: &str, descriptor: &StrategyDescriptor, reason: String) -> Admission {
        warn!(
            descriptor_id = %descriptor.descriptor_id,
            strategy_id = %id,
            reason = %reason,
            "Candidate rejected"
        );
        if let Err(e) = self.registry.reject(id, &reason) {
            warn!(strategy_id = %id, error = %e, "Could not mark candidate rejected");
        }
        Admission::Rejected(reason)
    }
}
