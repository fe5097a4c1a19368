use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use tracing::{info, warn};

use common::{
    Error, LifecycleState, RejectedRecord, Result, StrategyId, StrategyProfile,
};

use crate::Strategy;

/// One registered strategy as seen by a tick.
#[derive(Clone)]
pub struct StrategyEntry {
    pub profile: StrategyProfile,
    pub state: LifecycleState,
    pub strategy: Arc<dyn Strategy>,
    /// Timestamp of the last eligible signal; the cooldown runs from here.
    pub last_signal_at: Option<DateTime<Utc>>,
    pub registered_at: DateTime<Utc>,
}

impl StrategyEntry {
    pub fn id(&self) -> &str {
        &self.profile.id
    }

    /// True while `now` is inside the cooldown window of the last signal.
    pub fn in_cooldown(&self, now: DateTime<Utc>) -> bool {
        let Some(last) = self.last_signal_at else {
            return false;
        };
        match (now - last).to_std() {
            Ok(elapsed) => elapsed < self.profile.cooldown,
            // `now` before the last signal: clock went backwards.
            Err(_) => true,
        }
    }
}

impl std::fmt::Debug for StrategyEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrategyEntry")
            .field("profile", &self.profile)
            .field("state", &self.state)
            .field("kind", &self.strategy.kind())
            .field("last_signal_at", &self.last_signal_at)
            .finish()
    }
}

/// Immutable view of the registry, valid for one tick.
///
/// Entries are sorted by strategy id. A registration is either fully present
/// or absent; rejected records never appear here.
#[derive(Debug, Default)]
pub struct RegistrySnapshot {
    pub version: u64,
    entries: Vec<Arc<StrategyEntry>>,
}

impl RegistrySnapshot {
    pub fn entries(&self) -> &[Arc<StrategyEntry>] {
        &self.entries
    }

    pub fn active(&self) -> impl Iterator<Item = &Arc<StrategyEntry>> {
        self.entries
            .iter()
            .filter(|e| e.state == LifecycleState::Active)
    }

    pub fn get(&self, id: &str) -> Option<&Arc<StrategyEntry>> {
        self.entries
            .binary_search_by(|e| e.id().cmp(id))
            .ok()
            .map(|idx| &self.entries[idx])
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Default)]
struct RegistryBook {
    version: u64,
    entries: BTreeMap<StrategyId, Arc<StrategyEntry>>,
    rejected: Vec<RejectedRecord>,
}

/// Concurrency-safe store of strategy records and their lifecycle state.
///
/// Writers are serialized through one mutex and publish a fresh snapshot
/// (copy-on-write) after every mutation; readers load the current snapshot
/// without locking.
pub struct StrategyRegistry {
    published: ArcSwap<RegistrySnapshot>,
    book: Mutex<RegistryBook>,
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self {
            published: ArcSwap::from_pointee(RegistrySnapshot::default()),
            book: Mutex::new(RegistryBook::default()),
        }
    }

    /// Consistent read-only view for one tick.
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.published.load_full()
    }

    pub fn state(&self, id: &str) -> Option<LifecycleState> {
        self.published.load().get(id).map(|e| e.state)
    }

    pub fn is_active(&self, id: &str) -> bool {
        self.state(id) == Some(LifecycleState::Active)
    }

    /// Add a new `Candidate`. A duplicate id is a conflict and never
    /// overwrites the existing entry, whatever its state.
    pub fn register(
        &self,
        profile: StrategyProfile,
        strategy: Arc<dyn Strategy>,
    ) -> Result<StrategyId> {
        if profile.id.trim().is_empty() {
            return Err(Error::Validation {
                descriptor_id: profile.origin.clone(),
                reason: "strategy id must not be empty".into(),
            });
        }

        let mut book = self.lock();
        if book.entries.contains_key(&profile.id) {
            warn!(strategy_id = %profile.id, "Registration conflict, keeping existing entry");
            return Err(Error::RegistryConflict(profile.id));
        }

        let id = profile.id.clone();
        info!(strategy_id = %id, kind = %strategy.kind(), origin = %profile.origin, "Registered strategy candidate");
        book.entries.insert(
            id.clone(),
            Arc::new(StrategyEntry {
                profile,
                state: LifecycleState::Candidate,
                strategy,
                last_signal_at: None,
                registered_at: Utc::now(),
            }),
        );
        self.publish(&mut book);
        Ok(id)
    }

    pub fn activate(&self, id: &str) -> Result<()> {
        self.transition(id, LifecycleState::Active)
    }

    /// Stop new signal generation from the next snapshot on. An open
    /// position is left to the exit collaborator.
    pub fn pause(&self, id: &str) -> Result<()> {
        self.transition(id, LifecycleState::Paused)
    }

    /// Retire a strategy for good. Refused with `PositionStillOpen` while
    /// `holds_position`; the flag must be read under the ledger lock (see
    /// `paper::Ledger::with_position_lock`).
    pub fn retire(&self, id: &str, holds_position: bool) -> Result<()> {
        if holds_position {
            return Err(Error::PositionStillOpen(id.to_string()));
        }
        self.transition(id, LifecycleState::Retired)
    }

    /// Reject a registered candidate and keep a record of why.
    pub fn reject(&self, id: &str, reason: &str) -> Result<()> {
        self.transition(id, LifecycleState::Rejected)?;
        let mut book = self.lock();
        let origin = book
            .entries
            .get(id)
            .map(|e| e.profile.origin.clone())
            .unwrap_or_default();
        book.rejected.push(RejectedRecord {
            descriptor_id: origin,
            strategy_id: id.to_string(),
            reason: reason.to_string(),
            rejected_at: Utc::now(),
        });
        Ok(())
    }

    /// Keep a record of a descriptor that never became a candidate.
    pub fn record_rejection(&self, record: RejectedRecord) {
        self.lock().rejected.push(record);
    }

    pub fn rejections(&self) -> Vec<RejectedRecord> {
        self.lock().rejected.clone()
    }

    /// Start cooldowns for the given strategies. Unknown ids are ignored.
    pub fn record_signals(&self, emitted: &[(StrategyId, DateTime<Utc>)]) {
        if emitted.is_empty() {
            return;
        }
        let mut book = self.lock();
        let mut changed = false;
        for (id, at) in emitted {
            if let Some(entry) = book.entries.get_mut(id) {
                Arc::make_mut(entry).last_signal_at = Some(*at);
                changed = true;
            }
        }
        if changed {
            self.publish(&mut book);
        }
    }

    fn transition(&self, id: &str, to: LifecycleState) -> Result<()> {
        let mut book = self.lock();
        let entry = book
            .entries
            .get_mut(id)
            .ok_or_else(|| Error::UnknownStrategy(id.to_string()))?;

        let from = entry.state;
        if !from.can_transition_to(to) {
            return Err(Error::InvalidTransition {
                id: id.to_string(),
                from,
                to,
            });
        }
        Arc::make_mut(entry).state = to;
        info!(strategy_id = %id, %from, %to, "Strategy lifecycle transition");
        self.publish(&mut book);
        Ok(())
    }

    fn publish(&self, book: &mut MutexGuard<'_, RegistryBook>) {
        book.version += 1;
        let entries = book
            .entries
            .values()
            .filter(|e| e.state != LifecycleState::Rejected)
            .cloned()
            .collect();
        self.published.store(Arc::new(RegistrySnapshot {
            version: book.version,
            entries,
        }));
    }

    fn lock(&self) -> MutexGuard<'_, RegistryBook> {
        self.book.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
