use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use common::{Error, Result};

/// One unit of periodic work.
#[async_trait]
pub trait Cycle: Send + Sync + 'static {
    fn name(&self) -> &str;

    async fn run_cycle(&self) -> Result<()>;
}

/// Counters for one cadence.
#[derive(Debug, Default)]
pub struct CadenceStats {
    runs: AtomicU64,
    failures: AtomicU64,
    overruns: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CadenceCounts {
    pub runs: u64,
    pub failures: u64,
    pub overruns: u64,
}

impl CadenceStats {
    pub fn counts(&self) -> CadenceCounts {
        CadenceCounts {
            runs: self.runs.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            overruns: self.overruns.load(Ordering::Relaxed),
        }
    }
}

struct Cadence {
    period: Duration,
    cycle: Arc<dyn Cycle>,
}

/// Runs each registered cycle on its own timer.
///
/// Cadences never share a task, so a stalled cycle only delays its own
/// cadence. A firing that comes due while the previous run of the same cycle
/// is still in flight is skipped and counted as an overrun.
#[derive(Default)]
pub struct Scheduler {
    cadences: Vec<Cadence>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `cycle` every `period`, starting immediately.
    pub fn every(mut self, period: Duration, cycle: Arc<dyn Cycle>) -> Self {
        self.cadences.push(Cadence { period, cycle });
        self
    }

    pub fn spawn(self) -> SchedulerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut tasks = Vec::with_capacity(self.cadences.len());
        let mut stats = Vec::with_capacity(self.cadences.len());

        for cadence in self.cadences {
            let cadence_stats = Arc::new(CadenceStats::default());
            stats.push((cadence.cycle.name().to_string(), cadence_stats.clone()));
            tasks.push(tokio::spawn(run_cadence(
                cadence.period,
                cadence.cycle,
                cadence_stats,
                shutdown_rx.clone(),
            )));
        }

        SchedulerHandle {
            shutdown_tx,
            tasks,
            stats,
        }
    }
}

pub struct SchedulerHandle {
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
    stats: Vec<(String, Arc<CadenceStats>)>,
}

impl SchedulerHandle {
    /// Stop starting new cycles. In-flight cycles are allowed to finish.
    pub fn shutdown(&self) {
        info!("Scheduler shutdown requested");
        let _ = self.shutdown_tx.send(true);
    }

    /// Wait for every cadence to drain and stop.
    pub async fn join(self) {
        for task in self.tasks {
            if let Err(e) = task.await {
                error!(error = %e, "Cadence task terminated abnormally");
            }
        }
        info!("Scheduler stopped");
    }

    pub fn stats(&self, name: &str) -> Option<CadenceCounts> {
        self.stats
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, s)| s.counts())
    }

    pub fn all_stats(&self) -> Vec<(String, CadenceCounts)> {
        self.stats
            .iter()
            .map(|(n, s)| (n.clone(), s.counts()))
            .collect()
    }
}

async fn run_cadence(
    period: Duration,
    cycle: Arc<dyn Cycle>,
    stats: Arc<CadenceStats>,
    mut shutdown: watch::Receiver<bool>,
) {
    let name = cycle.name().to_string();
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut in_flight: Option<JoinHandle<()>> = None;

    info!(cadence = %name, period_ms = period.as_millis() as u64, "Cadence started");

    loop {
        tokio::select! {
            biased;
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
            _ = ticker.tick() => {}
        }

        if in_flight.as_ref().is_some_and(|h| !h.is_finished()) {
            stats.overruns.fetch_add(1, Ordering::Relaxed);
            let overrun = Error::SchedulerOverrun {
                cadence: name.clone(),
            };
            warn!(cadence = %name, error = %overrun, "Cycle overrun");
            continue;
        }

        in_flight = Some(tokio::spawn(fire(cycle.clone(), stats.clone())));
    }

    if let Some(handle) = in_flight {
        if !handle.is_finished() {
            info!(cadence = %name, "Draining in-flight cycle");
        }
        let _ = handle.await;
    }
    info!(cadence = %name, "Cadence stopped");
}

/// Run one cycle in its own task so that an error or a panic is contained
/// at this boundary.
async fn fire(cycle: Arc<dyn Cycle>, stats: Arc<CadenceStats>) {
    let name = cycle.name().to_string();
    stats.runs.fetch_add(1, Ordering::Relaxed);

    let runner = cycle.clone();
    match tokio::spawn(async move { runner.run_cycle().await }).await {
        Ok(Ok(())) => debug!(cadence = %name, "Cycle complete"),
        Ok(Err(e)) => {
            stats.failures.fetch_add(1, Ordering::Relaxed);
            error!(cadence = %name, error = %e, "Cycle failed");
        }
        Err(e) => {
            stats.failures.fetch_add(1, Ordering::Relaxed);
            error!(cadence = %name, error = %e, "Cycle panicked");
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
