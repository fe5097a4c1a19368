pub mod aggregator;
pub mod control;
pub mod cycles;
pub mod discovery;
pub mod feed;
pub mod lifecycle;
pub mod scheduler;

pub use aggregator::{EngineSettings, SignalEngine, TickDecision, TickOutcome};
pub use control::StrategyControl;
pub use cycles::{IntegrationCycle, TradingCycle, TradingCycleSettings};
pub use discovery::{CommandDiscovery, NoopDiscovery};
pub use feed::HttpSnapshotSource;
pub use lifecycle::EngineHandle;
pub use scheduler::{CadenceCounts, CadenceStats, Cycle, Scheduler, SchedulerHandle};
