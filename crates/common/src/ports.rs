use async_trait::async_trait;

use crate::{LedgerEntry, LedgerSummary, MarketState, Result, StrategyDescriptor};

/// Supplies one immutable snapshot per tick.
///
/// The engine bounds every call with the feed timeout; an error or a late
/// answer skips the whole tick as `FeedUnavailable`.
#[async_trait]
pub trait MarketSource: Send + Sync {
    async fn snapshot(&self, market_id: &str) -> Result<MarketState>;
}

/// Append-only store of discovered strategy descriptors.
///
/// A descriptor is pending until it is marked admitted or rejected; marked
/// descriptors are never returned again.
#[async_trait]
pub trait DescriptorStore: Send + Sync {
    async fn list_pending(&self) -> Result<Vec<StrategyDescriptor>>;

    async fn mark_admitted(&self, descriptor_id: &str) -> Result<()>;

    async fn mark_rejected(&self, descriptor_id: &str, reason: &str) -> Result<()>;
}

/// Destination for closed trades and periodic summaries. Called off the
/// trading path; a failing sink only produces warnings.
#[async_trait]
pub trait LedgerSink: Send + Sync {
    async fn record_entry(&self, entry: &LedgerEntry) -> Result<()>;

    async fn record_summary(&self, summary: &LedgerSummary) -> Result<()>;
}
