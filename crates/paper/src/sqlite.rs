use async_trait::async_trait;
use sqlx::SqlitePool;
use tracing::debug;

use common::{LedgerEntry, LedgerSink, LedgerSummary, Result};

/// Persists closed trades and summaries to SQLite.
pub struct SqliteLedgerSink {
    pool: SqlitePool,
}

impl SqliteLedgerSink {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LedgerSink for SqliteLedgerSink {
    async fn record_entry(&self, entry: &LedgerEntry) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO ledger_entries
               (position_id, strategy_id, market_id, direction, notional,
                entry_price, exit_price, pnl, exit_reason, opened_at, closed_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(position_id) DO NOTHING"#,
        )
        .bind(&entry.position_id)
        .bind(&entry.strategy_id)
        .bind(&entry.market_id)
        .bind(entry.direction.to_string())
        .bind(entry.notional)
        .bind(entry.entry_price)
        .bind(entry.exit_price)
        .bind(entry.pnl)
        .bind(&entry.exit_reason)
        .bind(entry.opened_at.to_rfc3339())
        .bind(entry.closed_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        debug!(position_id = %entry.position_id, "Ledger entry persisted");
        Ok(())
    }

    async fn record_summary(&self, summary: &LedgerSummary) -> Result<()> {
        let payload = serde_json::to_string(&summary.strategies)?;
        sqlx::query(
            "INSERT INTO ledger_summaries (generated_at, total_pnl, payload) VALUES (?, ?, ?)",
        )
        .bind(summary.generated_at.to_rfc3339())
        .bind(summary.total_realized_pnl())
        .bind(payload)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
