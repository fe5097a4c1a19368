use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{info, warn};

use common::{LedgerEntry, LedgerSink, LedgerSummary, Result};

/// Work item handed from the ledger to the sink dispatcher.
#[derive(Debug, Clone)]
pub enum SinkEvent {
    Entry(LedgerEntry),
    Summary(LedgerSummary),
}

impl SinkEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            SinkEvent::Entry(_) => "entry",
            SinkEvent::Summary(_) => "summary",
        }
    }
}

/// Drains ledger events into a `LedgerSink` off the trading path.
///
/// The ledger only ever `try_send`s into the bounded channel, so a slow or
/// failing sink can drop records but never stalls a tick.
pub struct SinkDispatcher {
    rx: mpsc::Receiver<SinkEvent>,
    sink: Arc<dyn LedgerSink>,
}

impl SinkDispatcher {
    pub fn new(sink: Arc<dyn LedgerSink>, capacity: usize) -> (Self, mpsc::Sender<SinkEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { rx, sink }, tx)
    }

    /// Runs until every sender is dropped.
    pub async fn run(mut self) {
        info!("Ledger sink dispatcher started");
        while let Some(event) = self.rx.recv().await {
            let result = match &event {
                SinkEvent::Entry(entry) => self.sink.record_entry(entry).await,
                SinkEvent::Summary(summary) => self.sink.record_summary(summary).await,
            };
            if let Err(e) = result {
                warn!(kind = event.kind(), error = %e, "Ledger sink write failed");
            }
        }
        info!("Ledger sink dispatcher stopped");
    }
}

/// Sink that only writes to the log. Used when no database is configured.
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait]
impl LedgerSink for LogSink {
    async fn record_entry(&self, entry: &LedgerEntry) -> Result<()> {
        info!(
            strategy_id = %entry.strategy_id,
            direction = %entry.direction,
            notional = entry.notional,
            entry_price = entry.entry_price,
            exit_price = entry.exit_price,
            pnl = entry.pnl,
            reason = %entry.exit_reason,
            "Trade closed"
        );
        Ok(())
    }

    async fn record_summary(&self, summary: &LedgerSummary) -> Result<()> {
        info!(
            strategies = summary.strategies.len(),
            total_pnl = summary.total_realized_pnl(),
            "Ledger summary"
        );
        for s in &summary.strategies {
            info!(
                strategy_id = %s.strategy_id,
                available = s.available_balance,
                realized_pnl = s.realized_pnl,
                trades = s.trades,
                win_rate = s.win_rate,
                depleted = s.depleted,
                "Strategy performance"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use chrono::Utc;
    use common::{Direction, Error};

    use super::*;

    #[derive(Default)]
    struct Recording {
        entries: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl LedgerSink for Recording {
        async fn record_entry(&self, entry: &LedgerEntry) -> Result<()> {
            if self.fail {
                return Err(Error::Other("disk full".into()));
            }
            self.entries.lock().unwrap().push(entry.position_id.clone());
            Ok(())
        }

        async fn record_summary(&self, _: &LedgerSummary) -> Result<()> {
            Ok(())
        }
    }

    fn entry(id: &str) -> LedgerEntry {
        let now = Utc::now();
        LedgerEntry {
            position_id: id.into(),
            strategy_id: "a".into(),
            market_id: "m".into(),
            direction: Direction::Up,
            notional: 5.0,
            entry_price: 0.5,
            exit_price: 0.6,
            pnl: 1.0,
            exit_reason: "take_profit".into(),
            opened_at: now,
            closed_at: now,
        }
    }

    #[tokio::test]
    async fn dispatcher_forwards_in_order_and_stops_when_senders_drop() {
        let sink = Arc::new(Recording::default());
        let (dispatcher, tx) = SinkDispatcher::new(sink.clone(), 8);
        let handle = tokio::spawn(dispatcher.run());

        tx.send(SinkEvent::Entry(entry("p1"))).await.unwrap();
        tx.send(SinkEvent::Entry(entry("p2"))).await.unwrap();
        drop(tx);

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("dispatcher should stop")
            .unwrap();
        assert_eq!(*sink.entries.lock().unwrap(), vec!["p1", "p2"]);
    }

    #[tokio::test]
    async fn failing_sink_does_not_stop_dispatcher() {
        let sink = Arc::new(Recording {
            fail: true,
            ..Default::default()
        });
        let (dispatcher, tx) = SinkDispatcher::new(sink, 8);
        let handle = tokio::spawn(dispatcher.run());

        tx.send(SinkEvent::Entry(entry("p1"))).await.unwrap();
        tx.send(SinkEvent::Entry(entry("p2"))).await.unwrap();
        drop(tx);

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("dispatcher should stop")
            .unwrap();
    }
}
