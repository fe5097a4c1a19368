//! Paper-trading capital ledger.
//!
//! Every strategy owns an isolated capital account. Positions are simulated:
//! fills are priced off the market mid with configurable slippage and no order
//! ever leaves the process.

pub mod fill;
pub mod ledger;
pub mod sink;
pub mod sqlite;

pub use fill::PaperFill;
pub use ledger::{compute_pnl, Ledger};
pub use sink::{LogSink, SinkDispatcher, SinkEvent};
pub use sqlite::SqliteLedgerSink;
