//! Position entry and exit policy.
//!
//! The ledger never decides when a position ends; the engine offers every
//! open position to an [`ExitPolicy`] once per tick and closes the ones it
//! names. Before a new position is opened the winning signal must also pass
//! the [`EntryLimits`].

pub mod entry;
pub mod exit;

pub use entry::{EntryActivity, EntryLimits, EntryRejection};
pub use exit::{ExitPolicy, ExitReason, ThresholdExit};
