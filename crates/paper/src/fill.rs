use tracing::debug;

use common::Direction;

/// Simulated fill pricing.
///
/// Entries pay the slippage: an `Up` position buys above the mid, a `Down`
/// position sells below it. Exits are marked at the mid.
#[derive(Debug, Clone, Copy)]
pub struct PaperFill {
    /// Slippage in basis points applied to every entry.
    pub slippage_bps: f64,
}

impl PaperFill {
    pub fn new(slippage_bps: f64) -> Self {
        Self { slippage_bps }
    }

    pub fn entry_price(&self, direction: Direction, mid: f64) -> f64 {
        let fill = match direction {
            Direction::Up => mid * (1.0 + self.slippage_bps / 10_000.0),
            Direction::Down => mid * (1.0 - self.slippage_bps / 10_000.0),
        };
        debug!(%direction, mid, fill, "Paper fill simulated");
        fill
    }
}
