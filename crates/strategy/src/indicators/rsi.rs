/// RSI (Relative Strength Index) over a series of mid prices.
///
/// Uses Wilder's smoothed moving average. Returns `None` until at least
/// `period + 1` prices are available.
#[derive(Debug, Clone)]
pub struct RsiIndicator {
    pub period: usize,
    pub overbought: f64,
    pub oversold: f64,
}

/// Where an RSI reading sits relative to the configured bands.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RsiZone {
    Oversold,
    Neutral,
    Overbought,
}

impl RsiIndicator {
    pub fn new(period: usize, overbought: f64, oversold: f64) -> Result<Self, String> {
        if period < 2 {
            return Err(format!("RSI period must be >= 2, got {period}"));
        }
        if !(0.0 < oversold && oversold < overbought && overbought < 100.0) {
            return Err(format!(
                "RSI bands must satisfy 0 < oversold < overbought < 100, got {oversold}/{overbought}"
            ));
        }
        Ok(Self {
            period,
            overbought,
            oversold,
        })
    }

    /// Compute RSI from prices, oldest first.
    pub fn compute(&self, prices: &[f64]) -> Option<f64> {
        if prices.len() < self.period + 1 {
            return None;
        }

        let changes: Vec<f64> = prices.windows(2).map(|w| w[1] - w[0]).collect();
        let (seed, rest) = changes.split_at(self.period);
        let period = self.period as f64;

        let mut avg_gain = seed.iter().filter(|&&c| c > 0.0).sum::<f64>() / period;
        let mut avg_loss = seed.iter().filter(|&&c| c < 0.0).map(|c| -c).sum::<f64>() / period;

        for &change in rest {
            avg_gain = (avg_gain * (period - 1.0) + change.max(0.0)) / period;
            avg_loss = (avg_loss * (period - 1.0) + (-change).max(0.0)) / period;
        }

        if avg_loss == 0.0 {
            return Some(100.0);
        }
        Some(100.0 - 100.0 / (1.0 + avg_gain / avg_loss))
    }

    pub fn zone(&self, rsi: f64) -> RsiZone {
        if rsi <= self.oversold {
            RsiZone::Oversold
        } else if rsi >= self.overbought {
            RsiZone::Overbought
        } else {
            RsiZone::Neutral
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_degenerate_parameters() {
        assert!(RsiIndicator::new(1, 70.0, 30.0).is_err());
        assert!(RsiIndicator::new(14, 30.0, 70.0).is_err());
    }

    #[test]
    fn none_until_period_plus_one_prices() {
        let rsi = RsiIndicator::new(14, 70.0, 30.0).unwrap();
        assert!(rsi.compute(&[0.5; 14]).is_none());
        let prices: Vec<f64> = (0..15).map(|i| 0.40 + i as f64 * 0.01).collect();
        assert!(rsi.compute(&prices).is_some());
    }

    #[test]
    fn monotonic_series_hit_the_bounds() {
        let rsi = RsiIndicator::new(3, 70.0, 30.0).unwrap();
        let up = rsi.compute(&[0.10, 0.11, 0.12, 0.13, 0.14]).unwrap();
        let down = rsi.compute(&[0.14, 0.13, 0.12, 0.11, 0.10]).unwrap();
        assert!((up - 100.0).abs() < 1e-9);
        assert!(down.abs() < 1e-9);
        assert_eq!(rsi.zone(up), RsiZone::Overbought);
        assert_eq!(rsi.zone(down), RsiZone::Oversold);
    }

    #[test]
    fn mixed_series_stays_in_range() {
        let rsi = RsiIndicator::new(14, 70.0, 30.0).unwrap();
        let prices = [
            44.34, 44.09, 44.15, 43.61, 44.33, 44.83, 45.10, 45.15, 43.61, 44.33, 44.83, 45.10,
            45.15, 44.34, 44.09,
        ];
        let v = rsi.compute(&prices).unwrap();
        assert!((0.0..=100.0).contains(&v), "RSI out of range: {v}");
        assert_eq!(rsi.zone(50.0), RsiZone::Neutral);
    }
}
