//! Large trade detection

use std::time::Instant;

/// A trade whose size stands out from the rolling distribution
#[derive(Debug, Clone, Copy)]
pub struct TradeAlert {
    pub price: f64,
    pub quantity: f64,
    /// Aggressor side
    pub is_buy: bool,
    /// Standard deviations above the rolling mean size
    pub deviation: f64,
    pub timestamp: Instant,
}

/// Flags trades whose size exceeds the rolling mean by a configured number
/// of standard deviations. Only positive deviations alert.
#[derive(Debug)]
pub struct AlertDetector {
    threshold: f64,
}

impl AlertDetector {
    pub fn new(std_dev_threshold: f64) -> Self {
        Self {
            threshold: std_dev_threshold,
        }
    }

    /// Check one trade against the current rolling statistics.
    pub fn check_trade(
        &self,
        price: f64,
        quantity: f64,
        is_buy: bool,
        rolling_avg: f64,
        rolling_std_dev: f64,
    ) -> Option<TradeAlert> {
        if rolling_std_dev <= 0.0 {
            return None;
        }

        let deviation = (quantity - rolling_avg) / rolling_std_dev;
        if deviation > self.threshold {
            Some(TradeAlert {
                price,
                quantity,
                is_buy,
                deviation,
                timestamp: Instant::now(),
            })
        } else {
            None
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }
}
