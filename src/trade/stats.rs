//! Rolling VWAP and trade-size statistics
//!
//! A count-bounded window of `(price, qty)` pairs with running sums for
//! VWAP and Welford's online recurrence for the mean and variance of trade
//! sizes. Removal runs the recurrence backwards; that is exact over the
//! reals but accumulates floating error, so M2 is clamped at zero and the
//! whole state resets when the window empties.

use std::collections::VecDeque;

/// Rolling trade window statistics
#[derive(Debug)]
pub struct RollingStats {
    trades: VecDeque<(f64, f64)>,
    window_size: usize,

    /// Running sum of price * qty
    sum_pq: f64,
    /// Running sum of qty
    sum_q: f64,

    // Welford state over quantities
    mean: f64,
    m2: f64,
    count: usize,
}

impl RollingStats {
    pub fn new(window_size: usize) -> Self {
        Self {
            trades: VecDeque::with_capacity(window_size + 1),
            window_size,
            sum_pq: 0.0,
            sum_q: 0.0,
            mean: 0.0,
            m2: 0.0,
            count: 0,
        }
    }

    /// Add a trade, evicting the oldest when the window overflows.
    /// Returns the updated VWAP.
    pub fn add_trade(&mut self, price: f64, qty: f64) -> f64 {
        self.trades.push_back((price, qty));
        self.sum_pq += price * qty;
        self.sum_q += qty;

        self.count += 1;
        let delta = qty - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (qty - self.mean);

        if self.trades.len() > self.window_size {
            if let Some((old_price, old_qty)) = self.trades.pop_front() {
                self.sum_pq -= old_price * old_qty;
                self.sum_q -= old_qty;
                self.remove_from_welford(old_qty);
            }
        }

        self.vwap()
    }

    fn remove_from_welford(&mut self, old_qty: f64) {
        let delta_old = old_qty - self.mean;
        self.count -= 1;

        if self.count > 0 {
            self.mean = (self.mean * (self.count as f64 + 1.0) - old_qty) / self.count as f64;
            self.m2 -= delta_old * (old_qty - self.mean);
            if self.m2 < 0.0 {
                self.m2 = 0.0;
            }
        } else {
            self.mean = 0.0;
            self.m2 = 0.0;
        }
    }

    /// Volume-weighted average price over the window; zero when empty.
    pub fn vwap(&self) -> f64 {
        if self.sum_q > 0.0 {
            self.sum_pq / self.sum_q
        } else {
            0.0
        }
    }

    /// Total traded quantity in the window.
    pub fn total_volume(&self) -> f64 {
        self.sum_q
    }

    /// Number of trades currently in the window.
    pub fn trade_count(&self) -> usize {
        self.trades.len()
    }

    /// Mean trade size; zero when empty.
    pub fn rolling_avg_size(&self) -> f64 {
        if self.count > 0 {
            self.mean
        } else {
            0.0
        }
    }

    /// Population standard deviation of trade sizes; zero below two samples.
    pub fn rolling_std_dev(&self) -> f64 {
        if self.count >= 2 {
            (self.m2 / self.count as f64).sqrt()
        } else {
            0.0
        }
    }

    pub fn clear(&mut self) {
        self.trades.clear();
        self.sum_pq = 0.0;
        self.sum_q = 0.0;
        self.mean = 0.0;
        self.m2 = 0.0;
        self.count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_trade() {
        let mut stats = RollingStats::new(100);
        let vwap = stats.add_trade(42150.0, 1.0);

        assert_eq!(vwap, 42150.0);
        assert_eq!(stats.total_volume(), 1.0);
        assert_eq!(stats.trade_count(), 1);
    }

    #[test]
    fn test_vwap_weights_by_quantity() {
        let mut stats = RollingStats::new(100);
        stats.add_trade(42150.0, 1.0);
        let vwap = stats.add_trade(42160.0, 2.0);

        // (42150*1 + 42160*2) / 3
        assert!((vwap - 42156.666_666_67).abs() < 1e-6);
        assert_eq!(stats.total_volume(), 3.0);
    }

    #[test]
    fn test_window_slides() {
        let mut stats = RollingStats::new(3);

        stats.add_trade(100.0, 1.0);
        stats.add_trade(200.0, 1.0);
        stats.add_trade(300.0, 1.0);
        assert_eq!(stats.vwap(), 200.0);

        let vwap = stats.add_trade(400.0, 1.0);
        assert_eq!(vwap, 300.0);
        assert_eq!(stats.trade_count(), 3);
        assert_eq!(stats.total_volume(), 3.0);
        assert_eq!(stats.rolling_avg_size(), 1.0);
        assert_eq!(stats.rolling_std_dev(), 0.0);
    }

    #[test]
    fn test_welford_mean_and_std_dev() {
        let mut stats = RollingStats::new(100);
        stats.add_trade(100.0, 1.0);
        stats.add_trade(100.0, 2.0);
        stats.add_trade(100.0, 3.0);

        assert!((stats.rolling_avg_size() - 2.0).abs() < 1e-12);
        // population variance of {1,2,3} = 2/3
        assert!((stats.rolling_std_dev() - (2.0f64 / 3.0).sqrt()).abs() < 1e-9);
    }

    #[test]
    fn test_welford_removal_matches_direct_computation() {
        let mut stats = RollingStats::new(4);
        let quantities = [1.0, 5.0, 2.0, 8.0, 3.0, 9.0, 4.0];
        for q in quantities {
            stats.add_trade(100.0, q);
        }

        // window now holds the last four quantities
        let window = &quantities[3..];
        let mean: f64 = window.iter().sum::<f64>() / window.len() as f64;
        let var: f64 =
            window.iter().map(|q| (q - mean) * (q - mean)).sum::<f64>() / window.len() as f64;

        assert!((stats.rolling_avg_size() - mean).abs() < 1e-9);
        assert!((stats.rolling_std_dev() - var.sqrt()).abs() < 1e-9);
    }

    #[test]
    fn test_empty_stats_are_zero() {
        let stats = RollingStats::new(10);
        assert_eq!(stats.vwap(), 0.0);
        assert_eq!(stats.total_volume(), 0.0);
        assert_eq!(stats.trade_count(), 0);
        assert_eq!(stats.rolling_avg_size(), 0.0);
        assert_eq!(stats.rolling_std_dev(), 0.0);
    }

    #[test]
    fn test_std_dev_needs_two_samples() {
        let mut stats = RollingStats::new(10);
        stats.add_trade(100.0, 5.0);
        assert_eq!(stats.rolling_std_dev(), 0.0);
        stats.add_trade(100.0, 7.0);
        assert!(stats.rolling_std_dev() > 0.0);
    }

    #[test]
    fn test_clear() {
        let mut stats = RollingStats::new(10);
        stats.add_trade(100.0, 1.0);
        stats.add_trade(200.0, 2.0);
        stats.clear();

        assert_eq!(stats.trade_count(), 0);
        assert_eq!(stats.vwap(), 0.0);
        assert_eq!(stats.rolling_avg_size(), 0.0);
    }

    #[test]
    fn test_window_of_one_resets_welford() {
        let mut stats = RollingStats::new(1);
        stats.add_trade(100.0, 4.0);
        stats.add_trade(200.0, 6.0);

        assert_eq!(stats.trade_count(), 1);
        assert_eq!(stats.vwap(), 200.0);
        assert!((stats.rolling_avg_size() - 6.0).abs() < 1e-9);
        assert_eq!(stats.rolling_std_dev(), 0.0);
    }
}
