//! Trade flow aggregation

use super::{AlertDetector, RollingStats, TradeAlert};
use crate::parser::AggTrade;

/// Aggregated trade flow metrics
#[derive(Debug, Clone, Copy, Default)]
pub struct TradeFlowMetrics {
    pub vwap: f64,
    pub total_buy_volume: f64,
    pub total_sell_volume: f64,
    /// buy volume - sell volume
    pub net_flow: f64,
    pub trade_count: usize,
}

/// Processes aggregated trades: rolling statistics, cumulative aggressor
/// volume split, and large-trade detection.
#[derive(Debug)]
pub struct TradeFlow {
    stats: RollingStats,
    alert_detector: AlertDetector,
    total_buy_volume: f64,
    total_sell_volume: f64,
}

impl TradeFlow {
    pub fn new(vwap_window: usize, large_trade_std_devs: f64) -> Self {
        Self {
            stats: RollingStats::new(vwap_window),
            alert_detector: AlertDetector::new(large_trade_std_devs),
            total_buy_volume: 0.0,
            total_sell_volume: 0.0,
        }
    }

    /// Process one trade. Returns an alert only when this trade fired it.
    pub fn process_trade(&mut self, trade: &AggTrade) -> Option<TradeAlert> {
        self.stats.add_trade(trade.price, trade.quantity);

        let is_buy = trade.is_buy();
        if is_buy {
            self.total_buy_volume += trade.quantity;
        } else {
            self.total_sell_volume += trade.quantity;
        }

        self.alert_detector.check_trade(
            trade.price,
            trade.quantity,
            is_buy,
            self.stats.rolling_avg_size(),
            self.stats.rolling_std_dev(),
        )
    }

    pub fn current_metrics(&self) -> TradeFlowMetrics {
        TradeFlowMetrics {
            vwap: self.stats.vwap(),
            total_buy_volume: self.total_buy_volume,
            total_sell_volume: self.total_sell_volume,
            net_flow: self.total_buy_volume - self.total_sell_volume,
            trade_count: self.stats.trade_count(),
        }
    }

    pub fn reset(&mut self) {
        self.stats.clear();
        self.total_buy_volume = 0.0;
        self.total_sell_volume = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trade(price: f64, qty: f64, is_buyer_maker: bool) -> AggTrade {
        AggTrade {
            event_type: "aggTrade".to_string(),
            event_time: 0,
            symbol: "BTCUSDT".to_string(),
            agg_trade_id: 1,
            price,
            quantity: qty,
            first_trade_id: 1,
            last_trade_id: 1,
            trade_time: 0,
            is_buyer_maker,
        }
    }

    #[test]
    fn test_buy_sell_volume_split() {
        let mut flow = TradeFlow::new(100, 2.0);

        // m = false: taker bought
        flow.process_trade(&trade(42150.0, 1.0, false));
        flow.process_trade(&trade(42151.0, 2.0, true));
        flow.process_trade(&trade(42152.0, 0.5, false));

        let metrics = flow.current_metrics();
        assert_eq!(metrics.total_buy_volume, 1.5);
        assert_eq!(metrics.total_sell_volume, 2.0);
        assert_eq!(metrics.net_flow, -0.5);
        assert_eq!(metrics.trade_count, 3);
    }

    #[test]
    fn test_alert_fires_once_per_outlier() {
        let mut flow = TradeFlow::new(100, 2.0);

        for _ in 0..5 {
            assert!(flow.process_trade(&trade(42150.0, 1.0, false)).is_none());
        }
        // variance is still zero; seed some spread first
        flow.process_trade(&trade(42150.0, 1.2, false));

        let alert = flow
            .process_trade(&trade(42150.0, 100.0, false))
            .expect("outlier should alert");
        assert!(alert.is_buy);
        assert!(alert.deviation > 2.0);

        // the next ordinary trade does not re-emit the old alert
        assert!(flow.process_trade(&trade(42150.0, 1.0, false)).is_none());
    }

    #[test]
    fn test_reset() {
        let mut flow = TradeFlow::new(100, 2.0);
        flow.process_trade(&trade(42150.0, 1.0, false));
        flow.reset();

        let metrics = flow.current_metrics();
        assert_eq!(metrics.trade_count, 0);
        assert_eq!(metrics.vwap, 0.0);
        assert_eq!(metrics.total_buy_volume, 0.0);
    }
}
