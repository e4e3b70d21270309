//! Console sink
//!
//! Human-readable rendering of metrics, alerts, and connection status.
//! Emission cadence is the engine's responsibility; this sink renders
//! whatever it is handed.

use tracing::{info, warn};

use crate::orderbook::BookMetrics;
use crate::trade::{TradeAlert, TradeFlowMetrics};

/// Writes market state to the console via the tracing pipeline.
#[derive(Debug, Default)]
pub struct ConsoleSink;

impl ConsoleSink {
    pub fn new() -> Self {
        Self
    }

    pub fn log_metrics(&self, book: &BookMetrics, flow: &TradeFlowMetrics) {
        match (book.best_bid, book.best_ask) {
            (Some(bid), Some(ask)) => {
                info!(
                    bid = %bid.price,
                    bid_qty = bid.qty,
                    ask = %ask.price,
                    ask_qty = ask.qty,
                    spread = %book.spread,
                    spread_bps = book.spread_bps,
                    imbalance = book.imbalance,
                    vwap = flow.vwap,
                    net_flow = flow.net_flow,
                    trades = flow.trade_count,
                    crossed = !book.is_valid(),
                    "book"
                );
            }
            _ => {
                info!(
                    bid_side_empty = book.best_bid.is_none(),
                    ask_side_empty = book.best_ask.is_none(),
                    "book one-sided or empty"
                );
            }
        }
    }

    pub fn log_alert(&self, alert: &TradeAlert) {
        warn!(
            side = if alert.is_buy { "BUY" } else { "SELL" },
            price = alert.price,
            qty = alert.quantity,
            deviation = alert.deviation,
            "large trade"
        );
    }

    pub fn log_connection_status(&self, connected: bool, state: &str) {
        if connected {
            info!(state, "feed connected");
        } else {
            warn!(state, "feed disconnected");
        }
    }
}
