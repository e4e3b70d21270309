//! JSON payloads for the broadcast endpoint

use chrono::{SecondsFormat, Utc};
use serde_json::{json, Value};

use crate::orderbook::BookMetrics;
use crate::trade::{TradeAlert, TradeFlowMetrics};

/// Current wall-clock time as ISO-8601 with millisecond precision.
pub fn iso_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Book + trade metrics payload.
pub fn format_metrics(book: &BookMetrics, flow: &TradeFlowMetrics) -> Value {
    let (best_bid, best_bid_qty) = match book.best_bid {
        Some(level) => (level.price.to_f64(), level.qty),
        None => (0.0, 0.0),
    };
    let (best_ask, best_ask_qty) = match book.best_ask {
        Some(level) => (level.price.to_f64(), level.qty),
        None => (0.0, 0.0),
    };

    json!({
        "type": "metrics",
        "timestamp": iso_timestamp(),
        "book": {
            "bestBid": best_bid,
            "bestBidQty": best_bid_qty,
            "bestAsk": best_ask,
            "bestAskQty": best_ask_qty,
            "spread": book.spread.to_f64(),
            "spreadBps": book.spread_bps,
            "midPrice": book.mid_price.to_f64(),
            "imbalance": book.imbalance,
            "lastUpdateId": book.last_update_id,
        },
        "trade": {
            "vwap": flow.vwap,
            "buyVolume": flow.total_buy_volume,
            "sellVolume": flow.total_sell_volume,
            "netFlow": flow.net_flow,
            "tradeCount": flow.trade_count,
        },
    })
}

/// Large-trade alert payload.
pub fn format_alert(alert: &TradeAlert) -> Value {
    json!({
        "type": "alert",
        "timestamp": iso_timestamp(),
        "side": if alert.is_buy { "BUY" } else { "SELL" },
        "price": alert.price,
        "quantity": alert.quantity,
        "deviation": alert.deviation,
    })
}

/// Connection status payload.
pub fn format_status(connected: bool, state: &str) -> Value {
    json!({
        "type": "status",
        "timestamp": iso_timestamp(),
        "connected": connected,
        "state": state,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orderbook::Level;
    use std::time::Instant;

    #[test]
    fn test_metrics_payload_shape() {
        let book = BookMetrics {
            best_bid: Some(Level {
                price: "42150.50".parse().unwrap(),
                qty: 1.5,
            }),
            best_ask: Some(Level {
                price: "42151.00".parse().unwrap(),
                qty: 1.0,
            }),
            spread: "0.5".parse().unwrap(),
            mid_price: "42150.75".parse().unwrap(),
            spread_bps: 0.1186,
            imbalance: 0.25,
            last_update_id: 1000,
        };
        let flow = TradeFlowMetrics {
            vwap: 42150.1,
            total_buy_volume: 3.0,
            total_sell_volume: 1.0,
            net_flow: 2.0,
            trade_count: 7,
        };

        let payload = format_metrics(&book, &flow);
        assert_eq!(payload["type"], "metrics");
        assert_eq!(payload["book"]["bestBid"], 42150.5);
        assert_eq!(payload["book"]["bestAskQty"], 1.0);
        assert_eq!(payload["book"]["lastUpdateId"], 1000);
        assert_eq!(payload["trade"]["netFlow"], 2.0);
        assert_eq!(payload["trade"]["tradeCount"], 7);
        assert!(payload["timestamp"].as_str().unwrap().ends_with('Z'));
    }

    #[test]
    fn test_metrics_payload_empty_book() {
        let payload = format_metrics(&BookMetrics::default(), &TradeFlowMetrics::default());
        assert_eq!(payload["book"]["bestBid"], 0.0);
        assert_eq!(payload["book"]["spread"], 0.0);
    }

    #[test]
    fn test_alert_payload_sides() {
        let mut alert = TradeAlert {
            price: 42150.0,
            quantity: 100.0,
            is_buy: true,
            deviation: 3.2,
            timestamp: Instant::now(),
        };
        assert_eq!(format_alert(&alert)["side"], "BUY");
        alert.is_buy = false;
        assert_eq!(format_alert(&alert)["side"], "SELL");
    }

    #[test]
    fn test_status_payload() {
        let payload = format_status(false, "reconnecting");
        assert_eq!(payload["type"], "status");
        assert_eq!(payload["connected"], false);
        assert_eq!(payload["state"], "reconnecting");
    }
}
