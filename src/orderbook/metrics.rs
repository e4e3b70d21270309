//! Derived order book metrics

use crate::fixed::FixedDecimal;

/// A stored price level
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Level {
    pub price: FixedDecimal,
    pub qty: f64,
}

/// Immutable top-of-book view produced by `OrderBook::snapshot`
#[derive(Debug, Clone, Copy, Default)]
pub struct BookMetrics {
    /// Best bid, if the bid side is non-empty
    pub best_bid: Option<Level>,
    /// Best ask, if the ask side is non-empty
    pub best_ask: Option<Level>,
    /// best_ask - best_bid; zero unless both sides are present
    pub spread: FixedDecimal,
    /// (best_bid + best_ask) / 2; zero unless both sides are present
    pub mid_price: FixedDecimal,
    /// (spread / mid) * 10_000
    pub spread_bps: f64,
    /// Depth-weighted asymmetry over the top K levels, in [-1, 1]
    pub imbalance: f64,
    /// Sequence of the last applied update
    pub last_update_id: u64,
}

impl BookMetrics {
    /// Both sides present and not crossed. A crossed book is reported, not
    /// repaired; recovery happens through resync.
    pub fn is_valid(&self) -> bool {
        match (self.best_bid, self.best_ask) {
            (Some(bid), Some(ask)) => ask.price > bid.price,
            _ => false,
        }
    }
}
