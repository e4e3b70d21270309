//! Core order book implementation
//!
//! Two BTreeMaps keyed by exact fixed-point prices. Bids wrap the key in
//! `Reverse` so both sides iterate best-first. The best entry of each side
//! is cached so repeated metric snapshots between mutations stay O(1);
//! BTreeMap cursors cannot be stored across mutations, so the cache holds
//! the key/qty pair and is re-looked-up lazily after invalidation.

use std::cell::Cell;
use std::cmp::Reverse;
use std::collections::BTreeMap;

use super::{BookMetrics, Level};
use crate::fixed::FixedDecimal;
use crate::parser::{DepthSnapshot, DepthUpdate};

/// Order book for a single symbol
#[derive(Debug)]
pub struct OrderBook {
    /// Bids, iterated high-to-low
    bids: BTreeMap<Reverse<FixedDecimal>, f64>,
    /// Asks, iterated low-to-high
    asks: BTreeMap<FixedDecimal, f64>,
    /// Last applied update ID
    last_update_id: u64,
    /// Levels summed per side for the imbalance metric
    imbalance_levels: usize,
    // Cached best entries; valid flags track staleness separately so a
    // cached None (empty side) is also remembered.
    best_bid: Cell<Option<Level>>,
    best_ask: Cell<Option<Level>>,
    best_bid_valid: Cell<bool>,
    best_ask_valid: Cell<bool>,
}

impl OrderBook {
    /// Create an empty book.
    pub fn new(imbalance_levels: usize) -> Self {
        Self {
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            last_update_id: 0,
            imbalance_levels,
            best_bid: Cell::new(None),
            best_ask: Cell::new(None),
            best_bid_valid: Cell::new(false),
            best_ask_valid: Cell::new(false),
        }
    }

    /// Replace the whole book with a snapshot. Levels with non-positive
    /// quantity are not stored.
    pub fn apply_snapshot(&mut self, snapshot: &DepthSnapshot) -> BookMetrics {
        self.bids.clear();
        self.asks.clear();
        self.invalidate_best_caches();

        for level in &snapshot.bids {
            if level.qty > 0.0 {
                self.bids.insert(Reverse(level.price), level.qty);
            }
        }
        for level in &snapshot.asks {
            if level.qty > 0.0 {
                self.asks.insert(level.price, level.qty);
            }
        }

        self.last_update_id = snapshot.last_update_id;
        self.snapshot()
    }

    /// Apply an incremental update: positive quantities upsert, zero
    /// quantities delete. Sequence validation is the caller's job via
    /// `has_sequence_gap`.
    pub fn apply_update(&mut self, update: &DepthUpdate) -> BookMetrics {
        for level in &update.bids {
            if level.qty > 0.0 {
                self.bids.insert(Reverse(level.price), level.qty);
            } else {
                self.bids.remove(&Reverse(level.price));
            }
        }
        for level in &update.asks {
            if level.qty > 0.0 {
                self.asks.insert(level.price, level.qty);
            } else {
                self.asks.remove(&level.price);
            }
        }

        // any upsert may introduce a new best, any delete may remove one
        self.invalidate_best_caches();
        self.last_update_id = update.final_update_id;
        self.snapshot()
    }

    /// Read-only metrics view. Refreshes the best-entry caches lazily, so
    /// back-to-back snapshots without intervening mutations do no map walks.
    pub fn snapshot(&self) -> BookMetrics {
        let best_bid = self.cached_best_bid();
        let best_ask = self.cached_best_ask();

        let mut metrics = BookMetrics {
            best_bid,
            best_ask,
            last_update_id: self.last_update_id,
            imbalance: self.imbalance(),
            ..BookMetrics::default()
        };

        if let (Some(bid), Some(ask)) = (best_bid, best_ask) {
            metrics.spread = ask.price - bid.price;
            metrics.mid_price = (bid.price + ask.price) / FixedDecimal::from_int(2);
            let mid = metrics.mid_price.to_f64();
            if mid > 0.0 {
                metrics.spread_bps = (metrics.spread.to_f64() / mid) * 10_000.0;
            }
        }

        metrics
    }

    /// A gap exists when the update's `pu` does not match the book sequence.
    /// `first_update_id` is accepted for a future stricter check but is not
    /// consulted.
    pub fn has_sequence_gap(&self, _first_update_id: u64, prev_final_update_id: u64) -> bool {
        prev_final_update_id != self.last_update_id
    }

    /// Drop all levels and reset the sequence.
    pub fn clear(&mut self) {
        self.bids.clear();
        self.asks.clear();
        self.last_update_id = 0;
        self.invalidate_best_caches();
    }

    pub fn bid_levels(&self) -> usize {
        self.bids.len()
    }

    pub fn ask_levels(&self) -> usize {
        self.asks.len()
    }

    pub fn last_update_id(&self) -> u64 {
        self.last_update_id
    }

    /// Top `count` levels of the bid side, best first.
    pub fn top_bids(&self, count: usize) -> Vec<Level> {
        self.bids
            .iter()
            .take(count)
            .map(|(Reverse(price), qty)| Level {
                price: *price,
                qty: *qty,
            })
            .collect()
    }

    /// Top `count` levels of the ask side, best first.
    pub fn top_asks(&self, count: usize) -> Vec<Level> {
        self.asks
            .iter()
            .take(count)
            .map(|(price, qty)| Level {
                price: *price,
                qty: *qty,
            })
            .collect()
    }

    fn invalidate_best_caches(&self) {
        self.best_bid_valid.set(false);
        self.best_ask_valid.set(false);
    }

    fn cached_best_bid(&self) -> Option<Level> {
        if !self.best_bid_valid.get() {
            let best = self.bids.iter().next().map(|(Reverse(price), qty)| Level {
                price: *price,
                qty: *qty,
            });
            self.best_bid.set(best);
            self.best_bid_valid.set(true);
        }
        self.best_bid.get()
    }

    fn cached_best_ask(&self) -> Option<Level> {
        if !self.best_ask_valid.get() {
            let best = self.asks.iter().next().map(|(price, qty)| Level {
                price: *price,
                qty: *qty,
            });
            self.best_ask.set(best);
            self.best_ask_valid.set(true);
        }
        self.best_ask.get()
    }

    /// (B - A) / (B + A) over the top `imbalance_levels` quantities per
    /// side; zero when both sums are zero. Positive means bid-heavy.
    fn imbalance(&self) -> f64 {
        let bid_volume: f64 = self.bids.values().take(self.imbalance_levels).sum();
        let ask_volume: f64 = self.asks.values().take(self.imbalance_levels).sum();

        let total = bid_volume + ask_volume;
        if total > 0.0 {
            (bid_volume - ask_volume) / total
        } else {
            0.0
        }
    }
}
