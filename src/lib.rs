//! flowbook - Binance USDT-futures market data engine
//!
//! Maintains a synchronized local order book and rolling trade-flow
//! statistics for a single symbol, stitching the REST depth snapshot
//! together with the incremental WebSocket stream. Metrics fan out to the
//! console and a local WebSocket broadcast endpoint.

pub mod backoff;
pub mod config;
pub mod engine;
pub mod error;
pub mod feed;
pub mod fixed;
pub mod messages;
pub mod orderbook;
pub mod output;
pub mod parser;
pub mod ring;
pub mod trade;

pub use config::Config;
pub use engine::Engine;
pub use error::{FeedError, Result};
pub use feed::{FeedManager, ResyncRequest, SyncCoordinator};
pub use fixed::FixedDecimal;
pub use messages::{EngineMessage, EngineSyncState, FeedState, FeedStatus};
pub use orderbook::{BookMetrics, OrderBook};
pub use trade::{RollingStats, TradeFlow};
