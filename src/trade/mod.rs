//! Trade flow analytics
//!
//! Rolling VWAP and trade-size statistics over the aggregated trade stream,
//! plus large-trade alerting.

mod alert;
mod flow;
mod stats;

pub use alert::{AlertDetector, TradeAlert};
pub use flow::{TradeFlow, TradeFlowMetrics};
pub use stats::RollingStats;
