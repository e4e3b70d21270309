//! Output sinks: console rendering, local WebSocket broadcast, and the
//! health/metrics HTTP surface.

mod broadcast;
mod console;
pub mod json;
mod telemetry;

pub use broadcast::{BroadcastHandle, BroadcastServer};
pub use console::ConsoleSink;
pub use telemetry::Telemetry;

use crate::orderbook::BookMetrics;
use crate::trade::{TradeAlert, TradeFlowMetrics};

/// Where the engine sends its output. Implementations must not block; the
/// engine thread calls these between ring pops.
pub trait EngineSink {
    fn emit_metrics(&mut self, book: &BookMetrics, flow: &TradeFlowMetrics);
    fn emit_alert(&mut self, alert: &TradeAlert);
    fn emit_status(&mut self, connected: bool, state: &str);
}

/// Production sink: console plus broadcast fan-out.
pub struct OutputSink {
    console: ConsoleSink,
    broadcast: BroadcastHandle,
}

impl OutputSink {
    pub fn new(console: ConsoleSink, broadcast: BroadcastHandle) -> Self {
        Self { console, broadcast }
    }
}

impl EngineSink for OutputSink {
    fn emit_metrics(&mut self, book: &BookMetrics, flow: &TradeFlowMetrics) {
        self.console.log_metrics(book, flow);
        self.broadcast.broadcast(json::format_metrics(book, flow));
    }

    fn emit_alert(&mut self, alert: &TradeAlert) {
        self.console.log_alert(alert);
        self.broadcast.broadcast(json::format_alert(alert));
    }

    fn emit_status(&mut self, connected: bool, state: &str) {
        self.console.log_connection_status(connected, state);
        self.broadcast.broadcast(json::format_status(connected, state));
    }
}
