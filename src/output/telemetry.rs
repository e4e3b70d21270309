//! Process counters exposed on the /metrics endpoint

use prometheus::{IntCounter, IntGauge, Registry};

/// Prometheus counters shared across the transport and engine threads.
/// Incrementing is a relaxed atomic add, cheap enough for the hot path.
pub struct Telemetry {
    registry: Registry,
    pub ws_messages: IntCounter,
    pub parse_errors: IntCounter,
    pub ring_dropped: IntCounter,
    pub reconnects: IntCounter,
    pub sequence_gaps: IntCounter,
    pub snapshots_applied: IntCounter,
    pub depth_updates_applied: IntCounter,
    pub trades_processed: IntCounter,
    pub broadcast_clients: IntGauge,
}

impl Telemetry {
    pub fn new() -> Self {
        let registry = Registry::new();

        let ws_messages =
            IntCounter::new("flowbook_ws_messages_total", "WebSocket frames received").unwrap();
        let parse_errors =
            IntCounter::new("flowbook_parse_errors_total", "Frames that failed to decode").unwrap();
        let ring_dropped = IntCounter::new(
            "flowbook_ring_dropped_total",
            "Messages dropped because the engine ring was full",
        )
        .unwrap();
        let reconnects =
            IntCounter::new("flowbook_reconnects_total", "Feed reconnection attempts").unwrap();
        let sequence_gaps =
            IntCounter::new("flowbook_sequence_gaps_total", "Detected sequence gaps").unwrap();
        let snapshots_applied =
            IntCounter::new("flowbook_snapshots_applied_total", "Depth snapshots applied").unwrap();
        let depth_updates_applied = IntCounter::new(
            "flowbook_depth_updates_applied_total",
            "Incremental depth updates applied to the book",
        )
        .unwrap();
        let trades_processed =
            IntCounter::new("flowbook_trades_processed_total", "Aggregated trades processed")
                .unwrap();
        let broadcast_clients = IntGauge::new(
            "flowbook_broadcast_clients",
            "Connected broadcast WebSocket clients",
        )
        .unwrap();

        for collector in [
            &ws_messages,
            &parse_errors,
            &ring_dropped,
            &reconnects,
            &sequence_gaps,
            &snapshots_applied,
            &depth_updates_applied,
            &trades_processed,
        ] {
            registry.register(Box::new(collector.clone())).unwrap();
        }
        registry
            .register(Box::new(broadcast_clients.clone()))
            .unwrap();

        Self {
            registry,
            ws_messages,
            parse_errors,
            ring_dropped,
            reconnects,
            sequence_gaps,
            snapshots_applied,
            depth_updates_applied,
            trades_processed,
            broadcast_clients,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl Default for Telemetry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_register_and_increment() {
        let telemetry = Telemetry::new();
        telemetry.ws_messages.inc();
        telemetry.ws_messages.inc();
        telemetry.broadcast_clients.set(3);

        assert_eq!(telemetry.ws_messages.get(), 2);
        assert_eq!(telemetry.broadcast_clients.get(), 3);
        assert!(!telemetry.registry().gather().is_empty());
    }
}
