//! Engine core
//!
//! Consumes the ring and owns the order book, the trade flow statistics,
//! and the sync status. Single-writer: this is the only thread that ever
//! mutates book or stats, which is the whole safety argument for keeping
//! them lock-free. Between messages the engine emits rate-limited metrics
//! and yields briefly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::Config;
use crate::feed::ResyncRequest;
use crate::messages::{EngineMessage, EngineSyncState};
use crate::orderbook::OrderBook;
use crate::output::{EngineSink, Telemetry};
use crate::parser::{AggTrade, DepthSnapshot, DepthUpdate};
use crate::ring::Consumer;
use crate::trade::TradeFlow;

/// Idle sleep between empty polls.
const IDLE_SLEEP: Duration = Duration::from_millis(1);

/// The engine thread: dispatches ring messages into the book and stats.
pub struct Engine<S: EngineSink> {
    consumer: Consumer<EngineMessage>,
    book: OrderBook,
    flow: TradeFlow,
    sync_state: EngineSyncState,
    last_processed_id: u64,
    sink: S,
    resync: Arc<ResyncRequest>,
    shutdown: Arc<AtomicBool>,
    telemetry: Arc<Telemetry>,
    emit_interval: Duration,
    last_emit: Instant,
    force_emit: bool,
}

impl<S: EngineSink> Engine<S> {
    pub fn new(
        config: &Config,
        consumer: Consumer<EngineMessage>,
        sink: S,
        resync: Arc<ResyncRequest>,
        shutdown: Arc<AtomicBool>,
        telemetry: Arc<Telemetry>,
    ) -> Self {
        Self {
            consumer,
            book: OrderBook::new(config.output.imbalance_levels),
            flow: TradeFlow::new(config.engine.vwap_window, config.engine.large_trade_std_devs),
            sync_state: EngineSyncState::Initializing,
            last_processed_id: 0,
            sink,
            resync,
            shutdown,
            telemetry,
            emit_interval: config.console_interval(),
            last_emit: Instant::now(),
            force_emit: false,
        }
    }

    /// Run until a Shutdown message or the shutdown flag.
    pub fn run(mut self) {
        info!("Engine thread started");

        while !self.shutdown.load(Ordering::Relaxed) {
            match self.consumer.try_pop() {
                Some(msg) => {
                    if !self.dispatch(msg) {
                        break;
                    }
                }
                None => {
                    self.emit_metrics_if_due();
                    std::thread::sleep(IDLE_SLEEP);
                }
            }
        }

        info!("Engine thread stopped");
    }

    /// Handle one message. Returns false on Shutdown.
    fn dispatch(&mut self, msg: EngineMessage) -> bool {
        match msg {
            EngineMessage::DepthUpdate { update, .. } => self.handle_depth_update(update),
            EngineMessage::AggTrade { trade, .. } => self.handle_agg_trade(trade),
            EngineMessage::Snapshot { snapshot, .. } => self.handle_snapshot(snapshot),
            EngineMessage::ConnectionLost { reason, .. } => {
                warn!(reason = %reason, "Connection lost");
                self.sync_state = EngineSyncState::WaitingSnapshot;
                self.sink.emit_status(false, "disconnected");
            }
            EngineMessage::ConnectionRestored { .. } => {
                info!("Connection restored");
                self.sync_state = EngineSyncState::WaitingSnapshot;
                self.sink.emit_status(true, "connected");
            }
            EngineMessage::SequenceGap { expected, received, .. } => {
                warn!(expected, received, "Sequence gap reported by feed");
                self.begin_resync();
            }
            EngineMessage::Shutdown => {
                info!("Shutdown message received");
                return false;
            }
        }
        true
    }

    fn handle_depth_update(&mut self, update: DepthUpdate) {
        if self.sync_state != EngineSyncState::Synced {
            return;
        }

        if self.last_processed_id > 0
            && self
                .book
                .has_sequence_gap(update.first_update_id, update.prev_final_update_id)
        {
            warn!(
                expected = self.last_processed_id,
                prev = update.prev_final_update_id,
                "Sequence gap detected, resyncing"
            );
            self.telemetry.sequence_gaps.inc();
            self.begin_resync();
            return;
        }

        self.book.apply_update(&update);
        self.last_processed_id = update.final_update_id;
        self.telemetry.depth_updates_applied.inc();
    }

    fn handle_agg_trade(&mut self, trade: AggTrade) {
        if let Some(alert) = self.flow.process_trade(&trade) {
            self.sink.emit_alert(&alert);
        }
        self.telemetry.trades_processed.inc();
    }

    fn handle_snapshot(&mut self, snapshot: DepthSnapshot) {
        info!(
            last_update_id = snapshot.last_update_id,
            bids = snapshot.bids.len(),
            asks = snapshot.asks.len(),
            "Applying snapshot"
        );

        self.book.apply_snapshot(&snapshot);
        self.last_processed_id = snapshot.last_update_id;
        self.sync_state = EngineSyncState::Synced;
        self.telemetry.snapshots_applied.inc();

        self.sink.emit_status(true, "synchronized");
        self.force_emit = true;
        self.emit_metrics_if_due();
    }

    /// Discard the book and ask the transport for a fresh snapshot.
    fn begin_resync(&mut self) {
        self.sync_state = EngineSyncState::WaitingSnapshot;
        self.book.clear();
        self.last_processed_id = 0;
        self.resync.request();
    }

    /// Emit metrics when synced and the interval elapsed (or forced after a
    /// snapshot). No allocation happens unless an emit is actually due.
    fn emit_metrics_if_due(&mut self) {
        if self.sync_state != EngineSyncState::Synced {
            return;
        }
        let now = Instant::now();
        if !self.force_emit && now.duration_since(self.last_emit) < self.emit_interval {
            return;
        }
        self.force_emit = false;
        self.last_emit = now;

        let book = self.book.snapshot();
        let flow = self.flow.current_metrics();
        debug!(last_update_id = book.last_update_id, "Emitting metrics");
        self.sink.emit_metrics(&book, &flow);
    }

    pub fn sync_state(&self) -> EngineSyncState {
        self.sync_state
    }

    pub fn last_processed_id(&self) -> u64 {
        self.last_processed_id
    }
}
