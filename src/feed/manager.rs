//! Transport thread
//!
//! Owns the venue session end to end: the single-threaded reactor, the
//! WebSocket client, the sync coordinator, the backoff policy, and the
//! producer end of the engine ring. Everything here runs on one thread;
//! the engine thread never touches any of it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

use super::client::WebSocketClient;
use super::rest::fetch_depth_snapshot;
use super::sync::{SnapshotOutcome, SyncCoordinator, UpdateOutcome};
use crate::backoff::BackoffPolicy;
use crate::config::Config;
use crate::error::Result;
use crate::messages::{EngineMessage, FeedStatus};
use crate::output::Telemetry;
use crate::parser::{DepthSnapshot, ParsedMessage};
use crate::ring::Producer;

/// How often the session loop services the resync flag and shutdown checks.
const SERVICE_INTERVAL: Duration = Duration::from_millis(100);

/// Engine-to-transport resync signal. The engine flips it on a detected
/// gap; the transport takes it on its next service tick.
#[derive(Debug, Default)]
pub struct ResyncRequest(AtomicBool);

impl ResyncRequest {
    pub fn new() -> Self {
        Self(AtomicBool::new(false))
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Consume a pending request. Transport side only.
    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }
}

/// Runs the venue-facing side on the calling thread.
pub struct FeedManager {
    config: Arc<Config>,
    producer: Producer<EngineMessage>,
    coordinator: SyncCoordinator,
    backoff: BackoffPolicy,
    resync: Arc<ResyncRequest>,
    shutdown: Arc<AtomicBool>,
    status: Arc<FeedStatus>,
    telemetry: Arc<Telemetry>,
    http: reqwest::Client,
}

impl FeedManager {
    pub fn new(
        config: Arc<Config>,
        producer: Producer<EngineMessage>,
        resync: Arc<ResyncRequest>,
        shutdown: Arc<AtomicBool>,
        status: Arc<FeedStatus>,
        telemetry: Arc<Telemetry>,
    ) -> Self {
        let backoff = BackoffPolicy::new(
            config.reconnect_delay_initial(),
            config.reconnect_delay_max(),
            config.network.reconnect_backoff_multiplier,
            config.network.reconnect_jitter_factor,
        );

        Self {
            config,
            producer,
            coordinator: SyncCoordinator::new(),
            backoff,
            resync,
            shutdown,
            status,
            telemetry,
            http: reqwest::Client::new(),
        }
    }

    /// Run until shutdown. Blocks the calling thread on a current-thread
    /// reactor; all suspension happens inside it.
    pub fn run(mut self) {
        let rt = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(rt) => rt,
            Err(e) => {
                error!(error = %e, "Transport runtime failed to start");
                self.shutdown.store(true, Ordering::SeqCst);
                let _ = self.producer.try_push(EngineMessage::Shutdown);
                return;
            }
        };

        rt.block_on(async {
            while !self.shutdown.load(Ordering::Relaxed) {
                self.coordinator.start_connecting();
                self.publish_state();

                match self.run_session().await {
                    Ok(()) => break, // clean shutdown
                    Err(e) => {
                        warn!(error = %e, "Feed session ended");
                        self.push(EngineMessage::ConnectionLost {
                            reason: e.to_string(),
                            occurred_at: Instant::now(),
                        });
                        self.coordinator.on_disconnected();
                        self.publish_state();
                        self.telemetry.reconnects.inc();

                        let delay = self.backoff.next_delay();
                        info!(
                            delay_ms = delay.as_millis() as u64,
                            attempt = self.backoff.attempt_count(),
                            "Reconnecting after backoff"
                        );
                        self.sleep_interruptible(delay).await;
                    }
                }
            }

            self.coordinator.stop();
            self.publish_state();
        });

        // the engine also watches the shutdown flag, so a full ring cannot
        // wedge teardown
        if self.producer.try_push(EngineMessage::Shutdown).is_err() {
            debug!("Ring full at shutdown, engine exits via flag");
        }
        info!("Transport thread stopped");
    }

    /// One connection lifecycle: connect, sync, stream until error or
    /// shutdown. `Ok` means shutdown was requested.
    async fn run_session(&mut self) -> Result<()> {
        let mut client = WebSocketClient::new(&self.config);
        client.connect().await?;
        self.backoff.reset();

        self.push(EngineMessage::ConnectionRestored {
            occurred_at: Instant::now(),
        });

        // per-session snapshot channel; results from a torn-down session
        // die with their channel
        let (snap_tx, mut snap_rx) = mpsc::unbounded_channel();

        if self.coordinator.on_connected() {
            self.spawn_snapshot_fetch(snap_tx.clone());
        }
        self.publish_state();

        let mut service = tokio::time::interval(SERVICE_INTERVAL);
        service.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                frame = client.recv() => {
                    match frame {
                        Ok(Some(text)) => self.process_frame(&text, &snap_tx),
                        Ok(None) => {}
                        Err(e) => {
                            client.close().await;
                            return Err(e);
                        }
                    }
                }
                result = snap_rx.recv() => {
                    // a sender clone lives in this scope, so recv cannot
                    // yield None while the session runs
                    if let Some(result) = result {
                        if let Err(e) = self.handle_snapshot_result(result, &snap_tx) {
                            client.close().await;
                            return Err(e);
                        }
                    }
                }
                _ = service.tick() => {
                    if self.shutdown.load(Ordering::Relaxed) {
                        info!("Shutdown requested, closing session");
                        client.close().await;
                        return Ok(());
                    }
                    if self.resync.take() && self.coordinator.request_resync() {
                        self.publish_state();
                        self.spawn_snapshot_fetch(snap_tx.clone());
                    }
                }
            }
        }
    }

    /// Decode one frame and route it through the coordinator.
    fn process_frame(
        &mut self,
        text: &str,
        snap_tx: &mpsc::UnboundedSender<std::result::Result<DepthSnapshot, String>>,
    ) {
        self.telemetry.ws_messages.inc();
        let received_at = Instant::now();

        let parsed = match ParsedMessage::parse(text) {
            Ok(parsed) => parsed,
            Err(e) => {
                // a bad frame costs the frame, not the session
                self.telemetry.parse_errors.inc();
                warn!(error = %e, "Dropping undecodable frame");
                return;
            }
        };

        match parsed {
            ParsedMessage::DepthUpdate(update) => {
                match self.coordinator.on_depth_update(update) {
                    UpdateOutcome::Buffered | UpdateOutcome::Discarded => {}
                    UpdateOutcome::Forward(update) => {
                        self.push(EngineMessage::DepthUpdate {
                            update,
                            received_at,
                        });
                    }
                    UpdateOutcome::Resync { expected, received } => {
                        self.telemetry.sequence_gaps.inc();
                        self.push(EngineMessage::SequenceGap {
                            expected,
                            received,
                            detected_at: received_at,
                        });
                        if self.coordinator.begin_snapshot_fetch() {
                            self.spawn_snapshot_fetch(snap_tx.clone());
                        }
                    }
                }
                self.publish_state();
            }
            ParsedMessage::AggTrade(trade) => {
                // trades bypass the sync machine entirely
                self.push(EngineMessage::AggTrade { trade, received_at });
            }
            ParsedMessage::Unknown(stream) => {
                trace!(stream = %stream, "Ignoring unknown stream");
            }
        }
    }

    /// Apply a snapshot fetch result to the coordinator. A failed fetch
    /// tears the session down so the backoff policy paces the retry.
    fn handle_snapshot_result(
        &mut self,
        result: std::result::Result<DepthSnapshot, String>,
        snap_tx: &mpsc::UnboundedSender<std::result::Result<DepthSnapshot, String>>,
    ) -> Result<()> {
        let snapshot = match result {
            Ok(snapshot) => snapshot,
            Err(e) => {
                error!(error = %e, "Snapshot fetch failed");
                self.coordinator.on_snapshot_error();
                return Err(crate::error::FeedError::SnapshotError(e));
            }
        };

        match self.coordinator.on_snapshot(snapshot.last_update_id) {
            SnapshotOutcome::Replay(replay) => {
                let received_at = Instant::now();
                self.push(EngineMessage::Snapshot {
                    snapshot,
                    received_at,
                });
                for update in replay {
                    self.push(EngineMessage::DepthUpdate {
                        update,
                        received_at,
                    });
                }
            }
            SnapshotOutcome::AwaitBridge => {
                self.push(EngineMessage::Snapshot {
                    snapshot,
                    received_at: Instant::now(),
                });
            }
            SnapshotOutcome::Resync => {
                if self.coordinator.begin_snapshot_fetch() {
                    self.spawn_snapshot_fetch(snap_tx.clone());
                }
            }
        }
        self.publish_state();
        Ok(())
    }

    /// Issue the REST fetch as a task on this thread's reactor.
    fn spawn_snapshot_fetch(
        &self,
        snap_tx: mpsc::UnboundedSender<std::result::Result<DepthSnapshot, String>>,
    ) {
        let http = self.http.clone();
        let config = Arc::clone(&self.config);
        tokio::spawn(async move {
            let result = fetch_depth_snapshot(&http, &config).await;
            let _ = snap_tx.send(result);
        });
    }

    /// Push to the ring; on a full ring the message is dropped and counted.
    /// Dropped depth updates surface as a sequence gap and resync.
    fn push(&mut self, msg: EngineMessage) {
        if let Err(dropped) = self.producer.try_push(msg) {
            self.telemetry.ring_dropped.inc();
            warn!(kind = dropped.kind(), "Engine ring full, dropping message");
        }
    }

    fn publish_state(&self) {
        self.status.set_state(self.coordinator.state());
    }

    async fn sleep_interruptible(&self, delay: Duration) {
        let deadline = Instant::now() + delay;
        while Instant::now() < deadline {
            if self.shutdown.load(Ordering::Relaxed) {
                return;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            tokio::time::sleep(remaining.min(SERVICE_INTERVAL)).await;
        }
    }
}
