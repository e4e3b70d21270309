//! Feed synchronization state machine
//!
//! Stitches the REST depth snapshot together with the incremental stream:
//! updates arriving before the snapshot are buffered, the bridging update
//! (`U <= lastUpdateId + 1 <= u`) reconciles the two, and anything that
//! breaks the sequence forces a fresh snapshot. A single-flight flag keeps
//! rapid gap detection from fanning out duplicate snapshot requests.

use tracing::{debug, info, warn};

use crate::messages::FeedState;
use crate::parser::DepthUpdate;

/// What to do with one incoming depth update
#[derive(Debug)]
pub enum UpdateOutcome {
    /// Buffered until the snapshot arrives
    Buffered,
    /// Forward to the engine
    Forward(DepthUpdate),
    /// Stale or out-of-state; drop silently
    Discarded,
    /// Sequence cannot be bridged; a fresh snapshot fetch is required
    Resync { expected: u64, received: u64 },
}

/// Result of applying a snapshot to the buffered stream
#[derive(Debug)]
pub enum SnapshotOutcome {
    /// Bridge located: replay these updates after the snapshot, in order
    Replay(Vec<DepthUpdate>),
    /// Nothing buffered; stay in Syncing and bridge on the next stream update
    AwaitBridge,
    /// No bridge in the buffer; a fresh snapshot fetch is required
    Resync,
}

/// Owns the feed state, the pre-snapshot buffer, and the single-flight
/// snapshot guard. Pure state: all I/O is driven by the feed manager.
#[derive(Debug)]
pub struct SyncCoordinator {
    state: FeedState,
    buffered: Vec<DepthUpdate>,
    snapshot_last_id: u64,
    snapshot_in_flight: bool,
}

impl Default for SyncCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncCoordinator {
    pub fn new() -> Self {
        Self {
            state: FeedState::Disconnected,
            buffered: Vec::new(),
            snapshot_last_id: 0,
            snapshot_in_flight: false,
        }
    }

    pub fn state(&self) -> FeedState {
        self.state
    }

    pub fn buffered_len(&self) -> usize {
        self.buffered.len()
    }

    /// Transport starting a connection attempt.
    pub fn start_connecting(&mut self) {
        self.set_state(FeedState::Connecting);
    }

    /// Transport is up. Clears the buffer and claims the snapshot fetch.
    /// Returns true when the caller should issue the fetch.
    pub fn on_connected(&mut self) -> bool {
        self.set_state(FeedState::WaitingSnapshot);
        self.buffered.clear();
        self.begin_snapshot_fetch()
    }

    /// Transport lost. Buffered updates and any pending fetch are void.
    pub fn on_disconnected(&mut self) {
        self.set_state(FeedState::Reconnecting);
        self.buffered.clear();
        self.snapshot_in_flight = false;
    }

    /// Orderly stop.
    pub fn stop(&mut self) {
        self.set_state(FeedState::Disconnected);
        self.buffered.clear();
        self.snapshot_in_flight = false;
    }

    /// Engine-side gap recovery: drop back to WaitingSnapshot and claim a
    /// fetch. Returns false when a fetch is already in flight.
    pub fn request_resync(&mut self) -> bool {
        if self.snapshot_in_flight {
            debug!("Snapshot fetch already in flight, resync request ignored");
            return false;
        }
        info!("Resync requested, refetching snapshot");
        self.set_state(FeedState::WaitingSnapshot);
        self.buffered.clear();
        self.snapshot_in_flight = true;
        true
    }

    /// Claim the single-flight snapshot fetch slot.
    pub fn begin_snapshot_fetch(&mut self) -> bool {
        if self.snapshot_in_flight {
            return false;
        }
        self.snapshot_in_flight = true;
        true
    }

    /// The snapshot fetch failed; the slot is free again.
    pub fn on_snapshot_error(&mut self) {
        self.snapshot_in_flight = false;
    }

    /// Route one incoming depth update according to the current state.
    pub fn on_depth_update(&mut self, update: DepthUpdate) -> UpdateOutcome {
        match self.state {
            FeedState::WaitingSnapshot => {
                debug!(u = update.final_update_id, "Buffered depth update");
                self.buffered.push(update);
                UpdateOutcome::Buffered
            }
            FeedState::Syncing => self.try_bridge_streaming(update),
            FeedState::Live => UpdateOutcome::Forward(update),
            _ => UpdateOutcome::Discarded,
        }
    }

    /// Snapshot arrived: run the bridging algorithm over the buffer.
    ///
    /// Caller contract: on `Replay`, forward the snapshot first, then the
    /// returned updates in order. On `Resync`, claim a fetch with
    /// `begin_snapshot_fetch` and try again.
    pub fn on_snapshot(&mut self, last_update_id: u64) -> SnapshotOutcome {
        self.snapshot_in_flight = false;
        self.snapshot_last_id = last_update_id;
        self.set_state(FeedState::Syncing);

        let buffered = std::mem::take(&mut self.buffered);
        let was_empty = buffered.is_empty();

        info!(
            last_update_id,
            buffered = buffered.len(),
            "Snapshot received, bridging buffered updates"
        );

        let mut replay = Vec::new();
        let mut bridged = false;

        for update in buffered {
            if bridged {
                replay.push(update);
                continue;
            }
            if update.final_update_id <= last_update_id {
                // predates the snapshot
                continue;
            }
            if update.first_update_id <= last_update_id + 1 {
                debug!(
                    first = update.first_update_id,
                    last = update.final_update_id,
                    "Bridging update found"
                );
                bridged = true;
                replay.push(update);
            } else {
                warn!(
                    snapshot = last_update_id,
                    first = update.first_update_id,
                    "Buffered stream starts past the snapshot, refetching"
                );
                self.set_state(FeedState::WaitingSnapshot);
                return SnapshotOutcome::Resync;
            }
        }

        if bridged {
            self.set_state(FeedState::Live);
            SnapshotOutcome::Replay(replay)
        } else if was_empty {
            // nothing buffered yet; the next streaming update should bridge
            SnapshotOutcome::AwaitBridge
        } else {
            warn!("No bridging update in buffer, refetching snapshot");
            self.set_state(FeedState::WaitingSnapshot);
            SnapshotOutcome::Resync
        }
    }

    /// Bridging check for streaming updates that arrive while Syncing with
    /// an empty buffer.
    fn try_bridge_streaming(&mut self, update: DepthUpdate) -> UpdateOutcome {
        let last = self.snapshot_last_id;

        if update.final_update_id <= last {
            return UpdateOutcome::Discarded;
        }
        if update.first_update_id <= last + 1 {
            debug!(
                first = update.first_update_id,
                last = update.final_update_id,
                "Bridged on streaming update"
            );
            self.set_state(FeedState::Live);
            return UpdateOutcome::Forward(update);
        }

        warn!(
            snapshot = last,
            first = update.first_update_id,
            "Stream starts past the snapshot, refetching"
        );
        self.set_state(FeedState::WaitingSnapshot);
        UpdateOutcome::Resync {
            expected: last + 1,
            received: update.first_update_id,
        }
    }

    fn set_state(&mut self, new_state: FeedState) {
        if self.state != new_state {
            debug!(from = %self.state, to = %new_state, "Feed state transition");
            self.state = new_state;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(first: u64, last: u64) -> DepthUpdate {
        DepthUpdate {
            event_type: "depthUpdate".to_string(),
            event_time: 0,
            transaction_time: 0,
            symbol: "BTCUSDT".to_string(),
            first_update_id: first,
            final_update_id: last,
            prev_final_update_id: first.saturating_sub(1),
            bids: vec![],
            asks: vec![],
        }
    }

    fn connected_coordinator() -> SyncCoordinator {
        let mut sync = SyncCoordinator::new();
        sync.start_connecting();
        assert!(sync.on_connected());
        sync
    }

    #[test]
    fn test_updates_buffer_while_waiting_for_snapshot() {
        let mut sync = connected_coordinator();
        assert_eq!(sync.state(), FeedState::WaitingSnapshot);

        assert!(matches!(
            sync.on_depth_update(update(995, 999)),
            UpdateOutcome::Buffered
        ));
        assert!(matches!(
            sync.on_depth_update(update(1000, 1001)),
            UpdateOutcome::Buffered
        ));
        assert_eq!(sync.buffered_len(), 2);
    }

    #[test]
    fn test_bridge_replay_in_order() {
        // snapshot L=1000; buffer [stale, bridge, follower]
        let mut sync = connected_coordinator();
        sync.on_depth_update(update(995, 999));
        sync.on_depth_update(update(1000, 1001));
        sync.on_depth_update(update(1002, 1005));

        let SnapshotOutcome::Replay(replay) = sync.on_snapshot(1000) else {
            panic!("expected replay");
        };

        assert_eq!(replay.len(), 2);
        assert_eq!(replay[0].first_update_id, 1000);
        assert_eq!(replay[1].final_update_id, 1005);
        assert_eq!(sync.state(), FeedState::Live);
    }

    #[test]
    fn test_bridge_requires_span_over_last_plus_one() {
        // an update entirely below L+1 is stale even if recent
        let mut sync = connected_coordinator();
        sync.on_depth_update(update(990, 1000));
        sync.on_depth_update(update(1001, 1003));

        let SnapshotOutcome::Replay(replay) = sync.on_snapshot(1000) else {
            panic!("expected replay");
        };
        assert_eq!(replay.len(), 1);
        assert_eq!(replay[0].first_update_id, 1001);
    }

    #[test]
    fn test_gap_beyond_snapshot_forces_resync() {
        let mut sync = connected_coordinator();
        sync.on_depth_update(update(1005, 1008));

        assert!(matches!(sync.on_snapshot(1000), SnapshotOutcome::Resync));
        assert_eq!(sync.state(), FeedState::WaitingSnapshot);
        // the failed attempt released the single-flight slot
        assert!(sync.begin_snapshot_fetch());
    }

    #[test]
    fn test_stale_only_buffer_forces_resync() {
        let mut sync = connected_coordinator();
        sync.on_depth_update(update(990, 995));
        sync.on_depth_update(update(996, 1000));

        assert!(matches!(sync.on_snapshot(1000), SnapshotOutcome::Resync));
    }

    #[test]
    fn test_empty_buffer_awaits_streaming_bridge() {
        let mut sync = connected_coordinator();

        assert!(matches!(sync.on_snapshot(1000), SnapshotOutcome::AwaitBridge));
        assert_eq!(sync.state(), FeedState::Syncing);

        // a stale streaming update is dropped, then the bridge goes live
        assert!(matches!(
            sync.on_depth_update(update(998, 1000)),
            UpdateOutcome::Discarded
        ));
        assert!(matches!(
            sync.on_depth_update(update(1000, 1002)),
            UpdateOutcome::Forward(_)
        ));
        assert_eq!(sync.state(), FeedState::Live);
    }

    #[test]
    fn test_streaming_gap_while_syncing_forces_resync() {
        let mut sync = connected_coordinator();
        sync.on_snapshot(1000);

        let outcome = sync.on_depth_update(update(1010, 1012));
        let UpdateOutcome::Resync { expected, received } = outcome else {
            panic!("expected resync, got {outcome:?}");
        };
        assert_eq!(expected, 1001);
        assert_eq!(received, 1010);
        assert_eq!(sync.state(), FeedState::WaitingSnapshot);
    }

    #[test]
    fn test_live_updates_forward() {
        let mut sync = connected_coordinator();
        sync.on_depth_update(update(1000, 1001));
        sync.on_snapshot(1000);
        assert_eq!(sync.state(), FeedState::Live);

        assert!(matches!(
            sync.on_depth_update(update(1002, 1003)),
            UpdateOutcome::Forward(_)
        ));
    }

    #[test]
    fn test_snapshot_fetch_is_single_flight() {
        let mut sync = connected_coordinator();
        // on_connected already claimed the slot
        assert!(!sync.begin_snapshot_fetch());
        assert!(!sync.request_resync());

        sync.on_snapshot(1000);
        assert!(sync.request_resync());
        assert!(!sync.request_resync());
    }

    #[test]
    fn test_disconnect_voids_buffer_and_fetch() {
        let mut sync = connected_coordinator();
        sync.on_depth_update(update(1000, 1001));
        sync.on_disconnected();

        assert_eq!(sync.state(), FeedState::Reconnecting);
        assert_eq!(sync.buffered_len(), 0);

        sync.start_connecting();
        assert!(sync.on_connected());
    }

    #[test]
    fn test_updates_discarded_when_not_connected() {
        let mut sync = SyncCoordinator::new();
        assert!(matches!(
            sync.on_depth_update(update(1, 2)),
            UpdateOutcome::Discarded
        ));
    }
}
