//! Messages and state enums shared between the transport and engine threads

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::Instant;

use crate::parser::{AggTrade, DepthSnapshot, DepthUpdate};

/// Tagged message carried by value through the SPSC ring.
///
/// Variants hold their payload inline so the ring stores messages in place;
/// every data-bearing variant carries a steady-clock receipt timestamp.
#[derive(Debug)]
pub enum EngineMessage {
    DepthUpdate {
        update: DepthUpdate,
        received_at: Instant,
    },
    AggTrade {
        trade: AggTrade,
        received_at: Instant,
    },
    Snapshot {
        snapshot: DepthSnapshot,
        received_at: Instant,
    },
    ConnectionLost {
        reason: String,
        occurred_at: Instant,
    },
    ConnectionRestored {
        occurred_at: Instant,
    },
    SequenceGap {
        expected: u64,
        received: u64,
        detected_at: Instant,
    },
    Shutdown,
}

impl EngineMessage {
    /// Static name of the variant, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineMessage::DepthUpdate { .. } => "DepthUpdate",
            EngineMessage::AggTrade { .. } => "AggTrade",
            EngineMessage::Snapshot { .. } => "Snapshot",
            EngineMessage::ConnectionLost { .. } => "ConnectionLost",
            EngineMessage::ConnectionRestored { .. } => "ConnectionRestored",
            EngineMessage::SequenceGap { .. } => "SequenceGap",
            EngineMessage::Shutdown => "Shutdown",
        }
    }
}

/// Feed-side connection state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FeedState {
    /// Not connected, nothing in flight
    Disconnected = 0,
    /// TCP/TLS/WebSocket handshake in progress
    Connecting = 1,
    /// Connected, buffering updates while the REST snapshot is fetched
    WaitingSnapshot = 2,
    /// Snapshot in hand, locating the bridging update
    Syncing = 3,
    /// Fully synchronized, forwarding updates in real time
    Live = 4,
    /// Connection lost, backing off before retry
    Reconnecting = 5,
}

impl FeedState {
    pub fn from_u8(v: u8) -> FeedState {
        match v {
            1 => FeedState::Connecting,
            2 => FeedState::WaitingSnapshot,
            3 => FeedState::Syncing,
            4 => FeedState::Live,
            5 => FeedState::Reconnecting,
            _ => FeedState::Disconnected,
        }
    }
}

impl fmt::Display for FeedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FeedState::Disconnected => "disconnected",
            FeedState::Connecting => "connecting",
            FeedState::WaitingSnapshot => "waiting_snapshot",
            FeedState::Syncing => "syncing",
            FeedState::Live => "live",
            FeedState::Reconnecting => "reconnecting",
        };
        f.write_str(s)
    }
}

/// Cross-thread view of the feed connection, published by the transport
/// thread and read by the health endpoint and the engine.
#[derive(Debug)]
pub struct FeedStatus {
    state: AtomicU8,
    connected: AtomicBool,
}

impl FeedStatus {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(FeedState::Disconnected as u8),
            connected: AtomicBool::new(false),
        }
    }

    pub fn set_state(&self, state: FeedState) {
        self.state.store(state as u8, Ordering::Relaxed);
        self.connected.store(
            matches!(
                state,
                FeedState::WaitingSnapshot | FeedState::Syncing | FeedState::Live
            ),
            Ordering::Relaxed,
        );
    }

    pub fn state(&self) -> FeedState {
        FeedState::from_u8(self.state.load(Ordering::Relaxed))
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }
}

impl Default for FeedStatus {
    fn default() -> Self {
        Self::new()
    }
}

/// Engine-side view of book synchronization
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineSyncState {
    /// No snapshot applied yet
    Initializing,
    /// Book discarded, waiting for a fresh snapshot
    WaitingSnapshot,
    /// Snapshot applied and sequence intact
    Synced,
}

impl fmt::Display for EngineSyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EngineSyncState::Initializing => "initializing",
            EngineSyncState::WaitingSnapshot => "waiting_snapshot",
            EngineSyncState::Synced => "synced",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feed_state_u8_round_trip() {
        for state in [
            FeedState::Disconnected,
            FeedState::Connecting,
            FeedState::WaitingSnapshot,
            FeedState::Syncing,
            FeedState::Live,
            FeedState::Reconnecting,
        ] {
            assert_eq!(FeedState::from_u8(state as u8), state);
        }
    }

    #[test]
    fn test_message_kind_names() {
        assert_eq!(EngineMessage::Shutdown.kind(), "Shutdown");
        let msg = EngineMessage::ConnectionLost {
            reason: "read error".to_string(),
            occurred_at: Instant::now(),
        };
        assert_eq!(msg.kind(), "ConnectionLost");
    }
}
