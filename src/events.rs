//! Event system for the playback engine
//!
//! One-to-many broadcasting over `tokio::sync::broadcast`. Events carry
//! timestamps and serde derives so a host application can forward them to its
//! UI layer (SSE, IPC, whatever) without re-shaping.
//!
//! Events are change *notifications*; observers pull the authoritative
//! [`EngineSnapshot`](crate::state::EngineSnapshot) after receiving one.

use crate::state::{AudioMode, PlaybackPhase};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Engine event types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EngineEvent {
    /// Playback phase changed (idle/loading/ready/playing/paused)
    PhaseChanged {
        old_phase: PlaybackPhase,
        new_phase: PlaybackPhase,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Audio mode advanced (mixdown → crossfading → stems)
    AudioModeChanged {
        mode: AudioMode,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Periodic playback progress update
    Progress {
        song_id: Uuid,
        position: f64,
        duration: f64,
        playing: bool,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A track finished loading (fetched and decoded)
    TrackLoaded {
        song_id: Uuid,
        track_id: Uuid,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A track failed to fetch or decode; it is excluded from playback
    TrackLoadFailed {
        song_id: Uuid,
        track_id: Uuid,
        reason: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// The pre-mixed file became playable
    MixdownReady {
        song_id: Uuid,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Every non-failed track is ready; stems handoff will follow
    AllTracksReady {
        song_id: Uuid,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Master volume changed
    VolumeChanged {
        volume: f32,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Playback rate changed
    RateChanged {
        rate: f64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Snapshot changed for a reason not covered by a more specific event
    /// (loop region edits, mix-state changes, seeks)
    StateChanged {
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

/// Broadcast event bus
///
/// Thin wrapper over `tokio::sync::broadcast` so emit sites do not care
/// whether anyone is listening.
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
    capacity: usize,
}

impl EventBus {
    /// Create a new bus buffering up to `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    /// Emit an event, ignoring the no-subscribers case
    pub fn emit_lossy(&self, event: EngineEvent) {
        let _ = self.tx.send(event);
    }

    /// Number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
