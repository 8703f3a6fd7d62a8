//! Shared engine state and snapshot publishing
//!
//! The engine's observable state is exposed as an immutable
//! [`EngineSnapshot`], rebuilt atomically on every externally visible change
//! and handed out as a shared `Arc`. Between change notifications
//! `snapshot()` returns the *same* `Arc`, so observers can use
//! `Arc::ptr_eq` to skip redundant work.

use crate::events::{EngineEvent, EventBus};
use crate::model::{SongDescriptor, TrackLoadProgress};
use crate::playback::clock::{self, TransportClock};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Playback phase state machine
///
/// `Idle → Loading → Ready → Playing ⇄ Paused`. `Ready` is reachable while
/// stems are still loading, as soon as the mixdown (or first track) is
/// playable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackPhase {
    Idle,
    Loading,
    Ready,
    Playing,
    Paused,
}

/// Audio mode sub-state, advanced automatically by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioMode {
    /// Playing the single pre-mixed file for instant start
    Mixdown,
    /// Fading the mixdown bus out while the stem buses fade in
    Crossfading,
    /// Fully isolated per-track playback
    Stems,
}

impl AudioMode {
    pub(crate) fn from_discriminant(d: u8) -> Self {
        match d {
            clock::MODE_CROSSFADING => AudioMode::Crossfading,
            clock::MODE_STEMS => AudioMode::Stems,
            _ => AudioMode::Mixdown,
        }
    }
}

/// Per-track progress entry within a snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackProgressEntry {
    pub track_id: Uuid,
    pub name: String,
    pub progress: TrackLoadProgress,
}

/// Immutable, referentially stable view of the engine at a point in time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSnapshot {
    /// Loaded song id (None while idle)
    pub song_id: Option<Uuid>,

    /// Playback phase
    pub phase: PlaybackPhase,

    /// Audio mode (mixdown/crossfading/stems)
    pub mode: AudioMode,

    /// Current position in seconds
    pub position: f64,

    /// Song duration in seconds
    pub duration: f64,

    /// Playback rate multiplier
    pub rate: f64,

    /// Defined A/B loop region in seconds, if any
    pub loop_region: Option<(f64, f64)>,

    /// Looping currently enabled
    pub loop_enabled: bool,

    /// Per-track load progress, in descriptor order
    pub tracks: Vec<TrackProgressEntry>,

    /// Pre-mixed file is playable
    pub mixdown_ready: bool,

    /// Pre-mixed file load percentage (0-100)
    pub mixdown_percent: u8,

    /// Every non-failed track is loaded (and at least one succeeded)
    pub all_tracks_ready: bool,

    /// Count of loaded tracks
    pub tracks_loaded: usize,

    /// Total track count
    pub track_total: usize,
}

impl EngineSnapshot {
    fn empty() -> Self {
        Self {
            song_id: None,
            phase: PlaybackPhase::Idle,
            mode: AudioMode::Mixdown,
            position: 0.0,
            duration: 0.0,
            rate: 1.0,
            loop_region: None,
            loop_enabled: false,
            tracks: Vec::new(),
            mixdown_ready: false,
            mixdown_percent: 0,
            all_tracks_ready: false,
            tracks_loaded: 0,
            track_total: 0,
        }
    }
}

/// Mutable state behind the snapshot
struct StateInner {
    song_id: Option<Uuid>,
    phase: PlaybackPhase,
    track_ids: Vec<Uuid>,
    track_names: Vec<String>,
    progress: Vec<TrackLoadProgress>,
    mixdown_ready: bool,
    mixdown_percent: u8,
}

impl StateInner {
    fn new() -> Self {
        Self {
            song_id: None,
            phase: PlaybackPhase::Idle,
            track_ids: Vec::new(),
            track_names: Vec::new(),
            progress: Vec::new(),
            mixdown_ready: false,
            mixdown_percent: 0,
        }
    }
}

/// Shared state accessible by the engine, loader and host application
pub struct SharedState {
    inner: RwLock<StateInner>,

    /// Latest published snapshot; swapped as a whole so reads never tear
    snapshot: std::sync::RwLock<Arc<EngineSnapshot>>,

    /// Transport clock (position/rate/loop source of truth)
    clock: Arc<TransportClock>,

    /// Event broadcaster
    events: EventBus,
}

impl SharedState {
    pub fn new(clock: Arc<TransportClock>) -> Self {
        Self {
            inner: RwLock::new(StateInner::new()),
            snapshot: std::sync::RwLock::new(Arc::new(EngineSnapshot::empty())),
            clock,
            events: EventBus::default(),
        }
    }

    /// Current snapshot; the same `Arc` until the next published change
    pub fn snapshot(&self) -> Arc<EngineSnapshot> {
        Arc::clone(&self.snapshot.read().expect("snapshot lock poisoned"))
    }

    /// Subscribe to engine events
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    pub(crate) fn emit(&self, event: EngineEvent) {
        self.events.emit_lossy(event);
    }

    // === Mutations (each republishes the snapshot) ===

    pub(crate) async fn set_phase(&self, phase: PlaybackPhase) {
        let old = {
            let mut inner = self.inner.write().await;
            let old = inner.phase;
            inner.phase = phase;
            old
        };
        self.republish().await;
        if old != phase {
            self.emit(EngineEvent::PhaseChanged {
                old_phase: old,
                new_phase: phase,
                timestamp: chrono::Utc::now(),
            });
        }
    }

    pub(crate) async fn phase(&self) -> PlaybackPhase {
        self.inner.read().await.phase
    }

    /// Reset per-song state for a newly loaded descriptor
    pub(crate) async fn begin_song(&self, song: &SongDescriptor) {
        {
            let mut inner = self.inner.write().await;
            inner.song_id = Some(song.id);
            inner.phase = PlaybackPhase::Loading;
            inner.track_ids = song.tracks.iter().map(|t| t.id).collect();
            inner.track_names = song.tracks.iter().map(|t| t.name.clone()).collect();
            inner.progress = vec![TrackLoadProgress::pending(); song.tracks.len()];
            inner.mixdown_ready = false;
            inner.mixdown_percent = 0;
        }
        self.republish().await;
    }

    pub(crate) async fn set_track_percent(&self, track_id: Uuid, percent: u8) {
        {
            let mut inner = self.inner.write().await;
            if let Some(idx) = inner.track_ids.iter().position(|id| *id == track_id) {
                if !inner.progress[idx].loaded && !inner.progress[idx].failed {
                    inner.progress[idx].percent = percent.min(100);
                }
            }
        }
        self.republish().await;
    }

    pub(crate) async fn set_track_loaded(&self, track_id: Uuid) {
        {
            let mut inner = self.inner.write().await;
            if let Some(idx) = inner.track_ids.iter().position(|id| *id == track_id) {
                inner.progress[idx] = TrackLoadProgress {
                    loaded: true,
                    percent: 100,
                    failed: false,
                };
            }
        }
        self.republish().await;
    }

    pub(crate) async fn set_track_failed(&self, track_id: Uuid) {
        {
            let mut inner = self.inner.write().await;
            if let Some(idx) = inner.track_ids.iter().position(|id| *id == track_id) {
                inner.progress[idx].failed = true;
                inner.progress[idx].loaded = false;
            }
        }
        self.republish().await;
    }

    /// Mixdown updates are tagged with the song they belong to; a late
    /// write from a superseded load must not mark the new song's mixdown
    pub(crate) async fn set_mixdown_percent(&self, song_id: Uuid, percent: u8) {
        {
            let mut inner = self.inner.write().await;
            if inner.song_id != Some(song_id) {
                return;
            }
            inner.mixdown_percent = percent.min(100);
        }
        self.republish().await;
    }

    pub(crate) async fn set_mixdown_ready(&self, song_id: Uuid) {
        {
            let mut inner = self.inner.write().await;
            if inner.song_id != Some(song_id) {
                return;
            }
            inner.mixdown_ready = true;
            inner.mixdown_percent = 100;
        }
        self.republish().await;
    }

    /// True when every non-failed track is loaded and at least one succeeded
    pub(crate) async fn all_tracks_ready(&self) -> bool {
        let inner = self.inner.read().await;
        Self::compute_all_ready(&inner.progress)
    }

    pub(crate) async fn any_track_loaded(&self) -> bool {
        self.inner.read().await.progress.iter().any(|p| p.loaded)
    }

    pub(crate) async fn song_id(&self) -> Option<Uuid> {
        self.inner.read().await.song_id
    }

    fn compute_all_ready(progress: &[TrackLoadProgress]) -> bool {
        let mut loaded = 0usize;
        for p in progress {
            if p.failed {
                continue;
            }
            if !p.loaded {
                return false;
            }
            loaded += 1;
        }
        loaded > 0
    }

    /// Rebuild and swap the snapshot from current state + clock
    pub(crate) async fn republish(&self) {
        let next = {
            let inner = self.inner.read().await;
            let tracks: Vec<TrackProgressEntry> = inner
                .track_ids
                .iter()
                .zip(inner.track_names.iter())
                .zip(inner.progress.iter())
                .map(|((id, name), progress)| TrackProgressEntry {
                    track_id: *id,
                    name: name.clone(),
                    progress: *progress,
                })
                .collect();

            Arc::new(EngineSnapshot {
                song_id: inner.song_id,
                phase: inner.phase,
                mode: AudioMode::from_discriminant(self.clock.mode_discriminant()),
                position: self.clock.position_seconds(),
                duration: self.clock.duration_seconds(),
                rate: self.clock.rate_value(),
                loop_region: self.clock.loop_region_seconds(),
                loop_enabled: self.clock.loop_enabled(),
                mixdown_ready: inner.mixdown_ready,
                mixdown_percent: inner.mixdown_percent,
                all_tracks_ready: Self::compute_all_ready(&inner.progress),
                tracks_loaded: inner.progress.iter().filter(|p| p.loaded).count(),
                track_total: inner.progress.len(),
                tracks,
            })
        };
        *self.snapshot.write().expect("snapshot lock poisoned") = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Track, TrackCategory};

    fn test_song(track_count: usize) -> SongDescriptor {
        SongDescriptor {
            id: Uuid::new_v4(),
            mixdown_url: None,
            tracks: (0..track_count)
                .map(|i| Track {
                    id: Uuid::new_v4(),
                    name: format!("Track {}", i),
                    category: TrackCategory::Other,
                    url: format!("mem://{}", i),
                    color: None,
                    waveform: None,
                })
                .collect(),
            duration: 120.0,
        }
    }

    fn new_state() -> SharedState {
        SharedState::new(Arc::new(TransportClock::new()))
    }

    #[tokio::test]
    async fn test_snapshot_reference_stable_between_changes() {
        let state = new_state();
        let a = state.snapshot();
        let b = state.snapshot();
        assert!(Arc::ptr_eq(&a, &b));

        state.set_phase(PlaybackPhase::Loading).await;
        let c = state.snapshot();
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(c.phase, PlaybackPhase::Loading);
    }

    #[tokio::test]
    async fn test_begin_song_resets_progress() {
        let state = new_state();
        let song = test_song(3);
        state.begin_song(&song).await;

        let snap = state.snapshot();
        assert_eq!(snap.song_id, Some(song.id));
        assert_eq!(snap.phase, PlaybackPhase::Loading);
        assert_eq!(snap.track_total, 3);
        assert_eq!(snap.tracks_loaded, 0);
        assert!(!snap.all_tracks_ready);
    }

    #[tokio::test]
    async fn test_failed_track_excluded_from_all_ready() {
        let state = new_state();
        let song = test_song(3);
        state.begin_song(&song).await;

        state.set_track_loaded(song.tracks[0].id).await;
        state.set_track_loaded(song.tracks[1].id).await;
        assert!(!state.all_tracks_ready().await);

        // Third track fails; the remaining two loaded tracks satisfy readiness
        state.set_track_failed(song.tracks[2].id).await;
        assert!(state.all_tracks_ready().await);

        let snap = state.snapshot();
        assert!(snap.all_tracks_ready);
        assert_eq!(snap.tracks_loaded, 2);
        assert!(snap.tracks[2].progress.failed);
    }

    #[tokio::test]
    async fn test_all_failed_never_ready() {
        let state = new_state();
        let song = test_song(2);
        state.begin_song(&song).await;

        state.set_track_failed(song.tracks[0].id).await;
        state.set_track_failed(song.tracks[1].id).await;
        assert!(!state.all_tracks_ready().await);
    }

    #[tokio::test]
    async fn test_phase_change_emits_event() {
        let state = new_state();
        let mut rx = state.subscribe();

        state.set_phase(PlaybackPhase::Loading).await;
        match rx.recv().await.unwrap() {
            EngineEvent::PhaseChanged { old_phase, new_phase, .. } => {
                assert_eq!(old_phase, PlaybackPhase::Idle);
                assert_eq!(new_phase, PlaybackPhase::Loading);
            }
            other => panic!("Wrong event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_track_percent_ignored_after_terminal_state() {
        let state = new_state();
        let song = test_song(1);
        state.begin_song(&song).await;

        state.set_track_loaded(song.tracks[0].id).await;
        state.set_track_percent(song.tracks[0].id, 40).await;

        let snap = state.snapshot();
        assert_eq!(snap.tracks[0].progress.percent, 100);
        assert!(snap.tracks[0].progress.loaded);
    }

    #[tokio::test]
    async fn test_mixdown_updates_for_other_song_ignored() {
        let state = new_state();
        let song_a = test_song(1);
        let song_b = test_song(1);

        state.begin_song(&song_a).await;
        state.set_mixdown_percent(song_a.id, 60).await;
        assert_eq!(state.snapshot().mixdown_percent, 60);

        // A new song replaces the old one; late writes from the old song's
        // loader must not mark the new song's mixdown
        state.begin_song(&song_b).await;
        state.set_mixdown_ready(song_a.id).await;
        state.set_mixdown_percent(song_a.id, 90).await;

        let snap = state.snapshot();
        assert!(!snap.mixdown_ready);
        assert_eq!(snap.mixdown_percent, 0);

        state.set_mixdown_ready(song_b.id).await;
        assert!(state.snapshot().mixdown_ready);
    }
}
