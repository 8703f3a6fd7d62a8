//! Playback engine orchestration
//!
//! Top-level coordinator: owns the transport clock, the stem mixer, the
//! loader tasks and the audio output thread, and exposes the public control
//! surface (load/play/pause/seek/loop/rate/mix commands).
//!
//! All audio mixing happens inside the device callback, which pulls frames
//! straight from the mixer. Control commands only flip atomics or take the
//! mixer lock for a few instructions, so the callback never blocks on
//! anything slow.

use crate::audio::AudioOutput;
use crate::cache::PreloadCache;
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::events::EngineEvent;
use crate::fetch::TrackFetcher;
use crate::model::{SongDescriptor, TrackMixState};
use crate::playback::clock::{self, TransportClock};
use crate::playback::loader::{spawn_song_load, LoaderContext};
use crate::playback::mixer::StemMixer;
use crate::state::{EngineSnapshot, PlaybackPhase, SharedState};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tokio::time::{interval, Duration};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Multi-track playback engine
///
/// One engine instance drives one output device and at most one loaded song.
/// Cheap handles to everything observable live in [`SharedState`]; commands
/// go through the methods here.
pub struct PlayerEngine {
    config: EngineConfig,
    state: Arc<SharedState>,
    clock: Arc<TransportClock>,
    mixer: Arc<Mutex<StemMixer>>,
    fetcher: Arc<dyn TrackFetcher>,
    cache: Option<PreloadCache>,

    /// Bumped on every `load_song`; in-flight loads from older epochs
    /// discard their results
    epoch: Arc<AtomicU64>,

    /// Audio thread and monitor task lifetime flag
    running: Arc<AtomicBool>,

    initialized: AtomicBool,
    monitor_started: AtomicBool,
}

impl PlayerEngine {
    pub fn new(
        config: EngineConfig,
        fetcher: Arc<dyn TrackFetcher>,
        cache: Option<PreloadCache>,
    ) -> Self {
        let clock = Arc::new(TransportClock::new());
        let mixer = Arc::new(Mutex::new(StemMixer::new(
            Arc::clone(&clock),
            config.crossfade_ms,
        )));
        let state = Arc::new(SharedState::new(Arc::clone(&clock)));

        Self {
            config,
            state,
            clock,
            mixer,
            fetcher,
            cache,
            epoch: Arc::new(AtomicU64::new(0)),
            running: Arc::new(AtomicBool::new(false)),
            initialized: AtomicBool::new(false),
            monitor_started: AtomicBool::new(false),
        }
    }

    /// Start the audio output thread and the monitor task
    ///
    /// Device activation failure is the one error the host application has
    /// to see; it comes back as `Err` here, and the engine stays
    /// uninitialized so a later `init()` retries the device. A successful
    /// `init()` is idempotent; later calls are no-ops.
    pub async fn init(&self) -> Result<()> {
        if self.initialized.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!("Starting playback engine");
        self.running.store(true, Ordering::SeqCst);

        if !self.monitor_started.swap(true, Ordering::SeqCst) {
            self.spawn_monitor_task();
        }

        if let Err(e) = self.start_audio_thread().await {
            self.initialized.store(false, Ordering::SeqCst);
            return Err(e);
        }
        Ok(())
    }

    /// Create the output stream on a dedicated thread
    ///
    /// `cpal::Stream` is not `Send`, so the stream lives on a plain thread
    /// that keeps it alive until shutdown. The thread reports the outcome
    /// of device activation back over a channel so `init` can surface it.
    async fn start_audio_thread(&self) -> Result<()> {
        let mixer = Arc::clone(&self.mixer);
        let running = Arc::clone(&self.running);
        let device_name = self.config.output_device.clone();
        let (outcome_tx, outcome_rx) = std::sync::mpsc::channel::<Result<()>>();

        std::thread::spawn(move || {
            let mut output = match AudioOutput::new(device_name.as_deref()) {
                Ok(output) => output,
                Err(e) => {
                    error!("Failed to open audio output: {}", e);
                    let _ = outcome_tx.send(Err(e));
                    return;
                }
            };

            let callback_mixer = Arc::clone(&mixer);
            let result = output.start(move || callback_mixer.lock().unwrap().next_frame());
            if let Err(e) = result {
                error!("Failed to start audio stream: {}", e);
                let _ = outcome_tx.send(Err(e));
                return;
            }
            let _ = outcome_tx.send(Ok(()));
            info!("Audio output running");

            // Keep the stream alive until the engine shuts down
            while running.load(Ordering::SeqCst) {
                std::thread::sleep(std::time::Duration::from_millis(200));
            }
            output.stop();
            info!("Audio output stopped");
        });

        match tokio::task::spawn_blocking(move || outcome_rx.recv()).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(Error::AudioOutput(
                "Audio thread exited before activation".to_string(),
            )),
            Err(e) => Err(Error::Internal(format!("Audio startup wait failed: {}", e))),
        }
    }

    /// Periodic housekeeping: mode handoff, end-of-song, progress events
    fn spawn_monitor_task(&self) {
        let state = Arc::clone(&self.state);
        let clock = Arc::clone(&self.clock);
        let mixer = Arc::clone(&self.mixer);
        let running = Arc::clone(&self.running);
        let tick_ms = self.config.monitor_interval_ms.max(10);
        let progress_every = (self.config.progress_interval_ms / tick_ms).max(1);

        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_millis(tick_ms));
            let mut last_mode = clock.mode_discriminant();
            let mut ticks_since_progress = 0u64;

            while running.load(Ordering::SeqCst) {
                ticker.tick().await;

                // Stems handoff, once every non-failed stem is installed
                if clock.mode_discriminant() == clock::MODE_MIXDOWN
                    && state.all_tracks_ready().await
                {
                    let mixdown_ready = state.snapshot().mixdown_ready;
                    let mut mixer = mixer.lock().unwrap();
                    if mixdown_ready && clock.is_playing() {
                        debug!("Beginning mixdown to stems crossfade");
                        mixer.begin_crossfade();
                    } else {
                        // Nothing audible to fade out of
                        debug!("Switching to stems directly");
                        mixer.switch_to_stems();
                    }
                }

                // The mixer advances the mode atomically (crossfade
                // completion happens on the audio callback); surface it
                let mode = clock.mode_discriminant();
                if mode != last_mode {
                    last_mode = mode;
                    state.republish().await;
                    state.emit(EngineEvent::AudioModeChanged {
                        mode: state.snapshot().mode,
                        timestamp: chrono::Utc::now(),
                    });
                }

                // End of song: keep position parked at the end, paused
                if clock.take_ended() {
                    clock.set_playing(false);
                    info!("Song reached its end");
                    state.set_phase(PlaybackPhase::Paused).await;
                }

                if clock.is_playing() {
                    ticks_since_progress += 1;
                    if ticks_since_progress >= progress_every {
                        ticks_since_progress = 0;
                        state.republish().await;
                        if let Some(song_id) = state.song_id().await {
                            state.emit(EngineEvent::Progress {
                                song_id,
                                position: clock.position_seconds(),
                                duration: clock.duration_seconds(),
                                playing: true,
                                timestamp: chrono::Utc::now(),
                            });
                        }
                    }
                }
            }
        });
    }

    /// Stop audio and background tasks
    pub async fn shutdown(&self) {
        info!("Shutting down playback engine");
        self.clock.set_playing(false);
        self.running.store(false, Ordering::SeqCst);
        self.initialized.store(false, Ordering::SeqCst);
        self.monitor_started.store(false, Ordering::SeqCst);
    }

    // === Song lifecycle ===

    /// Load a song for playback
    ///
    /// Loading the song that is already loaded is a no-op, unless the
    /// engine is back in `Idle` (after a `stop` or a failed load), in which
    /// case the song is loaded fresh. Loading a different song supersedes
    /// any load still in flight; its late results are discarded.
    pub async fn load_song(&self, song: SongDescriptor) -> Result<()> {
        if song.tracks.is_empty() && song.mixdown_url.is_none() {
            return Err(Error::Playback("Song has no audio sources".into()));
        }
        if self.state.song_id().await == Some(song.id)
            && self.state.phase().await != PlaybackPhase::Idle
        {
            debug!(song_id = %song.id, "Song already loaded");
            return Ok(());
        }

        let epoch = self.epoch.fetch_add(1, Ordering::AcqRel) + 1;
        info!(song_id = %song.id, tracks = song.tracks.len(), "Loading song");

        self.clock.reset_for_song(song.duration);
        self.mixer.lock().unwrap().load_song(&song.tracks);
        self.state.begin_song(&song).await;

        let ctx = LoaderContext {
            state: Arc::clone(&self.state),
            clock: Arc::clone(&self.clock),
            mixer: Arc::clone(&self.mixer),
            fetcher: Arc::clone(&self.fetcher),
            cache: self.cache.clone(),
            epoch: Arc::clone(&self.epoch),
            config: self.config.clone(),
        };
        spawn_song_load(ctx, song, epoch);
        Ok(())
    }

    // === Transport ===

    /// Start or resume playback
    ///
    /// Ignored until something is ready to play.
    pub async fn play(&self) -> Result<()> {
        match self.state.phase().await {
            PlaybackPhase::Ready | PlaybackPhase::Paused => {
                self.clock.set_playing(true);
                self.state.set_phase(PlaybackPhase::Playing).await;
            }
            PlaybackPhase::Playing => {}
            phase => debug!(?phase, "Play ignored, nothing ready"),
        }
        Ok(())
    }

    /// Pause, keeping the current position
    pub async fn pause(&self) -> Result<()> {
        self.clock.set_playing(false);
        if self.state.phase().await == PlaybackPhase::Playing {
            self.state.set_phase(PlaybackPhase::Paused).await;
        }
        Ok(())
    }

    /// Halt playback: rewind to the start and return to idle
    ///
    /// After a stop the engine holds no playable song; `load_song` accepts
    /// the same descriptor again to bring it back.
    pub async fn stop(&self) -> Result<()> {
        self.clock.set_playing(false);
        self.clock.seek_seconds(0.0);
        self.state.set_phase(PlaybackPhase::Idle).await;
        Ok(())
    }

    /// Jump to a position in seconds (clamped to the song)
    pub async fn seek(&self, seconds: f64) {
        self.clock.seek_seconds(seconds);
        self.publish_state_changed().await;
    }

    /// Change playback rate, clamped to the supported range
    ///
    /// Takes effect immediately; every bus reads the same clock so the
    /// tracks cannot drift apart.
    pub async fn set_playback_rate(&self, rate: f64) {
        self.clock.set_rate(rate);
        let applied = self.clock.rate_value();
        self.state.republish().await;
        self.state.emit(EngineEvent::RateChanged {
            rate: applied,
            timestamp: chrono::Utc::now(),
        });
    }

    // === A/B loop ===

    /// Define the loop region in seconds (order-normalized, clamped)
    pub async fn set_loop(&self, start: f64, end: f64) {
        self.clock.set_loop_seconds(start, end);
        self.publish_state_changed().await;
    }

    /// Flip looping on or off; returns the new setting
    pub async fn toggle_loop(&self) -> bool {
        let enabled = self.clock.toggle_loop();
        self.publish_state_changed().await;
        enabled
    }

    /// Remove the loop region entirely
    pub async fn clear_loop(&self) {
        self.clock.clear_loop();
        self.publish_state_changed().await;
    }

    // === Per-track mix ===

    pub async fn set_track_volume(&self, track_id: Uuid, volume: f32) -> Result<()> {
        self.with_track(track_id, |mixer| mixer.set_volume(track_id, volume))
            .await
    }

    pub async fn set_track_muted(&self, track_id: Uuid, muted: bool) -> Result<()> {
        self.with_track(track_id, |mixer| mixer.set_muted(track_id, muted))
            .await
    }

    pub async fn set_track_solo(&self, track_id: Uuid, solo: bool) -> Result<()> {
        self.with_track(track_id, |mixer| mixer.set_solo(track_id, solo))
            .await
    }

    /// Pan position, -1.0 (left) to 1.0 (right)
    pub async fn set_track_pan(&self, track_id: Uuid, pan: f32) -> Result<()> {
        self.with_track(track_id, |mixer| mixer.set_pan(track_id, pan))
            .await
    }

    /// Current mix settings for one track
    pub fn track_mix_state(&self, track_id: Uuid) -> Option<TrackMixState> {
        self.mixer.lock().unwrap().mix_state(track_id)
    }

    async fn with_track<F>(&self, track_id: Uuid, apply: F) -> Result<()>
    where
        F: FnOnce(&mut StemMixer) -> bool,
    {
        let known = apply(&mut self.mixer.lock().unwrap());
        if !known {
            warn!(track_id = %track_id, "Mix command for unknown track");
            return Err(Error::Playback(format!("Unknown track {}", track_id)));
        }
        self.publish_state_changed().await;
        Ok(())
    }

    // === Master ===

    pub async fn set_master_volume(&self, volume: f32) {
        let applied = {
            let mut mixer = self.mixer.lock().unwrap();
            mixer.set_master_volume(volume);
            mixer.master_volume()
        };
        self.state.emit(EngineEvent::VolumeChanged {
            volume: applied,
            timestamp: chrono::Utc::now(),
        });
    }

    pub fn master_volume(&self) -> f32 {
        self.mixer.lock().unwrap().master_volume()
    }

    pub async fn set_master_muted(&self, muted: bool) {
        self.mixer.lock().unwrap().set_master_muted(muted);
        self.publish_state_changed().await;
    }

    pub fn master_muted(&self) -> bool {
        self.mixer.lock().unwrap().master_muted()
    }

    // === Observation ===

    /// Current state snapshot (referentially stable between changes)
    pub fn snapshot(&self) -> Arc<EngineSnapshot> {
        self.state.snapshot()
    }

    /// Live playback position in seconds
    ///
    /// Reads the transport clock directly; snapshots only carry the
    /// position they were published with.
    pub fn position(&self) -> f64 {
        self.clock.position_seconds()
    }

    pub fn is_playing(&self) -> bool {
        self.clock.is_playing()
    }

    /// Subscribe to engine events
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.state.subscribe()
    }

    /// Available output device names
    pub fn list_devices() -> Result<Vec<String>> {
        AudioOutput::list_devices()
    }

    /// Render interleaved stereo into `output`, advancing the transport
    ///
    /// For hosts that drive their own audio callback instead of the
    /// built-in cpal output. Must not be mixed with `init()`'s device
    /// stream.
    pub fn render(&self, output: &mut [f32]) {
        self.mixer.lock().unwrap().render(output);
    }

    async fn publish_state_changed(&self) {
        self.state.republish().await;
        self.state.emit(EngineEvent::StateChanged {
            timestamp: chrono::Utc::now(),
        });
    }
}
