//! Integration tests for the playback engine
//!
//! Exercises the full load/play pipeline against in-memory WAV fixtures:
//! mixdown-first loading, the automatic handoff from the mixdown bus to the
//! stem buses, rate changes, A/B looping, and failure handling.
//!
//! Audio is driven through `PlayerEngine::render` rather than a real output
//! device, so these run headless.

use std::sync::Arc;
use std::time::Duration;
use stemset::config::EngineConfig;
use stemset::error::Result;
use stemset::fetch::{ProgressFn, StaticFetcher, TrackFetcher};
use stemset::model::{SongDescriptor, Track, TrackCategory};
use stemset::playback::PlayerEngine;
use stemset::{AudioMode, EngineEvent, EngineSnapshot, PlaybackPhase};
use uuid::Uuid;

// ============================================================================
// Test Helpers
// ============================================================================

/// One second of constant-amplitude stereo 44.1kHz WAV, in memory
fn wav_bytes(amplitude: f32, frames: usize) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 2,
        sample_rate: 44_100,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        let sample = (amplitude * i16::MAX as f32) as i16;
        for _ in 0..frames {
            writer.write_sample(sample).unwrap();
            writer.write_sample(sample).unwrap();
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}

fn make_track(name: &str, category: TrackCategory) -> Track {
    Track {
        id: Uuid::new_v4(),
        name: name.to_string(),
        category,
        url: format!("mem://stem-{}-{}.wav", name.to_lowercase(), Uuid::new_v4()),
        color: None,
        waveform: None,
    }
}

/// Two-stem song with a mixdown; every asset is one second long
fn practice_song() -> SongDescriptor {
    SongDescriptor {
        id: Uuid::new_v4(),
        mixdown_url: Some(format!("mem://mixdown-{}.wav", Uuid::new_v4())),
        tracks: vec![
            make_track("Vocal", TrackCategory::Vocal),
            make_track("Drums", TrackCategory::Drums),
        ],
        duration: 5.0,
    }
}

/// Fetcher with assets for every URL in the song
fn fetcher_for(song: &SongDescriptor) -> StaticFetcher {
    let mut fetcher = StaticFetcher::new();
    if let Some(url) = &song.mixdown_url {
        fetcher.insert(url.clone(), wav_bytes(0.6, 44_100));
    }
    for track in &song.tracks {
        fetcher.insert(track.url.clone(), wav_bytes(0.4, 44_100));
    }
    fetcher
}

/// Wrapper that delays fetches for URLs containing a marker, so the
/// mixdown reliably wins the race against the stems
struct DelayedFetcher {
    inner: StaticFetcher,
    delay_marker: &'static str,
    delay: Duration,
}

#[async_trait::async_trait]
impl TrackFetcher for DelayedFetcher {
    async fn fetch(&self, url: &str, on_progress: Option<ProgressFn>) -> Result<Vec<u8>> {
        if url.contains(self.delay_marker) {
            tokio::time::sleep(self.delay).await;
        }
        self.inner.fetch(url, on_progress).await
    }
}

fn test_config() -> EngineConfig {
    EngineConfig {
        crossfade_ms: 50,
        monitor_interval_ms: 10,
        ..EngineConfig::default()
    }
}

async fn wait_until<F>(engine: &PlayerEngine, what: &str, pred: F)
where
    F: Fn(&EngineSnapshot) -> bool,
{
    for _ in 0..2000 {
        if pred(&engine.snapshot()) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    panic!("Timed out waiting for: {}", what);
}

/// Render audio in small chunks until the predicate holds, returning the
/// peak amplitude seen in each chunk
async fn render_until<F>(engine: &PlayerEngine, what: &str, pred: F) -> Vec<f32>
where
    F: Fn(&EngineSnapshot) -> bool,
{
    let mut peaks = Vec::new();
    let mut chunk = vec![0.0f32; 1024];
    for _ in 0..2000 {
        if pred(&engine.snapshot()) {
            return peaks;
        }
        engine.render(&mut chunk);
        peaks.push(chunk.iter().fold(0.0f32, |peak, s| peak.max(s.abs())));
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("Timed out rendering until: {}", what);
}

// ============================================================================
// Mixdown-first loading
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn test_mixdown_playable_before_stems_arrive() {
    let song = practice_song();
    let fetcher = DelayedFetcher {
        inner: fetcher_for(&song),
        delay_marker: "stem-vocal",
        delay: Duration::from_millis(300),
    };
    let engine = PlayerEngine::new(test_config(), Arc::new(fetcher), None);

    engine.load_song(song.clone()).await.unwrap();
    wait_until(&engine, "mixdown ready", |s| s.mixdown_ready).await;

    // Playable from the mixdown alone, well before the delayed stem lands
    let snap = engine.snapshot();
    assert_eq!(snap.phase, PlaybackPhase::Ready);
    assert!(!snap.all_tracks_ready);
    assert_eq!(snap.mode, AudioMode::Mixdown);

    engine.play().await.unwrap();
    let mut chunk = vec![0.0f32; 512];
    engine.render(&mut chunk);
    let peak = chunk.iter().fold(0.0f32, |p, s| p.max(s.abs()));
    assert!(peak > 0.3, "Mixdown should be audible, peak {}", peak);

    wait_until(&engine, "all tracks ready", |s| s.all_tracks_ready).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_mixdown_and_stems_events_in_order() {
    let song = practice_song();
    let fetcher = DelayedFetcher {
        inner: fetcher_for(&song),
        delay_marker: "mem://stem-",
        delay: Duration::from_millis(40),
    };
    let engine = PlayerEngine::new(test_config(), Arc::new(fetcher), None);
    let mut rx = engine.subscribe();

    engine.load_song(song.clone()).await.unwrap();
    wait_until(&engine, "all tracks ready", |s| s.all_tracks_ready).await;

    let mut mixdown_at = None;
    let mut all_ready_at = None;
    let mut seen = 0usize;
    while let Ok(event) = rx.try_recv() {
        match event {
            EngineEvent::MixdownReady { song_id, .. } => {
                assert_eq!(song_id, song.id);
                mixdown_at = Some(seen);
            }
            EngineEvent::AllTracksReady { song_id, .. } => {
                assert_eq!(song_id, song.id);
                all_ready_at = Some(seen);
            }
            _ => {}
        }
        seen += 1;
    }
    let mixdown_at = mixdown_at.expect("No MixdownReady event");
    let all_ready_at = all_ready_at.expect("No AllTracksReady event");
    assert!(mixdown_at < all_ready_at);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_mixdown_only_song_becomes_ready() {
    let song = SongDescriptor {
        id: Uuid::new_v4(),
        mixdown_url: Some(format!("mem://mixdown-{}.wav", Uuid::new_v4())),
        tracks: Vec::new(),
        duration: 5.0,
    };
    let engine = PlayerEngine::new(test_config(), Arc::new(fetcher_for(&song)), None);

    engine.load_song(song).await.unwrap();
    wait_until(&engine, "ready", |s| s.phase == PlaybackPhase::Ready).await;

    let snap = engine.snapshot();
    assert!(snap.mixdown_ready);
    assert_eq!(snap.mode, AudioMode::Mixdown);

    engine.play().await.unwrap();
    let mut chunk = vec![0.0f32; 1024];
    engine.render(&mut chunk);
    let peak = chunk.iter().fold(0.0f32, |p, s| p.max(s.abs()));
    assert!(peak > 0.3, "Mixdown should be audible, peak {}", peak);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_failed_stems_do_not_block_mixdown() {
    let song = practice_song();
    let mut fetcher = StaticFetcher::new();
    if let Some(url) = &song.mixdown_url {
        fetcher.insert(url.clone(), wav_bytes(0.6, 44_100));
    }
    // No stem assets: both stems fail instantly while the mixdown is
    // still in flight
    let fetcher = DelayedFetcher {
        inner: fetcher,
        delay_marker: "mem://mixdown-",
        delay: Duration::from_millis(50),
    };
    let engine = PlayerEngine::new(test_config(), Arc::new(fetcher), None);

    engine.load_song(song).await.unwrap();
    wait_until(&engine, "ready", |s| s.phase == PlaybackPhase::Ready).await;

    let snap = engine.snapshot();
    assert!(snap.mixdown_ready);
    assert_eq!(snap.tracks_loaded, 0);
}

// ============================================================================
// Mixdown to stems handoff
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn test_handoff_crossfades_while_playing() {
    let song = practice_song();
    // Stems land only after play() below, so the handoff happens mid-playback
    let fetcher = DelayedFetcher {
        inner: fetcher_for(&song),
        delay_marker: "mem://stem-",
        delay: Duration::from_millis(100),
    };
    let engine = PlayerEngine::new(test_config(), Arc::new(fetcher), None);
    // The monitor task drives the handoff either way; a host without an
    // audio device only loses the cpal stream, which render() replaces
    let _ = engine.init().await;

    engine.load_song(song.clone()).await.unwrap();
    wait_until(&engine, "ready", |s| s.phase == PlaybackPhase::Ready).await;
    engine.play().await.unwrap();

    // No further commands: the engine crossfades onto the stem buses on
    // its own once everything is loaded
    let peaks = render_until(&engine, "stems mode", |s| s.mode == AudioMode::Stems).await;

    assert_eq!(engine.snapshot().phase, PlaybackPhase::Playing);
    // The crossfade never drops to silence
    let quiet = peaks.iter().filter(|p| **p < 0.1).count();
    assert_eq!(quiet, 0, "Output went quiet during handoff: {:?}", peaks);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_handoff_switches_directly_when_not_playing() {
    let song = practice_song();
    let engine = PlayerEngine::new(test_config(), Arc::new(fetcher_for(&song)), None);
    let _ = engine.init().await;

    engine.load_song(song.clone()).await.unwrap();
    // Never press play; the switch happens silently with no crossfade
    wait_until(&engine, "stems mode", |s| s.mode == AudioMode::Stems).await;
    assert_ne!(engine.snapshot().phase, PlaybackPhase::Playing);
}

// ============================================================================
// Transport: rate, loop, stop
// ============================================================================

/// Song with stems only, so transport tests need no handoff monitor
fn stems_only_song() -> SongDescriptor {
    SongDescriptor {
        mixdown_url: None,
        ..practice_song()
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_rate_change_scales_position() {
    let song = stems_only_song();
    let engine = PlayerEngine::new(test_config(), Arc::new(fetcher_for(&song)), None);

    engine.load_song(song).await.unwrap();
    wait_until(&engine, "ready", |s| s.phase == PlaybackPhase::Ready).await;
    engine.play().await.unwrap();
    engine.set_playback_rate(1.5).await;

    // 44100 output frames at 1.5x covers 1.5 seconds of the song
    let mut chunk = vec![0.0f32; 44_100 * 2];
    engine.render(&mut chunk);

    let position = engine.position();
    assert!(
        (position - 1.5).abs() < 0.01,
        "Expected ~1.5s, got {}",
        position
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_loop_region_holds_position() {
    let song = stems_only_song();
    let engine = PlayerEngine::new(test_config(), Arc::new(fetcher_for(&song)), None);

    engine.load_song(song).await.unwrap();
    wait_until(&engine, "ready", |s| s.phase == PlaybackPhase::Ready).await;
    engine.set_loop(0.2, 0.4).await;
    engine.seek(0.2).await;
    engine.play().await.unwrap();

    // A full second of audio, several times around the loop
    let mut chunk = vec![0.0f32; 44_100 * 2];
    engine.render(&mut chunk);

    let position = engine.position();
    assert!(
        (0.2..0.4).contains(&position),
        "Position escaped the loop: {}",
        position
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_seek_preserves_play_pause_state() {
    let song = stems_only_song();
    let engine = PlayerEngine::new(test_config(), Arc::new(fetcher_for(&song)), None);

    engine.load_song(song).await.unwrap();
    wait_until(&engine, "ready", |s| s.phase == PlaybackPhase::Ready).await;
    engine.play().await.unwrap();
    let mut chunk = vec![0.0f32; 4096];
    engine.render(&mut chunk);

    engine.seek(2.0).await;
    assert!(engine.is_playing(), "Seek must not pause playback");
    assert_eq!(engine.snapshot().phase, PlaybackPhase::Playing);
    assert!((engine.position() - 2.0).abs() < 1e-6);

    engine.pause().await.unwrap();
    engine.seek(1.0).await;
    assert!(!engine.is_playing(), "Seek must not resume playback");
    assert_eq!(engine.snapshot().phase, PlaybackPhase::Paused);
    assert!((engine.position() - 1.0).abs() < 1e-6);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_stop_returns_to_idle() {
    let song = stems_only_song();
    let engine = PlayerEngine::new(test_config(), Arc::new(fetcher_for(&song)), None);

    engine.load_song(song.clone()).await.unwrap();
    wait_until(&engine, "ready", |s| s.phase == PlaybackPhase::Ready).await;
    engine.play().await.unwrap();
    let mut chunk = vec![0.0f32; 4096];
    engine.render(&mut chunk);
    assert!(engine.position() > 0.0);

    engine.stop().await.unwrap();
    let snap = engine.snapshot();
    assert_eq!(snap.phase, PlaybackPhase::Idle);
    assert_eq!(snap.position, 0.0);
    assert!(!engine.is_playing());

    // Play has nothing to act on after a stop; loading the song again
    // brings it back
    engine.play().await.unwrap();
    assert!(!engine.is_playing());
    engine.load_song(song).await.unwrap();
    wait_until(&engine, "ready again", |s| s.phase == PlaybackPhase::Ready).await;
}

// ============================================================================
// Failure handling
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn test_failed_stem_excluded_but_song_ready() {
    let song = practice_song();
    let mut fetcher = StaticFetcher::new();
    if let Some(url) = &song.mixdown_url {
        fetcher.insert(url.clone(), wav_bytes(0.6, 44_100));
    }
    // Only the first stem exists; the second will fail to fetch
    fetcher.insert(song.tracks[0].url.clone(), wav_bytes(0.4, 44_100));

    let engine = PlayerEngine::new(test_config(), Arc::new(fetcher), None);
    let mut rx = engine.subscribe();
    engine.load_song(song.clone()).await.unwrap();

    wait_until(&engine, "all tracks ready", |s| s.all_tracks_ready).await;
    let snap = engine.snapshot();
    assert_eq!(snap.tracks_loaded, 1);
    assert!(snap.tracks.iter().any(|t| t.progress.failed));

    let mut saw_failure = false;
    while let Ok(event) = rx.try_recv() {
        if let EngineEvent::TrackLoadFailed { track_id, .. } = event {
            assert_eq!(track_id, song.tracks[1].id);
            saw_failure = true;
        }
    }
    assert!(saw_failure, "No TrackLoadFailed event");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_song_with_nothing_loadable_returns_to_idle() {
    let song = stems_only_song();
    let engine = PlayerEngine::new(test_config(), Arc::new(StaticFetcher::new()), None);

    engine.load_song(song).await.unwrap();
    wait_until(&engine, "idle", |s| s.phase == PlaybackPhase::Idle).await;

    // Play is ignored with nothing playable
    engine.play().await.unwrap();
    assert!(!engine.is_playing());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_new_load_supersedes_previous() {
    let song_a = practice_song();
    let song_b = practice_song();
    let mut fetcher = StaticFetcher::new();
    for song in [&song_a, &song_b] {
        if let Some(url) = &song.mixdown_url {
            fetcher.insert(url.clone(), wav_bytes(0.6, 44_100));
        }
        for track in &song.tracks {
            fetcher.insert(track.url.clone(), wav_bytes(0.4, 44_100));
        }
    }
    let fetcher = DelayedFetcher {
        inner: fetcher,
        delay_marker: "mem://",
        delay: Duration::from_millis(30),
    };
    let engine = PlayerEngine::new(test_config(), Arc::new(fetcher), None);

    // Load A, then immediately replace it with B while A is in flight
    engine.load_song(song_a.clone()).await.unwrap();
    engine.load_song(song_b.clone()).await.unwrap();

    wait_until(&engine, "all tracks ready", |s| s.all_tracks_ready).await;
    let snap = engine.snapshot();
    assert_eq!(snap.song_id, Some(song_b.id));
    // Exactly B's tracks, none of A's
    assert_eq!(snap.track_total, song_b.tracks.len());
    for entry in &snap.tracks {
        assert!(song_b.tracks.iter().any(|t| t.id == entry.track_id));
    }
}
