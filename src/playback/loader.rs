//! Two-phase song loading
//!
//! Phase one fetches and decodes the pre-mixed file so playback can start
//! within a second or two. Phase two fetches the individual stems in
//! priority order; once every non-failed stem is resident the engine hands
//! off from the mixdown bus to the stem buses.
//!
//! Every load carries the engine epoch it was started under. A newer
//! `load_song` bumps the epoch, so results from the superseded load fail the
//! epoch check and are dropped before touching the mixer.

use crate::audio::decode_audio_bytes;
use crate::cache::PreloadCache;
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::events::EngineEvent;
use crate::fetch::{extension_from_url, ProgressFn, TrackFetcher};
use crate::model::{preload_priority, SongDescriptor, Track};
use crate::playback::clock::{self, TransportClock};
use crate::playback::mixer::StemMixer;
use crate::state::{PlaybackPhase, SharedState};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Handles shared between the engine and its loader tasks
#[derive(Clone)]
pub(crate) struct LoaderContext {
    pub state: Arc<SharedState>,
    pub clock: Arc<TransportClock>,
    pub mixer: Arc<Mutex<StemMixer>>,
    pub fetcher: Arc<dyn TrackFetcher>,
    pub cache: Option<PreloadCache>,
    pub epoch: Arc<AtomicU64>,
    pub config: EngineConfig,
}

impl LoaderContext {
    fn epoch_current(&self, epoch: u64) -> bool {
        self.epoch.load(Ordering::Acquire) == epoch
    }
}

/// Spawn both load phases for a song
///
/// The mixdown phase and the stem phase run concurrently; the mixdown is
/// expected to win and make the song playable first. The load is only
/// declared failed once both phases have finished, so a song whose stems
/// all fail (or that has none) still becomes playable when its mixdown
/// lands.
pub(crate) fn spawn_song_load(ctx: LoaderContext, song: SongDescriptor, epoch: u64) {
    tokio::spawn(async move {
        tokio::join!(
            load_mixdown(&ctx, &song, epoch),
            load_stems(&ctx, &song, epoch),
        );
        finish_load(&ctx, &song, epoch).await;
    });
}

/// Settle the phase once both load phases have run their course
async fn finish_load(ctx: &LoaderContext, song: &SongDescriptor, epoch: u64) {
    if !ctx.epoch_current(epoch) {
        return;
    }
    if ctx.state.phase().await != PlaybackPhase::Loading {
        return;
    }

    let snap = ctx.state.snapshot();
    if snap.mixdown_ready || ctx.state.any_track_loaded().await {
        ctx.state.set_phase(PlaybackPhase::Ready).await;
    } else {
        warn!(song_id = %song.id, "Song load failed: no playable audio");
        ctx.state.set_phase(PlaybackPhase::Idle).await;
    }
}

/// Phase one: single pre-mixed file
async fn load_mixdown(ctx: &LoaderContext, song: &SongDescriptor, epoch: u64) {
    let url = match &song.mixdown_url {
        Some(url) => url.clone(),
        None => return,
    };

    let on_progress = mixdown_progress_fn(ctx, song.id);
    let buffer = match fetch_and_decode(ctx, &url, Some(on_progress)).await {
        Ok(buffer) => buffer,
        Err(e) => {
            warn!(song_id = %song.id, "Mixdown load failed: {}", e);
            return;
        }
    };

    // The epoch check has to happen under the mixer lock: a newer
    // `load_song` bumps the epoch before it takes the lock to reset the
    // mixer, so a stale install either fails the check here or is wiped
    // by the reset that follows it.
    {
        let mut mixer = ctx.mixer.lock().unwrap();
        if !ctx.epoch_current(epoch) {
            debug!(song_id = %song.id, "Discarding stale mixdown");
            return;
        }
        mixer.install_mixdown(buffer);
    }
    ctx.state.set_mixdown_ready(song.id).await;
    ctx.state.emit(EngineEvent::MixdownReady {
        song_id: song.id,
        timestamp: chrono::Utc::now(),
    });

    // First playable audio: the song leaves Loading even though stems are
    // still in flight
    if ctx.state.phase().await == PlaybackPhase::Loading {
        ctx.state.set_phase(PlaybackPhase::Ready).await;
    }
    info!(song_id = %song.id, "Mixdown ready");
}

/// Phase two: individual stems, priority-ordered, batched
async fn load_stems(ctx: &LoaderContext, song: &SongDescriptor, epoch: u64) {
    let mut ordered: Vec<&Track> = song.tracks.iter().collect();
    ordered.sort_by_key(|t| preload_priority(t));

    let batch_size = ctx.config.batch_size_for(song.tracks.len());
    for batch in ordered.chunks(batch_size) {
        if !ctx.epoch_current(epoch) {
            debug!(song_id = %song.id, "Abandoning superseded stem load");
            return;
        }
        let loads = batch
            .iter()
            .map(|track| load_one_stem(ctx, song, track, epoch));
        futures::future::join_all(loads).await;

        // With no mixdown there is nothing to crossfade out of; go straight
        // to the stem buses and out of Loading on the first loaded track
        if song.mixdown_url.is_none()
            && ctx.epoch_current(epoch)
            && ctx.state.any_track_loaded().await
        {
            if ctx.clock.mode_discriminant() == clock::MODE_MIXDOWN {
                ctx.mixer.lock().unwrap().switch_to_stems();
                ctx.state.republish().await;
            }
            if ctx.state.phase().await == PlaybackPhase::Loading {
                ctx.state.set_phase(PlaybackPhase::Ready).await;
            }
        }
    }

    if !ctx.epoch_current(epoch) {
        return;
    }

    if ctx.state.all_tracks_ready().await {
        ctx.state.emit(EngineEvent::AllTracksReady {
            song_id: song.id,
            timestamp: chrono::Utc::now(),
        });
        info!(song_id = %song.id, "All stems ready");
    }
}

async fn load_one_stem(ctx: &LoaderContext, song: &SongDescriptor, track: &Track, epoch: u64) {
    let cached = ctx
        .cache
        .as_ref()
        .and_then(|cache| cache.cached_bytes(song.id, track.id));

    let result = match cached {
        Some(handle) => {
            debug!(track_id = %track.id, "Stem served from preload cache");
            ctx.state.set_track_percent(track.id, 100).await;
            decode_bytes(handle.bytes().to_vec(), &track.url).await
        }
        None => {
            let on_progress = stem_progress_fn(ctx, track.id);
            fetch_and_decode(ctx, &track.url, Some(on_progress)).await
        }
    };

    if !ctx.epoch_current(epoch) {
        debug!(track_id = %track.id, "Discarding stale stem");
        return;
    }

    match result {
        Ok(buffer) => {
            ctx.mixer.lock().unwrap().install_stem(track.id, buffer);
            ctx.state.set_track_loaded(track.id).await;
            ctx.state.emit(EngineEvent::TrackLoaded {
                song_id: song.id,
                track_id: track.id,
                timestamp: chrono::Utc::now(),
            });
            debug!(track_id = %track.id, name = %track.name, "Stem loaded");
        }
        Err(e) => {
            warn!(track_id = %track.id, name = %track.name, "Stem load failed: {}", e);
            ctx.state.set_track_failed(track.id).await;
            ctx.state.emit(EngineEvent::TrackLoadFailed {
                song_id: song.id,
                track_id: track.id,
                reason: e.to_string(),
                timestamp: chrono::Utc::now(),
            });
        }
    }
}

async fn fetch_and_decode(
    ctx: &LoaderContext,
    url: &str,
    on_progress: Option<ProgressFn>,
) -> Result<crate::audio::TrackBuffer> {
    let bytes = ctx.fetcher.fetch(url, on_progress).await?;
    decode_bytes(bytes, url).await
}

/// Decode off the async runtime; decoding a full track is CPU-bound
async fn decode_bytes(bytes: Vec<u8>, url: &str) -> Result<crate::audio::TrackBuffer> {
    let hint = extension_from_url(url).map(str::to_string);
    tokio::task::spawn_blocking(move || decode_audio_bytes(bytes, hint.as_deref()))
        .await
        .map_err(|e| Error::Internal(format!("Decode task panicked: {}", e)))?
}

/// Progress callback bridging the sync fetch callback into async state
fn stem_progress_fn(ctx: &LoaderContext, track_id: Uuid) -> ProgressFn {
    let state = Arc::clone(&ctx.state);
    Arc::new(move |percent| {
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            state.set_track_percent(track_id, percent).await;
        });
    })
}

fn mixdown_progress_fn(ctx: &LoaderContext, song_id: Uuid) -> ProgressFn {
    let state = Arc::clone(&ctx.state);
    Arc::new(move |percent| {
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            state.set_mixdown_percent(song_id, percent).await;
        });
    })
}
