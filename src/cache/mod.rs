//! Track preload cache
//!
//! Opportunistically fetches per-track audio bytes for songs likely to be
//! played soon, so the engine finds them resident instead of hitting the
//! network. Leaf component: the engine reads from it, the cache never calls
//! into the engine.
//!
//! Policy highlights:
//! - one song actively preloading at a time, FIFO across songs
//! - within a song, tracks fetch in semantic priority order, in small
//!   batches (3 concurrent, 2 for songs with many tracks)
//! - at most `max_cached_songs` entries; oldest insertion evicted first,
//!   buffers released before removal
//! - individual fetch failures are tolerated; a song with zero successes
//!   ends in `Error`, anything else in `Ready`

pub mod entry;

pub use entry::{CachedTrack, PreloadState};

use crate::config::PreloadConfig;
use crate::fetch::{ProgressFn, TrackFetcher};
use crate::model::{preload_priority, SongDescriptor, Track};
use entry::CacheEntry;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

struct CacheInner {
    entries: HashMap<Uuid, CacheEntry>,
    queue: VecDeque<SongDescriptor>,
    active: Option<Uuid>,
    worker_running: bool,
}

/// Song preload cache
///
/// Cheap to clone; clones share the same cache state.
#[derive(Clone)]
pub struct PreloadCache {
    config: PreloadConfig,
    fetcher: Arc<dyn TrackFetcher>,
    inner: Arc<Mutex<CacheInner>>,
    next_generation: Arc<AtomicU64>,
}

impl PreloadCache {
    pub fn new(config: PreloadConfig, fetcher: Arc<dyn TrackFetcher>) -> Self {
        Self {
            config,
            fetcher,
            inner: Arc::new(Mutex::new(CacheInner {
                entries: HashMap::new(),
                queue: VecDeque::new(),
                active: None,
                worker_running: false,
            })),
            next_generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Schedule background preloading of a song
    ///
    /// Idempotent: requests for songs already cached, already loading, or
    /// already queued are ignored. A song that previously ended in `Error`
    /// is retried.
    pub fn queue_preload(&self, song: &SongDescriptor) {
        let spawn_worker = {
            let mut inner = self.inner.lock().unwrap();

            let already_known = match inner.entries.get(&song.id) {
                Some(entry) => entry.state != PreloadState::Error,
                None => false,
            };
            let already_queued = inner.queue.iter().any(|s| s.id == song.id);
            if already_known || already_queued {
                debug!(song_id = %song.id, "Preload request ignored (already cached/loading/queued)");
                return;
            }

            // Retry path: forget the failed attempt
            if let Some(mut old) = inner.entries.remove(&song.id) {
                old.release_buffers();
            }

            inner.queue.push_back(song.clone());
            if inner.worker_running {
                false
            } else {
                inner.worker_running = true;
                true
            }
        };

        if spawn_worker {
            let this = self.clone();
            tokio::spawn(async move {
                this.run_worker().await;
            });
        }
    }

    /// Drain the song queue, one song at a time
    async fn run_worker(&self) {
        loop {
            let song = {
                let mut inner = self.inner.lock().unwrap();
                match inner.queue.pop_front() {
                    Some(song) => {
                        inner.active = Some(song.id);
                        song
                    }
                    None => {
                        inner.worker_running = false;
                        inner.active = None;
                        return;
                    }
                }
            };

            self.load_song(&song).await;

            let mut inner = self.inner.lock().unwrap();
            inner.active = None;
        }
    }

    /// Fetch all of one song's tracks into a fresh cache entry
    async fn load_song(&self, song: &SongDescriptor) {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
        info!(song_id = %song.id, tracks = song.tracks.len(), "Preloading song");

        {
            let mut inner = self.inner.lock().unwrap();
            Self::evict_to_capacity(&mut inner, self.config.max_cached_songs);
            inner
                .entries
                .insert(song.id, CacheEntry::new(song.tracks.len(), generation));
        }

        // Fixed semantic priority: coaching/master first, then instrumental,
        // lead vocal, harmony, the rest
        let mut ordered: Vec<&Track> = song.tracks.iter().collect();
        ordered.sort_by_key(|t| preload_priority(t));

        let batch_size = self.config.batch_size_for(song.tracks.len());
        for batch in ordered.chunks(batch_size) {
            let fetches = batch.iter().map(|track| {
                let this = self.clone();
                let song_id = song.id;
                let track_id = track.id;
                let url = track.url.clone();
                async move {
                    let progress_cache = this.clone();
                    let on_progress: ProgressFn = Arc::new(move |percent| {
                        progress_cache.record_track_percent(song_id, generation, track_id, percent);
                    });

                    match this.fetcher.fetch(&url, Some(on_progress)).await {
                        Ok(bytes) => this.record_track_bytes(song_id, generation, track_id, bytes),
                        Err(e) => {
                            warn!(song_id = %song_id, track_id = %track_id, "Track preload failed: {}", e);
                            this.record_track_failed(song_id, generation, track_id);
                        }
                    }
                }
            });
            // Await the whole batch (failures already absorbed) before the
            // next batch starts
            futures::future::join_all(fetches).await;
        }

        let mut inner = self.inner.lock().unwrap();
        if let Some(entry) = inner.entries.get_mut(&song.id) {
            if entry.generation == generation {
                entry.state = if entry.tracks.is_empty() {
                    PreloadState::Error
                } else {
                    PreloadState::Ready
                };
                info!(
                    song_id = %song.id,
                    cached = entry.tracks.len(),
                    total = entry.track_total,
                    state = ?entry.state,
                    "Preload finished"
                );
            }
        }
    }

    /// Evict oldest-inserted entries until there is room for one more
    fn evict_to_capacity(inner: &mut CacheInner, max_cached_songs: usize) {
        while inner.entries.len() >= max_cached_songs.max(1) {
            let oldest = inner
                .entries
                .iter()
                .min_by_key(|(_, e)| e.inserted_at)
                .map(|(id, _)| *id);
            match oldest {
                Some(id) => {
                    if let Some(mut entry) = inner.entries.remove(&id) {
                        info!(song_id = %id, bytes = entry.byte_size(), "Evicting cached song");
                        entry.release_buffers();
                    }
                }
                None => break,
            }
        }
    }

    // === Stale-safe recording (generation checked under the lock) ===

    fn record_track_percent(&self, song_id: Uuid, generation: u64, track_id: Uuid, percent: u8) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(entry) = inner.entries.get_mut(&song_id) {
            if entry.generation == generation && entry.state == PreloadState::Loading {
                entry.track_percent.insert(track_id, percent.min(100));
            }
        }
    }

    fn record_track_bytes(&self, song_id: Uuid, generation: u64, track_id: Uuid, bytes: Vec<u8>) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(entry) = inner.entries.get_mut(&song_id) {
            if entry.generation == generation {
                entry.track_percent.insert(track_id, 100);
                entry.tracks.insert(track_id, CachedTrack::new(bytes));
            }
        }
    }

    fn record_track_failed(&self, song_id: Uuid, generation: u64, track_id: Uuid) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(entry) = inner.entries.get_mut(&song_id) {
            if entry.generation == generation {
                // Settled for progress purposes, just without bytes
                entry.track_percent.insert(track_id, 100);
            }
        }
    }

    // === Read-only queries ===

    /// Song finished preloading with at least one track cached
    pub fn is_preloaded(&self, song_id: Uuid) -> bool {
        self.loading_state(song_id) == PreloadState::Ready
    }

    /// Lifecycle state; queued-but-not-started songs report `Loading`
    pub fn loading_state(&self, song_id: Uuid) -> PreloadState {
        let inner = self.inner.lock().unwrap();
        if let Some(entry) = inner.entries.get(&song_id) {
            entry.state
        } else if inner.queue.iter().any(|s| s.id == song_id) {
            PreloadState::Loading
        } else {
            PreloadState::Idle
        }
    }

    /// Overall fetch progress for a song, 0-100
    pub fn progress(&self, song_id: Uuid) -> u8 {
        let inner = self.inner.lock().unwrap();
        inner.entries.get(&song_id).map(|e| e.progress()).unwrap_or(0)
    }

    /// Cached bytes for one track, if resident
    pub fn cached_bytes(&self, song_id: Uuid, track_id: Uuid) -> Option<CachedTrack> {
        let inner = self.inner.lock().unwrap();
        inner
            .entries
            .get(&song_id)
            .and_then(|e| e.tracks.get(&track_id))
            .cloned()
    }

    /// Release one song's buffers, or every song's when no id is given
    ///
    /// Safe to call while a different (or the same) song is actively
    /// loading: in-flight results for a cleared entry are discarded by the
    /// generation check.
    pub fn clear_cache(&self, song_id: Option<Uuid>) {
        let mut inner = self.inner.lock().unwrap();
        match song_id {
            Some(id) => {
                if let Some(mut entry) = inner.entries.remove(&id) {
                    entry.release_buffers();
                    debug!(song_id = %id, "Cleared cached song");
                }
            }
            None => {
                for (_, mut entry) in inner.entries.drain() {
                    entry.release_buffers();
                }
                debug!("Cleared entire preload cache");
            }
        }
    }

    /// Number of resident entries (loading or finished)
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
