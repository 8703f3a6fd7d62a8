//! Cache entry bookkeeping
//!
//! One entry per song: fetched track bytes, insertion timestamp for LRU
//! ordering, and per-track progress. Byte buffers are handed out as cheap
//! clones of an owning handle; releasing the entry drops the cache's
//! references so memory is reclaimed as soon as no reader holds a clone.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// Preload lifecycle of one song
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PreloadState {
    /// Not requested (or cleared)
    Idle,
    /// Fetching tracks
    Loading,
    /// At least one track cached; playback can use it
    Ready,
    /// Every track fetch failed
    Error,
}

/// Owning handle to one track's fetched bytes
#[derive(Debug, Clone)]
pub struct CachedTrack {
    bytes: Arc<Vec<u8>>,
}

impl CachedTrack {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes: Arc::new(bytes),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn byte_len(&self) -> usize {
        self.bytes.len()
    }
}

/// Per-song cache entry
pub struct CacheEntry {
    /// Fetched track bytes, keyed by track id
    pub(crate) tracks: HashMap<Uuid, CachedTrack>,

    /// Insertion time; LRU eviction removes the oldest first
    pub(crate) inserted_at: Instant,

    /// Lifecycle state
    pub(crate) state: PreloadState,

    /// Per-track fetch percent (0-100); failed tracks count as settled
    pub(crate) track_percent: HashMap<Uuid, u8>,

    /// Number of tracks this song's preload covers
    pub(crate) track_total: usize,

    /// Load generation; results tagged with an older generation are stale
    /// (the entry was cleared and possibly re-created mid-load)
    pub(crate) generation: u64,
}

impl CacheEntry {
    pub(crate) fn new(track_total: usize, generation: u64) -> Self {
        Self {
            tracks: HashMap::new(),
            inserted_at: Instant::now(),
            state: PreloadState::Loading,
            track_percent: HashMap::new(),
            track_total,
            generation,
        }
    }

    /// Overall fetch progress, 0-100
    pub(crate) fn progress(&self) -> u8 {
        if self.track_total == 0 {
            return 100;
        }
        let sum: u32 = self.track_percent.values().map(|&p| p as u32).sum();
        (sum / self.track_total as u32).min(100) as u8
    }

    /// Drop all byte handles held by this entry
    pub(crate) fn release_buffers(&mut self) {
        self.tracks.clear();
        self.tracks.shrink_to_fit();
    }

    /// Total bytes held (for eviction logging)
    pub(crate) fn byte_size(&self) -> usize {
        self.tracks.values().map(|t| t.byte_len()).sum()
    }
}
