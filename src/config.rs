//! Configuration for the playback engine and preload cache
//!
//! All values have built-in defaults (code constants). Host applications can
//! construct the structs directly or load them from a TOML fragment; missing
//! fields fall back to the defaults.

use crate::error::{Error, Result};
use serde::Deserialize;

/// Fixed mix sample rate; all decoded audio is normalized to this
pub const MIX_SAMPLE_RATE: u32 = 44_100;

/// Playback engine configuration
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Named output device (None = system default, with fallback)
    #[serde(default)]
    pub output_device: Option<String>,

    /// Duration of the mixdown → stems crossfade, in milliseconds.
    ///
    /// Tunable; anything in the 150-400 ms range masks the handoff.
    #[serde(default = "default_crossfade_ms")]
    pub crossfade_ms: u64,

    /// Interval between periodic progress events while playing
    #[serde(default = "default_progress_interval_ms")]
    pub progress_interval_ms: u64,

    /// How often the engine monitor loop re-evaluates load/mode state
    #[serde(default = "default_monitor_interval_ms")]
    pub monitor_interval_ms: u64,

    /// Concurrent track fetches while loading a song
    #[serde(default = "default_track_batch_size")]
    pub track_batch_size: usize,

    /// Reduced batch size for songs with many tracks, so background stem
    /// loading does not starve the mixdown's own bandwidth
    #[serde(default = "default_large_song_batch_size")]
    pub large_song_batch_size: usize,

    /// Track count at or above which the reduced batch size applies
    #[serde(default = "default_large_song_threshold")]
    pub large_song_threshold: usize,
}

/// Preload cache configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PreloadConfig {
    /// Maximum number of fully cached songs before LRU eviction
    #[serde(default = "default_max_cached_songs")]
    pub max_cached_songs: usize,

    /// Concurrent track fetches within one song preload
    #[serde(default = "default_track_batch_size")]
    pub track_batch_size: usize,

    /// Reduced batch size for songs with many tracks
    #[serde(default = "default_large_song_batch_size")]
    pub large_song_batch_size: usize,

    /// Track count at or above which the reduced batch size applies
    #[serde(default = "default_large_song_threshold")]
    pub large_song_threshold: usize,
}

fn default_crossfade_ms() -> u64 {
    250
}

fn default_progress_interval_ms() -> u64 {
    1000
}

fn default_monitor_interval_ms() -> u64 {
    50
}

fn default_track_batch_size() -> usize {
    3
}

fn default_large_song_batch_size() -> usize {
    2
}

fn default_large_song_threshold() -> usize {
    10
}

fn default_max_cached_songs() -> usize {
    4
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            output_device: None,
            crossfade_ms: default_crossfade_ms(),
            progress_interval_ms: default_progress_interval_ms(),
            monitor_interval_ms: default_monitor_interval_ms(),
            track_batch_size: default_track_batch_size(),
            large_song_batch_size: default_large_song_batch_size(),
            large_song_threshold: default_large_song_threshold(),
        }
    }
}

impl Default for PreloadConfig {
    fn default() -> Self {
        Self {
            max_cached_songs: default_max_cached_songs(),
            track_batch_size: default_track_batch_size(),
            large_song_batch_size: default_large_song_batch_size(),
            large_song_threshold: default_large_song_threshold(),
        }
    }
}

impl EngineConfig {
    /// Parse from a TOML string
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| Error::Config(format!("Failed to parse engine config: {}", e)))
    }

    /// Batch size to use for a song with `track_count` tracks
    pub fn batch_size_for(&self, track_count: usize) -> usize {
        if track_count >= self.large_song_threshold {
            self.large_song_batch_size
        } else {
            self.track_batch_size
        }
    }
}

impl PreloadConfig {
    /// Parse from a TOML string
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| Error::Config(format!("Failed to parse cache config: {}", e)))
    }

    /// Batch size to use for a song with `track_count` tracks
    pub fn batch_size_for(&self, track_count: usize) -> usize {
        if track_count >= self.large_song_threshold {
            self.large_song_batch_size
        } else {
            self.track_batch_size
        }
    }
}
