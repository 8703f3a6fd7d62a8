//! Core song and track data model
//!
//! Descriptors supplied by the host application (song + ordered track list)
//! and the mutable per-track mix state owned by the engine. Descriptors are
//! immutable; the engine never writes back into them.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default mix volume for lead-vocal tracks
pub const DEFAULT_VOCAL_VOLUME: f32 = 1.0;

/// Default mix volume for all other track categories
pub const DEFAULT_TRACK_VOLUME: f32 = 0.85;

/// Semantic category of an isolated track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackCategory {
    Vocal,
    Harmony,
    Instrumental,
    Drums,
    Bass,
    Keys,
    Other,
}

/// Immutable per-track descriptor
///
/// Owned by the song descriptor. The `url` is opaque to the core; whatever
/// transport the configured [`TrackFetcher`](crate::fetch::TrackFetcher)
/// understands.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Track {
    /// Track id (unique within the song)
    pub id: Uuid,

    /// Display name (e.g. "Lead Vocal", "Coaching")
    pub name: String,

    /// Semantic category
    pub category: TrackCategory,

    /// Source URL for the track's audio bytes
    pub url: String,

    /// Display color for UI (opaque to the engine)
    #[serde(default)]
    pub color: Option<String>,

    /// Optional precomputed waveform samples for UI rendering
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub waveform: Option<Vec<f32>>,
}

/// Song descriptor supplied once per playback session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SongDescriptor {
    /// Song id
    pub id: Uuid,

    /// Optional pre-mixed full-song file for instant playback start
    #[serde(default)]
    pub mixdown_url: Option<String>,

    /// Ordered track list
    pub tracks: Vec<Track>,

    /// Nominal duration in seconds
    pub duration: f64,
}

/// Mutable per-track mix state
///
/// Exactly one authoritative list of these exists per loaded song. Effective
/// gain is derived from the whole list (solo is global), see
/// [`effective_gain`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackMixState {
    /// Volume fader position (0.0 - 1.0)
    pub volume: f32,

    /// Muted flag; mute always wins over solo
    pub muted: bool,

    /// Solo flag; any soloed track silences all non-soloed tracks
    pub solo: bool,

    /// Stereo pan (-1.0 left .. 1.0 right), consumed by the mix bus
    pub pan: f32,
}

impl TrackMixState {
    /// Default mix state for a track of the given category
    ///
    /// Vocal tracks default louder than the rest so the part being practiced
    /// sits on top of the mix.
    pub fn for_category(category: TrackCategory) -> Self {
        let volume = match category {
            TrackCategory::Vocal => DEFAULT_VOCAL_VOLUME,
            _ => DEFAULT_TRACK_VOLUME,
        };
        Self {
            volume,
            muted: false,
            solo: false,
            pan: 0.0,
        }
    }
}

/// Compute the effective (audible) gain of one track given the global solo
/// state of the whole mix.
///
/// Rules, in priority order:
/// 1. muted → 0.0 (mute always wins, including over the track's own solo)
/// 2. any track soloed and this one not → 0.0
/// 3. otherwise → the track's volume
pub fn effective_gain(state: &TrackMixState, any_solo: bool) -> f32 {
    if state.muted {
        0.0
    } else if any_solo && !state.solo {
        0.0
    } else {
        state.volume
    }
}

/// Per-track load progress, aggregated into the engine snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackLoadProgress {
    /// Fully fetched and decoded
    pub loaded: bool,

    /// Fetch/decode progress percentage (0-100)
    pub percent: u8,

    /// Fetch or decode failed; the track is excluded from playback and from
    /// the all-tracks-ready computation
    pub failed: bool,
}

impl TrackLoadProgress {
    pub fn pending() -> Self {
        Self {
            loaded: false,
            percent: 0,
            failed: false,
        }
    }
}

/// Fetch priority of a track within a song preload
///
/// Lower value fetches earlier. Reference/coaching and pre-mixed master
/// tracks come first (most valuable to have ready), then instrumental, then
/// lead vocal, then harmony, then everything else.
pub fn preload_priority(track: &Track) -> u8 {
    let name = track.name.to_ascii_lowercase();
    if name.contains("coach") || name.contains("master") || name.contains("mix") {
        return 0;
    }
    match track.category {
        TrackCategory::Instrumental => 1,
        TrackCategory::Vocal => 2,
        TrackCategory::Harmony => 3,
        _ => 4,
    }
}
