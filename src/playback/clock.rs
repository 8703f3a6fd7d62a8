//! Shared transport clock
//!
//! One clock per engine. Every audio source is sampled at the same clock
//! position inside a render pass, so tracks cannot drift relative to one
//! another regardless of playback rate.
//!
//! Position is kept in fractional frames at the fixed 44.1kHz mix rate and
//! stored as f64 bit patterns in atomics, so the audio callback advances it
//! without locking and the async side reads it without tearing. The loop wrap
//! is applied *before* the new position is stored: no reader ever observes a
//! position past the loop end.

use crate::config::MIX_SAMPLE_RATE;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};

/// Minimum accepted playback rate multiplier
pub const MIN_RATE: f64 = 0.25;

/// Maximum accepted playback rate multiplier
pub const MAX_RATE: f64 = 4.0;

/// Audio mode discriminants shared with the mixer (see
/// [`AudioMode`](crate::state::AudioMode))
pub const MODE_MIXDOWN: u8 = 0;
pub const MODE_CROSSFADING: u8 = 1;
pub const MODE_STEMS: u8 = 2;

/// Lock-free transport state shared between the render path and the engine
pub struct TransportClock {
    /// Current position in fractional frames (f64 bits)
    position_frames: AtomicU64,

    /// Song duration in frames (f64 bits)
    duration_frames: AtomicU64,

    /// Playback rate multiplier (f64 bits)
    rate: AtomicU64,

    /// Loop region start in frames (f64 bits); valid when `loop_set`
    loop_start_frames: AtomicU64,

    /// Loop region end in frames (f64 bits); valid when `loop_set`
    loop_end_frames: AtomicU64,

    /// A loop region has been defined
    loop_set: AtomicBool,

    /// Looping is enabled
    loop_enabled: AtomicBool,

    /// Transport is running (mixer renders silence when false)
    playing: AtomicBool,

    /// Render path reached the end of the song
    ended: AtomicBool,

    /// Current audio mode (MODE_* discriminant)
    mode: AtomicU8,
}

fn to_bits(v: f64) -> u64 {
    v.to_bits()
}

fn from_bits(b: u64) -> f64 {
    f64::from_bits(b)
}

impl TransportClock {
    pub fn new() -> Self {
        Self {
            position_frames: AtomicU64::new(to_bits(0.0)),
            duration_frames: AtomicU64::new(to_bits(0.0)),
            rate: AtomicU64::new(to_bits(1.0)),
            loop_start_frames: AtomicU64::new(to_bits(0.0)),
            loop_end_frames: AtomicU64::new(to_bits(0.0)),
            loop_set: AtomicBool::new(false),
            loop_enabled: AtomicBool::new(false),
            playing: AtomicBool::new(false),
            ended: AtomicBool::new(false),
            mode: AtomicU8::new(MODE_MIXDOWN),
        }
    }

    /// Convert seconds to frames at the mix rate
    pub fn seconds_to_frames(seconds: f64) -> f64 {
        seconds * MIX_SAMPLE_RATE as f64
    }

    /// Convert frames at the mix rate to seconds
    pub fn frames_to_seconds(frames: f64) -> f64 {
        frames / MIX_SAMPLE_RATE as f64
    }

    // === Position ===

    pub fn position_frames(&self) -> f64 {
        from_bits(self.position_frames.load(Ordering::Acquire))
    }

    pub fn position_seconds(&self) -> f64 {
        Self::frames_to_seconds(self.position_frames())
    }

    /// Seek to an absolute position in seconds, clamped to [0, duration]
    pub fn seek_seconds(&self, seconds: f64) {
        let duration = from_bits(self.duration_frames.load(Ordering::Acquire));
        let frames = Self::seconds_to_frames(seconds).clamp(0.0, duration);
        self.position_frames.store(to_bits(frames), Ordering::Release);
        self.ended.store(false, Ordering::Release);
    }

    /// Advance by one rendered output frame (scaled by rate), applying the
    /// loop wrap before the store. Returns true if the end of the song was
    /// reached by this advance.
    pub fn advance_frame(&self) -> bool {
        let rate = self.rate_value();
        let duration = from_bits(self.duration_frames.load(Ordering::Acquire));
        let mut pos = self.position_frames() + rate;

        if self.loop_enabled.load(Ordering::Acquire) && self.loop_set.load(Ordering::Acquire) {
            let start = from_bits(self.loop_start_frames.load(Ordering::Acquire));
            let end = from_bits(self.loop_end_frames.load(Ordering::Acquire));
            if end > start && pos >= end {
                pos = start + (pos - end) % (end - start);
            }
        }

        let ended = duration > 0.0 && pos >= duration;
        if ended {
            pos = duration;
            self.ended.store(true, Ordering::Release);
        }
        self.position_frames.store(to_bits(pos), Ordering::Release);
        ended
    }

    // === Duration ===

    pub fn set_duration_seconds(&self, seconds: f64) {
        self.duration_frames
            .store(to_bits(Self::seconds_to_frames(seconds.max(0.0))), Ordering::Release);
    }

    pub fn duration_seconds(&self) -> f64 {
        Self::frames_to_seconds(from_bits(self.duration_frames.load(Ordering::Acquire)))
    }

    // === Rate ===

    pub fn rate_value(&self) -> f64 {
        from_bits(self.rate.load(Ordering::Acquire))
    }

    /// Set the playback rate multiplier, clamped to a sane range
    pub fn set_rate(&self, rate: f64) {
        let rate = if rate.is_finite() { rate } else { 1.0 };
        self.rate
            .store(to_bits(rate.clamp(MIN_RATE, MAX_RATE)), Ordering::Release);
    }

    // === Loop region ===

    /// Define (and enable) an A/B loop region in seconds
    ///
    /// Bounds are clamped to the song and normalized so start < end; a
    /// degenerate region clears the loop instead.
    pub fn set_loop_seconds(&self, start: f64, end: f64) {
        let duration = self.duration_seconds();
        let (lo, hi) = if start <= end { (start, end) } else { (end, start) };
        let lo = lo.clamp(0.0, duration);
        let hi = hi.clamp(0.0, duration);
        if hi - lo <= f64::EPSILON {
            self.clear_loop();
            return;
        }
        self.loop_start_frames
            .store(to_bits(Self::seconds_to_frames(lo)), Ordering::Release);
        self.loop_end_frames
            .store(to_bits(Self::seconds_to_frames(hi)), Ordering::Release);
        self.loop_set.store(true, Ordering::Release);
        self.loop_enabled.store(true, Ordering::Release);
    }

    /// Toggle looping; returns the new enabled state. No-op without a region.
    pub fn toggle_loop(&self) -> bool {
        if !self.loop_set.load(Ordering::Acquire) {
            return false;
        }
        let enabled = !self.loop_enabled.load(Ordering::Acquire);
        self.loop_enabled.store(enabled, Ordering::Release);
        enabled
    }

    pub fn clear_loop(&self) {
        self.loop_enabled.store(false, Ordering::Release);
        self.loop_set.store(false, Ordering::Release);
    }

    pub fn loop_enabled(&self) -> bool {
        self.loop_enabled.load(Ordering::Acquire) && self.loop_set.load(Ordering::Acquire)
    }

    /// Loop region in seconds, if one is defined
    pub fn loop_region_seconds(&self) -> Option<(f64, f64)> {
        if self.loop_set.load(Ordering::Acquire) {
            Some((
                Self::frames_to_seconds(from_bits(self.loop_start_frames.load(Ordering::Acquire))),
                Self::frames_to_seconds(from_bits(self.loop_end_frames.load(Ordering::Acquire))),
            ))
        } else {
            None
        }
    }

    // === Transport flags ===

    pub fn set_playing(&self, playing: bool) {
        self.playing.store(playing, Ordering::Release);
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Acquire)
    }

    pub fn take_ended(&self) -> bool {
        self.ended.swap(false, Ordering::AcqRel)
    }

    // === Audio mode ===

    pub fn mode_discriminant(&self) -> u8 {
        self.mode.load(Ordering::Acquire)
    }

    pub fn set_mode_discriminant(&self, mode: u8) {
        self.mode.store(mode, Ordering::Release);
    }

    /// Reset the clock for a newly loaded song
    pub fn reset_for_song(&self, duration_seconds: f64) {
        self.set_duration_seconds(duration_seconds);
        self.position_frames.store(to_bits(0.0), Ordering::Release);
        self.clear_loop();
        self.ended.store(false, Ordering::Release);
        self.playing.store(false, Ordering::Release);
        self.mode.store(MODE_MIXDOWN, Ordering::Release);
    }
}

impl Default for TransportClock {
    fn default() -> Self {
        Self::new()
    }
}
