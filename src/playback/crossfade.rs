//! Crossfade envelope for the mixdown → stems handoff
//!
//! When all stems become ready during playback, the engine fades the mixdown
//! bus to silence while fading the stem buses to full over a short fixed
//! interval, both referenced to the same render clock, so the switch is
//! inaudible.

use serde::{Deserialize, Serialize};
use std::f32::consts::FRAC_PI_2;

/// Fade curve shapes
///
/// Each curve provides a different perceptual quality:
/// - Linear: constant rate of change
/// - SCurve: smooth acceleration and deceleration
/// - EqualPower: constant perceived loudness across the transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FadeCurve {
    /// v(t) = t
    Linear,

    /// v(t) = 0.5 × (1 - cos(π × t))
    SCurve,

    /// v(t) = sin(t × π/2); the sister fade-out uses cos, and the two sum to
    /// unity power at every point
    EqualPower,
}

impl FadeCurve {
    /// Fade-in multiplier at normalized position t ∈ [0, 1]
    pub fn fade_in(&self, t: f32) -> f32 {
        let t = t.clamp(0.0, 1.0);
        match self {
            FadeCurve::Linear => t,
            FadeCurve::SCurve => 0.5 * (1.0 - (std::f32::consts::PI * t).cos()),
            FadeCurve::EqualPower => (t * FRAC_PI_2).sin(),
        }
    }

    /// Fade-out multiplier at normalized position t ∈ [0, 1]
    pub fn fade_out(&self, t: f32) -> f32 {
        let t = t.clamp(0.0, 1.0);
        match self {
            FadeCurve::Linear => 1.0 - t,
            FadeCurve::SCurve => 0.5 * (1.0 + (std::f32::consts::PI * t).cos()),
            FadeCurve::EqualPower => (t * FRAC_PI_2).cos(),
        }
    }
}

/// Running crossfade, advanced one rendered frame at a time
///
/// Progress is counted in *output* frames so a playback-rate change mid-fade
/// does not stretch the audible transition.
#[derive(Debug, Clone)]
pub struct CrossfadeEnvelope {
    total_frames: u64,
    frames_done: u64,
    curve: FadeCurve,
}

impl CrossfadeEnvelope {
    /// Create an envelope lasting `duration_ms` at the given output rate
    pub fn new(duration_ms: u64, sample_rate: u32, curve: FadeCurve) -> Self {
        let total_frames = (duration_ms * sample_rate as u64 / 1000).max(1);
        Self {
            total_frames,
            frames_done: 0,
            curve,
        }
    }

    /// Bus gains at the current position: (outgoing mixdown, incoming stems)
    pub fn gains(&self) -> (f32, f32) {
        let t = self.frames_done as f32 / self.total_frames as f32;
        (self.curve.fade_out(t), self.curve.fade_in(t))
    }

    /// Advance by one rendered frame; returns true once the fade completed
    pub fn advance(&mut self) -> bool {
        if self.frames_done < self.total_frames {
            self.frames_done += 1;
        }
        self.is_complete()
    }

    pub fn is_complete(&self) -> bool {
        self.frames_done >= self.total_frames
    }
}
