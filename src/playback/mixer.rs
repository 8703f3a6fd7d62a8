//! Stem mixer
//!
//! Pulls one frame at a time for the audio device callback. Every source is
//! sampled at the same transport-clock position, per-track effective gain and
//! pan are applied, the mixdown/stem buses are blended by the crossfade
//! envelope, and the master bus is applied last. The clock advances exactly
//! once per output frame, after all sources were read, so tracks can never
//! drift apart.
//!
//! Gain recomputation (volume/mute/solo/pan) replaces the whole gain table in
//! one call, before the next rendered frame; there is no per-track lag.

use crate::audio::types::{AudioFrame, TrackBuffer};
use crate::config::MIX_SAMPLE_RATE;
use crate::model::{effective_gain, Track, TrackMixState};
use crate::playback::clock::{self, TransportClock};
use crate::playback::crossfade::{CrossfadeEnvelope, FadeCurve};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// One stem slot: descriptor identity, decoded audio (when loaded) and the
/// current derived gains
struct StemSlot {
    track_id: Uuid,
    buffer: Option<TrackBuffer>,
    mix: TrackMixState,
    /// Derived: effective gain × pan, per channel
    gain_left: f32,
    gain_right: f32,
}

/// Multi-track mixing bus driven by the shared transport clock
pub struct StemMixer {
    clock: Arc<TransportClock>,

    /// Pre-mixed full-song buffer (fast-start bus)
    mixdown: Option<TrackBuffer>,

    /// Per-track slots in descriptor order
    stems: Vec<StemSlot>,

    /// Master bus
    master_volume: f32,
    master_muted: bool,

    /// Active mixdown → stems crossfade
    crossfade: Option<CrossfadeEnvelope>,

    /// Configured crossfade length
    crossfade_ms: u64,
    crossfade_curve: FadeCurve,
}

/// Balance-law pan: center passes both channels at unity
fn pan_gains(pan: f32) -> (f32, f32) {
    let pan = pan.clamp(-1.0, 1.0);
    ((1.0 - pan).min(1.0), (1.0 + pan).min(1.0))
}

impl StemMixer {
    pub fn new(clock: Arc<TransportClock>, crossfade_ms: u64) -> Self {
        Self {
            clock,
            mixdown: None,
            stems: Vec::new(),
            master_volume: 1.0,
            master_muted: false,
            crossfade: None,
            crossfade_ms,
            crossfade_curve: FadeCurve::EqualPower,
        }
    }

    /// Replace all slots for a newly loaded song. Buffers arrive later via
    /// [`install_stem`](Self::install_stem) as loading completes.
    pub fn load_song(&mut self, tracks: &[Track]) {
        self.mixdown = None;
        self.crossfade = None;
        self.stems = tracks
            .iter()
            .map(|t| {
                let mix = TrackMixState::for_category(t.category);
                StemSlot {
                    track_id: t.id,
                    buffer: None,
                    mix,
                    gain_left: 0.0,
                    gain_right: 0.0,
                }
            })
            .collect();
        self.recompute_gains();
    }

    pub fn install_mixdown(&mut self, buffer: TrackBuffer) {
        debug!(frames = buffer.frames(), "Mixdown buffer installed");
        self.mixdown = Some(buffer);
    }

    /// Install a decoded stem. Ignored for unknown track ids (stale results
    /// from a superseded load).
    pub fn install_stem(&mut self, track_id: Uuid, buffer: TrackBuffer) {
        if let Some(slot) = self.stems.iter_mut().find(|s| s.track_id == track_id) {
            debug!(%track_id, frames = buffer.frames(), "Stem buffer installed");
            slot.buffer = Some(buffer);
        }
    }

    // === Mix state ===

    /// Set one track's volume fader (clamped 0..=1); returns false for an
    /// unknown track id
    pub fn set_volume(&mut self, track_id: Uuid, volume: f32) -> bool {
        let found = self.with_slot(track_id, |mix| mix.volume = volume.clamp(0.0, 1.0));
        if found {
            self.recompute_gains();
        }
        found
    }

    pub fn set_muted(&mut self, track_id: Uuid, muted: bool) -> bool {
        let found = self.with_slot(track_id, |mix| mix.muted = muted);
        if found {
            self.recompute_gains();
        }
        found
    }

    /// Set one track's solo flag. Solo is global: the gain of *every* track
    /// is re-derived, not just the target's.
    pub fn set_solo(&mut self, track_id: Uuid, solo: bool) -> bool {
        let found = self.with_slot(track_id, |mix| mix.solo = solo);
        if found {
            self.recompute_gains();
        }
        found
    }

    pub fn set_pan(&mut self, track_id: Uuid, pan: f32) -> bool {
        let found = self.with_slot(track_id, |mix| mix.pan = pan.clamp(-1.0, 1.0));
        if found {
            self.recompute_gains();
        }
        found
    }

    /// Read back one track's mix state
    pub fn mix_state(&self, track_id: Uuid) -> Option<TrackMixState> {
        self.stems
            .iter()
            .find(|s| s.track_id == track_id)
            .map(|s| s.mix)
    }

    pub fn set_master_volume(&mut self, volume: f32) {
        self.master_volume = volume.clamp(0.0, 1.0);
    }

    pub fn master_volume(&self) -> f32 {
        self.master_volume
    }

    /// Zero/restore the master bus without touching individual track states
    pub fn set_master_muted(&mut self, muted: bool) {
        self.master_muted = muted;
    }

    pub fn master_muted(&self) -> bool {
        self.master_muted
    }

    fn with_slot(&mut self, track_id: Uuid, f: impl FnOnce(&mut TrackMixState)) -> bool {
        match self.stems.iter_mut().find(|s| s.track_id == track_id) {
            Some(slot) => {
                f(&mut slot.mix);
                true
            }
            None => false,
        }
    }

    /// Rebuild the derived gain table for all slots in one pass
    fn recompute_gains(&mut self) {
        let any_solo = self.stems.iter().any(|s| s.mix.solo);
        for slot in &mut self.stems {
            let gain = effective_gain(&slot.mix, any_solo);
            let (pl, pr) = pan_gains(slot.mix.pan);
            slot.gain_left = gain * pl;
            slot.gain_right = gain * pr;
        }
    }

    // === Mode transitions ===

    /// Begin the timed mixdown → stems handoff
    pub fn begin_crossfade(&mut self) {
        if self.clock.mode_discriminant() != clock::MODE_MIXDOWN {
            return;
        }
        self.crossfade = Some(CrossfadeEnvelope::new(
            self.crossfade_ms,
            MIX_SAMPLE_RATE,
            self.crossfade_curve,
        ));
        self.clock.set_mode_discriminant(clock::MODE_CROSSFADING);
        debug!(duration_ms = self.crossfade_ms, "Crossfade to stems started");
    }

    /// Switch straight to stems with no fade (used while paused, or when the
    /// song has no mixdown at all)
    pub fn switch_to_stems(&mut self) {
        self.crossfade = None;
        self.clock.set_mode_discriminant(clock::MODE_STEMS);
    }

    // === Rendering ===

    /// Produce one output frame and advance the clock
    pub fn next_frame(&mut self) -> AudioFrame {
        if !self.clock.is_playing() {
            return AudioFrame::SILENCE;
        }

        let position = self.clock.position_frames();
        let mode = self.clock.mode_discriminant();

        let (mixdown_gain, stems_gain) = match mode {
            clock::MODE_MIXDOWN => (1.0, 0.0),
            clock::MODE_STEMS => (0.0, 1.0),
            _ => self
                .crossfade
                .as_ref()
                .map(|env| env.gains())
                .unwrap_or((0.0, 1.0)),
        };

        let mut left = 0.0f32;
        let mut right = 0.0f32;

        if mixdown_gain > 0.0 {
            if let Some(mixdown) = &self.mixdown {
                let frame = mixdown.sample_at(position);
                left += frame.left * mixdown_gain;
                right += frame.right * mixdown_gain;
            }
        }

        if stems_gain > 0.0 {
            for slot in &self.stems {
                if let Some(buffer) = &slot.buffer {
                    if slot.gain_left > 0.0 || slot.gain_right > 0.0 {
                        let frame = buffer.sample_at(position);
                        left += frame.left * slot.gain_left * stems_gain;
                        right += frame.right * slot.gain_right * stems_gain;
                    }
                }
            }
        }

        let master = if self.master_muted { 0.0 } else { self.master_volume };
        let out = AudioFrame {
            left: (left * master).clamp(-1.0, 1.0),
            right: (right * master).clamp(-1.0, 1.0),
        };

        if let Some(env) = &mut self.crossfade {
            if env.advance() {
                self.crossfade = None;
                self.clock.set_mode_discriminant(clock::MODE_STEMS);
                debug!("Crossfade complete, now on isolated stems");
            }
        }

        self.clock.advance_frame();
        out
    }

    /// Render a block of interleaved stereo frames
    pub fn render(&mut self, output: &mut [f32]) {
        for frame in output.chunks_mut(2) {
            let f = self.next_frame();
            frame[0] = f.left;
            if frame.len() > 1 {
                frame[1] = f.right;
            }
        }
    }
}
