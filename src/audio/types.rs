//! Core audio data types
//!
//! Decoded audio lives in [`TrackBuffer`]s: f32 interleaved stereo,
//! normalized to the fixed 44.1kHz mix rate, fully resident in RAM so the
//! mixer can sample any position without I/O.

use crate::config::MIX_SAMPLE_RATE;

/// One stereo output frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioFrame {
    pub left: f32,
    pub right: f32,
}

impl AudioFrame {
    pub const SILENCE: AudioFrame = AudioFrame { left: 0.0, right: 0.0 };
}

/// Decoded and resampled audio for one source, ready for playback
///
/// Format:
/// - f32 samples, -1.0 to 1.0
/// - stereo interleaved: [L, R, L, R, ...]
/// - sample rate always 44100 Hz after resampling
#[derive(Debug, Clone)]
pub struct TrackBuffer {
    /// PCM samples (interleaved stereo)
    samples: Vec<f32>,

    /// Number of stereo frames (samples.len() / 2)
    frames: usize,
}

impl TrackBuffer {
    /// Wrap interleaved stereo samples
    ///
    /// A trailing odd sample (malformed input) is dropped.
    pub fn from_interleaved(mut samples: Vec<f32>) -> Self {
        if samples.len() % 2 != 0 {
            samples.pop();
        }
        let frames = samples.len() / 2;
        Self { samples, frames }
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn is_empty(&self) -> bool {
        self.frames == 0
    }

    /// Duration in seconds at the mix rate
    pub fn duration_seconds(&self) -> f64 {
        self.frames as f64 / MIX_SAMPLE_RATE as f64
    }

    /// Sample the buffer at a fractional frame position with linear
    /// interpolation. Positions beyond the end return silence, which is how a
    /// short stem stays quiet while longer tracks keep playing.
    pub fn sample_at(&self, position: f64) -> AudioFrame {
        if position < 0.0 || self.frames == 0 {
            return AudioFrame::SILENCE;
        }
        let idx = position as usize;
        if idx >= self.frames {
            return AudioFrame::SILENCE;
        }

        let frac = (position - idx as f64) as f32;
        let (l0, r0) = (self.samples[idx * 2], self.samples[idx * 2 + 1]);
        if idx + 1 >= self.frames {
            return AudioFrame { left: l0, right: r0 };
        }
        let (l1, r1) = (self.samples[(idx + 1) * 2], self.samples[(idx + 1) * 2 + 1]);
        AudioFrame {
            left: l0 + (l1 - l0) * frac,
            right: r0 + (r1 - r0) * frac,
        }
    }

    /// Approximate resident size in bytes (for cache accounting/logging)
    pub fn byte_size(&self) -> usize {
        self.samples.len() * std::mem::size_of::<f32>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp_buffer(frames: usize) -> TrackBuffer {
        // Left channel counts up, right channel counts down
        let mut samples = Vec::with_capacity(frames * 2);
        for i in 0..frames {
            samples.push(i as f32);
            samples.push(-(i as f32));
        }
        TrackBuffer::from_interleaved(samples)
    }

    #[test]
    fn test_frame_count() {
        let buf = ramp_buffer(4);
        assert_eq!(buf.frames(), 4);
        assert!(!buf.is_empty());
    }

    #[test]
    fn test_odd_trailing_sample_dropped() {
        let buf = TrackBuffer::from_interleaved(vec![0.1, 0.2, 0.3]);
        assert_eq!(buf.frames(), 1);
    }

    #[test]
    fn test_sample_at_integer_position() {
        let buf = ramp_buffer(4);
        let frame = buf.sample_at(2.0);
        assert_eq!(frame.left, 2.0);
        assert_eq!(frame.right, -2.0);
    }

    #[test]
    fn test_sample_at_interpolates() {
        let buf = ramp_buffer(4);
        let frame = buf.sample_at(1.5);
        assert!((frame.left - 1.5).abs() < 1e-6);
        assert!((frame.right + 1.5).abs() < 1e-6);
    }

    #[test]
    fn test_sample_past_end_is_silence() {
        let buf = ramp_buffer(4);
        assert_eq!(buf.sample_at(4.0), AudioFrame::SILENCE);
        assert_eq!(buf.sample_at(1000.0), AudioFrame::SILENCE);
        assert_eq!(buf.sample_at(-1.0), AudioFrame::SILENCE);
    }

    #[test]
    fn test_duration() {
        let buf = ramp_buffer(44_100);
        assert!((buf.duration_seconds() - 1.0).abs() < 1e-9);
    }
}
