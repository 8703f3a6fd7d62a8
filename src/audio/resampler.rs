//! Sample rate conversion using rubato
//!
//! All decoded audio is normalized to the fixed 44.1kHz mix rate before it
//! reaches a [`TrackBuffer`](crate::audio::types::TrackBuffer), so the mixer
//! samples every source on one timeline.

use crate::config::MIX_SAMPLE_RATE;
use crate::error::{Error, Result};
use rubato::{FastFixedIn, PolynomialDegree, Resampler as RubatoResampler};
use tracing::debug;

/// Resample interleaved stereo audio to the mix rate
///
/// Returns the input unchanged when it is already at 44.1kHz.
pub fn resample_to_mix_rate(input: Vec<f32>, input_rate: u32) -> Result<Vec<f32>> {
    if input_rate == MIX_SAMPLE_RATE {
        return Ok(input);
    }
    if input.is_empty() {
        return Ok(input);
    }

    debug!(input_rate, output_rate = MIX_SAMPLE_RATE, "Resampling stereo audio");

    // rubato works on planar channel data
    let planar = deinterleave_stereo(&input);
    let input_frames = planar[0].len();

    // FastFixedIn: good quality/performance tradeoff for whole-buffer offline
    // conversion
    let mut resampler = FastFixedIn::<f32>::new(
        MIX_SAMPLE_RATE as f64 / input_rate as f64,
        1.0,
        PolynomialDegree::Septic,
        input_frames,
        2,
    )
    .map_err(|e| Error::Decode(format!("Failed to create resampler: {}", e)))?;

    let output = resampler
        .process(&planar, None)
        .map_err(|e| Error::Decode(format!("Resampling failed: {}", e)))?;

    Ok(interleave_stereo(&output))
}

fn deinterleave_stereo(samples: &[f32]) -> Vec<Vec<f32>> {
    let frames = samples.len() / 2;
    let mut left = Vec::with_capacity(frames);
    let mut right = Vec::with_capacity(frames);
    for frame in samples.chunks_exact(2) {
        left.push(frame[0]);
        right.push(frame[1]);
    }
    vec![left, right]
}

fn interleave_stereo(planar: &[Vec<f32>]) -> Vec<f32> {
    let frames = planar[0].len().min(planar[1].len());
    let mut interleaved = Vec::with_capacity(frames * 2);
    for i in 0..frames {
        interleaved.push(planar[0][i]);
        interleaved.push(planar[1][i]);
    }
    interleaved
}
