//! In-memory audio decoding using symphonia
//!
//! Track bytes arrive from the fetcher (or the preload cache) as a complete
//! encoded file in memory; this module turns them into a playback-ready
//! [`TrackBuffer`]: stereo f32, 44.1kHz.
//!
//! Supported formats follow the enabled symphonia features: WAV/FLAC/Vorbis
//! (defaults) plus MP3, AAC and MP4/M4A. Mono input is duplicated to stereo,
//! multi-channel input is downmixed.

use crate::audio::resampler::resample_to_mix_rate;
use crate::audio::types::TrackBuffer;
use crate::error::{Error, Result};
use std::io::Cursor;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, warn};

/// Decode a complete encoded audio file held in memory
///
/// `extension_hint` helps the format probe when the URL carried a usable file
/// extension; pass `None` for untyped byte streams.
pub fn decode_audio_bytes(bytes: Vec<u8>, extension_hint: Option<&str>) -> Result<TrackBuffer> {
    let byte_len = bytes.len();
    let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes)), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = extension_hint {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| Error::Decode(format!("Unrecognized audio format: {}", e)))?;

    let mut format = probed.format;

    let track = format
        .default_track()
        .ok_or_else(|| Error::Decode("No audio track found".to_string()))?;
    let track_id = track.id;
    let codec_params = track.codec_params.clone();
    let sample_rate = codec_params.sample_rate.unwrap_or(44_100);

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .map_err(|e| Error::Decode(format!("Unsupported codec: {}", e)))?;

    let mut stereo: Vec<f32> = Vec::new();
    let mut sample_buf: Option<SampleBuffer<f32>> = None;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break; // EOF
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(Error::Decode(format!("Packet read failed: {}", e))),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(e)) => {
                // Recoverable corruption: skip the packet
                warn!("Skipping undecodable packet: {}", e);
                continue;
            }
            Err(e) => return Err(Error::Decode(format!("Decode failed: {}", e))),
        };

        let spec = *decoded.spec();
        let channels = spec.channels.count();

        let buf = sample_buf.get_or_insert_with(|| {
            SampleBuffer::<f32>::new(decoded.capacity() as u64, spec)
        });
        if buf.capacity() < decoded.capacity() * channels {
            *buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        }
        buf.copy_interleaved_ref(decoded);

        downmix_to_stereo(buf.samples(), channels, &mut stereo);
    }

    if stereo.is_empty() {
        return Err(Error::Decode("Decoded to zero samples".to_string()));
    }

    let stereo = resample_to_mix_rate(stereo, sample_rate)?;
    let buffer = TrackBuffer::from_interleaved(stereo);
    debug!(
        input_bytes = byte_len,
        frames = buffer.frames(),
        "Decoded audio buffer"
    );
    Ok(buffer)
}

/// Append interleaved `channels`-wide samples to `out` as stereo
fn downmix_to_stereo(samples: &[f32], channels: usize, out: &mut Vec<f32>) {
    match channels {
        0 => {}
        1 => {
            out.reserve(samples.len() * 2);
            for &s in samples {
                out.push(s);
                out.push(s);
            }
        }
        2 => out.extend_from_slice(samples),
        n => {
            // Average even channels into left, odd into right
            out.reserve(samples.len() / n * 2);
            for frame in samples.chunks_exact(n) {
                let mut left = 0.0f32;
                let mut right = 0.0f32;
                for (i, &s) in frame.iter().enumerate() {
                    if i % 2 == 0 {
                        left += s;
                    } else {
                        right += s;
                    }
                }
                let half = (n as f32 / 2.0).max(1.0);
                out.push(left / half);
                out.push(right / half);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MIX_SAMPLE_RATE;

    /// Build an in-memory 16-bit PCM WAV file
    fn wav_bytes(channels: u16, sample_rate: u32, frames: usize) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for i in 0..frames {
                let t = i as f32 / sample_rate as f32;
                let sample = ((2.0 * std::f32::consts::PI * 440.0 * t).sin() * 0.5
                    * i16::MAX as f32) as i16;
                for _ in 0..channels {
                    writer.write_sample(sample).unwrap();
                }
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn test_decode_stereo_wav() {
        let bytes = wav_bytes(2, MIX_SAMPLE_RATE, 4410);
        let buffer = decode_audio_bytes(bytes, Some("wav")).unwrap();
        assert_eq!(buffer.frames(), 4410);
        assert!((buffer.duration_seconds() - 0.1).abs() < 1e-3);
    }

    #[test]
    fn test_decode_mono_duplicated_to_stereo() {
        let bytes = wav_bytes(1, MIX_SAMPLE_RATE, 1000);
        let buffer = decode_audio_bytes(bytes, Some("wav")).unwrap();
        assert_eq!(buffer.frames(), 1000);

        let frame = buffer.sample_at(500.0);
        assert_eq!(frame.left, frame.right);
    }

    #[test]
    fn test_decode_48k_resampled() {
        let bytes = wav_bytes(2, 48_000, 4800);
        let buffer = decode_audio_bytes(bytes, Some("wav")).unwrap();
        // ~0.1s of audio at the mix rate after resampling
        assert!(buffer.frames().abs_diff(4410) <= 16);
    }

    #[test]
    fn test_decode_garbage_fails() {
        let result = decode_audio_bytes(vec![0xde, 0xad, 0xbe, 0xef], None);
        assert!(result.is_err());
    }

    #[test]
    fn test_decode_empty_fails() {
        assert!(decode_audio_bytes(Vec::new(), Some("wav")).is_err());
    }
}
