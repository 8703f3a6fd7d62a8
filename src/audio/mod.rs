//! Audio pipeline: decode, resample, buffer, device output

pub mod decode;
pub mod output;
pub mod resampler;
pub mod types;

pub use decode::decode_audio_bytes;
pub use output::AudioOutput;
pub use types::{AudioFrame, TrackBuffer};
