//! Playback pipeline: transport clock, mixer, loader, engine

pub mod clock;
pub mod crossfade;
pub mod engine;
pub(crate) mod loader;
pub mod mixer;

pub use clock::TransportClock;
pub use crossfade::{CrossfadeEnvelope, FadeCurve};
pub use engine::PlayerEngine;
pub use mixer::StemMixer;
