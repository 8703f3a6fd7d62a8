//! # Stemset
//!
//! Multi-track playback core for vocal practice tools. A song arrives as a
//! set of per-instrument stems plus an optional pre-mixed file; the engine
//! starts the mixdown within seconds, fetches the stems in the background,
//! then crossfades onto the per-track buses so the user can solo, mute,
//! balance and pan individual parts.
//!
//! Everything runs off a single transport clock, so A/B looping and rate
//! changes (0.25x to 4x) never let the tracks drift apart. A small LRU
//! cache preloads the songs the user is likely to open next.
//!
//! **Architecture:** symphonia decode + rubato resample + cpal output, with
//! a lock-light mixer pulled directly by the device callback.
//!
//! ```no_run
//! use stemset::config::EngineConfig;
//! use stemset::fetch::HttpFetcher;
//! use stemset::playback::PlayerEngine;
//! use std::sync::Arc;
//!
//! # async fn demo(song: stemset::model::SongDescriptor) -> stemset::Result<()> {
//! let engine = PlayerEngine::new(EngineConfig::default(), Arc::new(HttpFetcher::new()), None);
//! engine.init().await?;
//! engine.load_song(song).await?;
//! engine.play().await?;
//! # Ok(())
//! # }
//! ```

pub mod audio;
pub mod cache;
pub mod config;
pub mod error;
pub mod events;
pub mod fetch;
pub mod model;
pub mod playback;
pub mod state;

pub use config::MIX_SAMPLE_RATE;
pub use error::{Error, Result};
pub use events::{EngineEvent, EventBus};
pub use playback::PlayerEngine;
pub use state::{AudioMode, EngineSnapshot, PlaybackPhase, SharedState};
