//! Audio device output using cpal
//!
//! Owns the one output stream for the whole engine. The stream callback
//! pulls frames from the mixer via a closure, so every mixing decision runs
//! on the device callback thread; there is no intermediate buffer to drift.
//!
//! Activation is deferred to [`AudioOutput::start`]: platform audio policies
//! may require a user gesture before a stream is allowed to produce sound,
//! so the engine only builds the stream inside `init()`.

use crate::audio::types::AudioFrame;
use crate::config::MIX_SAMPLE_RATE;
use crate::error::{Error, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, StreamConfig};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Audio output manager
pub struct AudioOutput {
    device: Device,
    config: StreamConfig,
    sample_format: SampleFormat,
    stream: Option<Stream>,
}

impl AudioOutput {
    /// List available output device names
    pub fn list_devices() -> Result<Vec<String>> {
        let host = cpal::default_host();
        let devices: Vec<String> = host
            .output_devices()
            .map_err(|e| Error::AudioOutput(format!("Failed to enumerate devices: {}", e)))?
            .filter_map(|device| device.name().ok())
            .collect();
        debug!("Found {} output devices", devices.len());
        Ok(devices)
    }

    /// Open an output device (None = system default), falling back to the
    /// default device when the named one is missing
    pub fn new(device_name: Option<&str>) -> Result<Self> {
        let host = cpal::default_host();

        let device = match device_name {
            Some(name) => {
                let mut devices = host
                    .output_devices()
                    .map_err(|e| Error::AudioOutput(format!("Failed to enumerate devices: {}", e)))?;
                match devices.find(|d| d.name().ok().as_deref() == Some(name)) {
                    Some(dev) => {
                        info!("Using requested audio device: {}", name);
                        dev
                    }
                    None => {
                        warn!("Device '{}' not found, falling back to default", name);
                        host.default_output_device().ok_or_else(|| {
                            Error::AudioOutput(format!(
                                "Device '{}' not found and no default device available",
                                name
                            ))
                        })?
                    }
                }
            }
            None => host
                .default_output_device()
                .ok_or_else(|| Error::AudioOutput("No output device available".to_string()))?,
        };

        // Prefer a stereo config at the mix rate; fall back to the device
        // default otherwise
        let (config, sample_format) = Self::pick_config(&device)?;
        info!(
            "Audio output: {} ch @ {} Hz ({:?})",
            config.channels, config.sample_rate.0, sample_format
        );

        Ok(Self {
            device,
            config,
            sample_format,
            stream: None,
        })
    }

    fn pick_config(device: &Device) -> Result<(StreamConfig, SampleFormat)> {
        let default = device
            .default_output_config()
            .map_err(|e| Error::AudioOutput(format!("Failed to get device config: {}", e)))?;

        if let Ok(supported) = device.supported_output_configs() {
            for range in supported {
                if range.channels() == 2
                    && range.min_sample_rate().0 <= MIX_SAMPLE_RATE
                    && range.max_sample_rate().0 >= MIX_SAMPLE_RATE
                {
                    let cfg = range
                        .with_sample_rate(cpal::SampleRate(MIX_SAMPLE_RATE));
                    let format = cfg.sample_format();
                    return Ok((cfg.config(), format));
                }
            }
        }

        warn!(
            "Device does not support stereo @ {} Hz, using default config",
            MIX_SAMPLE_RATE
        );
        Ok((default.config(), default.sample_format()))
    }

    /// Whether a stream is currently running
    pub fn is_active(&self) -> bool {
        self.stream.is_some()
    }

    /// Start the output stream pulling frames from `callback`
    pub fn start<F>(&mut self, callback: F) -> Result<()>
    where
        F: FnMut() -> AudioFrame + Send + 'static,
    {
        info!("Starting audio stream");
        let callback = Arc::new(Mutex::new(callback));

        let stream = match self.sample_format {
            SampleFormat::F32 => self.build_stream_f32(callback)?,
            SampleFormat::I16 => self.build_stream_i16(callback)?,
            SampleFormat::U16 => self.build_stream_u16(callback)?,
            other => {
                return Err(Error::AudioOutput(format!(
                    "Unsupported sample format: {:?}",
                    other
                )))
            }
        };

        stream
            .play()
            .map_err(|e| Error::AudioOutput(format!("Failed to start stream: {}", e)))?;
        self.stream = Some(stream);
        Ok(())
    }

    /// Stop and drop the stream
    pub fn stop(&mut self) {
        if self.stream.take().is_some() {
            info!("Audio stream stopped");
        }
    }

    fn build_stream_f32(
        &self,
        callback: Arc<Mutex<dyn FnMut() -> AudioFrame + Send>>,
    ) -> Result<Stream> {
        let channels = self.config.channels as usize;
        self.device
            .build_output_stream(
                &self.config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let mut callback = callback.lock().unwrap();
                    for frame in data.chunks_mut(channels) {
                        let f = callback();
                        frame[0] = f.left.clamp(-1.0, 1.0);
                        if frame.len() > 1 {
                            frame[1] = f.right.clamp(-1.0, 1.0);
                        }
                    }
                },
                move |err| warn!("Audio stream error: {}", err),
                None,
            )
            .map_err(|e| Error::AudioOutput(format!("Failed to build stream: {}", e)))
    }

    fn build_stream_i16(
        &self,
        callback: Arc<Mutex<dyn FnMut() -> AudioFrame + Send>>,
    ) -> Result<Stream> {
        let channels = self.config.channels as usize;
        self.device
            .build_output_stream(
                &self.config,
                move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                    let mut callback = callback.lock().unwrap();
                    for frame in data.chunks_mut(channels) {
                        let f = callback();
                        frame[0] = (f.left.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
                        if frame.len() > 1 {
                            frame[1] = (f.right.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
                        }
                    }
                },
                move |err| warn!("Audio stream error: {}", err),
                None,
            )
            .map_err(|e| Error::AudioOutput(format!("Failed to build stream: {}", e)))
    }

    fn build_stream_u16(
        &self,
        callback: Arc<Mutex<dyn FnMut() -> AudioFrame + Send>>,
    ) -> Result<Stream> {
        let channels = self.config.channels as usize;
        self.device
            .build_output_stream(
                &self.config,
                move |data: &mut [u16], _: &cpal::OutputCallbackInfo| {
                    let mut callback = callback.lock().unwrap();
                    for frame in data.chunks_mut(channels) {
                        let f = callback();
                        let to_u16 = |s: f32| {
                            ((s.clamp(-1.0, 1.0) + 1.0) * 0.5 * u16::MAX as f32) as u16
                        };
                        frame[0] = to_u16(f.left);
                        if frame.len() > 1 {
                            frame[1] = to_u16(f.right);
                        }
                    }
                },
                move |err| warn!("Audio stream error: {}", err),
                None,
            )
            .map_err(|e| Error::AudioOutput(format!("Failed to build stream: {}", e)))
    }
}
