//! Audio capture from microphone
//!
//! The cpal callback is the only realtime producer in the process. It
//! downmixes to mono, resamples when the device cannot run at the pipeline
//! rate, slices fixed frames and pushes them into a [`FrameQueue`].

use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, Stream, StreamConfig};

use crate::config::AudioConfig;
use crate::{Error, Result};

use super::resample::MonoResampler;
use super::{FrameQueue, Framer};

/// Captures audio from the default input device into a frame queue
pub struct AudioCapture {
    config: StreamConfig,
    target_rate: u32,
    frame_samples: usize,
    queue: Arc<FrameQueue>,
    stream: Option<Stream>,
}

impl AudioCapture {
    /// Open the default input device
    ///
    /// # Errors
    ///
    /// Returns error if no input device or usable configuration exists
    pub fn new(audio: &AudioConfig, queue: Arc<FrameQueue>) -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_input_device()
            .ok_or_else(|| Error::Audio("no input device available".to_string()))?;

        let target = SampleRate(audio.sample_rate);
        let native = device
            .supported_input_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .find(|c| {
                c.channels() == 1
                    && c.sample_format() == cpal::SampleFormat::F32
                    && c.min_sample_rate() <= target
                    && c.max_sample_rate() >= target
            })
            .map(|c| c.with_sample_rate(target).config());

        let config = match native {
            Some(config) => config,
            None => device
                .default_input_config()
                .map_err(|e| Error::Audio(format!("no suitable audio config found: {e}")))?
                .config(),
        };

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            device_rate = config.sample_rate.0,
            channels = config.channels,
            pipeline_rate = audio.sample_rate,
            "audio capture initialized"
        );

        Ok(Self {
            config,
            target_rate: audio.sample_rate,
            frame_samples: audio.frame_samples,
            queue,
            stream: None,
        })
    }

    /// Start capturing audio
    ///
    /// # Errors
    ///
    /// Returns error if the input stream cannot be built or started
    pub fn start(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| Error::Audio("no input device".to_string()))?;

        let config = self.config.clone();
        let channels = usize::from(config.channels.max(1));
        let mut resampler = MonoResampler::new(config.sample_rate.0, self.target_rate)?;
        let mut framer = Framer::new(self.frame_samples, self.target_rate);
        let queue = Arc::clone(&self.queue);
        let mut mono = Vec::new();

        let stream = device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    mono.clear();
                    downmix(data, channels, &mut mono);
                    for frame in framer.push(&resampler.process(&mono)) {
                        queue.push(frame);
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio capture error");
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?;

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;
        self.stream = Some(stream);

        tracing::debug!("audio capture started");
        Ok(())
    }

    /// Stop capturing audio and close the queue
    pub fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            self.queue.close();
            tracing::debug!("audio capture stopped");
        }
    }

    /// Check if currently capturing
    #[must_use]
    pub const fn is_capturing(&self) -> bool {
        self.stream.is_some()
    }

    /// Pipeline sample rate of produced frames
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.target_rate
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Average interleaved channels into mono
fn downmix(data: &[f32], channels: usize, out: &mut Vec<f32>) {
    if channels <= 1 {
        out.extend_from_slice(data);
        return;
    }

    #[allow(clippy::cast_precision_loss)]
    let scale = 1.0 / channels as f32;
    out.extend(
        data.chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() * scale),
    );
}

/// Convert f32 samples to WAV bytes for STT APIs
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for &sample in samples {
            // Convert f32 [-1.0, 1.0] to i16
            #[allow(clippy::cast_possible_truncation)]
            let sample_i16 = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer
                .write_sample(sample_i16)
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_downmix_stereo() {
        let mut out = Vec::new();
        downmix(&[0.2, 0.4, -1.0, 1.0], 2, &mut out);
        assert_eq!(out.len(), 2);
        assert!((out[0] - 0.3).abs() < 1e-6);
        assert!(out[1].abs() < 1e-6);
    }
}
