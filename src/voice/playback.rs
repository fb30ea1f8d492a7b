//! Audio playback to speakers

use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};

use crate::{Error, Result};

use super::resample::resample_clip;

/// Destination for synthesized speech in voice mode
#[async_trait]
pub trait AudioSink: Send + Sync {
    /// Play encoded audio (MP3 or WAV) to completion
    ///
    /// # Errors
    ///
    /// Returns error if decoding or playback fails
    async fn play(&self, audio: &[u8]) -> Result<()>;
}

/// Plays audio to the default output device
#[derive(Debug, Clone, Default)]
pub struct AudioPlayback;

impl AudioPlayback {
    /// Create a new audio playback instance
    ///
    /// # Errors
    ///
    /// Returns error if no output device is available
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            "audio playback initialized"
        );

        Ok(Self)
    }

    /// Play raw mono f32 samples
    ///
    /// # Errors
    ///
    /// Returns error if playback fails
    pub async fn play_samples(&self, samples: Vec<f32>, sample_rate: u32) -> Result<()> {
        tokio::task::spawn_blocking(move || play_samples_blocking(&samples, sample_rate))
            .await
            .map_err(|e| Error::Audio(format!("playback task failed: {e}")))?
    }
}

#[async_trait]
impl AudioSink for AudioPlayback {
    async fn play(&self, audio: &[u8]) -> Result<()> {
        let (samples, rate) = decode_audio(audio)?;
        self.play_samples(samples, rate).await
    }
}

/// Pick an output config at `rate`, falling back to the device default
fn output_config(device: &cpal::Device, rate: u32) -> Result<StreamConfig> {
    let wanted = SampleRate(rate);
    let exact = device
        .supported_output_configs()
        .map_err(|e| Error::Audio(e.to_string()))?
        .filter(|c| c.sample_format() == cpal::SampleFormat::F32)
        .filter(|c| c.min_sample_rate() <= wanted && c.max_sample_rate() >= wanted)
        .min_by_key(cpal::SupportedStreamConfigRange::channels)
        .map(|c| c.with_sample_rate(wanted).config());

    match exact {
        Some(config) => Ok(config),
        None => Ok(device
            .default_output_config()
            .map_err(|e| Error::Audio(format!("no suitable output config found: {e}")))?
            .config()),
    }
}

/// Play samples in a blocking manner
fn play_samples_blocking(samples: &[f32], sample_rate: u32) -> Result<()> {
    if samples.is_empty() {
        return Ok(());
    }

    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| Error::Audio("no output device".to_string()))?;

    let config = output_config(&device, sample_rate)?;
    let channels = usize::from(config.channels.max(1));
    let device_rate = config.sample_rate.0;

    let samples: Arc<[f32]> = if device_rate == sample_rate {
        samples.into()
    } else {
        resample_clip(samples, sample_rate, device_rate)?.into()
    };

    let position = Arc::new(AtomicUsize::new(0));
    let finished = Arc::new(AtomicBool::new(false));

    let stream = {
        let samples = Arc::clone(&samples);
        let position = Arc::clone(&position);
        let finished = Arc::clone(&finished);

        device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let mut pos = position.load(Ordering::Relaxed);
                    for frame in data.chunks_mut(channels) {
                        let sample = samples.get(pos).copied().unwrap_or(0.0);
                        frame.fill(sample);
                        if pos < samples.len() {
                            pos += 1;
                        } else {
                            finished.store(true, Ordering::Relaxed);
                        }
                    }
                    position.store(pos, Ordering::Relaxed);
                },
                |err| {
                    tracing::error!(error = %err, "audio playback error");
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?
    };

    stream.play().map_err(|e| Error::Audio(e.to_string()))?;

    let duration_ms = (samples.len() as u64 * 1000) / u64::from(device_rate.max(1));
    let start = Instant::now();
    let timeout = Duration::from_millis(duration_ms + 500);

    while !finished.load(Ordering::Relaxed) {
        if start.elapsed() > timeout {
            tracing::warn!("playback did not finish in time");
            break;
        }
        std::thread::sleep(Duration::from_millis(20));
    }

    // Let the device drain its last buffer
    std::thread::sleep(Duration::from_millis(100));

    drop(stream);
    tracing::debug!(samples = samples.len(), "playback complete");

    Ok(())
}

/// Decode MP3 or WAV bytes to mono f32 samples and their sample rate
///
/// # Errors
///
/// Returns error if the audio cannot be decoded
pub fn decode_audio(audio: &[u8]) -> Result<(Vec<f32>, u32)> {
    if audio.starts_with(b"RIFF") {
        decode_wav(audio)
    } else {
        decode_mp3(audio)
    }
}

fn decode_wav(audio: &[u8]) -> Result<(Vec<f32>, u32)> {
    let reader = hound::WavReader::new(Cursor::new(audio))
        .map_err(|e| Error::Audio(format!("WAV decode error: {e}")))?;
    let spec = reader.spec();
    let channels = usize::from(spec.channels.max(1));

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| Error::Audio(format!("WAV decode error: {e}")))?,
        hound::SampleFormat::Int => {
            #[allow(clippy::cast_precision_loss)]
            let scale = (1_i64 << (spec.bits_per_sample.max(1) - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| Error::Audio(format!("WAV decode error: {e}")))?
        }
    };

    #[allow(clippy::cast_precision_loss)]
    let mono = interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect();

    Ok((mono, spec.sample_rate))
}

/// Decode MP3 bytes to f32 samples
fn decode_mp3(mp3_data: &[u8]) -> Result<(Vec<f32>, u32)> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(mp3_data));
    let mut samples = Vec::new();
    let mut sample_rate = 0;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                #[allow(clippy::cast_sign_loss)]
                {
                    sample_rate = frame.sample_rate as u32;
                }

                // Convert i16 samples to f32 and handle stereo to mono
                if frame.channels == 2 {
                    samples.extend(frame.data.chunks(2).map(|chunk| {
                        let left = f32::from(chunk[0]) / 32768.0;
                        let right = f32::from(chunk.get(1).copied().unwrap_or(chunk[0])) / 32768.0;
                        f32::midpoint(left, right)
                    }));
                } else {
                    samples.extend(frame.data.iter().map(|&s| f32::from(s) / 32768.0));
                }
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Audio(format!("MP3 decode error: {e}"))),
        }
    }

    if sample_rate == 0 {
        return Err(Error::Audio("MP3 contained no frames".to_string()));
    }

    Ok((samples, sample_rate))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voice::samples_to_wav;

    #[test]
    fn test_decode_wav_roundtrip() {
        let wav = samples_to_wav(&[0.0, 0.5, -0.5], 22_050).unwrap();
        let (samples, rate) = decode_audio(&wav).unwrap();

        assert_eq!(rate, 22_050);
        assert_eq!(samples.len(), 3);
        assert!((samples[1] - 0.5).abs() < 1e-3);
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(decode_audio(b"definitely not audio").is_err());
    }
}
