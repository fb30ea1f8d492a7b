//! Mono sample-rate conversion

use rubato::{FftFixedIn, Resampler};

use crate::{Error, Result};

/// Input samples per resampler chunk
const RESAMPLE_CHUNK: usize = 1024;

/// Fixed-chunk mono resampler; a passthrough when rates match
pub(crate) struct MonoResampler {
    inner: Option<FftFixedIn<f32>>,
    pending: Vec<f32>,
}

impl MonoResampler {
    pub(crate) fn new(from: u32, to: u32) -> Result<Self> {
        if from == to {
            return Ok(Self {
                inner: None,
                pending: Vec::new(),
            });
        }

        tracing::info!(from, to, "resampler enabled");
        let inner = FftFixedIn::<f32>::new(from as usize, to as usize, RESAMPLE_CHUNK, 2, 1)
            .map_err(|e| Error::Audio(format!("resampler init failed: {e}")))?;

        Ok(Self {
            inner: Some(inner),
            pending: Vec::with_capacity(RESAMPLE_CHUNK * 2),
        })
    }

    pub(crate) fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        let Some(inner) = self.inner.as_mut() else {
            return samples.to_vec();
        };

        self.pending.extend_from_slice(samples);
        let mut out = Vec::new();
        loop {
            let needed = inner.input_frames_next();
            if self.pending.len() < needed {
                break;
            }
            let chunk: Vec<f32> = self.pending.drain(..needed).collect();
            match inner.process(&[chunk], None) {
                Ok(mut channels) => out.append(&mut channels[0]),
                Err(e) => tracing::warn!(error = %e, "resampling failed, chunk dropped"),
            }
        }
        out
    }
}

/// Resample a complete clip, flushing the resampler tail
///
/// # Errors
///
/// Returns error if the resampler cannot be built for these rates
#[allow(clippy::cast_possible_truncation)]
pub(crate) fn resample_clip(samples: &[f32], from: u32, to: u32) -> Result<Vec<f32>> {
    let mut resampler = MonoResampler::new(from, to)?;
    let mut out = resampler.process(samples);
    out.extend(resampler.process(&vec![0.0; RESAMPLE_CHUNK * 2]));

    let expected = (samples.len() as u64 * u64::from(to) / u64::from(from.max(1))) as usize;
    out.truncate(expected.max(1).min(out.len()));
    Ok(out)
}
