//! WAV decoding into the recognizer's sample format.
//!
//! Output is mono f32 at the target rate. Multi-channel input is down-mixed
//! with an equal-power law: `Σ channels / √n`, which for stereo is
//! `√2 · (left + right) / 2`.

use std::io::Cursor;

use crate::defaults::SAMPLE_RATE;
use crate::error::{Result, VidscribeError};

/// Converts WAV bytes to mono f32 at a fixed sample rate.
#[derive(Debug, Clone, Copy)]
pub struct AudioNormalizer {
    target_rate: u32,
}

impl Default for AudioNormalizer {
    fn default() -> Self {
        Self::new(SAMPLE_RATE)
    }
}

impl AudioNormalizer {
    pub fn new(target_rate: u32) -> Self {
        Self { target_rate }
    }

    pub fn target_rate(&self) -> u32 {
        self.target_rate
    }

    /// Decode and normalize a WAV buffer.
    ///
    /// `progress` receives the down-mix percent each time it advances by at least
    /// one point (0..=99). Fails with `UnsupportedAudioFormat` when the buffer
    /// cannot be decoded or holds no samples.
    pub fn normalize(&self, wav: &[u8], progress: &mut dyn FnMut(u8)) -> Result<Vec<f32>> {
        let mut reader = hound::WavReader::new(Cursor::new(wav))
            .map_err(|e| VidscribeError::unsupported_audio(format!("Failed to parse WAV: {}", e)))?;

        let spec = reader.spec();
        if spec.channels == 0 {
            return Err(VidscribeError::unsupported_audio("WAV declares zero channels"));
        }

        let interleaved: Vec<f32> = match (spec.sample_format, spec.bits_per_sample) {
            (hound::SampleFormat::Float, 32) => reader
                .samples::<f32>()
                .collect::<std::result::Result<_, _>>()
                .map_err(read_error)?,
            (hound::SampleFormat::Int, bits @ (8 | 16 | 24 | 32)) => {
                let scale = 1.0 / (1_i64 << (bits - 1)) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| v as f32 * scale))
                    .collect::<std::result::Result<_, _>>()
                    .map_err(read_error)?
            }
            (format, bits) => {
                return Err(VidscribeError::unsupported_audio(format!(
                    "{}-bit {:?} samples are not supported",
                    bits, format
                )));
            }
        };

        let mono = downmix(&interleaved, usize::from(spec.channels), progress);
        if mono.is_empty() {
            return Err(VidscribeError::unsupported_audio("WAV contains no samples"));
        }

        tracing::debug!(
            channels = spec.channels,
            source_rate = spec.sample_rate,
            target_rate = self.target_rate,
            frames = mono.len(),
            "normalizing audio"
        );

        Ok(resample(&mono, spec.sample_rate, self.target_rate))
    }
}

fn read_error(e: hound::Error) -> VidscribeError {
    VidscribeError::unsupported_audio(format!("Failed to read WAV samples: {}", e))
}

/// Equal-power down-mix of interleaved frames, reporting percent progress.
pub fn downmix(interleaved: &[f32], channels: usize, progress: &mut dyn FnMut(u8)) -> Vec<f32> {
    let frames = interleaved.len() / channels.max(1);
    let gain = 1.0 / (channels as f32).sqrt();
    let mut last_percent = None;
    let mut mono = Vec::with_capacity(frames);

    for (i, frame) in interleaved.chunks_exact(channels.max(1)).enumerate() {
        let sample = match channels {
            1 => frame[0],
            2 => std::f32::consts::SQRT_2 * (frame[0] + frame[1]) / 2.0,
            _ => frame.iter().sum::<f32>() * gain,
        };
        mono.push(sample);

        let percent = ((i * 100) / frames).min(99) as u8;
        if last_percent != Some(percent) {
            last_percent = Some(percent);
            progress(percent);
        }
    }
    mono
}

/// Linear interpolation resampling.
fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() {
        return samples.to_vec();
    }

    let ratio = f64::from(from_rate) / f64::from(to_rate);
    let output_len = (samples.len() as f64 / ratio).ceil() as usize;

    (0..output_len)
        .map(|i| {
            let source_pos = i as f64 * ratio;
            let source_idx = (source_pos.floor() as usize).min(samples.len() - 1);
            let fraction = (source_pos - source_idx as f64) as f32;

            match samples.get(source_idx + 1) {
                Some(&right) => {
                    let left = samples[source_idx];
                    left + (right - left) * fraction
                }
                None => samples[source_idx],
            }
        })
        .collect()
}
