use std::borrow::Cow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream};
use crossbeam_channel::{Receiver, Sender};
use rubato::{FftFixedIn, Resampler as RubatoResampler};

use crate::device::find_input_device;
use crate::SAMPLE_RATE;

/// A running microphone stream delivering 16 kHz mono chunks.
///
/// Chunk sizes follow the device's buffer size; re-chunking into fixed
/// frames is the caller's job. Dropping the stream releases the device.
pub struct InputStream {
    _stream: Stream,
    receiver: Option<Receiver<Vec<f32>>>,
    failed: Arc<AtomicBool>,
    device_name: String,
    device_rate: u32,
}

impl InputStream {
    /// Open the named input device, or the default one.
    pub fn open(device_id: Option<&str>) -> crate::Result<Self> {
        let host = cpal::default_host();
        let device = find_input_device(&host, device_id)?;
        let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());

        let (tx, rx) = crossbeam_channel::unbounded::<Vec<f32>>();
        let failed = Arc::new(AtomicBool::new(false));
        let (stream, device_rate) = build_stream(device, tx, Arc::clone(&failed))?;
        stream.play().map_err(|e| crate::AudioError::StreamError(e.to_string()))?;

        tracing::info!(device = %device_name, device_rate, "Microphone stream started");
        Ok(Self {
            _stream: stream,
            receiver: Some(rx),
            failed,
            device_name,
            device_rate,
        })
    }

    /// Take the receiver out of this stream (can only be called once).
    pub fn take_receiver(&mut self) -> Option<Receiver<Vec<f32>>> {
        self.receiver.take()
    }

    /// Set once the device reports a stream error, e.g. when it is unplugged.
    pub fn failure_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.failed)
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Native rate of the device before resampling.
    pub fn device_rate(&self) -> u32 {
        self.device_rate
    }
}

impl Drop for InputStream {
    fn drop(&mut self) {
        // Receiver first so a late callback sees nobody listening.
        self.receiver.take();
        tracing::debug!(device = %self.device_name, "Microphone stream dropped");
    }
}

fn build_stream(device: Device, tx: Sender<Vec<f32>>, failed: Arc<AtomicBool>) -> crate::Result<(Stream, u32)> {
    let config = device.default_input_config()?;

    let sample_rate = config.sample_rate().0;
    let channels = config.channels() as usize;
    let new_resampler = || {
        if sample_rate != SAMPLE_RATE {
            SincResampler::new(sample_rate, SAMPLE_RATE)
        } else {
            None
        }
    };

    let stream = match config.sample_format() {
        SampleFormat::F32 => {
            let mut resampler = new_resampler();
            device.build_input_stream(
                &config.into(),
                move |data: &[f32], _| {
                    let samples = match resampler.as_mut() {
                        Some(r) => process_audio_with_resampler(data, channels, r),
                        None => process_audio(data, channels, sample_rate, SAMPLE_RATE).into_owned(),
                    };
                    let _ = tx.send(samples);
                },
                move |err| {
                    tracing::error!("audio stream error: {}", err);
                    failed.store(true, Ordering::SeqCst);
                },
                None,
            )?
        }
        SampleFormat::I16 => {
            let mut resampler = new_resampler();
            device.build_input_stream(
                &config.into(),
                move |data: &[i16], _| {
                    let float: Vec<f32> = data.iter().map(|&s| s as f32 / 32768.0).collect();
                    let samples = match resampler.as_mut() {
                        Some(r) => process_audio_with_resampler(&float, channels, r),
                        None => process_audio(&float, channels, sample_rate, SAMPLE_RATE).into_owned(),
                    };
                    let _ = tx.send(samples);
                },
                move |err| {
                    tracing::error!("audio stream error: {}", err);
                    failed.store(true, Ordering::SeqCst);
                },
                None,
            )?
        }
        format => {
            return Err(crate::AudioError::StreamError(format!(
                "unsupported sample format: {format:?}"
            )))
        }
    };

    Ok((stream, sample_rate))
}

/// Rubato FFT resampler with buffering for variable input sizes.
pub(crate) struct SincResampler {
    resampler: FftFixedIn<f32>,
    input_buffer: Vec<f32>,
    chunk_size: usize,
}

impl SincResampler {
    pub(crate) fn new(from_rate: u32, to_rate: u32) -> Option<Self> {
        let chunk_size = 256;

        let resampler = FftFixedIn::<f32>::new(
            from_rate as usize,
            to_rate as usize,
            chunk_size,
            2, // sub-chunks
            1, // mono
        )
        .map_err(|e| tracing::warn!(error = %e, from_rate, to_rate, "Sinc resampler unavailable, using linear"))
        .ok()?;

        Some(Self {
            resampler,
            input_buffer: Vec::with_capacity(chunk_size * 2),
            chunk_size,
        })
    }

    /// Resample what fits in whole chunks; the remainder waits for more input.
    pub(crate) fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        self.input_buffer.extend_from_slice(samples);

        let mut output = Vec::new();
        while self.input_buffer.len() >= self.chunk_size {
            let chunk: Vec<f32> = self.input_buffer.drain(..self.chunk_size).collect();
            if let Ok(resampled) = self.resampler.process(&[chunk], None) {
                if let Some(channel) = resampled.first() {
                    output.extend_from_slice(channel);
                }
            }
        }
        output
    }
}

/// Mono conversion and resampling in a single pass when possible.
fn process_audio(samples: &[f32], channels: usize, from_rate: u32, to_rate: u32) -> Cow<'_, [f32]> {
    match (channels > 1, from_rate != to_rate) {
        (false, false) => Cow::Borrowed(samples),
        (true, false) => Cow::Owned(to_mono_only(samples, channels)),
        (false, true) => Cow::Owned(resample_linear(samples, from_rate, to_rate)),
        (true, true) => Cow::Owned(resample_linear(&to_mono_only(samples, channels), from_rate, to_rate)),
    }
}

fn process_audio_with_resampler(samples: &[f32], channels: usize, resampler: &mut SincResampler) -> Vec<f32> {
    if channels > 1 {
        resampler.process(&to_mono_only(samples, channels))
    } else {
        resampler.process(samples)
    }
}

#[inline]
pub(crate) fn to_mono_only(samples: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    let inv_channels = 1.0 / channels as f32;
    samples
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() * inv_channels)
        .collect()
}

/// Linear interpolation resampling (fallback for stateless operation).
#[inline]
pub(crate) fn resample_linear(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    let ratio = to_rate as f64 / from_rate as f64;
    let new_len = (samples.len() as f64 * ratio) as usize;
    let mut output = Vec::with_capacity(new_len);

    for i in 0..new_len {
        let src_idx = i as f64 / ratio;
        let idx = src_idx.floor() as usize;
        let frac = src_idx.fract() as f32;
        let sample = if idx + 1 < samples.len() {
            samples[idx] * (1.0 - frac) + samples[idx + 1] * frac
        } else if idx < samples.len() {
            samples[idx]
        } else {
            0.0
        };
        output.push(sample);
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_mono_averages_channels() {
        let stereo = [0.5, -0.5, 1.0, 0.0, 0.2, 0.4];
        let mono = to_mono_only(&stereo, 2);
        assert_eq!(mono.len(), 3);
        assert!((mono[0] - 0.0).abs() < 1e-6);
        assert!((mono[1] - 0.5).abs() < 1e-6);
        assert!((mono[2] - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_resample_linear_length() {
        let input = vec![0.25; 48_000];
        let output = resample_linear(&input, 48_000, 16_000);
        assert_eq!(output.len(), 16_000);
        assert!(output.iter().all(|s| (s - 0.25).abs() < 1e-6));
    }

    #[test]
    fn test_process_audio_passthrough_borrows() {
        let input = [0.1, 0.2, 0.3];
        assert!(matches!(process_audio(&input, 1, 16_000, 16_000), Cow::Borrowed(_)));
    }

    #[test]
    fn test_sinc_resampler_buffers_partial_chunks() {
        let mut resampler = SincResampler::new(48_000, 16_000).unwrap();
        // Less than one chunk: nothing out yet.
        assert!(resampler.process(&[0.0; 100]).is_empty());

        let mut total = 0;
        for _ in 0..100 {
            total += resampler.process(&[0.0; 480]).len();
        }
        // 48_100 samples in, roughly a third out (minus filter delay).
        assert!(total > 15_000 && total <= 16_100, "got {total}");
    }
}
