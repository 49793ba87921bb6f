//! PCM16 wire codec.
//!
//! Microphone audio leaves the process as base64 text over little-endian
//! signed 16-bit PCM; model audio arrives the same way and is turned back into
//! float buffers the output device can play.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use std::time::Duration;
use thiserror::Error;

/// Sample rate of microphone audio sent to the model.
pub const INPUT_SAMPLE_RATE: u32 = 16_000;

/// Sample rate of audio produced by the model.
pub const OUTPUT_SAMPLE_RATE: u32 = 24_000;

const PCM16_SCALE: f32 = 32768.0;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CodecError {
    #[error("invalid base64 payload: {0}")]
    InvalidBase64(String),

    #[error("channel count must be at least 1")]
    NoChannels,
}

pub type Result<T> = std::result::Result<T, CodecError>;

/// Quantize float samples in `[-1.0, 1.0]` to PCM16.
///
/// Out-of-range input saturates instead of wrapping.
pub fn float_to_pcm16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| {
            let scaled = (s * PCM16_SCALE).round();
            scaled.clamp(i16::MIN as f32, i16::MAX as f32) as i16
        })
        .collect()
}

/// Rescale PCM16 back into floats.
pub fn pcm16_to_float(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&s| s as f32 / PCM16_SCALE).collect()
}

pub fn pcm16_to_le_bytes(samples: &[i16]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    bytes
}

/// Read little-endian PCM16 samples.
///
/// An odd trailing byte cannot form a sample and is ignored.
pub fn le_bytes_to_pcm16(bytes: &[u8]) -> Vec<i16> {
    debug_assert!(bytes.len() % 2 == 0, "odd PCM16 byte count: {}", bytes.len());
    if bytes.len() % 2 != 0 {
        tracing::warn!(len = bytes.len(), "Dropping trailing byte of PCM16 payload");
    }
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// A microphone frame ready for the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedFrame {
    /// Base64 of little-endian PCM16.
    pub data: String,
    pub sample_rate: u32,
}

impl EncodedFrame {
    /// MIME type announced alongside the payload, e.g. `audio/pcm;rate=16000`.
    pub fn mime_type(&self) -> String {
        format!("audio/pcm;rate={}", self.sample_rate)
    }
}

/// Encode float samples into a wire frame.
pub fn encode(samples: &[f32], sample_rate: u32) -> EncodedFrame {
    let pcm = float_to_pcm16(samples);
    EncodedFrame {
        data: STANDARD.encode(pcm16_to_le_bytes(&pcm)),
        sample_rate,
    }
}

/// Decode a base64 PCM16 payload.
pub fn decode(encoded: &str) -> Result<Vec<i16>> {
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|e| CodecError::InvalidBase64(e.to_string()))?;
    Ok(le_bytes_to_pcm16(&bytes))
}

/// Root-mean-square energy of a block of samples. Empty input has zero energy.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|s| s * s).sum();
    (sum / samples.len() as f32).sqrt()
}

/// Decoded model audio in de-interleaved float channels.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayableBuffer {
    sample_rate: u32,
    channels: Vec<Vec<f32>>,
}

impl PlayableBuffer {
    /// Build a buffer from interleaved PCM16 samples.
    ///
    /// A trailing partial frame (fewer samples than channels) is dropped.
    pub fn from_pcm16(samples: &[i16], sample_rate: u32, channels: usize) -> Result<Self> {
        if channels == 0 {
            return Err(CodecError::NoChannels);
        }
        let frames = samples.len() / channels;
        let mut data = vec![Vec::with_capacity(frames); channels];
        for frame in samples.chunks_exact(channels) {
            for (channel, &sample) in frame.iter().enumerate() {
                data[channel].push(sample as f32 / PCM16_SCALE);
            }
        }
        Ok(Self {
            sample_rate,
            channels: data,
        })
    }

    /// Mono model output at 24 kHz, the format the live API returns.
    pub fn from_model_audio(samples: &[i16]) -> Self {
        Self {
            sample_rate: OUTPUT_SAMPLE_RATE,
            channels: vec![pcm16_to_float(samples)],
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn frame_count(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    pub fn channel(&self, index: usize) -> Option<&[f32]> {
        self.channels.get(index).map(Vec::as_slice)
    }

    /// Average of all channels.
    pub fn mono(&self) -> Vec<f32> {
        match self.channels.len() {
            0 => Vec::new(),
            1 => self.channels[0].clone(),
            n => (0..self.frame_count())
                .map(|i| self.channels.iter().map(|c| c[i]).sum::<f32>() / n as f32)
                .collect(),
        }
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frame_count() as f64 / self.sample_rate as f64
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.duration_secs())
    }

    pub fn is_empty(&self) -> bool {
        self.frame_count() == 0
    }
}
