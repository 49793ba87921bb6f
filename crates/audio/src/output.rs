use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{FromSample, SampleFormat, SizedSample, Stream};
use crossbeam_channel::{Receiver, Sender};
use dasp::interpolate::linear::Linear;
use dasp::{signal, Signal};
use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use talkmee_playback::{AudioOutput, PlayableBuffer, VoiceId};

use crate::device::find_output_device;
use crate::{AudioError, Result};

/// Pending commands the render callback can fall behind by.
const COMMAND_CAPACITY: usize = 256;

const OPEN_TIMEOUT: Duration = Duration::from_secs(5);

enum OutputCommand {
    Start {
        id: VoiceId,
        start_frame: u64,
        samples: Arc<[f32]>,
    },
    Stop(VoiceId),
}

struct Voice {
    id: VoiceId,
    start_frame: u64,
    samples: Arc<[f32]>,
}

impl Voice {
    fn end_frame(&self) -> u64 {
        self.start_frame + self.samples.len() as u64
    }
}

/// Maps scheduler seconds onto device frames.
///
/// A buffer that starts where the previous one ended begins on that
/// buffer's end frame, and every end frame is rounded from absolute time,
/// so back-to-back buffers tile without gaps or overlap at any rate ratio.
#[derive(Debug)]
struct FrameCursor {
    rate: f64,
    /// Scheduler time and device frame where the last buffer ended.
    last_end: Option<(f64, u64)>,
}

impl FrameCursor {
    fn new(rate: u32) -> Self {
        Self {
            rate: rate as f64,
            last_end: None,
        }
    }

    /// Start frame and length in device frames for a buffer at `at`.
    fn place(&mut self, at: f64, duration: f64) -> (u64, usize) {
        let at = at.max(0.0);
        let half_frame = 0.5 / self.rate;
        let start = match self.last_end {
            Some((time, frame)) if (at - time).abs() < half_frame => frame,
            _ => (at * self.rate).round() as u64,
        };
        let end_time = at + duration.max(0.0);
        let end = ((end_time * self.rate).round() as u64).max(start);
        self.last_end = Some((end_time, end));
        (start, (end - start) as usize)
    }
}

/// State owned by the real-time callback.
struct Renderer {
    commands: HeapCons<OutputCommand>,
    ended: Sender<VoiceId>,
    frames_rendered: Arc<AtomicU64>,
    channels: usize,
    voices: Vec<Voice>,
}

impl Renderer {
    fn apply_commands(&mut self) {
        while let Some(command) = self.commands.try_pop() {
            match command {
                OutputCommand::Start {
                    id,
                    start_frame,
                    samples,
                } => self.voices.push(Voice {
                    id,
                    start_frame,
                    samples,
                }),
                OutputCommand::Stop(id) => self.voices.retain(|v| v.id != id),
            }
        }
    }

    fn render<T: SizedSample + FromSample<f32>>(&mut self, data: &mut [T]) {
        self.apply_commands();

        let channels = self.channels.max(1);
        let frames = (data.len() / channels) as u64;
        let base = self.frames_rendered.load(Ordering::Acquire);

        for (offset, frame) in data.chunks_mut(channels).enumerate() {
            let t = base + offset as u64;
            let mut mix = 0.0f32;
            for voice in &self.voices {
                if t >= voice.start_frame {
                    if let Some(sample) = voice.samples.get((t - voice.start_frame) as usize) {
                        mix += *sample;
                    }
                }
            }
            let value = T::from_sample(mix.clamp(-1.0, 1.0));
            for out in frame.iter_mut() {
                *out = value;
            }
        }

        let now = base + frames;
        self.frames_rendered.store(now, Ordering::Release);

        let ended = &self.ended;
        self.voices.retain(|voice| {
            if voice.end_frame() <= now {
                let _ = ended.try_send(voice.id);
                false
            } else {
                true
            }
        });
    }
}

/// Speaker output whose clock is the number of frames the device rendered.
///
/// Scheduling commands reach the audio callback through a lock-free ring;
/// finished voices come back over a channel and are reported by
/// [`AudioOutput::drain_ended`].
pub struct CpalOutput {
    commands: HeapProd<OutputCommand>,
    ended: Receiver<VoiceId>,
    rejected: Vec<VoiceId>,
    frames_rendered: Arc<AtomicU64>,
    device_rate: u32,
    cursor: FrameCursor,
    stop_signal: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

fn build_stream(device: &cpal::Device, renderer: Renderer) -> Result<(Stream, u32)> {
    let config = device.default_output_config()?;
    let sample_rate = config.sample_rate().0;

    let stream = match config.sample_format() {
        SampleFormat::F32 => {
            let mut renderer = renderer;
            device.build_output_stream(
                &config.into(),
                move |data: &mut [f32], _| renderer.render(data),
                |err| tracing::error!("audio output error: {}", err),
                None,
            )?
        }
        SampleFormat::I16 => {
            let mut renderer = renderer;
            device.build_output_stream(
                &config.into(),
                move |data: &mut [i16], _| renderer.render(data),
                |err| tracing::error!("audio output error: {}", err),
                None,
            )?
        }
        format => {
            return Err(AudioError::StreamError(format!(
                "unsupported output sample format: {format:?}"
            )))
        }
    };
    Ok((stream, sample_rate))
}

impl CpalOutput {
    /// Open the named output device, or the default one.
    pub fn open(device_id: Option<&str>) -> Result<Self> {
        let (producer, consumer) = HeapRb::<OutputCommand>::new(COMMAND_CAPACITY).split();
        let (ended_tx, ended_rx) = crossbeam_channel::unbounded();
        let frames_rendered = Arc::new(AtomicU64::new(0));
        let stop_signal = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<u32>>(1);

        let device_id = device_id.map(str::to_string);
        let thread_frames = Arc::clone(&frames_rendered);
        let thread_stop = Arc::clone(&stop_signal);

        let handle = std::thread::Builder::new()
            .name("talkmee-output".into())
            .spawn(move || {
                let opened = (|| {
                    let host = cpal::default_host();
                    let device = find_output_device(&host, device_id.as_deref())?;
                    let channels = device.default_output_config()?.channels() as usize;
                    let renderer = Renderer {
                        commands: consumer,
                        ended: ended_tx,
                        frames_rendered: thread_frames,
                        channels,
                        voices: Vec::with_capacity(64),
                    };
                    let (stream, rate) = build_stream(&device, renderer)?;
                    stream.play().map_err(|e| AudioError::StreamError(e.to_string()))?;
                    Ok::<_, AudioError>((stream, rate))
                })();

                let stream = match opened {
                    Ok((stream, rate)) => {
                        let _ = ready_tx.send(Ok(rate));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                while !thread_stop.load(Ordering::SeqCst) {
                    std::thread::sleep(Duration::from_millis(20));
                }
                drop(stream);
                tracing::debug!("Output thread exiting");
            })
            .map_err(|e| AudioError::StreamError(format!("failed to spawn output thread: {e}")))?;

        let device_rate = match ready_rx.recv_timeout(OPEN_TIMEOUT) {
            Ok(Ok(rate)) => rate,
            Ok(Err(e)) => {
                let _ = handle.join();
                return Err(e);
            }
            Err(_) => {
                stop_signal.store(true, Ordering::SeqCst);
                return Err(AudioError::StreamError("timed out opening speaker".into()));
            }
        };

        tracing::info!(device_rate, "Speaker output started");
        Ok(Self {
            commands: producer,
            ended: ended_rx,
            rejected: Vec::new(),
            frames_rendered,
            device_rate,
            cursor: FrameCursor::new(device_rate),
            stop_signal,
            thread: Some(handle),
        })
    }

    pub fn device_rate(&self) -> u32 {
        self.device_rate
    }
}

/// Convert model audio to the device rate with linear interpolation,
/// producing exactly `out_len` frames.
pub(crate) fn resample_for_device(samples: &[f32], from_hz: u32, to_hz: u32, out_len: usize) -> Vec<f32> {
    let mut output: Vec<f32> = if from_hz == to_hz || samples.is_empty() {
        samples.iter().copied().take(out_len).collect()
    } else {
        let mut source = signal::from_iter(samples.iter().copied());
        let left = source.next();
        let right = source.next();
        let interpolator = Linear::new(left, right);
        source
            .from_hz_to_hz(interpolator, from_hz as f64, to_hz as f64)
            .take(out_len)
            .collect()
    };
    output.resize(out_len, 0.0);
    output
}

impl AudioOutput for CpalOutput {
    fn current_time(&self) -> f64 {
        self.frames_rendered.load(Ordering::Acquire) as f64 / self.device_rate as f64
    }

    fn start(&mut self, id: VoiceId, buffer: Arc<PlayableBuffer>, at: f64) {
        let (start_frame, frames) = self.cursor.place(at, buffer.duration_secs());
        let samples = resample_for_device(&buffer.mono(), buffer.sample_rate(), self.device_rate, frames);
        let command = OutputCommand::Start {
            id,
            start_frame,
            samples: samples.into(),
        };
        if self.commands.try_push(command).is_err() {
            tracing::warn!(id, "Output command queue full, dropping buffer");
            self.rejected.push(id);
        }
    }

    fn stop(&mut self, id: VoiceId) {
        if self.commands.try_push(OutputCommand::Stop(id)).is_err() {
            tracing::warn!(id, "Output command queue full, cannot stop voice");
        }
    }

    fn drain_ended(&mut self) -> Vec<VoiceId> {
        let mut ended = std::mem::take(&mut self.rejected);
        ended.extend(self.ended.try_iter());
        ended
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        self.stop_signal.store(true, Ordering::SeqCst);
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                tracing::warn!("Output thread panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn renderer(channels: usize) -> (Renderer, HeapProd<OutputCommand>, Receiver<VoiceId>) {
        let (producer, consumer) = HeapRb::<OutputCommand>::new(8).split();
        let (ended_tx, ended_rx) = crossbeam_channel::unbounded();
        let renderer = Renderer {
            commands: consumer,
            ended: ended_tx,
            frames_rendered: Arc::new(AtomicU64::new(0)),
            channels,
            voices: Vec::new(),
        };
        (renderer, producer, ended_rx)
    }

    fn start(id: VoiceId, start_frame: u64, samples: &[f32]) -> OutputCommand {
        OutputCommand::Start {
            id,
            start_frame,
            samples: samples.to_vec().into(),
        }
    }

    #[test]
    fn test_render_places_voices_on_the_clock() {
        let (mut renderer, mut commands, ended) = renderer(2);
        assert!(commands.try_push(start(1, 2, &[0.5, 0.25])).is_ok());

        let mut out = [0.0f32; 8];
        renderer.render(&mut out);
        assert_eq!(out, [0.0, 0.0, 0.0, 0.0, 0.5, 0.5, 0.25, 0.25]);
        assert_eq!(ended.try_recv().ok(), Some(1));
        assert_eq!(renderer.frames_rendered.load(Ordering::Acquire), 4);
    }

    #[test]
    fn test_render_mixes_and_stops() {
        let (mut renderer, mut commands, ended) = renderer(1);
        assert!(commands.try_push(start(1, 0, &[0.5; 8])).is_ok());
        assert!(commands.try_push(start(2, 0, &[0.25; 8])).is_ok());

        let mut out = [0.0f32; 4];
        renderer.render(&mut out);
        assert_eq!(out, [0.75; 4]);

        assert!(commands.try_push(OutputCommand::Stop(1)).is_ok());
        renderer.render(&mut out);
        assert_eq!(out, [0.25; 4]);
        assert_eq!(ended.try_recv().ok(), Some(2));
        assert!(ended.try_recv().is_err());
    }

    #[test]
    fn test_render_i16_clamps() {
        let (mut renderer, mut commands, _ended) = renderer(1);
        assert!(commands.try_push(start(1, 0, &[0.9, -0.9])).is_ok());
        assert!(commands.try_push(start(2, 0, &[0.9, -0.9])).is_ok());

        let mut out = [0i16; 2];
        renderer.render(&mut out);
        assert_eq!(out, [i16::MAX, i16::MIN]);
    }

    #[test]
    fn test_resample_for_device_length() {
        let input = vec![0.5f32; 2400];
        let output = resample_for_device(&input, 24_000, 48_000, 4800);
        assert_eq!(output.len(), 4800);
        assert!(output[10..4700].iter().all(|s| (s - 0.5).abs() < 1e-6));

        assert_eq!(resample_for_device(&input, 24_000, 24_000, 2400), input);
        assert_eq!(resample_for_device(&input, 24_000, 44_100, 4411).len(), 4411);
    }

    #[test]
    fn test_cursor_tiles_back_to_back_buffers() {
        // 24 kHz chunks of 1001 samples onto a 44.1 kHz device: each chunk
        // is 1839.3375 device frames long.
        let mut cursor = FrameCursor::new(44_100);
        let duration = 1001.0 / 24_000.0;
        let mut at = 0.0;
        let mut expected_start = 0;
        for _ in 0..50 {
            let (start, len) = cursor.place(at, duration);
            assert_eq!(start, expected_start);
            assert!((1839..=1840).contains(&len));
            expected_start = start + len as u64;
            at += duration;
        }
        // No drift against absolute time.
        assert_eq!(expected_start, (at * 44_100.0_f64).round() as u64);
    }

    #[test]
    fn test_cursor_reanchors_after_gap() {
        let mut cursor = FrameCursor::new(48_000);
        assert_eq!(cursor.place(0.0, 0.5), (0, 24_000));
        // Later than the previous end: placed on its own time.
        assert_eq!(cursor.place(2.0, 0.25), (96_000, 12_000));
        // Earlier than the previous end, as after an interruption.
        assert_eq!(cursor.place(1.0, 0.25), (48_000, 12_000));
    }
}
