//! Loopback bridge - forwards a capture device into an output device
//!
//! Captured audio goes through a small ring buffer (about 100 ms) into its
//! own output stream on the playback device. The mix bus is not involved.
//! When the buffer is full the newest chunk is dropped, so latency stays
//! bounded and the capture callback never waits.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample};
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};

use super::devices;
use super::AudioError;

/// Buffered audio, in milliseconds
const BUFFER_MS: usize = 100;

/// Samples converted per step inside the stream callbacks
const CHUNK_SAMPLES: usize = 4096;

/// Create the buffer between capture and playback
///
/// # Arguments
/// * `sample_rate` - Rate shared by both streams
/// * `capture_channels` - Channels delivered by the capture callback
/// * `output_channels` - Channels expected by the output callback
pub fn loopback_buffer(
    sample_rate: u32,
    capture_channels: u16,
    output_channels: u16,
) -> (CaptureWriter, PlaybackReader) {
    let frames = (sample_rate as usize * BUFFER_MS / 1000).max(1);
    let capacity = frames * output_channels.max(1) as usize;
    let (producer, consumer) = HeapRb::<f32>::new(capacity).split();
    (
        CaptureWriter {
            producer,
            capture_channels: capture_channels.max(1) as usize,
            output_channels: output_channels.max(1) as usize,
            scratch: Vec::with_capacity(capacity),
        },
        PlaybackReader { consumer },
    )
}

/// Capture side of the loopback buffer
pub struct CaptureWriter {
    producer: HeapProd<f32>,
    capture_channels: usize,
    output_channels: usize,
    scratch: Vec<f32>,
}

impl CaptureWriter {
    /// Queue one captured chunk
    ///
    /// # Returns
    /// `false` when the chunk did not fit and was dropped
    pub fn write(&mut self, input: &[f32]) -> bool {
        let frames = input.len() / self.capture_channels;
        let needed = frames * self.output_channels;
        if self.producer.vacant_len() < needed {
            return false;
        }

        if self.capture_channels == self.output_channels {
            self.producer.push_slice(&input[..needed]);
            return true;
        }

        // `needed` fits the ring, so it also fits the preallocated scratch
        self.scratch.clear();
        for frame in input.chunks_exact(self.capture_channels) {
            if self.output_channels == 1 {
                let sum: f32 = frame.iter().sum();
                self.scratch.push(sum / self.capture_channels as f32);
            } else {
                for ch in 0..self.output_channels {
                    self.scratch.push(frame[ch.min(self.capture_channels - 1)]);
                }
            }
        }
        self.producer.push_slice(&self.scratch);
        true
    }
}

/// Playback side of the loopback buffer
pub struct PlaybackReader {
    consumer: HeapCons<f32>,
}

impl PlaybackReader {
    /// Fill `out`, padding with silence on underrun
    ///
    /// # Returns
    /// Number of samples that came from capture
    pub fn read(&mut self, out: &mut [f32]) -> usize {
        let got = self.consumer.pop_slice(out);
        out[got..].fill(0.0);
        got
    }
}

/// Streams kept alive while the bridge runs
struct RunningLoopback {
    capture: cpal::Stream,
    output: cpal::Stream,
    capture_name: String,
    output_name: String,
}

/// Live microphone to playback device forwarding
#[derive(Default)]
pub struct LoopbackBridge {
    running: Option<RunningLoopback>,
}

impl LoopbackBridge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Start forwarding `capture_index` into `playback_index`
    ///
    /// Always tears down any running bridge first; there is no partial
    /// reconfiguration.
    pub fn start(&mut self, capture_index: usize, playback_index: usize) -> Result<(), AudioError> {
        self.stop();

        let output_device = devices::output_device(playback_index)?;
        let capture_device = devices::input_device(capture_index)?;
        let output_name = devices::device_name(&output_device);
        let capture_name = devices::device_name(&capture_device);

        let output_supported = devices::preferred_output_config(&output_device)?;
        let output_format = output_supported.sample_format();
        let output_config: cpal::StreamConfig = output_supported.into();

        let capture_supported = devices::capture_config(&capture_device, output_config.sample_rate)?;
        let capture_format = capture_supported.sample_format();
        let capture_config: cpal::StreamConfig = capture_supported.into();

        let (writer, reader) = loopback_buffer(
            output_config.sample_rate.0,
            capture_config.channels,
            output_config.channels,
        );

        let output = match output_format {
            cpal::SampleFormat::F32 => build_playback::<f32>(&output_device, &output_config, reader),
            cpal::SampleFormat::I16 => build_playback::<i16>(&output_device, &output_config, reader),
            cpal::SampleFormat::U16 => build_playback::<u16>(&output_device, &output_config, reader),
            cpal::SampleFormat::I32 => build_playback::<i32>(&output_device, &output_config, reader),
            format => {
                return Err(AudioError::Stream(format!(
                    "{}: unsupported sample format {:?}",
                    output_name, format
                )))
            }
        }
        .map_err(|e| devices::classify_build_error(&output_name, e))?;

        let capture = match capture_format {
            cpal::SampleFormat::F32 => build_capture::<f32>(&capture_device, &capture_config, writer),
            cpal::SampleFormat::I16 => build_capture::<i16>(&capture_device, &capture_config, writer),
            cpal::SampleFormat::U16 => build_capture::<u16>(&capture_device, &capture_config, writer),
            cpal::SampleFormat::I32 => build_capture::<i32>(&capture_device, &capture_config, writer),
            format => {
                return Err(AudioError::Stream(format!(
                    "{}: unsupported sample format {:?}",
                    capture_name, format
                )))
            }
        }
        .map_err(|e| devices::classify_build_error(&capture_name, e))?;

        output
            .play()
            .map_err(|e| devices::classify_play_error(&output_name, e))?;
        capture
            .play()
            .map_err(|e| devices::classify_play_error(&capture_name, e))?;

        log::info!(
            "Loopback started: {} -> {} ({} Hz)",
            capture_name,
            output_name,
            output_config.sample_rate.0
        );
        self.running = Some(RunningLoopback {
            capture,
            output,
            capture_name,
            output_name,
        });
        Ok(())
    }

    /// Stop forwarding and release both devices
    ///
    /// Never fails; errors from the backend are only logged.
    pub fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };

        if let Err(e) = running.capture.pause() {
            log::debug!("Loopback: pausing {} failed: {}", running.capture_name, e);
        }
        drop(running.capture);

        if let Err(e) = running.output.pause() {
            log::debug!("Loopback: pausing {} failed: {}", running.output_name, e);
        }
        drop(running.output);

        log::info!("Loopback stopped");
    }
}

impl Drop for LoopbackBridge {
    fn drop(&mut self) {
        self.stop();
    }
}

fn build_capture<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut writer: CaptureWriter,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let chunk = chunk_len(config.channels);
    let mut converted = vec![0.0f32; chunk];
    let mut dropped: u64 = 0;
    device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            for block in data.chunks(chunk) {
                let samples = &mut converted[..block.len()];
                for (out, sample) in samples.iter_mut().zip(block) {
                    *out = f32::from_sample(*sample);
                }
                if !writer.write(samples) {
                    dropped += 1;
                    if dropped.is_power_of_two() {
                        log::debug!("Loopback: buffer full, dropped {} chunks", dropped);
                    }
                }
            }
        },
        |err| log::error!("Loopback capture error: {}", err),
        None,
    )
}

fn build_playback<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut reader: PlaybackReader,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: SizedSample + FromSample<f32>,
{
    let chunk = chunk_len(config.channels);
    let mut scratch = vec![0.0f32; chunk];
    device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            for block in data.chunks_mut(chunk) {
                let samples = &mut scratch[..block.len()];
                reader.read(samples);
                for (out, sample) in block.iter_mut().zip(samples.iter()) {
                    *out = T::from_sample(*sample);
                }
            }
        },
        |err| log::error!("Loopback output error: {}", err),
        None,
    )
}

/// Largest whole-frame block that fits `CHUNK_SAMPLES`
fn chunk_len(channels: u16) -> usize {
    let channels = channels.max(1) as usize;
    (CHUNK_SAMPLES - CHUNK_SAMPLES % channels).max(channels)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_len_holds_whole_frames() {
        assert_eq!(chunk_len(2), CHUNK_SAMPLES);
        assert_eq!(chunk_len(6) % 6, 0);
        assert!(chunk_len(6) <= CHUNK_SAMPLES);
        assert_eq!(chunk_len(0), CHUNK_SAMPLES);
    }

    #[test]
    fn test_converting_write_stays_within_capacity() {
        let (mut writer, _reader) = loopback_buffer(1000, 1, 2);
        let capacity = writer.scratch.capacity();
        assert!(capacity >= 200);
        assert!(writer.write(&[0.5; 100]));
        assert_eq!(writer.scratch.capacity(), capacity);
        assert!(!writer.write(&[0.5; 10]));
    }

    #[test]
    fn test_passthrough() {
        let (mut writer, mut reader) = loopback_buffer(1000, 2, 2);
        assert!(writer.write(&[0.1, 0.2, 0.3, 0.4]));

        let mut out = vec![1.0; 6];
        assert_eq!(reader.read(&mut out), 4);
        assert_eq!(out, vec![0.1, 0.2, 0.3, 0.4, 0.0, 0.0]);
    }

    #[test]
    fn test_full_buffer_drops_whole_chunk() {
        // 100 ms at 1 kHz mono = 100 samples
        let (mut writer, mut reader) = loopback_buffer(1000, 1, 1);
        assert!(writer.write(&[0.5; 80]));
        assert!(!writer.write(&[0.9; 30]));
        assert!(writer.write(&[0.25; 20]));

        let mut out = vec![0.0; 100];
        assert_eq!(reader.read(&mut out), 100);
        assert!(out[..80].iter().all(|s| *s == 0.5));
        assert!(out[80..].iter().all(|s| *s == 0.25));
    }

    #[test]
    fn test_mono_capture_to_stereo_output() {
        let (mut writer, mut reader) = loopback_buffer(1000, 1, 2);
        assert!(writer.write(&[0.1, 0.2]));
        let mut out = vec![0.0; 4];
        reader.read(&mut out);
        assert_eq!(out, vec![0.1, 0.1, 0.2, 0.2]);
    }

    #[test]
    fn test_stereo_capture_to_mono_output() {
        let (mut writer, mut reader) = loopback_buffer(1000, 2, 1);
        assert!(writer.write(&[0.2, 0.4, 1.0, 0.0]));
        let mut out = vec![0.0; 2];
        reader.read(&mut out);
        assert!((out[0] - 0.3).abs() < 1e-6);
        assert!((out[1] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_stop_when_idle_is_noop() {
        let mut bridge = LoopbackBridge::new();
        bridge.stop();
        assert!(!bridge.is_running());
    }
}
