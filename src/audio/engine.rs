//! Playback engine - one mix bus bound to one output device
//!
//! The engine owns the cpal output stream and the control half of its
//! mix bus. Sounds are decoded through the shared `SoundCache`, converted
//! to the bus rate once per engine and then handed to the bus as
//! `ActiveStream`s.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{FromSample, SizedSample};
use crossbeam_channel::{bounded, Sender};

use super::bus::{mix_bus, BusFormat, MixBus, MixBusHandle};
use super::cache::{CachedSound, SoundCache};
use super::devices;
use super::resample;
use super::stream::{ActiveStream, ChannelMap};
use super::AudioError;

/// Callback invoked when the bus drains to idle
pub type DrainCallback = Box<dyn Fn() + Send + 'static>;

/// Samples mixed per step; larger callbacks are mixed in several steps
const SCRATCH_SAMPLES: usize = 8192;

/// An open output device and the bus feeding it
struct OutputBinding {
    device_index: usize,
    device_name: String,
    /// Kept alive to continue playback; `None` for a detached bus
    stream: Option<cpal::Stream>,
    bus: MixBusHandle,
}

/// Plays cached sounds on one output device
pub struct PlaybackEngine {
    label: String,
    cache: Arc<SoundCache>,
    binding: Option<OutputBinding>,
    drained_tx: Sender<()>,
    listeners: Arc<Mutex<Vec<DrainCallback>>>,
    /// Sounds already converted to this engine's bus rate
    converted: Mutex<HashMap<(PathBuf, u32), Arc<CachedSound>>>,
}

impl PlaybackEngine {
    /// Create an unbound engine
    ///
    /// # Arguments
    /// * `label` - Name used in log messages ("Playback 1")
    /// * `cache` - Decoded sound cache shared with other engines
    pub fn new(label: impl Into<String>, cache: Arc<SoundCache>) -> Self {
        let (drained_tx, drained_rx) = bounded::<()>(4);
        let listeners: Arc<Mutex<Vec<DrainCallback>>> = Arc::new(Mutex::new(Vec::new()));
        let label = label.into();

        // Runs until the engine and every bus it created are gone
        let thread_listeners = Arc::clone(&listeners);
        let thread_label = label.clone();
        std::thread::spawn(move || {
            for () in drained_rx.iter() {
                log::debug!("{}: all sounds finished", thread_label);
                let listeners = thread_listeners.lock().unwrap_or_else(PoisonError::into_inner);
                for callback in listeners.iter() {
                    callback();
                }
            }
        });

        Self {
            label,
            cache,
            binding: None,
            drained_tx,
            listeners,
            converted: Mutex::new(HashMap::new()),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Index of the bound device, if any
    pub fn device_index(&self) -> Option<usize> {
        self.binding.as_ref().map(|b| b.device_index)
    }

    pub fn device_name(&self) -> Option<&str> {
        self.binding.as_ref().map(|b| b.device_name.as_str())
    }

    /// Register a callback for "every sound finished"
    pub fn on_drained<F>(&self, callback: F)
    where
        F: Fn() + Send + 'static,
    {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Box::new(callback));
    }

    /// Bind to the output device at `device_index`
    ///
    /// Any previous binding is released first. On failure the engine is
    /// left uninitialized.
    pub fn init(&mut self, device_index: usize) -> Result<(), AudioError> {
        self.release();

        let device = devices::output_device(device_index)?;
        let name = devices::device_name(&device);
        let supported = devices::preferred_output_config(&device)?;
        let sample_format = supported.sample_format();
        let config: cpal::StreamConfig = supported.into();

        let format = BusFormat {
            sample_rate: config.sample_rate.0,
            channels: config.channels,
        };
        log::info!(
            "{}: opening {} ({} Hz, {} ch, {:?})",
            self.label,
            name,
            format.sample_rate,
            format.channels,
            sample_format
        );

        let (handle, bus) = mix_bus(format, self.drained_tx.clone());

        let stream = match sample_format {
            cpal::SampleFormat::F32 => build_output::<f32>(&device, &config, bus, &self.label),
            cpal::SampleFormat::I16 => build_output::<i16>(&device, &config, bus, &self.label),
            cpal::SampleFormat::U16 => build_output::<u16>(&device, &config, bus, &self.label),
            cpal::SampleFormat::I32 => build_output::<i32>(&device, &config, bus, &self.label),
            format => {
                return Err(AudioError::Stream(format!(
                    "{}: unsupported sample format {:?}",
                    name, format
                )))
            }
        }
        .map_err(|e| devices::classify_build_error(&name, e))?;

        stream
            .play()
            .map_err(|e| devices::classify_play_error(&name, e))?;

        self.clear_converted();
        self.binding = Some(OutputBinding {
            device_index,
            device_name: name,
            stream: Some(stream),
            bus: handle,
        });
        log::info!("{}: output started", self.label);
        Ok(())
    }

    /// Release the current output, ignoring any device errors
    pub fn release(&mut self) {
        if let Some(binding) = self.binding.take() {
            if let Some(stream) = &binding.stream {
                if let Err(e) = stream.pause() {
                    log::debug!("{}: pause on release failed: {}", self.label, e);
                }
            }
            log::info!("{}: released {}", self.label, binding.device_name);
        }
    }

    /// Start playing `source` at linear `gain`
    pub fn play(&self, source: &Path, gain: f32) -> Result<(), AudioError> {
        let binding = self.binding.as_ref().ok_or(AudioError::NotInitialized)?;
        let stream = self.prepare(binding, source, gain)?;
        binding.bus.add_stream(stream)?;
        log::debug!("{}: playing {} at gain {:.2}", self.label, source.display(), gain);
        Ok(())
    }

    /// Cut whatever is playing and start `source` in its place
    ///
    /// Decoding happens before anything is cut, and the swap lands on a
    /// single pull, so the bus does not report a drain in between.
    pub fn play_replacing(&self, source: &Path, gain: f32) -> Result<(), AudioError> {
        let binding = self.binding.as_ref().ok_or(AudioError::NotInitialized)?;
        let stream = self.prepare(binding, source, gain)?;
        binding.bus.replace_streams(stream)?;
        log::debug!("{}: replacing with {} at gain {:.2}", self.label, source.display(), gain);
        Ok(())
    }

    fn prepare(
        &self,
        binding: &OutputBinding,
        source: &Path,
        gain: f32,
    ) -> Result<ActiveStream, AudioError> {
        let format = binding.bus.format();
        let sound = self.cache.get_or_decode(source)?;
        ChannelMap::between(sound.channels(), format.channels)?;
        let sound = self.converted(sound, format.sample_rate)?;
        ActiveStream::new(sound, gain, format.channels)
    }

    /// Cut every playing sound
    pub fn stop_all(&self) {
        if let Some(binding) = &self.binding {
            if let Err(e) = binding.bus.remove_all_streams() {
                log::warn!("{}: stop failed: {}", self.label, e);
            }
        }
    }

    /// Streams alive on the bus as of the last callback
    #[cfg(test)]
    pub fn active_streams(&self) -> usize {
        self.binding
            .as_ref()
            .map_or(0, |b| b.bus.active_streams())
    }

    fn converted(&self, sound: Arc<CachedSound>, rate: u32) -> Result<Arc<CachedSound>, AudioError> {
        if sound.sample_rate() == rate {
            return Ok(sound);
        }
        let key = (sound.key().to_path_buf(), rate);
        let mut converted = self.converted.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = converted.get(&key) {
            return Ok(Arc::clone(existing));
        }
        let resampled = resample::to_rate(sound, rate)?;
        converted.insert(key, Arc::clone(&resampled));
        Ok(resampled)
    }

    fn clear_converted(&self) {
        self.converted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Bind to an in-memory bus instead of a device
    #[cfg(test)]
    pub(crate) fn bind_detached(&mut self, device_index: usize, format: BusFormat) -> MixBus {
        self.release();
        let (handle, bus) = mix_bus(format, self.drained_tx.clone());
        self.binding = Some(OutputBinding {
            device_index,
            device_name: "detached".to_string(),
            stream: None,
            bus: handle,
        });
        bus
    }
}

impl Drop for PlaybackEngine {
    fn drop(&mut self) {
        self.release();
    }
}

fn build_output<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut bus: MixBus,
    label: &str,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: SizedSample + FromSample<f32>,
{
    let chunk = mix_chunk_len(config.channels);
    let mut scratch = vec![0.0f32; chunk];
    let label = label.to_string();
    device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            for block in data.chunks_mut(chunk) {
                let mixed = &mut scratch[..block.len()];
                bus.read(mixed);
                for (out, sample) in block.iter_mut().zip(mixed.iter()) {
                    *out = T::from_sample(*sample);
                }
            }
        },
        move |err| log::error!("{}: audio stream error: {}", label, err),
        None,
    )
}

/// Largest whole-frame block that fits `SCRATCH_SAMPLES`
fn mix_chunk_len(channels: u16) -> usize {
    let channels = channels.max(1) as usize;
    (SCRATCH_SAMPLES - SCRATCH_SAMPLES % channels).max(channels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    fn cache_with(channels: u16, rate: u32, frames: usize) -> Arc<SoundCache> {
        Arc::new(SoundCache::with_decoder(move |path| {
            Ok(CachedSound::new(
                vec![0.5; frames * channels as usize],
                rate,
                channels,
                path.to_path_buf(),
            ))
        }))
    }

    #[test]
    fn test_mix_chunks_hold_whole_frames() {
        assert_eq!(mix_chunk_len(2), SCRATCH_SAMPLES);
        assert_eq!(mix_chunk_len(6) % 6, 0);
        assert!(mix_chunk_len(6) <= SCRATCH_SAMPLES);
    }

    #[test]
    fn test_chunked_reads_match_one_read() {
        let mut engine = PlaybackEngine::new("test", cache_with(2, 44100, 100));
        let mut bus = engine.bind_detached(0, BusFormat::default());
        engine.play(Path::new("a.wav"), 1.0).unwrap();

        let mut out = vec![0.0; 256];
        for block in out.chunks_mut(64) {
            bus.read(block);
        }
        assert!(out[..200].iter().all(|s| (*s - 0.5).abs() < 1e-6));
        assert!(out[200..].iter().all(|s| *s == 0.0));
    }

    #[test]
    fn test_play_requires_init() {
        let engine = PlaybackEngine::new("test", cache_with(2, 44100, 10));
        assert!(matches!(
            engine.play(Path::new("a.wav"), 1.0),
            Err(AudioError::NotInitialized)
        ));
    }

    #[test]
    fn test_play_mixes_with_gain() {
        let mut engine = PlaybackEngine::new("test", cache_with(2, 44100, 100));
        let mut bus = engine.bind_detached(0, BusFormat::default());

        engine.play(Path::new("a.wav"), 0.5).unwrap();
        let mut out = vec![0.0; 64];
        bus.read(&mut out);
        assert!(out.iter().all(|s| (*s - 0.25).abs() < 1e-6));
        assert_eq!(engine.active_streams(), 1);
    }

    #[test]
    fn test_mono_sound_upmixed() {
        let mut engine = PlaybackEngine::new("test", cache_with(1, 44100, 100));
        let mut bus = engine.bind_detached(0, BusFormat::default());
        engine.play(Path::new("mono.wav"), 1.0).unwrap();
        let mut out = vec![0.0; 8];
        bus.read(&mut out);
        assert!(out.iter().all(|s| (*s - 0.5).abs() < 1e-6));
    }

    #[test]
    fn test_unsupported_channels_fail_fast() {
        let mut engine = PlaybackEngine::new("test", cache_with(6, 44100, 10));
        let _bus = engine.bind_detached(0, BusFormat::default());
        assert!(matches!(
            engine.play(Path::new("surround.wav"), 1.0),
            Err(AudioError::ChannelConfiguration { sound: 6, bus: 2 })
        ));
        assert_eq!(engine.active_streams(), 0);
    }

    #[test]
    fn test_decode_error_surfaces() {
        let cache = Arc::new(SoundCache::with_decoder(|_| {
            Err(crate::audio::DecodeError::Unsupported("midi".to_string()))
        }));
        let mut engine = PlaybackEngine::new("test", cache);
        let _bus = engine.bind_detached(0, BusFormat::default());
        assert!(matches!(
            engine.play(Path::new("song.mid"), 1.0),
            Err(AudioError::Decode(_))
        ));
    }

    #[test]
    fn test_resampled_once_per_rate() {
        let mut engine = PlaybackEngine::new("test", cache_with(2, 22050, 2205));
        let _bus = engine.bind_detached(0, BusFormat {
            sample_rate: 44100,
            channels: 2,
        });
        engine.play(Path::new("low.wav"), 1.0).unwrap();
        engine.play(Path::new("low.wav"), 1.0).unwrap();
        assert_eq!(engine.converted.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_play_replacing_swaps_without_drain() {
        let mut engine = PlaybackEngine::new("test", cache_with(2, 44100, 1000));
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        engine.on_drained(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let mut bus = engine.bind_detached(0, BusFormat::default());
        engine.play(Path::new("one.wav"), 1.0).unwrap();
        engine.play(Path::new("two.wav"), 1.0).unwrap();
        let mut out = vec![0.0; 64];
        bus.read(&mut out);
        assert_eq!(engine.active_streams(), 2);

        engine.play_replacing(Path::new("three.wav"), 0.5).unwrap();
        bus.read(&mut out);
        assert_eq!(engine.active_streams(), 1);
        assert!(out.iter().all(|s| (*s - 0.25).abs() < 1e-6));

        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_stop_all_and_drain_callback() {
        let mut engine = PlaybackEngine::new("test", cache_with(2, 44100, 1000));
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        engine.on_drained(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let mut bus = engine.bind_detached(0, BusFormat::default());
        engine.play(Path::new("long.wav"), 1.0).unwrap();
        let mut out = vec![0.0; 64];
        bus.read(&mut out);

        engine.stop_all();
        bus.read(&mut out);
        assert!(out.iter().all(|s| *s == 0.0));

        let deadline = Instant::now() + Duration::from_secs(2);
        while fired.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
