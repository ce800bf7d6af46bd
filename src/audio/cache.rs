//! Decoded sound cache - decode each source once, share the PCM everywhere
//!
//! Sounds are decoded fully into memory (interleaved f32) the first time
//! they are played and then kept for the lifetime of the process. Every
//! playback of the same source shares one `Arc<CachedSound>`.
//!
//! ## Concurrency
//!
//! The cache map is only locked long enough to find (or create) the slot
//! for a source. Decoding happens under the per-source slot lock, so two
//! racing requests for the same new source decode it once, while requests
//! for other sources are not held up.

use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::default::{get_codecs, get_probe};
use thiserror::Error;

/// Errors that can occur while decoding a sound file
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Failed to open sound file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unsupported audio format: {0}")]
    Unsupported(String),

    #[error("Corrupt audio data: {0}")]
    Corrupt(String),

    #[error("File contains no playable audio track")]
    NoTrack,
}

impl From<SymphoniaError> for DecodeError {
    fn from(err: SymphoniaError) -> Self {
        match err {
            SymphoniaError::IoError(e) => DecodeError::Io(e),
            SymphoniaError::Unsupported(what) => DecodeError::Unsupported(what.to_string()),
            other => DecodeError::Corrupt(other.to_string()),
        }
    }
}

/// A fully decoded sound held in memory
#[derive(Debug)]
pub struct CachedSound {
    /// Interleaved samples
    samples: Vec<f32>,
    sample_rate: u32,
    channels: u16,
    /// Identity of the source this buffer was decoded from
    key: PathBuf,
}

impl CachedSound {
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16, key: PathBuf) -> Self {
        Self {
            samples,
            sample_rate,
            channels,
            key,
        }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn key(&self) -> &Path {
        &self.key
    }

    /// Number of frames (samples per channel)
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels as usize
        }
    }
}

/// Normalize a source path into its cache key
///
/// Paths that can be canonicalized (the file exists) use the canonical
/// form so `./a.wav` and `/abs/a.wav` share an entry.
pub fn source_key(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Decoder used to fill the cache
pub type DecodeFn = dyn Fn(&Path) -> Result<CachedSound, DecodeError> + Send + Sync;

type Slot = Arc<Mutex<Option<Arc<CachedSound>>>>;

/// Process-wide cache of decoded sounds, keyed by source identity
pub struct SoundCache {
    slots: Mutex<HashMap<PathBuf, Slot>>,
    decode: Box<DecodeFn>,
}

impl SoundCache {
    /// Create a cache that decodes files with symphonia
    pub fn new() -> Self {
        Self::with_decoder(decode_file)
    }

    /// Create a cache with a custom decoder
    pub fn with_decoder<F>(decode: F) -> Self
    where
        F: Fn(&Path) -> Result<CachedSound, DecodeError> + Send + Sync + 'static,
    {
        Self {
            slots: Mutex::new(HashMap::new()),
            decode: Box::new(decode),
        }
    }

    /// Return the decoded sound for `source`, decoding it on first access
    ///
    /// A failed decode leaves no entry behind; the next request retries.
    pub fn get_or_decode(&self, source: &Path) -> Result<Arc<CachedSound>, DecodeError> {
        let key = source_key(source);

        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(slots.entry(key.clone()).or_default())
        };

        let mut guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(sound) = guard.as_ref() {
            return Ok(Arc::clone(sound));
        }

        match (self.decode)(&key) {
            Ok(sound) => {
                log::info!(
                    "Decoded {} ({} frames, {} Hz, {} ch)",
                    key.display(),
                    sound.frames(),
                    sound.sample_rate(),
                    sound.channels()
                );
                let sound = Arc::new(sound);
                *guard = Some(Arc::clone(&sound));
                Ok(sound)
            }
            Err(e) => {
                drop(guard);
                let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
                if let Some(current) = slots.get(&key) {
                    // A slot locked by another caller is being decoded again
                    let empty = current
                        .try_lock()
                        .map(|s| s.is_none())
                        .unwrap_or(false);
                    if Arc::ptr_eq(current, &slot) && empty {
                        slots.remove(&key);
                    }
                }
                log::warn!("Failed to decode {}: {}", key.display(), e);
                Err(e)
            }
        }
    }

    /// Number of successfully decoded sounds
    pub fn len(&self) -> usize {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots
            .values()
            .filter(|slot| slot.lock().map(|s| s.is_some()).unwrap_or(false))
            .count()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SoundCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Decode an entire audio file into interleaved f32 samples
pub fn decode_file(path: &Path) -> Result<CachedSound, DecodeError> {
    let file = File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = get_probe().format(
        &hint,
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    )?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or(DecodeError::NoTrack)?;
    let track_id = track.id;
    let mut sample_rate = track.codec_params.sample_rate.unwrap_or(0);
    let mut channels = track
        .codec_params
        .channels
        .map(|c| c.count() as u16)
        .unwrap_or(0);

    let mut decoder = get_codecs().make(&track.codec_params, &DecoderOptions::default())?;

    let mut samples = Vec::new();
    let mut sample_buf: Option<SampleBuffer<f32>> = None;
    let mut buf_frames = 0usize;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(e.into()),
        };

        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                sample_rate = spec.rate;
                channels = spec.channels.count() as u16;

                let frames = decoded.capacity();
                if sample_buf.is_none() || frames > buf_frames {
                    sample_buf = Some(SampleBuffer::<f32>::new(frames as u64, spec));
                    buf_frames = frames;
                }
                if let Some(buf) = sample_buf.as_mut() {
                    buf.copy_interleaved_ref(decoded);
                    samples.extend_from_slice(buf.samples());
                }
            }
            // A bad packet is skipped, the rest of the file may still play
            Err(SymphoniaError::DecodeError(msg)) => {
                log::debug!("Skipping bad packet in {}: {}", path.display(), msg);
            }
            Err(e) => return Err(e.into()),
        }
    }

    if sample_rate == 0 || channels == 0 {
        return Err(DecodeError::Unsupported(
            "missing sample rate or channel layout".to_string(),
        ));
    }

    Ok(CachedSound::new(
        samples,
        sample_rate,
        channels,
        path.to_path_buf(),
    ))
}
