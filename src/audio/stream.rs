//! Active playback streams - a cursor over a cached sound
//!
//! An `ActiveStream` is what actually sits in a mix bus slot. It walks
//! through a shared `CachedSound`, scales by its own gain and, when the
//! sound is mono and the bus is stereo, duplicates each sample onto both
//! channels.

use std::sync::Arc;

use super::cache::CachedSound;
use super::AudioError;

/// How source channels are mapped onto bus channels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelMap {
    /// Same channel count on both sides
    Direct,
    /// Mono source duplicated onto a stereo bus
    MonoToStereo,
}

impl ChannelMap {
    /// Work out the mapping, failing for anything but passthrough or mono->stereo
    pub fn between(source: u16, bus: u16) -> Result<Self, AudioError> {
        match (source, bus) {
            (s, b) if s == b && s > 0 => Ok(ChannelMap::Direct),
            (1, 2) => Ok(ChannelMap::MonoToStereo),
            (sound, bus) => Err(AudioError::ChannelConfiguration { sound, bus }),
        }
    }
}

/// A single playing instance of a cached sound
pub struct ActiveStream {
    sound: Arc<CachedSound>,
    /// Next sample index in the source buffer
    position: usize,
    gain: f32,
    map: ChannelMap,
    bus_channels: usize,
}

impl ActiveStream {
    /// Create a stream for a bus with `bus_channels` channels
    ///
    /// The sound must already be at the bus sample rate.
    pub fn new(sound: Arc<CachedSound>, gain: f32, bus_channels: u16) -> Result<Self, AudioError> {
        let map = ChannelMap::between(sound.channels(), bus_channels)?;
        Ok(Self {
            sound,
            position: 0,
            gain: gain.clamp(0.0, 1.0),
            map,
            bus_channels: bus_channels as usize,
        })
    }

    /// Whether every sample has been handed out
    pub fn is_finished(&self) -> bool {
        self.position >= self.sound.samples().len()
    }

    /// Add the next chunk of this stream into `out` (interleaved, bus layout)
    ///
    /// # Returns
    /// Number of frames written. Fewer than `out.len() / channels` means the
    /// stream has run out.
    pub fn mix_into(&mut self, out: &mut [f32]) -> usize {
        let samples = self.sound.samples();
        let remaining = &samples[self.position.min(samples.len())..];
        let wanted = out.len() / self.bus_channels;

        match self.map {
            ChannelMap::Direct => {
                let frames = wanted.min(remaining.len() / self.bus_channels);
                let count = frames * self.bus_channels;
                for (o, s) in out[..count].iter_mut().zip(&remaining[..count]) {
                    *o += s * self.gain;
                }
                self.position += count;
                frames
            }
            ChannelMap::MonoToStereo => {
                let frames = wanted.min(remaining.len());
                for (frame, s) in out.chunks_exact_mut(2).zip(&remaining[..frames]) {
                    let v = s * self.gain;
                    frame[0] += v;
                    frame[1] += v;
                }
                self.position += frames;
                frames
            }
        }
    }
}
