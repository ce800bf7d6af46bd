//! Audio module - decoding, mixing and device output
//!
//! This module provides:
//! - Decoded sound cache shared by every playback engine
//! - Lock-free mix bus feeding a cpal output stream
//! - Playback engines bound to one output device each
//! - Loopback bridge from a capture device to a playback device

mod bus;
pub(crate) mod cache;
pub mod devices;
mod engine;
mod loopback;
mod resample;
mod stream;

use thiserror::Error;

// Re-export public types
pub use cache::{DecodeError, SoundCache};
pub use engine::PlaybackEngine;
pub use loopback::LoopbackBridge;
#[cfg(test)]
pub use bus::{BusFormat, MixBus};

/// Errors raised by playback and loopback
#[derive(Error, Debug)]
pub enum AudioError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("Audio device {name} is unavailable: {reason}")]
    DeviceUnavailable { name: String, reason: String },

    #[error("No audio device at index {0}")]
    DeviceNotFound(usize),

    #[error("Cannot play {sound}-channel audio on a {bus}-channel output")]
    ChannelConfiguration { sound: u16, bus: u16 },

    #[error("Resampling failed: {0}")]
    Resample(String),

    #[error("Audio stream error: {0}")]
    Stream(String),

    #[error("Playback engine has no output device")]
    NotInitialized,

    #[error("Failed to fetch remote sound: {0}")]
    Resolve(String),
}
