//! Device enumeration - playback and capture devices by index
//!
//! Indices follow cpal's enumeration order for the default host, which is
//! what the settings layer stores alongside the device name.

use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{BuildStreamError, PlayStreamError, SampleFormat, SupportedStreamConfig};

use super::AudioError;

/// Names of all output devices, in index order
pub fn output_device_names() -> Vec<String> {
    let host = cpal::default_host();
    match host.output_devices() {
        Ok(devices) => devices
            .map(|d| d.name().unwrap_or_else(|_| "Unknown".to_string()))
            .collect(),
        Err(e) => {
            log::error!("Failed to enumerate output devices: {}", e);
            Vec::new()
        }
    }
}

/// Names of all capture devices, in index order
pub fn input_device_names() -> Vec<String> {
    let host = cpal::default_host();
    match host.input_devices() {
        Ok(devices) => devices
            .map(|d| d.name().unwrap_or_else(|_| "Unknown".to_string()))
            .collect(),
        Err(e) => {
            log::error!("Failed to enumerate input devices: {}", e);
            Vec::new()
        }
    }
}

/// Find a device index by name
pub fn index_of(names: &[String], name: &str) -> Option<usize> {
    names.iter().position(|n| n == name)
}

pub fn output_device(index: usize) -> Result<cpal::Device, AudioError> {
    let host = cpal::default_host();
    host.output_devices()
        .map_err(|e| AudioError::Stream(e.to_string()))?
        .nth(index)
        .ok_or(AudioError::DeviceNotFound(index))
}

pub fn input_device(index: usize) -> Result<cpal::Device, AudioError> {
    let host = cpal::default_host();
    host.input_devices()
        .map_err(|e| AudioError::Stream(e.to_string()))?
        .nth(index)
        .ok_or(AudioError::DeviceNotFound(index))
}

pub fn device_name(device: &cpal::Device) -> String {
    device.name().unwrap_or_else(|_| "Unknown".to_string())
}

/// Pick an output config, preferring stereo f32 at the device's default rate
pub fn preferred_output_config(device: &cpal::Device) -> Result<SupportedStreamConfig, AudioError> {
    let name = device_name(device);
    let default = device.default_output_config().map_err(|e| match e {
        cpal::DefaultStreamConfigError::DeviceNotAvailable => unavailable(&name, e),
        other => AudioError::Stream(format!("{}: {}", name, other)),
    })?;

    if default.channels() == 2 && default.sample_format() == SampleFormat::F32 {
        return Ok(default);
    }

    let rate = default.sample_rate();
    let stereo = device
        .supported_output_configs()
        .ok()
        .and_then(|mut configs| {
            configs.find(|c| {
                c.channels() == 2
                    && c.sample_format() == SampleFormat::F32
                    && c.min_sample_rate() <= rate
                    && rate <= c.max_sample_rate()
            })
        })
        .map(|c| c.with_sample_rate(rate));

    Ok(stereo.unwrap_or(default))
}

/// Pick a capture config running at `rate`, preferring f32 samples
///
/// The loopback path does no rate conversion, so capture has to match the
/// output it feeds.
pub fn capture_config(
    device: &cpal::Device,
    rate: cpal::SampleRate,
) -> Result<SupportedStreamConfig, AudioError> {
    let name = device_name(device);
    let default = device.default_input_config().map_err(|e| match e {
        cpal::DefaultStreamConfigError::DeviceNotAvailable => unavailable(&name, e),
        other => AudioError::Stream(format!("{}: {}", name, other)),
    })?;
    if default.sample_rate() == rate {
        return Ok(default);
    }

    let ranges: Vec<_> = device
        .supported_input_configs()
        .map_err(|e| AudioError::Stream(format!("{}: {}", name, e)))?
        .filter(|c| c.min_sample_rate() <= rate && rate <= c.max_sample_rate())
        .collect();

    ranges
        .iter()
        .find(|c| c.sample_format() == SampleFormat::F32)
        .or_else(|| ranges.first())
        .map(|c| c.clone().with_sample_rate(rate))
        .ok_or_else(|| {
            AudioError::Stream(format!("{}: cannot capture at {} Hz", name, rate.0))
        })
}

fn unavailable(name: &str, reason: impl std::fmt::Display) -> AudioError {
    AudioError::DeviceUnavailable {
        name: name.to_string(),
        reason: reason.to_string(),
    }
}

/// Markers backends use when a device is held exclusively elsewhere
const BUSY_MARKERS: &[&str] = &["busy", "in use", "already", "exclusive", "allocated"];

fn looks_busy(description: &str) -> bool {
    let lower = description.to_lowercase();
    BUSY_MARKERS.iter().any(|m| lower.contains(m))
}

/// Map a stream build failure to the error the user sees
pub fn classify_build_error(name: &str, err: BuildStreamError) -> AudioError {
    match err {
        BuildStreamError::DeviceNotAvailable => unavailable(name, "device is not available"),
        BuildStreamError::BackendSpecific { err } if looks_busy(&err.description) => {
            unavailable(name, format!("already in exclusive use by another application? ({})", err))
        }
        other => AudioError::Stream(format!("{}: {}", name, other)),
    }
}

/// Map a stream start failure to the error the user sees
pub fn classify_play_error(name: &str, err: PlayStreamError) -> AudioError {
    match err {
        PlayStreamError::DeviceNotAvailable => unavailable(name, "device is not available"),
        PlayStreamError::BackendSpecific { err } if looks_busy(&err.description) => {
            unavailable(name, format!("already in exclusive use by another application? ({})", err))
        }
        other => AudioError::Stream(format!("{}: {}", name, other)),
    }
}
