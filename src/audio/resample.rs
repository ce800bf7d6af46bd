//! Offline sample-rate conversion for cached sounds
//!
//! Sounds are converted to the bus rate once, on the control thread, so the
//! audio callback only ever copies samples. Uses rubato's FFT resampler on
//! whole buffers.

use std::sync::Arc;

use rubato::{FftFixedIn, Resampler};

use super::cache::CachedSound;
use super::AudioError;

/// Input chunk size fed to the FFT resampler
const CHUNK_FRAMES: usize = 1024;

/// Convert `sound` to `target_rate`, keeping its channel layout
///
/// Returns the same `Arc` untouched when the rates already match.
pub fn to_rate(sound: Arc<CachedSound>, target_rate: u32) -> Result<Arc<CachedSound>, AudioError> {
    if sound.sample_rate() == target_rate {
        return Ok(sound);
    }

    let channels = sound.channels() as usize;
    let frames = sound.frames();
    let from = sound.sample_rate() as usize;
    let to = target_rate as usize;

    let planar: Vec<Vec<f32>> = (0..channels)
        .map(|ch| {
            sound
                .samples()
                .iter()
                .skip(ch)
                .step_by(channels)
                .copied()
                .collect()
        })
        .collect();

    let mut resampler = FftFixedIn::<f32>::new(from, to, CHUNK_FRAMES, 2, channels)
        .map_err(|e| AudioError::Resample(e.to_string()))?;

    let delay = resampler.output_delay();
    let expected = (frames as u64 * to as u64).div_ceil(from as u64) as usize;
    let mut out: Vec<Vec<f32>> = vec![Vec::with_capacity(expected + delay); channels];

    let mut pos = 0;
    while pos + resampler.input_frames_next() <= frames {
        let next = resampler.input_frames_next();
        let chunk: Vec<&[f32]> = planar.iter().map(|c| &c[pos..pos + next]).collect();
        let produced = resampler
            .process(chunk.as_slice(), None)
            .map_err(|e| AudioError::Resample(e.to_string()))?;
        append(&mut out, produced);
        pos += next;
    }

    if pos < frames {
        let chunk: Vec<&[f32]> = planar.iter().map(|c| &c[pos..]).collect();
        let produced = resampler
            .process_partial(Some(chunk.as_slice()), None)
            .map_err(|e| AudioError::Resample(e.to_string()))?;
        append(&mut out, produced);
    }

    // Flush the filter delay
    while out.first().map_or(0, Vec::len) < expected + delay {
        let produced = resampler
            .process_partial(None::<&[Vec<f32>]>, None)
            .map_err(|e| AudioError::Resample(e.to_string()))?;
        if produced.first().map_or(true, Vec::is_empty) {
            break;
        }
        append(&mut out, produced);
    }

    let available = out.first().map_or(0, Vec::len).saturating_sub(delay);
    let out_frames = expected.min(available);
    let mut samples = Vec::with_capacity(out_frames * channels);
    for frame in delay..delay + out_frames {
        for channel in &out {
            samples.push(channel[frame]);
        }
    }

    log::debug!(
        "Resampled {} from {} Hz to {} Hz ({} -> {} frames)",
        sound.key().display(),
        from,
        to,
        frames,
        out_frames
    );

    Ok(Arc::new(CachedSound::new(
        samples,
        target_rate,
        sound.channels(),
        sound.key().to_path_buf(),
    )))
}

fn append(out: &mut [Vec<f32>], produced: Vec<Vec<f32>>) {
    for (dst, src) in out.iter_mut().zip(produced) {
        dst.extend_from_slice(&src);
    }
}
