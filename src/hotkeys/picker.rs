//! Random choice among an entry's sound sources
//!
//! Picks uniformly, never returning the previous pick twice in a row when
//! another usable source exists. Sources that are neither remote nor on
//! disk are skipped.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::table::SoundSource;

pub struct SourcePicker<R: Rng = StdRng> {
    rng: R,
    last: Option<usize>,
}

impl SourcePicker<StdRng> {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }
}

impl Default for SourcePicker<StdRng> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Rng> SourcePicker<R> {
    pub fn with_rng(rng: R) -> Self {
        Self { rng, last: None }
    }

    /// Choose a source index, or `None` for an empty list
    ///
    /// A single source is always returned as-is, even when missing, so the
    /// caller can report it.
    pub fn pick(&mut self, sources: &[SoundSource]) -> Option<usize> {
        match sources.len() {
            0 => return None,
            1 => return Some(0),
            _ => {}
        }

        let available: Vec<usize> = (0..sources.len())
            .filter(|&i| sources[i].is_available())
            .collect();
        let fresh: Vec<usize> = available
            .iter()
            .copied()
            .filter(|&i| Some(i) != self.last)
            .collect();

        let index = if !fresh.is_empty() {
            fresh[self.rng.gen_range(0..fresh.len())]
        } else if !available.is_empty() {
            available[0]
        } else {
            // Nothing usable; hand back the first so the miss gets reported
            0
        };
        self.last = Some(index);
        Some(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn seeded() -> SourcePicker<StdRng> {
        SourcePicker::with_rng(StdRng::seed_from_u64(42))
    }

    #[test]
    fn test_never_repeats_with_two_sources() {
        let sources = vec![
            SoundSource::Remote("https://example.com/a.mp3".to_string()),
            SoundSource::Remote("https://example.com/b.mp3".to_string()),
        ];
        let mut picker = seeded();
        let mut previous = picker.pick(&sources).unwrap();
        for _ in 0..1000 {
            let next = picker.pick(&sources).unwrap();
            assert_ne!(next, previous);
            previous = next;
        }
    }

    #[test]
    fn test_uses_every_source() {
        let sources: Vec<SoundSource> = (0..4)
            .map(|i| SoundSource::Remote(format!("https://example.com/{}.mp3", i)))
            .collect();
        let mut picker = seeded();
        let mut seen = [false; 4];
        for _ in 0..200 {
            seen[picker.pick(&sources).unwrap()] = true;
        }
        assert!(seen.iter().all(|s| *s));
    }

    #[test]
    fn test_skips_missing_files() {
        let sources = vec![
            SoundSource::Local(PathBuf::from("/no/such/file.wav")),
            SoundSource::Remote("https://example.com/a.mp3".to_string()),
        ];
        let mut picker = seeded();
        for _ in 0..20 {
            assert_eq!(picker.pick(&sources), Some(1));
        }
    }

    #[test]
    fn test_single_and_empty() {
        let mut picker = seeded();
        assert_eq!(picker.pick(&[]), None);
        let one = vec![SoundSource::Local(PathBuf::from("/no/such/file.wav"))];
        assert_eq!(picker.pick(&one), Some(0));
    }
}
