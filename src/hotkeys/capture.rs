//! Key-combination recorder for editing hotkeys
//!
//! The first poll waits out a short debounce so the key used to start
//! capturing is not recorded; after that the keyboard is polled quickly
//! so brief corrections are not missed.

use std::time::Duration;

use super::keys::{Key, KeySet};
use crate::platform::Keyboard;

/// Wait before the first poll
pub const DEBOUNCE_INTERVAL: Duration = Duration::from_millis(100);

/// Wait between later polls
pub const STEADY_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapturePhase {
    Debounce,
    Steady,
}

impl CapturePhase {
    pub fn interval(&self) -> Duration {
        match self {
            CapturePhase::Debounce => DEBOUNCE_INTERVAL,
            CapturePhase::Steady => STEADY_INTERVAL,
        }
    }
}

/// Records the largest combination held at once
///
/// Once every key is released, the next press starts a fresh combination,
/// so a mistaken entry can be corrected by pressing again. Escape clears.
pub struct KeyCapture {
    phase: CapturePhase,
    recorded: KeySet,
    /// Keys held at the widest point of the current press
    peak: usize,
}

impl Default for KeyCapture {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyCapture {
    pub fn new() -> Self {
        Self {
            phase: CapturePhase::Debounce,
            recorded: KeySet::default(),
            peak: 0,
        }
    }

    #[cfg(test)]
    pub fn phase(&self) -> CapturePhase {
        self.phase
    }

    /// How long to wait before the next `poll`
    pub fn next_interval(&self) -> Duration {
        self.phase.interval()
    }

    #[cfg(test)]
    pub fn recorded(&self) -> &KeySet {
        &self.recorded
    }

    /// Sample the keyboard once
    ///
    /// # Returns
    /// `true` if the recorded combination changed
    pub fn poll(&mut self, keyboard: &dyn Keyboard) -> bool {
        self.phase = CapturePhase::Steady;

        let mut held = keyboard.pressed_keys();
        if held.contains(&Key::Escape) {
            self.peak = 0;
            let changed = !self.recorded.is_empty();
            self.recorded = KeySet::default();
            return changed;
        }

        if held.is_empty() {
            self.peak = 0;
            return false;
        }
        if held.len() <= self.peak {
            return false;
        }

        // Modifiers first, the rest in press order
        held.sort_by_key(|k| !k.is_modifier());
        self.peak = held.len();
        let combination = KeySet::new(held);
        let changed = combination.to_string() != self.recorded.to_string();
        self.recorded = combination;
        changed
    }

    /// Block, polling `keyboard`, until a combination is pressed and released
    pub fn record(&mut self, keyboard: &dyn Keyboard) -> KeySet {
        loop {
            std::thread::sleep(self.next_interval());
            self.poll(keyboard);
            if !self.recorded.is_empty() && keyboard.pressed_keys().is_empty() {
                return self.recorded.clone();
            }
        }
    }
}
