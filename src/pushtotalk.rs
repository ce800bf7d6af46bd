//! Push-to-talk coordinator
//!
//! Holds a configured key down (synthetically) while sounds play so voice
//! chat applications transmit them. The key goes down just before a sound
//! starts and comes up when the primary engine drains, or as soon as focus
//! leaves the window the push-to-talk is scoped to.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::hotkeys::Key;
use crate::platform::Keyboard;

/// Pause between key-down and starting the sound
pub const DEFAULT_LEAD_DELAY: Duration = Duration::from_millis(100);

/// Which foreground window push-to-talk is allowed in
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum WindowScope {
    #[default]
    Any,
    Window(String),
}

impl WindowScope {
    /// Scope for a window title; blank means any window
    pub fn from_title(title: &str) -> Self {
        let trimmed = title.trim();
        if trimmed.is_empty() {
            WindowScope::Any
        } else {
            WindowScope::Window(trimmed.to_string())
        }
    }

    pub fn is_satisfied(&self, foreground: Option<&str>) -> bool {
        match self {
            WindowScope::Any => true,
            WindowScope::Window(title) => foreground == Some(title.as_str()),
        }
    }
}

pub struct PushToTalk {
    enabled: bool,
    key: Option<Key>,
    scope: WindowScope,
    /// Key we sent a key-down for and still owe a key-up
    held: Option<Key>,
    lead_delay: Duration,
}

impl Default for PushToTalk {
    fn default() -> Self {
        Self {
            enabled: false,
            key: None,
            scope: WindowScope::Any,
            held: None,
            lead_delay: DEFAULT_LEAD_DELAY,
        }
    }
}

impl PushToTalk {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the key, window scope and enabled flag
    ///
    /// A key already held stays owed and is released normally, even if the
    /// configured key changes meanwhile.
    pub fn configure(&mut self, key: Option<Key>, scope: WindowScope, enabled: bool) {
        if enabled && key.is_none() {
            log::warn!("Push-to-talk enabled without a key; it will stay inactive");
        }
        self.key = key;
        self.scope = scope;
        self.enabled = enabled;
    }

    pub fn set_lead_delay(&mut self, delay: Duration) {
        self.lead_delay = delay;
    }

    pub fn lead_delay(&self) -> Duration {
        self.lead_delay
    }

    #[cfg(test)]
    pub fn is_held(&self) -> bool {
        self.held.is_some()
    }

    /// Press the push-to-talk key ahead of a sound
    ///
    /// # Arguments
    /// * `keyboard` - Used to check the real key and to synthesize the press
    /// * `foreground` - Title of the focused window this tick
    ///
    /// # Returns
    /// `true` if a key-down was sent; the caller should then wait
    /// `lead_delay()` before starting playback.
    pub fn engage(&mut self, keyboard: &dyn Keyboard, foreground: Option<&str>) -> bool {
        let Some(key) = self.key else {
            return false;
        };
        if !self.enabled
            || self.held.is_some()
            || keyboard.is_key_down(key)
            || !self.scope.is_satisfied(foreground)
        {
            return false;
        }

        match keyboard.send_key(key, true) {
            Ok(()) => {
                log::debug!("Push-to-talk {} down", key);
                self.held = Some(key);
                true
            }
            Err(e) => {
                log::warn!("Push-to-talk: {}", e);
                false
            }
        }
    }

    /// Let go of the key if we are holding it
    pub fn release(&mut self, keyboard: &dyn Keyboard) {
        if let Some(key) = self.held.take() {
            if let Err(e) = keyboard.send_key(key, false) {
                log::warn!("Push-to-talk: {}", e);
            }
            log::debug!("Push-to-talk {} up", key);
        }
    }

    /// Called when the primary engine has nothing left to play
    pub fn release_on_drain(&mut self, keyboard: &dyn Keyboard) {
        self.release(keyboard);
    }

    /// Release immediately if focus has left the scoped window
    ///
    /// # Returns
    /// `true` if a release was forced
    pub fn enforce_scope(&mut self, keyboard: &dyn Keyboard, foreground: Option<&str>) -> bool {
        if self.held.is_none() || self.scope.is_satisfied(foreground) {
            return false;
        }
        log::debug!("Push-to-talk released: focus left {:?}", self.scope);
        self.release(keyboard);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::fake::FakeKeyboard;

    fn configured(scope: WindowScope) -> PushToTalk {
        let mut ptt = PushToTalk::new();
        ptt.configure(Some(Key::KeyV), scope, true);
        ptt
    }

    #[test]
    fn test_engage_then_release_on_drain() {
        let keyboard = FakeKeyboard::default();
        let mut ptt = configured(WindowScope::Any);

        assert!(ptt.engage(&keyboard, None));
        assert!(ptt.is_held());
        // Already held: no second key-down
        assert!(!ptt.engage(&keyboard, None));

        ptt.release_on_drain(&keyboard);
        assert!(!ptt.is_held());
        assert_eq!(keyboard.sent(), vec![(Key::KeyV, true), (Key::KeyV, false)]);

        // Nothing owed: no extra key-up
        ptt.release_on_drain(&keyboard);
        assert_eq!(keyboard.sent().len(), 2);
    }

    #[test]
    fn test_disabled_or_keyless_does_nothing() {
        let keyboard = FakeKeyboard::default();
        let mut ptt = PushToTalk::new();
        assert!(!ptt.engage(&keyboard, None));

        ptt.configure(None, WindowScope::Any, true);
        assert!(!ptt.engage(&keyboard, None));

        ptt.configure(Some(Key::KeyV), WindowScope::Any, false);
        assert!(!ptt.engage(&keyboard, None));
        assert!(keyboard.sent().is_empty());
    }

    #[test]
    fn test_physically_held_key_is_left_alone() {
        let keyboard = FakeKeyboard::default();
        keyboard.hold(&[Key::KeyV]);
        let mut ptt = configured(WindowScope::Any);
        assert!(!ptt.engage(&keyboard, None));
        assert!(keyboard.sent().is_empty());
    }

    #[test]
    fn test_scope_blocks_engage_outside_window() {
        let keyboard = FakeKeyboard::default();
        let mut ptt = configured(WindowScope::from_title("Voice Chat"));
        assert!(!ptt.engage(&keyboard, Some("Browser")));
        assert!(ptt.engage(&keyboard, Some("Voice Chat")));
    }

    #[test]
    fn test_focus_loss_forces_release() {
        let keyboard = FakeKeyboard::default();
        let mut ptt = configured(WindowScope::from_title("Voice Chat"));
        assert!(ptt.engage(&keyboard, Some("Voice Chat")));

        assert!(!ptt.enforce_scope(&keyboard, Some("Voice Chat")));
        assert!(ptt.enforce_scope(&keyboard, Some("Browser")));
        assert!(!ptt.is_held());
        assert_eq!(keyboard.sent().last(), Some(&(Key::KeyV, false)));
    }

    #[test]
    fn test_blank_title_is_any_window() {
        assert_eq!(WindowScope::from_title("  "), WindowScope::Any);
        assert!(WindowScope::Any.is_satisfied(None));
        assert!(!WindowScope::from_title("x").is_satisfied(None));
    }
}
