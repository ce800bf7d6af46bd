//! Platform services the soundboard depends on
//!
//! Each service is a trait so the dispatcher and push-to-talk logic can be
//! driven by fakes in tests:
//! - `Keyboard`: physical key state and synthetic key events
//! - `WindowService`: the focused window's title
//! - `SourceResolver`: turns a remote sound URL into a local file

mod keyboard;
mod resolver;
mod window;

use std::path::PathBuf;

use thiserror::Error;

use crate::hotkeys::Key;

pub use keyboard::RdevKeyboard;
pub use resolver::HttpResolver;
pub use window::default_window_service;

#[derive(Error, Debug)]
pub enum KeyboardError {
    #[error("Failed to send {key} (down: {down})")]
    Simulate { key: Key, down: bool },

    #[error("Keyboard listener failed: {0}")]
    Listen(String),
}

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("Download failed: {0}")]
    Http(String),

    #[error("Failed to store download: {0}")]
    Io(#[from] std::io::Error),

    #[error("Not a downloadable URL: {0}")]
    InvalidUrl(String),
}

/// Keyboard state and key synthesis
pub trait Keyboard: Send + Sync {
    fn is_key_down(&self, key: Key) -> bool;

    /// Every key currently held, in the order they went down
    fn pressed_keys(&self) -> Vec<Key>;

    fn send_key(&self, key: Key, down: bool) -> Result<(), KeyboardError>;
}

/// Foreground window queries
pub trait WindowService: Send + Sync {
    /// Title of the focused window, if one can be determined
    fn foreground_window(&self) -> Option<String>;

    /// Titles of all top-level windows, for choosing a scope
    fn window_titles(&self) -> Vec<String>;
}

/// Remote sound retrieval
pub trait SourceResolver: Send + Sync {
    fn resolve(&self, url: &str) -> Result<PathBuf, ResolveError>;
}

#[cfg(test)]
pub(crate) mod fake {
    use std::sync::Mutex;

    use super::*;

    /// Keyboard whose state is set by the test
    #[derive(Default)]
    pub struct FakeKeyboard {
        down: Mutex<Vec<Key>>,
        pub sent: Mutex<Vec<(Key, bool)>>,
    }

    impl FakeKeyboard {
        pub fn hold(&self, keys: &[Key]) {
            *self.down.lock().unwrap() = keys.to_vec();
        }

        pub fn release_all(&self) {
            self.down.lock().unwrap().clear();
        }

        pub fn sent(&self) -> Vec<(Key, bool)> {
            self.sent.lock().unwrap().clone()
        }
    }

    impl Keyboard for FakeKeyboard {
        fn is_key_down(&self, key: Key) -> bool {
            self.down.lock().unwrap().contains(&key)
        }

        fn pressed_keys(&self) -> Vec<Key> {
            self.down.lock().unwrap().clone()
        }

        fn send_key(&self, key: Key, down: bool) -> Result<(), KeyboardError> {
            self.sent.lock().unwrap().push((key, down));
            Ok(())
        }
    }

    #[derive(Default)]
    pub struct FakeWindows {
        current: Mutex<Option<String>>,
    }

    impl FakeWindows {
        pub fn focus(&self, title: Option<&str>) {
            *self.current.lock().unwrap() = title.map(str::to_string);
        }
    }

    impl WindowService for FakeWindows {
        fn foreground_window(&self) -> Option<String> {
            self.current.lock().unwrap().clone()
        }

        fn window_titles(&self) -> Vec<String> {
            self.foreground_window().into_iter().collect()
        }
    }
}
