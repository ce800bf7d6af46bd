//! Global keyboard state via rdev
//!
//! rdev only delivers events, so a listener thread keeps the set of held
//! keys up to date and queries read from it.

use std::sync::{Arc, Mutex, PoisonError};

use rdev::{listen, simulate, Event, EventType};

use super::{Keyboard, KeyboardError};
use crate::hotkeys::Key;

pub struct RdevKeyboard {
    pressed: Arc<Mutex<Vec<Key>>>,
}

impl RdevKeyboard {
    /// Start the listener thread
    ///
    /// The thread runs for the rest of the process; rdev has no way to
    /// stop `listen` from outside.
    pub fn start() -> Self {
        let pressed: Arc<Mutex<Vec<Key>>> = Arc::new(Mutex::new(Vec::new()));
        let state = Arc::clone(&pressed);

        std::thread::spawn(move || {
            let callback = move |event: Event| {
                let mut held = state.lock().unwrap_or_else(PoisonError::into_inner);
                match event.event_type {
                    EventType::KeyPress(key) => {
                        let key = Key::from(key);
                        if !held.contains(&key) {
                            held.push(key);
                        }
                    }
                    EventType::KeyRelease(key) => {
                        let key = Key::from(key);
                        held.retain(|k| *k != key);
                    }
                    _ => {}
                }
            };

            if let Err(e) = listen(callback) {
                log::error!("{}", KeyboardError::Listen(format!("{:?}", e)));
            }
        });

        log::info!("Keyboard listener started");
        Self { pressed }
    }
}

impl Keyboard for RdevKeyboard {
    fn is_key_down(&self, key: Key) -> bool {
        self.pressed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&key)
    }

    fn pressed_keys(&self) -> Vec<Key> {
        self.pressed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn send_key(&self, key: Key, down: bool) -> Result<(), KeyboardError> {
        let event = if down {
            EventType::KeyPress(key.into())
        } else {
            EventType::KeyRelease(key.into())
        };
        simulate(&event).map_err(|_| KeyboardError::Simulate { key, down })
    }
}
