//! Key identifiers and key combinations
//!
//! `Key` mirrors the physical keys rdev reports, with stable names used in
//! hotkey table files. A `KeySet` is an unordered combination written as
//! names joined by `+` ("ControlLeft+ShiftLeft+F5").

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown key name: {0}")]
pub struct UnknownKey(pub String);

macro_rules! define_keys {
    ($($name:ident),* $(,)?) => {
        /// A physical key
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum Key {
            $($name,)*
            /// Platform key code with no name
            Unknown(u32),
        }

        impl Key {
            /// Every named key
            pub const ALL: &'static [Key] = &[$(Key::$name),*];

            fn canonical_name(&self) -> Option<&'static str> {
                match self {
                    $(Key::$name => Some(stringify!($name)),)*
                    Key::Unknown(_) => None,
                }
            }

            fn from_canonical(name: &str) -> Option<Key> {
                match name {
                    $(stringify!($name) => Some(Key::$name),)*
                    _ => None,
                }
            }
        }

        impl From<rdev::Key> for Key {
            #[allow(unreachable_patterns)]
            fn from(key: rdev::Key) -> Self {
                match key {
                    $(rdev::Key::$name => Key::$name,)*
                    rdev::Key::Unknown(code) => Key::Unknown(code),
                    _ => Key::Unknown(0),
                }
            }
        }

        impl From<Key> for rdev::Key {
            fn from(key: Key) -> Self {
                match key {
                    $(Key::$name => rdev::Key::$name,)*
                    Key::Unknown(code) => rdev::Key::Unknown(code),
                }
            }
        }
    };
}

define_keys! {
    Alt, AltGr, Backspace, CapsLock, ControlLeft, ControlRight, Delete,
    DownArrow, End, Escape,
    F1, F2, F3, F4, F5, F6, F7, F8, F9, F10, F11, F12,
    Home, LeftArrow, MetaLeft, MetaRight, PageDown, PageUp, Return,
    RightArrow, ShiftLeft, ShiftRight, Space, Tab, UpArrow, PrintScreen,
    ScrollLock, Pause, NumLock, BackQuote,
    Num1, Num2, Num3, Num4, Num5, Num6, Num7, Num8, Num9, Num0,
    Minus, Equal,
    KeyQ, KeyW, KeyE, KeyR, KeyT, KeyY, KeyU, KeyI, KeyO, KeyP,
    LeftBracket, RightBracket,
    KeyA, KeyS, KeyD, KeyF, KeyG, KeyH, KeyJ, KeyK, KeyL,
    SemiColon, Quote, BackSlash, IntlBackslash,
    KeyZ, KeyX, KeyC, KeyV, KeyB, KeyN, KeyM,
    Comma, Dot, Slash, Insert,
    KpReturn, KpMinus, KpPlus, KpMultiply, KpDivide,
    Kp0, Kp1, Kp2, Kp3, Kp4, Kp5, Kp6, Kp7, Kp8, Kp9, KpDelete,
    Function,
}

impl Key {
    /// Whether this is a modifier (sorted first when displayed)
    pub fn is_modifier(&self) -> bool {
        matches!(
            self,
            Key::Alt
                | Key::AltGr
                | Key::ControlLeft
                | Key::ControlRight
                | Key::ShiftLeft
                | Key::ShiftRight
                | Key::MetaLeft
                | Key::MetaRight
        )
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.canonical_name(), self) {
            (Some(name), _) => f.write_str(name),
            (None, Key::Unknown(code)) => write!(f, "VK_{:X}", code),
            (None, _) => f.write_str("?"),
        }
    }
}

impl FromStr for Key {
    type Err = UnknownKey;

    /// Accepts canonical names plus a few common aliases, case-insensitive
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Some(key) = Key::from_canonical(trimmed) {
            return Ok(key);
        }

        let upper = trimmed.to_uppercase();
        if let Some(hex) = upper.strip_prefix("VK_") {
            return u32::from_str_radix(hex, 16)
                .map(Key::Unknown)
                .map_err(|_| UnknownKey(trimmed.to_string()));
        }

        let alias = match upper.as_str() {
            "CTRL" | "CONTROL" | "LCTRL" => Some(Key::ControlLeft),
            "RCTRL" => Some(Key::ControlRight),
            "SHIFT" | "LSHIFT" => Some(Key::ShiftLeft),
            "RSHIFT" => Some(Key::ShiftRight),
            "ALT" | "LALT" | "MENU" => Some(Key::Alt),
            "RALT" | "ALTGR" => Some(Key::AltGr),
            "WIN" | "SUPER" | "META" | "CMD" => Some(Key::MetaLeft),
            "ENTER" | "RETURN" => Some(Key::Return),
            "ESC" | "ESCAPE" => Some(Key::Escape),
            "DEL" | "DELETE" => Some(Key::Delete),
            "INS" | "INSERT" => Some(Key::Insert),
            "SPACE" => Some(Key::Space),
            "TAB" => Some(Key::Tab),
            "UP" => Some(Key::UpArrow),
            "DOWN" => Some(Key::DownArrow),
            "LEFT" => Some(Key::LeftArrow),
            "RIGHT" => Some(Key::RightArrow),
            _ => None,
        };
        if let Some(key) = alias {
            return Ok(key);
        }

        // Single letters and digits: "A" -> KeyA, "1" -> Num1
        let mut chars = upper.chars();
        if let (Some(c), None) = (chars.next(), chars.next()) {
            let name = if c.is_ascii_uppercase() {
                Some(format!("Key{}", c))
            } else if c.is_ascii_digit() {
                Some(format!("Num{}", c))
            } else {
                None
            };
            if let Some(key) = name.as_deref().and_then(Key::from_canonical) {
                return Ok(key);
            }
        }

        // Case-insensitive canonical match ("controlleft")
        Key::ALL
            .iter()
            .copied()
            .find(|k| k.to_string().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| UnknownKey(trimmed.to_string()))
    }
}

impl Serialize for Key {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Key {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        name.parse().map_err(serde::de::Error::custom)
    }
}

/// An unordered key combination
///
/// Duplicates are dropped on construction. Two sets are equal when they
/// contain the same keys, whatever order they were written in.
#[derive(Debug, Clone, Default, Eq)]
pub struct KeySet {
    /// Keys in the order they were given
    keys: Vec<Key>,
}

impl KeySet {
    pub fn new<I: IntoIterator<Item = Key>>(keys: I) -> Self {
        let mut unique: Vec<Key> = Vec::new();
        for key in keys {
            if !unique.contains(&key) {
                unique.push(key);
            }
        }
        Self { keys: unique }
    }

    pub fn keys(&self) -> &[Key] {
        &self.keys
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn contains(&self, key: Key) -> bool {
        self.keys.contains(&key)
    }

    /// How many of this set's keys satisfy `is_down`
    pub fn count_down<F: Fn(Key) -> bool>(&self, is_down: F) -> usize {
        self.keys.iter().filter(|k| is_down(**k)).count()
    }

    /// Whether every key in the set is down; never true for an empty set
    pub fn is_fully_down<F: Fn(Key) -> bool>(&self, is_down: F) -> bool {
        !self.is_empty() && self.count_down(is_down) == self.len()
    }

    fn sorted(&self) -> Vec<Key> {
        let mut keys = self.keys.clone();
        keys.sort();
        keys
    }
}

impl PartialEq for KeySet {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.keys.iter().all(|k| other.contains(*k))
    }
}

impl std::hash::Hash for KeySet {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.sorted().hash(state);
    }
}

impl FromIterator<Key> for KeySet {
    fn from_iter<I: IntoIterator<Item = Key>>(iter: I) -> Self {
        KeySet::new(iter)
    }
}

impl fmt::Display for KeySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, key) in self.keys.iter().enumerate() {
            if i > 0 {
                f.write_str("+")?;
            }
            write!(f, "{}", key)?;
        }
        Ok(())
    }
}

impl FromStr for KeySet {
    type Err = UnknownKey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.split('+')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(Key::from_str)
            .collect()
    }
}

impl Serialize for KeySet {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for KeySet {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}
