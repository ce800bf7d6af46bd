use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::hotkeys::Key;
use crate::pushtotalk::{WindowScope, DEFAULT_LEAD_DELAY};

/// Returns the path to the settings file: `~/.config/soundkeys/settings.json`
pub fn settings_path() -> PathBuf {
    let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
    path.push("soundkeys");
    path.push("settings.json");
    path
}

/// Push-to-talk options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PushToTalkSettings {
    pub enabled: bool,
    pub key: Option<Key>,
    /// Window title push-to-talk is limited to; empty for any window
    pub window: String,
    /// Wait between pressing the key and starting the sound
    pub lead_delay_ms: u64,
}

impl Default for PushToTalkSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            key: None,
            window: String::new(),
            lead_delay_ms: DEFAULT_LEAD_DELAY.as_millis() as u64,
        }
    }
}

impl PushToTalkSettings {
    pub fn scope(&self) -> WindowScope {
        WindowScope::from_title(&self.window)
    }

    pub fn lead_delay(&self) -> Duration {
        Duration::from_millis(self.lead_delay_ms)
    }
}

/// Persisted application settings.
///
/// Serialized as JSON to the platform config directory.
/// Fields use `#[serde(default)]` so that adding new settings
/// won't break existing config files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    // Devices (by name; empty = first device / not used)
    pub playback_device: String,
    pub playback_device_2: String,
    pub loopback_device: String,

    // Behaviour
    pub enable_hotkeys: bool,
    pub enable_loopback: bool,
    pub sound_volume: f32,
    pub overlap_audio: bool,
    pub poll_interval_ms: u64,

    pub push_to_talk: PushToTalkSettings,

    // Last hotkey table opened
    pub last_table_file: Option<PathBuf>,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            playback_device: String::new(),
            playback_device_2: String::new(),
            loopback_device: String::new(),

            enable_hotkeys: true,
            enable_loopback: false,
            sound_volume: 1.0,
            overlap_audio: true,
            poll_interval_ms: 25,

            push_to_talk: PushToTalkSettings::default(),

            last_table_file: None,
        }
    }
}

impl AppSettings {
    /// Load settings from `path`, falling back to defaults on any error.
    pub fn load_from(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str::<Self>(&contents) {
                Ok(settings) => {
                    log::info!("Loaded settings from {}", path.display());
                    settings.sanitized()
                }
                Err(e) => {
                    log::warn!("Failed to parse settings ({}), using defaults", e);
                    Self::default()
                }
            },
            Err(e) => {
                log::info!("No settings file found ({}), using defaults", e);
                Self::default()
            }
        }
    }

    /// Save settings to `path` as pretty JSON.
    pub fn save_to(&self, path: &Path) {
        if let Some(parent) = path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                log::warn!("Failed to create config directory: {}", e);
                return;
            }
        }
        match serde_json::to_string_pretty(self) {
            Ok(json) => {
                if let Err(e) = std::fs::write(path, json) {
                    log::warn!("Failed to write settings: {}", e);
                }
            }
            Err(e) => {
                log::warn!("Failed to serialize settings: {}", e);
            }
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Clamp values a hand-edited file may have out of range
    fn sanitized(mut self) -> Self {
        self.sound_volume = self.sound_volume.clamp(0.0, 1.0);
        self.poll_interval_ms = self.poll_interval_ms.clamp(5, 1000);
        self.push_to_talk.lead_delay_ms = self.push_to_talk.lead_delay_ms.min(2000);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("settings.json");

        let settings = AppSettings {
            playback_device: "Speakers".to_string(),
            loopback_device: "Microphone".to_string(),
            enable_loopback: true,
            sound_volume: 0.5,
            overlap_audio: false,
            push_to_talk: PushToTalkSettings {
                enabled: true,
                key: Some(Key::KeyV),
                window: "Voice".to_string(),
                lead_delay_ms: 50,
            },
            last_table_file: Some(PathBuf::from("board.json")),
            ..Default::default()
        };
        settings.save_to(&path);

        assert_eq!(AppSettings::load_from(&path), settings);
    }

    #[test]
    fn test_missing_or_corrupt_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.json");
        assert_eq!(AppSettings::load_from(&path), AppSettings::default());

        std::fs::write(&path, "{ not json").unwrap();
        assert_eq!(AppSettings::load_from(&path), AppSettings::default());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{ "sound_volume": 3.0, "push_to_talk": { "key": "KeyT" } }"#)
            .unwrap();

        let settings = AppSettings::load_from(&path);
        assert_eq!(settings.sound_volume, 1.0);
        assert_eq!(settings.push_to_talk.key, Some(Key::KeyT));
        assert!(settings.enable_hotkeys);
        assert_eq!(settings.push_to_talk.scope(), WindowScope::Any);
        assert_eq!(settings.push_to_talk.lead_delay(), DEFAULT_LEAD_DELAY);
    }
}
