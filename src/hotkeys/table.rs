//! Hotkey tables - which key combinations play which sounds
//!
//! A table is a JSON file holding playback entries, an optional stop-all
//! combination and any number of "load another table" combinations.
//! Entries with problems (no keys, missing files) are kept on load so they
//! can be fixed, but are reported as `TableIssue`s.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::keys::{KeySet, UnknownKey};

/// Errors that can occur loading or saving a hotkey table
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to access hotkey table: {0}")]
    Io(#[from] std::io::Error),

    #[error("Hotkey table structure is incorrect: {0}")]
    Parse(#[from] serde_json::Error),

    #[error(transparent)]
    UnknownKey(#[from] UnknownKey),

    #[error("No entries found in {0}")]
    NoEntries(PathBuf),
}

/// Where a sound comes from
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SoundSource {
    Local(PathBuf),
    /// http(s) URL, downloaded before decoding
    Remote(String),
}

impl SoundSource {
    pub fn parse(location: &str) -> Self {
        let trimmed = location.trim();
        let lower = trimmed.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            SoundSource::Remote(trimmed.to_string())
        } else {
            SoundSource::Local(PathBuf::from(trimmed))
        }
    }

    #[cfg(test)]
    pub fn is_remote(&self) -> bool {
        matches!(self, SoundSource::Remote(_))
    }

    /// Whether the source can be tried: remote, or a file that exists
    pub fn is_available(&self) -> bool {
        match self {
            SoundSource::Local(path) => path.is_file(),
            SoundSource::Remote(_) => true,
        }
    }

    pub fn is_blank(&self) -> bool {
        match self {
            SoundSource::Local(path) => path.as_os_str().is_empty(),
            SoundSource::Remote(url) => url.is_empty(),
        }
    }

    /// Short name for lists: file stem for local files, the URL otherwise
    pub fn display_name(&self) -> String {
        match self {
            SoundSource::Local(path) => path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string()),
            SoundSource::Remote(url) => url.clone(),
        }
    }
}

impl fmt::Display for SoundSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SoundSource::Local(path) => write!(f, "{}", path.display()),
            SoundSource::Remote(url) => f.write_str(url),
        }
    }
}

impl Serialize for SoundSource {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SoundSource {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let location = String::deserialize(deserializer)?;
        Ok(SoundSource::parse(&location))
    }
}

fn default_gain() -> f32 {
    1.0
}

/// A key combination that plays a sound
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HotkeyEntry {
    #[serde(default)]
    pub keys: KeySet,
    /// Required foreground window title; empty for any window
    #[serde(default)]
    pub window: String,
    /// Linear gain; 1.0 defers to the global volume
    #[serde(default = "default_gain")]
    pub gain: f32,
    #[serde(default)]
    pub sources: Vec<SoundSource>,
}

impl HotkeyEntry {
    pub fn new(keys: KeySet, sources: Vec<SoundSource>) -> Self {
        Self {
            keys,
            window: String::new(),
            gain: default_gain(),
            sources,
        }
    }

    pub fn with_window(mut self, window: impl Into<String>) -> Self {
        self.window = window.into();
        self
    }

    #[cfg(test)]
    pub fn with_gain(mut self, gain: f32) -> Self {
        self.gain = gain.clamp(0.0, 1.0);
        self
    }

    /// Window this entry is limited to, if any
    pub fn required_window(&self) -> Option<&str> {
        let trimmed = self.window.trim();
        (!trimmed.is_empty()).then_some(trimmed)
    }
}

/// Combination that stops every playing sound
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopKeyEntry {
    pub keys: KeySet,
}

/// Combination that swaps in another hotkey table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReloadKeyEntry {
    pub keys: KeySet,
    pub table: PathBuf,
}

/// Something wrong with a single table entry
#[derive(Debug, Clone, PartialEq)]
pub enum IssueKind {
    /// No keys and no sounds
    Empty,
    NoKeys,
    NoSounds,
    BlankLocation,
    MissingFile(PathBuf),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableIssue {
    /// 1-based entry number
    pub entry: usize,
    pub kind: IssueKind,
}

impl fmt::Display for TableIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Entry #{} has an error: ", self.entry)?;
        match &self.kind {
            IssueKind::Empty => f.write_str("entry is empty"),
            IssueKind::NoKeys => f.write_str("no keys assigned"),
            IssueKind::NoSounds => f.write_str("no sounds provided"),
            IssueKind::BlankLocation => f.write_str("a sound location is blank"),
            IssueKind::MissingFile(path) => write!(f, "{} does not exist", path.display()),
        }
    }
}

/// Playback entries plus the global stop and reload combinations
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HotkeyTable {
    pub entries: Vec<HotkeyEntry>,
    pub stop: Option<StopKeyEntry>,
    pub reload: Vec<ReloadKeyEntry>,
}

impl HotkeyTable {
    /// Read a table from a JSON file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let table = serde_json::from_str(&contents)?;
        Ok(table)
    }

    /// Write the table as pretty JSON
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load a table for use: sorted, with issues logged
    ///
    /// Fails if the file has no playback entries at all, so the caller can
    /// keep whatever table it already had.
    pub fn open(path: &Path) -> Result<Self, ConfigError> {
        let mut table = Self::load(path)?;
        if table.entries.is_empty() {
            return Err(ConfigError::NoEntries(path.to_path_buf()));
        }

        for issue in table.validate() {
            log::warn!("{}: {}", path.display(), issue);
        }
        let duplicates = table.duplicate_keys();
        if !duplicates.is_empty() {
            let list: Vec<String> = duplicates.iter().map(|k| k.to_string()).collect();
            log::warn!(
                "Multiple entries using the same keys. The keys being used multiple times are: {}",
                list.join(", ")
            );
        }

        table.sort_entries();
        log::info!("Loaded {} hotkeys from {}", table.entries.len(), path.display());
        Ok(table)
    }

    /// Check every entry, in table order
    pub fn validate(&self) -> Vec<TableIssue> {
        let mut issues = Vec::new();
        for (i, entry) in self.entries.iter().enumerate() {
            let kind = if entry.keys.is_empty() && entry.sources.is_empty() {
                Some(IssueKind::Empty)
            } else if entry.keys.is_empty() {
                Some(IssueKind::NoKeys)
            } else if entry.sources.is_empty() {
                Some(IssueKind::NoSounds)
            } else if entry.sources.iter().any(SoundSource::is_blank) {
                Some(IssueKind::BlankLocation)
            } else {
                entry.sources.iter().find_map(|s| match s {
                    SoundSource::Local(path) if !path.is_file() => {
                        Some(IssueKind::MissingFile(path.clone()))
                    }
                    _ => None,
                })
            };
            if let Some(kind) = kind {
                issues.push(TableIssue { entry: i + 1, kind });
            }
        }
        issues
    }

    /// Key combinations used by more than one playback entry
    pub fn duplicate_keys(&self) -> Vec<KeySet> {
        let mut seen: Vec<&KeySet> = Vec::new();
        let mut duplicates: Vec<KeySet> = Vec::new();
        for entry in self.entries.iter().filter(|e| !e.keys.is_empty()) {
            if seen.contains(&&entry.keys) {
                if !duplicates.contains(&entry.keys) {
                    duplicates.push(entry.keys.clone());
                }
            } else {
                seen.push(&entry.keys);
            }
        }
        duplicates
    }

    /// Order entries by their key string; empty combinations first
    pub fn sort_entries(&mut self) {
        self.entries.sort_by_cached_key(|e| e.keys.to_string());
    }
}
