//! Soundboard - the audio side of the application
//!
//! Owns the shared sound cache, both playback engines and the loopback
//! bridge, and carries out what the dispatcher asks for. Engine 1 is the
//! primary output (push-to-talk follows it, loopback plays on it); engine 2
//! optionally mirrors every sound onto a second device.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use crate::audio::{devices, AudioError, LoopbackBridge, PlaybackEngine, SoundCache};
use crate::hotkeys::{DispatchActions, HotkeyEntry, HotkeyTable, SoundSource};
use crate::platform::{Keyboard, SourceResolver};
use crate::pushtotalk::PushToTalk;
use crate::settings::AppSettings;

pub struct Soundboard {
    settings: AppSettings,
    cache: Arc<SoundCache>,
    primary: PlaybackEngine,
    secondary: PlaybackEngine,
    loopback: LoopbackBridge,
    resolver: Box<dyn SourceResolver>,
    push_to_talk: Arc<Mutex<PushToTalk>>,
}

impl Soundboard {
    /// Build the soundboard; no device is opened until `open_devices`
    pub fn new(
        settings: AppSettings,
        keyboard: Arc<dyn Keyboard>,
        resolver: Box<dyn SourceResolver>,
    ) -> Self {
        Self::with_cache(settings, keyboard, resolver, Arc::new(SoundCache::new()))
    }

    pub fn with_cache(
        settings: AppSettings,
        keyboard: Arc<dyn Keyboard>,
        resolver: Box<dyn SourceResolver>,
        cache: Arc<SoundCache>,
    ) -> Self {
        let primary = PlaybackEngine::new("Playback 1", Arc::clone(&cache));
        let secondary = PlaybackEngine::new("Playback 2", Arc::clone(&cache));

        let push_to_talk = Arc::new(Mutex::new(PushToTalk::new()));
        {
            let ptt = Arc::clone(&push_to_talk);
            primary.on_drained(move || {
                ptt.lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .release_on_drain(keyboard.as_ref());
            });
        }

        let board = Self {
            settings,
            cache,
            primary,
            secondary,
            loopback: LoopbackBridge::new(),
            resolver,
            push_to_talk,
        };
        board.configure_push_to_talk();
        board
    }

    pub fn settings(&self) -> &AppSettings {
        &self.settings
    }

    pub fn push_to_talk(&self) -> Arc<Mutex<PushToTalk>> {
        Arc::clone(&self.push_to_talk)
    }

    /// Number of distinct sounds decoded so far
    pub fn cached_sounds(&self) -> usize {
        self.cache.len()
    }

    /// Open the configured playback devices and start loopback if enabled
    pub fn open_devices(&mut self) {
        let outputs = devices::output_device_names();
        if outputs.is_empty() {
            log::error!("No playback devices found");
        }

        match pick_device(&outputs, &self.settings.playback_device, true) {
            Some(index) => {
                if let Err(e) = self.primary.init(index) {
                    report_device_error(self.primary.label(), &e);
                }
            }
            None => self.primary.release(),
        }

        match pick_device(&outputs, &self.settings.playback_device_2, false) {
            Some(index) => {
                if let Err(e) = self.secondary.init(index) {
                    report_device_error(self.secondary.label(), &e);
                }
            }
            None => self.secondary.release(),
        }

        self.restart_loopback();
    }

    /// Replace the settings, reopening only what changed
    pub fn apply_settings(&mut self, settings: AppSettings) {
        let devices_changed = settings.playback_device != self.settings.playback_device
            || settings.playback_device_2 != self.settings.playback_device_2;
        let loopback_changed = settings.loopback_device != self.settings.loopback_device
            || settings.enable_loopback != self.settings.enable_loopback;

        self.settings = settings;
        self.configure_push_to_talk();

        if devices_changed {
            self.stop_all();
            self.open_devices();
        } else if loopback_changed {
            self.restart_loopback();
        }
    }

    /// Stop loopback and start it again with the current selection
    pub fn restart_loopback(&mut self) {
        self.loopback.stop();

        if !self.settings.enable_loopback {
            return;
        }
        let inputs = devices::input_device_names();
        let Some(capture) = pick_device(&inputs, &self.settings.loopback_device, false) else {
            return;
        };
        let Some(playback) = self.primary.device_index() else {
            log::warn!("Loopback needs an open playback device");
            return;
        };

        if let Err(e) = self.loopback.start(capture, playback) {
            report_device_error("Loopback", &e);
        } else if self.loopback.is_running() {
            log::info!(
                "Loopback: {} -> {}",
                inputs[capture],
                self.primary.device_name().unwrap_or("?")
            );
        }
    }

    /// Gain for an entry: its own when lowered, otherwise the global volume
    pub fn effective_gain(&self, entry_gain: f32) -> f32 {
        if entry_gain < 1.0 {
            entry_gain.max(0.0)
        } else {
            self.settings.sound_volume
        }
    }

    /// Play `source` on the primary engine and, when set up, the secondary
    ///
    /// With overlap off the new sound replaces whatever is playing. The swap
    /// is a single bus operation, so the primary engine never reports a
    /// drain in between and push-to-talk stays held.
    pub fn play_source(&mut self, source: &SoundSource, gain: f32) -> Result<(), AudioError> {
        let path = self.local_path(source)?;
        let replace = !self.settings.overlap_audio;

        start_on(&self.primary, &path, gain, replace)?;

        if self.mirrors_to_secondary() {
            if let Err(e) = start_on(&self.secondary, &path, gain, replace) {
                log::warn!("{}: {}", self.secondary.label(), e);
            }
        } else if replace {
            self.secondary.stop_all();
        }
        Ok(())
    }

    pub fn stop_all(&self) {
        self.primary.stop_all();
        self.secondary.stop_all();
    }

    /// Engine 2 plays only on a different device than engine 1
    fn mirrors_to_secondary(&self) -> bool {
        match (self.secondary.device_index(), self.primary.device_index()) {
            (Some(second), Some(first)) => second != first,
            _ => false,
        }
    }

    fn local_path(&self, source: &SoundSource) -> Result<PathBuf, AudioError> {
        match source {
            SoundSource::Local(path) => Ok(path.clone()),
            SoundSource::Remote(url) => self
                .resolver
                .resolve(url)
                .map_err(|e| AudioError::Resolve(e.to_string())),
        }
    }

    fn configure_push_to_talk(&self) {
        let ptt_settings = &self.settings.push_to_talk;
        let mut ptt = self
            .push_to_talk
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        ptt.configure(ptt_settings.key, ptt_settings.scope(), ptt_settings.enabled);
        ptt.set_lead_delay(ptt_settings.lead_delay());
    }
}

impl DispatchActions for Soundboard {
    fn play(&mut self, entry: &HotkeyEntry, source: &SoundSource) -> Result<(), AudioError> {
        let gain = self.effective_gain(entry.gain);
        self.play_source(source, gain)
    }

    fn stop_all(&mut self) {
        Soundboard::stop_all(self);
    }

    fn notify(&mut self, message: &str) {
        log::warn!("{}", message);
    }

    fn table_reloaded(&mut self, path: &Path, table: &HotkeyTable) {
        log::info!(
            "Switched to {} ({} hotkeys, {} sounds cached)",
            path.display(),
            table.entries.len(),
            self.cached_sounds()
        );
        self.settings.last_table_file = Some(path.to_path_buf());
    }
}

fn start_on(
    engine: &PlaybackEngine,
    path: &Path,
    gain: f32,
    replace: bool,
) -> Result<(), AudioError> {
    if replace {
        engine.play_replacing(path, gain)
    } else {
        engine.play(path, gain)
    }
}

/// Index for a configured device name
///
/// With `fallback_first`, an empty or unknown name means the first device;
/// otherwise it means no device.
fn pick_device(names: &[String], wanted: &str, fallback_first: bool) -> Option<usize> {
    if !wanted.is_empty() {
        if let Some(index) = devices::index_of(names, wanted) {
            return Some(index);
        }
        log::warn!("Audio device \"{}\" not found", wanted);
    }
    (fallback_first && !names.is_empty()).then_some(0)
}

fn report_device_error(label: &str, err: &AudioError) {
    match err {
        AudioError::DeviceUnavailable { .. } => {
            log::error!("{}: failed to open device. {}", label, err)
        }
        other => log::error!("{}: {}", label, other),
    }
}
