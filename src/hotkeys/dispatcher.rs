//! Hotkey dispatcher - turns polled keyboard state into actions
//!
//! `tick` is called on a fixed short interval. Each tick:
//! 1. Samples the foreground window once.
//! 2. Checks playback entries in table order; the first full match plays
//!    and ends the evaluation.
//! 3. Otherwise checks the stop-all combination.
//! 4. Otherwise checks the reload combinations.
//! 5. Always enforces the push-to-talk window scope.
//!
//! Triggers are edge based: holding a combination fires once, and it can
//! only fire again after it has been released. Each category (playback,
//! stop, reload) remembers its own last trigger.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use super::keys::KeySet;
use super::picker::SourcePicker;
use super::table::{HotkeyEntry, HotkeyTable, SoundSource};
use crate::audio::AudioError;
use crate::platform::{Keyboard, WindowService};
use crate::pushtotalk::PushToTalk;

/// Minimum time between two user notifications
pub const DEFAULT_NOTICE_COOLDOWN: Duration = Duration::from_secs(3);

/// What the dispatcher asks the rest of the application to do
pub trait DispatchActions {
    /// Start playing `source` for `entry`
    fn play(&mut self, entry: &HotkeyEntry, source: &SoundSource) -> Result<(), AudioError>;

    fn stop_all(&mut self);

    /// Show a problem to the user
    fn notify(&mut self, message: &str);

    /// A reload combination swapped in the table at `path`
    fn table_reloaded(&mut self, _path: &Path, _table: &HotkeyTable) {}
}

/// What a single tick did
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    Disabled,
    Idle,
    /// Entry index that started playing
    Played(usize),
    /// Entry whose chosen sound does not exist
    Missing(usize),
    /// Entry whose sound failed to play
    PlayFailed(usize),
    Stopped,
    Reloaded(PathBuf),
    /// Table could not be loaded; the previous one is still active
    ReloadFailed(PathBuf),
}

/// Last triggered combination per category
#[derive(Debug, Default)]
struct Edges {
    playback: Option<KeySet>,
    stop: Option<KeySet>,
    reload: Option<KeySet>,
}

/// Rate limit for user notifications
struct NoticeLimiter {
    cooldown: Duration,
    last: Option<Instant>,
}

impl NoticeLimiter {
    fn allow(&mut self, now: Instant) -> bool {
        match self.last {
            Some(last) if now.duration_since(last) < self.cooldown => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}

pub struct Dispatcher {
    table: HotkeyTable,
    enabled: bool,
    edges: Edges,
    keyboard: Arc<dyn Keyboard>,
    windows: Arc<dyn WindowService>,
    push_to_talk: Arc<Mutex<PushToTalk>>,
    picker: SourcePicker,
    notices: NoticeLimiter,
}

impl Dispatcher {
    pub fn new(
        keyboard: Arc<dyn Keyboard>,
        windows: Arc<dyn WindowService>,
        push_to_talk: Arc<Mutex<PushToTalk>>,
    ) -> Self {
        Self {
            table: HotkeyTable::default(),
            enabled: true,
            edges: Edges::default(),
            keyboard,
            windows,
            push_to_talk,
            picker: SourcePicker::new(),
            notices: NoticeLimiter {
                cooldown: DEFAULT_NOTICE_COOLDOWN,
                last: None,
            },
        }
    }

    #[cfg(test)]
    pub fn with_picker(mut self, picker: SourcePicker) -> Self {
        self.picker = picker;
        self
    }

    #[cfg(test)]
    pub fn set_notice_cooldown(&mut self, cooldown: Duration) {
        self.notices.cooldown = cooldown;
    }

    pub fn set_table(&mut self, table: HotkeyTable) {
        self.table = table;
    }

    #[cfg(test)]
    pub fn table(&self) -> &HotkeyTable {
        &self.table
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        if self.enabled != enabled {
            log::info!("Hotkeys {}", if enabled { "enabled" } else { "disabled" });
        }
        self.enabled = enabled;
    }

    /// Run one polling step
    pub fn tick(&mut self, actions: &mut dyn DispatchActions) -> TickOutcome {
        if !self.enabled {
            return TickOutcome::Disabled;
        }

        let foreground = self.windows.foreground_window();
        self.clear_released_edges();

        let outcome = self.evaluate(actions, foreground.as_deref());

        self.push_to_talk
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .enforce_scope(self.keyboard.as_ref(), foreground.as_deref());

        outcome
    }

    fn evaluate(&mut self, actions: &mut dyn DispatchActions, foreground: Option<&str>) -> TickOutcome {
        if let Some(index) = self.matching_entry(foreground) {
            return self.trigger_entry(index, actions, foreground);
        }

        if let Some(stop) = &self.table.stop {
            if self.fires(&stop.keys, &self.edges.stop) {
                log::info!("Stop keys {} pressed", stop.keys);
                self.edges.stop = Some(stop.keys.clone());
                actions.stop_all();
                return TickOutcome::Stopped;
            }
        }

        let reload = self
            .table
            .reload
            .iter()
            .find(|r| self.fires(&r.keys, &self.edges.reload))
            .map(|r| (r.keys.clone(), r.table.clone()));
        if let Some((keys, path)) = reload {
            self.edges.reload = Some(keys);
            return self.reload(&path, actions);
        }

        TickOutcome::Idle
    }

    /// First playback entry that should fire this tick
    fn matching_entry(&self, foreground: Option<&str>) -> Option<usize> {
        self.table.entries.iter().position(|entry| {
            if let Some(window) = entry.required_window() {
                if foreground != Some(window) {
                    return false;
                }
            }
            self.fires(&entry.keys, &self.edges.playback)
        })
    }

    /// Fully pressed and not part of the combination that last fired
    fn fires(&self, keys: &KeySet, edge: &Option<KeySet>) -> bool {
        if !keys.is_fully_down(|k| self.keyboard.is_key_down(k)) {
            return false;
        }
        match edge {
            Some(held) => !keys.keys().iter().all(|k| held.contains(*k)),
            None => true,
        }
    }

    fn clear_released_edges(&mut self) {
        let keyboard = &self.keyboard;
        for edge in [
            &mut self.edges.playback,
            &mut self.edges.stop,
            &mut self.edges.reload,
        ] {
            if edge
                .as_ref()
                .is_some_and(|keys| !keys.is_fully_down(|k| keyboard.is_key_down(k)))
            {
                *edge = None;
            }
        }
    }

    fn trigger_entry(
        &mut self,
        index: usize,
        actions: &mut dyn DispatchActions,
        foreground: Option<&str>,
    ) -> TickOutcome {
        let entry = self.table.entries[index].clone();
        self.edges.playback = Some(entry.keys.clone());

        let Some(choice) = self.picker.pick(&entry.sources) else {
            self.notice(actions, &format!("No sounds assigned to {}", entry.keys));
            return TickOutcome::Missing(index);
        };
        let source = &entry.sources[choice];
        if !source.is_available() {
            self.notice(actions, &format!("File {} does not exist", source));
            return TickOutcome::Missing(index);
        }

        log::info!("Hotkey {} -> {}", entry.keys, source.display_name());

        let (engaged, lead_delay) = {
            let mut ptt = self
                .push_to_talk
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            (ptt.engage(self.keyboard.as_ref(), foreground), ptt.lead_delay())
        };
        if engaged && !lead_delay.is_zero() {
            std::thread::sleep(lead_delay);
        }

        match actions.play(&entry, source) {
            Ok(()) => TickOutcome::Played(index),
            Err(e) => {
                if engaged {
                    self.push_to_talk
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .release(self.keyboard.as_ref());
                }
                log::error!("Failed to play {}: {}", source, e);
                self.notice(actions, &format!("Failed to play {}: {}", source, e));
                TickOutcome::PlayFailed(index)
            }
        }
    }

    fn reload(&mut self, path: &Path, actions: &mut dyn DispatchActions) -> TickOutcome {
        match HotkeyTable::open(path) {
            Ok(table) => {
                self.table = table;
                actions.table_reloaded(path, &self.table);
                TickOutcome::Reloaded(path.to_path_buf())
            }
            Err(e) => {
                log::error!("Failed to load {}: {}", path.display(), e);
                self.notice(actions, &format!("Failed to load {}: {}", path.display(), e));
                TickOutcome::ReloadFailed(path.to_path_buf())
            }
        }
    }

    fn notice(&mut self, actions: &mut dyn DispatchActions, message: &str) {
        if self.notices.allow(Instant::now()) {
            actions.notify(message);
        } else {
            log::debug!("Notification suppressed: {}", message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hotkeys::keys::Key;
    use crate::hotkeys::table::{ReloadKeyEntry, StopKeyEntry};
    use crate::platform::fake::{FakeKeyboard, FakeWindows};
    use crate::pushtotalk::WindowScope;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use tempfile::TempDir;

    #[derive(Default)]
    struct Recorder {
        played: Vec<(KeySet, SoundSource)>,
        stops: usize,
        notices: Vec<String>,
        reloads: Vec<PathBuf>,
        fail_play: bool,
    }

    impl DispatchActions for Recorder {
        fn play(&mut self, entry: &HotkeyEntry, source: &SoundSource) -> Result<(), AudioError> {
            if self.fail_play {
                return Err(AudioError::NotInitialized);
            }
            self.played.push((entry.keys.clone(), source.clone()));
            Ok(())
        }

        fn stop_all(&mut self) {
            self.stops += 1;
        }

        fn notify(&mut self, message: &str) {
            self.notices.push(message.to_string());
        }

        fn table_reloaded(&mut self, path: &Path, _table: &HotkeyTable) {
            self.reloads.push(path.to_path_buf());
        }
    }

    struct Harness {
        keyboard: Arc<FakeKeyboard>,
        windows: Arc<FakeWindows>,
        ptt: Arc<Mutex<PushToTalk>>,
        dispatcher: Dispatcher,
    }

    fn remote(name: &str) -> SoundSource {
        SoundSource::Remote(format!("https://example.com/{}.mp3", name))
    }

    fn keys(s: &str) -> KeySet {
        s.parse().unwrap()
    }

    fn harness(table: HotkeyTable) -> Harness {
        let keyboard = Arc::new(FakeKeyboard::default());
        let windows = Arc::new(FakeWindows::default());
        let mut ptt = PushToTalk::new();
        ptt.set_lead_delay(Duration::ZERO);
        let ptt = Arc::new(Mutex::new(ptt));

        let mut dispatcher = Dispatcher::new(keyboard.clone(), windows.clone(), Arc::clone(&ptt))
            .with_picker(SourcePicker::with_rng(StdRng::seed_from_u64(7)));
        dispatcher.set_table(table);
        Harness {
            keyboard,
            windows,
            ptt,
            dispatcher,
        }
    }

    fn single_entry_table() -> HotkeyTable {
        HotkeyTable {
            entries: vec![HotkeyEntry::new(keys("ControlLeft+F1"), vec![remote("a")])],
            ..Default::default()
        }
    }

    #[test]
    fn test_hold_fires_once_and_repress_fires_again() {
        let mut h = harness(single_entry_table());
        let mut actions = Recorder::default();

        h.keyboard.hold(&[Key::ControlLeft, Key::F1]);
        for _ in 0..10 {
            h.dispatcher.tick(&mut actions);
        }
        assert_eq!(actions.played.len(), 1);

        h.keyboard.hold(&[Key::ControlLeft]);
        assert_eq!(h.dispatcher.tick(&mut actions), TickOutcome::Idle);

        h.keyboard.hold(&[Key::ControlLeft, Key::F1]);
        assert_eq!(h.dispatcher.tick(&mut actions), TickOutcome::Played(0));
        h.dispatcher.tick(&mut actions);
        assert_eq!(actions.played.len(), 2);
    }

    #[test]
    fn test_earlier_entry_wins() {
        let table = HotkeyTable {
            entries: vec![
                HotkeyEntry::new(keys("ShiftLeft+KeyA"), vec![remote("first")]),
                HotkeyEntry::new(keys("KeyA"), vec![remote("second")]),
            ],
            ..Default::default()
        };
        let mut h = harness(table);
        let mut actions = Recorder::default();

        h.keyboard.hold(&[Key::ShiftLeft, Key::KeyA]);
        for _ in 0..5 {
            h.dispatcher.tick(&mut actions);
        }
        assert_eq!(actions.played.len(), 1);
        assert_eq!(actions.played[0].1, remote("first"));
    }

    #[test]
    fn test_empty_keys_never_fire() {
        let table = HotkeyTable {
            entries: vec![HotkeyEntry::new(KeySet::default(), vec![remote("a")])],
            ..Default::default()
        };
        let mut h = harness(table);
        let mut actions = Recorder::default();
        h.keyboard.hold(&[Key::KeyA]);
        assert_eq!(h.dispatcher.tick(&mut actions), TickOutcome::Idle);
    }

    #[test]
    fn test_window_requirement() {
        let table = HotkeyTable {
            entries: vec![HotkeyEntry::new(keys("F2"), vec![remote("a")]).with_window("Game")],
            ..Default::default()
        };
        let mut h = harness(table);
        let mut actions = Recorder::default();
        h.keyboard.hold(&[Key::F2]);

        h.windows.focus(Some("Editor"));
        assert_eq!(h.dispatcher.tick(&mut actions), TickOutcome::Idle);
        h.windows.focus(Some("Game"));
        assert_eq!(h.dispatcher.tick(&mut actions), TickOutcome::Played(0));
    }

    #[test]
    fn test_playback_takes_priority_over_stop() {
        let table = HotkeyTable {
            entries: vec![HotkeyEntry::new(keys("F3"), vec![remote("a")])],
            stop: Some(StopKeyEntry { keys: keys("F3") }),
            ..Default::default()
        };
        let mut h = harness(table);
        let mut actions = Recorder::default();
        h.keyboard.hold(&[Key::F3]);

        assert_eq!(h.dispatcher.tick(&mut actions), TickOutcome::Played(0));
        // Playback edge is set, so the stop combination gets its turn
        assert_eq!(h.dispatcher.tick(&mut actions), TickOutcome::Stopped);
        assert_eq!(h.dispatcher.tick(&mut actions), TickOutcome::Idle);
        assert_eq!(actions.stops, 1);
    }

    #[test]
    fn test_stop_is_edge_triggered() {
        let table = HotkeyTable {
            stop: Some(StopKeyEntry { keys: keys("Pause") }),
            ..Default::default()
        };
        let mut h = harness(table);
        let mut actions = Recorder::default();

        h.keyboard.hold(&[Key::Pause]);
        for _ in 0..4 {
            h.dispatcher.tick(&mut actions);
        }
        h.keyboard.release_all();
        h.dispatcher.tick(&mut actions);
        h.keyboard.hold(&[Key::Pause]);
        h.dispatcher.tick(&mut actions);
        assert_eq!(actions.stops, 2);
    }

    #[test]
    fn test_disabled_does_nothing() {
        let mut h = harness(single_entry_table());
        let mut actions = Recorder::default();
        h.dispatcher.set_enabled(false);
        h.keyboard.hold(&[Key::ControlLeft, Key::F1]);
        assert_eq!(h.dispatcher.tick(&mut actions), TickOutcome::Disabled);
        assert!(actions.played.is_empty());
    }

    #[test]
    fn test_push_to_talk_wraps_playback() {
        let mut h = harness(single_entry_table());
        h.ptt
            .lock()
            .unwrap()
            .configure(Some(Key::KeyV), WindowScope::Any, true);
        let mut actions = Recorder::default();

        h.keyboard.hold(&[Key::ControlLeft, Key::F1]);
        h.dispatcher.tick(&mut actions);
        assert!(h.ptt.lock().unwrap().is_held());
        assert_eq!(h.keyboard.sent(), vec![(Key::KeyV, true)]);
    }

    #[test]
    fn test_push_to_talk_released_when_play_fails() {
        let mut h = harness(single_entry_table());
        h.ptt
            .lock()
            .unwrap()
            .configure(Some(Key::KeyV), WindowScope::Any, true);
        let mut actions = Recorder {
            fail_play: true,
            ..Default::default()
        };

        h.keyboard.hold(&[Key::ControlLeft, Key::F1]);
        assert_eq!(h.dispatcher.tick(&mut actions), TickOutcome::PlayFailed(0));
        assert!(!h.ptt.lock().unwrap().is_held());
        assert_eq!(actions.notices.len(), 1);
    }

    #[test]
    fn test_focus_loss_releases_push_to_talk_within_one_tick() {
        let mut h = harness(single_entry_table());
        h.ptt
            .lock()
            .unwrap()
            .configure(Some(Key::KeyV), WindowScope::from_title("Voice"), true);
        let mut actions = Recorder::default();

        h.windows.focus(Some("Voice"));
        h.keyboard.hold(&[Key::ControlLeft, Key::F1]);
        h.dispatcher.tick(&mut actions);
        assert!(h.ptt.lock().unwrap().is_held());

        // Sound is still playing, but focus moved
        h.windows.focus(Some("Browser"));
        h.dispatcher.tick(&mut actions);
        assert!(!h.ptt.lock().unwrap().is_held());
        assert_eq!(h.keyboard.sent().last(), Some(&(Key::KeyV, false)));
    }

    #[test]
    fn test_missing_file_notice_is_rate_limited() {
        let table = HotkeyTable {
            entries: vec![HotkeyEntry::new(
                keys("F4"),
                vec![SoundSource::Local(PathBuf::from("/no/such/sound.wav"))],
            )],
            ..Default::default()
        };
        let mut h = harness(table);
        h.dispatcher.set_notice_cooldown(Duration::from_secs(60));
        let mut actions = Recorder::default();

        for _ in 0..3 {
            h.keyboard.hold(&[Key::F4]);
            assert_eq!(h.dispatcher.tick(&mut actions), TickOutcome::Missing(0));
            h.dispatcher.tick(&mut actions);
            h.keyboard.release_all();
            h.dispatcher.tick(&mut actions);
        }
        assert_eq!(actions.notices.len(), 1);
        assert!(actions.played.is_empty());
    }

    #[test]
    fn test_failed_reload_keeps_table() {
        let dir = TempDir::new().unwrap();
        let bad = dir.path().join("bad.json");
        std::fs::write(&bad, "not json").unwrap();

        let mut table = single_entry_table();
        table.reload.push(ReloadKeyEntry {
            keys: keys("F12"),
            table: bad.clone(),
        });
        let mut h = harness(table.clone());
        let mut actions = Recorder::default();

        h.keyboard.hold(&[Key::F12]);
        assert_eq!(h.dispatcher.tick(&mut actions), TickOutcome::ReloadFailed(bad));
        assert_eq!(h.dispatcher.table(), &table);
        assert_eq!(actions.notices.len(), 1);
    }

    #[test]
    fn test_reload_swaps_table() {
        let dir = TempDir::new().unwrap();
        let next = dir.path().join("next.json");
        let next_table = HotkeyTable {
            entries: vec![HotkeyEntry::new(keys("F9"), vec![remote("z")])],
            ..Default::default()
        };
        next_table.save(&next).unwrap();

        let mut table = single_entry_table();
        table.reload.push(ReloadKeyEntry {
            keys: keys("F12"),
            table: next.clone(),
        });
        let mut h = harness(table);
        let mut actions = Recorder::default();

        h.keyboard.hold(&[Key::F12]);
        assert_eq!(h.dispatcher.tick(&mut actions), TickOutcome::Reloaded(next.clone()));
        assert_eq!(h.dispatcher.table(), &next_table);
        assert_eq!(actions.reloads, vec![next]);

        h.keyboard.hold(&[Key::F9]);
        assert_eq!(h.dispatcher.tick(&mut actions), TickOutcome::Played(0));
    }
}
