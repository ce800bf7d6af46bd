//! soundkeys - a hotkey soundboard
//!
//! Plays sound files when key combinations are pressed, optionally on two
//! outputs at once, holding a push-to-talk key while they play and
//! forwarding a microphone into the primary output.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

mod audio;
mod hotkeys;
mod platform;
mod pushtotalk;
mod settings;
mod soundboard;

use audio::devices;
use hotkeys::{Dispatcher, HotkeyTable, KeyCapture, TickOutcome};
use platform::{default_window_service, HttpResolver, Keyboard, RdevKeyboard};
use settings::AppSettings;
use soundboard::Soundboard;

#[derive(Parser, Debug)]
#[command(name = "soundkeys", version, about = "Play sounds with global hotkeys")]
struct Cli {
    /// Settings file (default: ~/.config/soundkeys/settings.json)
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Hotkey table to load instead of the last one used
    #[arg(long)]
    table: Option<PathBuf>,

    /// Print playback and capture devices, then exit
    #[arg(long)]
    list_devices: bool,

    /// Print open window titles (for window-scoped entries), then exit
    #[arg(long)]
    list_windows: bool,

    /// Record a key combination and print it, then exit
    #[arg(long)]
    capture_keys: bool,

    /// Keyboard polling interval in milliseconds
    #[arg(long)]
    poll_ms: Option<u64>,
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if cli.list_devices {
        print_devices();
        return;
    }

    if cli.list_windows {
        for title in default_window_service().window_titles() {
            println!("{}", title);
        }
        return;
    }

    let keyboard: Arc<dyn Keyboard> = Arc::new(RdevKeyboard::start());

    if cli.capture_keys {
        println!("Press a key combination (Escape clears)...");
        let keys = KeyCapture::new().record(keyboard.as_ref());
        println!("{}", keys);
        return;
    }

    log::info!("Starting soundkeys");

    let settings_path = cli.settings.unwrap_or_else(settings::settings_path);
    let mut settings = AppSettings::load_from(&settings_path);
    if let Some(ms) = cli.poll_ms {
        settings.poll_interval_ms = ms.max(1);
    }
    let table_path = cli.table.or_else(|| settings.last_table_file.clone());

    let mut board = Soundboard::new(
        settings,
        Arc::clone(&keyboard),
        Box::new(HttpResolver::new()),
    );
    board.open_devices();

    let mut dispatcher = Dispatcher::new(keyboard, default_window_service(), board.push_to_talk());
    dispatcher.set_enabled(board.settings().enable_hotkeys);

    match table_path {
        Some(path) => match HotkeyTable::open(&path) {
            Ok(table) => {
                dispatcher.set_table(table);
                let mut updated = board.settings().clone();
                updated.last_table_file = Some(path);
                board.apply_settings(updated);
                board.settings().save_to(&settings_path);
            }
            Err(e) => log::error!("Failed to load {}: {}", path.display(), e),
        },
        None => log::warn!("No hotkey table given; use --table <file>"),
    }

    let interval = board.settings().poll_interval();
    loop {
        if let TickOutcome::Reloaded(_) = dispatcher.tick(&mut board) {
            board.settings().save_to(&settings_path);
        }
        std::thread::sleep(interval);
    }
}

fn print_devices() {
    println!("Playback devices:");
    for (i, name) in devices::output_device_names().iter().enumerate() {
        println!("  [{}] {}", i, name);
    }
    println!("Capture devices:");
    for (i, name) in devices::input_device_names().iter().enumerate() {
        println!("  [{}] {}", i, name);
    }
}
