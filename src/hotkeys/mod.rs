//! Hotkeys module - key combinations, tables and dispatch
//!
//! This module provides:
//! - Key identifiers and unordered key combinations
//! - Hotkey tables persisted as JSON
//! - The polling dispatcher that turns key state into actions
//! - A key-combination recorder and random sound selection

pub mod capture;
pub mod dispatcher;
pub mod keys;
pub mod picker;
pub mod table;

// Re-export public types
pub use capture::KeyCapture;
pub use dispatcher::{DispatchActions, Dispatcher, TickOutcome};
pub use keys::Key;
pub use table::{HotkeyEntry, HotkeyTable, SoundSource};
