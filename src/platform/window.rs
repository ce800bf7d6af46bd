//! Foreground window lookup
//!
//! On Linux this reads the EWMH properties the window manager maintains on
//! the root window. Elsewhere, or without an X server, window scoping is
//! unavailable and every query reports no window.

use std::sync::Arc;

use super::WindowService;

/// Used when no window system is reachable
pub struct NoWindowService;

impl WindowService for NoWindowService {
    fn foreground_window(&self) -> Option<String> {
        None
    }

    fn window_titles(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Best available window service for this platform
pub fn default_window_service() -> Arc<dyn WindowService> {
    #[cfg(target_os = "linux")]
    {
        match X11WindowService::connect() {
            Ok(service) => return Arc::new(service),
            Err(e) => log::warn!("Window scoping unavailable: {}", e),
        }
    }
    Arc::new(NoWindowService)
}

#[cfg(target_os = "linux")]
pub use x11::X11WindowService;

#[cfg(target_os = "linux")]
mod x11 {
    use x11rb::atom_manager;
    use x11rb::connection::Connection;
    use x11rb::protocol::xproto::{AtomEnum, ConnectionExt, Window};
    use x11rb::rust_connection::RustConnection;

    use crate::platform::WindowService;

    atom_manager! {
        pub WindowAtoms: WindowAtomsCookie {
            _NET_ACTIVE_WINDOW,
            _NET_CLIENT_LIST,
            _NET_WM_NAME,
            UTF8_STRING,
        }
    }

    /// Longest title read, in 32-bit units
    const TITLE_LEN: u32 = 256;

    /// Most windows listed from `_NET_CLIENT_LIST`
    const MAX_CLIENTS: u32 = 1024;

    pub struct X11WindowService {
        conn: RustConnection,
        root: Window,
        atoms: WindowAtoms,
    }

    impl X11WindowService {
        pub fn connect() -> Result<Self, String> {
            let (conn, screen_num) = x11rb::connect(None).map_err(|e| e.to_string())?;
            let atoms = WindowAtoms::new(&conn)
                .map_err(|e| e.to_string())?
                .reply()
                .map_err(|e| e.to_string())?;
            let root = conn.setup().roots[screen_num].root;
            Ok(Self { conn, root, atoms })
        }

        fn title(&self, window: Window) -> Option<String> {
            let utf8 = self
                .conn
                .get_property(
                    false,
                    window,
                    self.atoms._NET_WM_NAME,
                    self.atoms.UTF8_STRING,
                    0,
                    TITLE_LEN,
                )
                .ok()?
                .reply()
                .ok()?;
            if !utf8.value.is_empty() {
                return Some(String::from_utf8_lossy(&utf8.value).into_owned());
            }

            let legacy = self
                .conn
                .get_property(false, window, AtomEnum::WM_NAME, AtomEnum::STRING, 0, TITLE_LEN)
                .ok()?
                .reply()
                .ok()?;
            (!legacy.value.is_empty()).then(|| String::from_utf8_lossy(&legacy.value).into_owned())
        }
    }

    impl WindowService for X11WindowService {
        fn foreground_window(&self) -> Option<String> {
            let reply = self
                .conn
                .get_property(
                    false,
                    self.root,
                    self.atoms._NET_ACTIVE_WINDOW,
                    AtomEnum::WINDOW,
                    0,
                    1,
                )
                .ok()?
                .reply()
                .ok()?;
            let window = reply.value32()?.next()?;
            if window == x11rb::NONE {
                return None;
            }
            self.title(window)
        }

        fn window_titles(&self) -> Vec<String> {
            let Some(reply) = self
                .conn
                .get_property(
                    false,
                    self.root,
                    self.atoms._NET_CLIENT_LIST,
                    AtomEnum::WINDOW,
                    0,
                    MAX_CLIENTS,
                )
                .ok()
                .and_then(|cookie| cookie.reply().ok())
            else {
                return Vec::new();
            };

            let Some(windows) = reply.value32() else {
                return Vec::new();
            };
            let mut titles: Vec<String> = windows.filter_map(|w| self.title(w)).collect();
            titles.dedup();
            titles
        }
    }
}
