//! Cursor pinning.
//!
//! With the source device grabbed, its motion can no longer move the
//! cursor, so the pin mostly holds by construction. The backend exists for
//! the rest: it samples the position once on scroll-mode entry and warps
//! the pointer back if anything else (another device, an application)
//! drifted it while the mode is active.
//!
//! Backends differ per display server, so the seam is a trait with an X11
//! implementation behind the `x11` feature and a null fallback for
//! Wayland/headless sessions.

use tracing::info;

/// Display-server access needed for the cursor lock.
pub trait CursorBackend: Send {
    /// Current pointer position in screen coordinates, if the backend can
    /// know it.
    fn position(&mut self) -> Option<(i32, i32)>;

    /// Move the pointer to the given screen coordinates.
    fn warp(&mut self, x: i32, y: i32);
}

/// Pinned-position record for the active scroll mode.
///
/// Set once from the live cursor position on entry, never updated while
/// active, cleared on exit.
#[derive(Debug, Clone, Copy, Default)]
pub struct CursorLock {
    pinned: Option<(i32, i32)>,
    active: bool,
}

impl CursorLock {
    /// Arm the lock with the position sampled at mode entry. `None` means
    /// the backend cannot report positions; the lock is still considered
    /// active (the grab keeps the cursor in place).
    pub fn activate(&mut self, pinned: Option<(i32, i32)>) {
        self.pinned = pinned;
        self.active = true;
    }

    pub fn deactivate(&mut self) {
        self.pinned = None;
        self.active = false;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn pinned(&self) -> Option<(i32, i32)> {
        if self.active { self.pinned } else { None }
    }
}

/// Warp back to the pin if the pointer drifted. Warping to the position
/// the pointer already has is skipped, and a warp cannot re-enter the
/// pipeline because the source device is grabbed.
pub fn reassert(backend: &mut dyn CursorBackend, pinned: (i32, i32)) {
    match backend.position() {
        Some(current) if current == pinned => {}
        Some(_) => backend.warp(pinned.0, pinned.1),
        None => {}
    }
}

/// Backend for sessions without display-server access. Reports no
/// position and ignores warps.
#[derive(Debug, Default)]
pub struct NullCursorBackend;

impl CursorBackend for NullCursorBackend {
    fn position(&mut self) -> Option<(i32, i32)> {
        None
    }

    fn warp(&mut self, _x: i32, _y: i32) {}
}

#[cfg(feature = "x11")]
mod x11 {
    use anyhow::{Context, Result};
    use tracing::warn;
    use x11rb::connection::Connection;
    use x11rb::protocol::xproto::{ConnectionExt, Window};
    use x11rb::rust_connection::RustConnection;

    use super::CursorBackend;

    /// Cursor access over an X11 connection.
    pub struct X11CursorBackend {
        conn: RustConnection,
        root: Window,
    }

    impl X11CursorBackend {
        pub fn new() -> Result<Self> {
            let (conn, screen_num) =
                x11rb::connect(None).context("Failed to connect to X11 display")?;
            let root = conn.setup().roots[screen_num].root;
            Ok(Self { conn, root })
        }
    }

    impl CursorBackend for X11CursorBackend {
        fn position(&mut self) -> Option<(i32, i32)> {
            let reply = self
                .conn
                .query_pointer(self.root)
                .ok()?
                .reply()
                .ok()?;
            Some((reply.root_x as i32, reply.root_y as i32))
        }

        fn warp(&mut self, x: i32, y: i32) {
            let result = self
                .conn
                .warp_pointer(x11rb::NONE, self.root, 0, 0, 0, 0, x as i16, y as i16)
                .and_then(|_| self.conn.flush());
            if let Err(e) = result {
                warn!("Failed to warp pointer: {e}");
            }
        }
    }
}

#[cfg(feature = "x11")]
pub use x11::X11CursorBackend;

/// Pick the backend for the current session environment.
pub fn detect_backend() -> Box<dyn CursorBackend> {
    #[cfg(feature = "x11")]
    {
        let on_x11 = std::env::var("XDG_SESSION_TYPE")
            .map(|t| t.eq_ignore_ascii_case("x11"))
            .unwrap_or(false)
            || std::env::var("DISPLAY").is_ok();
        if on_x11 {
            match X11CursorBackend::new() {
                Ok(backend) => {
                    info!("Cursor pinning via X11");
                    return Box::new(backend);
                }
                Err(e) => tracing::debug!("X11 cursor backend unavailable: {e:#}"),
            }
        }
    }

    info!("Cursor pinning disabled (no supported display server)");
    Box::new(NullCursorBackend)
}
