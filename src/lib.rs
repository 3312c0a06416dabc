//! midscroll - middle-button / chord scroll-mode remapper
//!
//! Intercepts a pointing device at the evdev layer, recognizes a timed
//! left+right chord (or the physical middle button) as a request for a
//! virtual scroll mode, and while the mode is active converts relative
//! motion into synthetic wheel events with the cursor pinned in place.
//! Everything the OS should still see is re-emitted through a uinput
//! virtual device.

pub mod chord;
pub mod config;
pub mod cursor;
pub mod decode;
pub mod error;
pub mod events;
pub mod hid;
pub mod matcher;
pub mod permissions;
pub mod scroll;
pub mod session;
pub mod suppress;

pub use config::{AppSettings, EngineConfig};
pub use error::{EngineError, ErrorKind};
pub use events::{Axis, Button, EngineEvent, ObserverToken, SemanticEvent};
pub use matcher::MatchCriterion;
pub use session::EngineSession;
