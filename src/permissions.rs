//! Input-access authorization probe.
//!
//! Checked once at session start, before any device is opened: reading
//! `/dev/input` (event interception) and writing `/dev/uinput` (event
//! injection). Usually this means membership in the `input` group or a
//! matching udev rule.

use std::ffi::CString;
use std::path::Path;

use crate::error::EngineError;

const INPUT_DIR: &str = "/dev/input";
const UINPUT_NODE: &str = "/dev/uinput";

/// Verify the process may intercept and inject input events.
pub fn check_input_access() -> Result<(), EngineError> {
    if !accessible(INPUT_DIR, libc::R_OK | libc::X_OK) {
        return Err(EngineError::PermissionDenied(format!(
            "{INPUT_DIR} is not readable; add the user to the 'input' group or install a udev rule"
        )));
    }
    if !Path::new(UINPUT_NODE).exists() {
        return Err(EngineError::PermissionDenied(format!(
            "{UINPUT_NODE} does not exist; load the uinput kernel module"
        )));
    }
    if !accessible(UINPUT_NODE, libc::W_OK) {
        return Err(EngineError::PermissionDenied(format!(
            "{UINPUT_NODE} is not writable; grant access via udev rule or group membership"
        )));
    }
    Ok(())
}

fn accessible(path: &str, mode: libc::c_int) -> bool {
    let Ok(c_path) = CString::new(path) else {
        return false;
    };
    unsafe { libc::access(c_path.as_ptr(), mode) == 0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accessible_on_known_paths() {
        assert!(accessible("/", libc::R_OK | libc::X_OK));
        assert!(!accessible("/definitely/not/a/path", libc::R_OK));
    }
}
