//! Device discovery, matching and lifetime.
//!
//! Matching happens in two layers: hidapi enumeration resolves the
//! registered (usage page, usage, vendor) criteria to the (vendor,
//! product) identities of the interfaces that carry them, then the
//! corresponding evdev pointer nodes are opened, switched to non-blocking
//! and grabbed exclusively. A udev monitor on the `input` subsystem
//! triggers rescans so hotplugged devices attach without restarting the
//! session.

use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::PathBuf;

use anyhow::{Context, Result};
use evdev::{AttributeSet, Device, InputEvent, Key, RelativeAxisType};
use hidapi::HidApi;
use tracing::{debug, info, warn};

use crate::error::EngineError;
use crate::hid::{self, generic_desktop};
use crate::suppress::VIRTUAL_DEVICE_NAME;

/// One registered matching rule. Immutable once registered; the active set
/// determines which devices the matcher opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchCriterion {
    pub usage_page: u16,
    pub usage: u16,
    pub vendor_id: Option<u16>,
}

impl MatchCriterion {
    pub fn new(usage_page: u16, usage: u16) -> Self {
        Self {
            usage_page,
            usage,
            vendor_id: None,
        }
    }

    pub fn with_vendor(mut self, vendor_id: u16) -> Self {
        self.vendor_id = Some(vendor_id);
        self
    }

    /// Generic Desktop / Mouse.
    pub fn mouse() -> Self {
        Self::new(hid::PAGE_GENERIC_DESKTOP, generic_desktop::MOUSE)
    }

    /// Generic Desktop / Pointer.
    pub fn pointer() -> Self {
        Self::new(hid::PAGE_GENERIC_DESKTOP, generic_desktop::POINTER)
    }
}

/// The full match configuration: usage criteria plus vendor-only IDs.
#[derive(Debug, Clone, Default)]
pub struct MatchSet {
    criteria: Vec<MatchCriterion>,
    vendor_ids: BTreeSet<u16>,
}

impl MatchSet {
    pub fn add_criterion(&mut self, criterion: MatchCriterion) {
        self.criteria.push(criterion);
    }

    pub fn add_vendor(&mut self, vendor_id: u16) {
        self.vendor_ids.insert(vendor_id);
    }

    pub fn is_empty(&self) -> bool {
        self.criteria.is_empty() && self.vendor_ids.is_empty()
    }

    fn matches(&self, usage_page: u16, usage: u16, vendor_id: u16) -> bool {
        if self.vendor_ids.contains(&vendor_id) {
            return true;
        }
        self.criteria.iter().any(|c| {
            c.usage_page == usage_page
                && c.usage == usage
                && c.vendor_id.map(|v| v == vendor_id).unwrap_or(true)
        })
    }

    /// Human-readable dump for startup logging.
    pub fn describe(&self) -> String {
        let mut out = String::from("match criteria:\n");
        for c in &self.criteria {
            out.push_str(&format!(
                "  usage_page={:#06x} usage={:#06x} vendor={}\n",
                c.usage_page,
                c.usage,
                c.vendor_id
                    .map(|v| format!("{v:#06x}"))
                    .unwrap_or_else(|| "any".into()),
            ));
        }
        for v in &self.vendor_ids {
            out.push_str(&format!("  vendor={v:#06x} (any usage)\n"));
        }
        out
    }
}

/// Identity and cached metadata of an opened device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceHandle {
    pub path: PathBuf,
    pub name: String,
    pub vendor_id: u16,
    pub product_id: u16,
}

struct OpenDevice {
    handle: DeviceHandle,
    dev: Device,
    grabbed: bool,
}

/// Result of one enumeration pass.
#[derive(Default)]
pub struct RescanOutcome {
    pub attached: Vec<DeviceHandle>,
    pub detached: Vec<DeviceHandle>,
    pub failures: Vec<(PathBuf, io::Error)>,
}

/// Result of draining pending events from the open devices.
#[derive(Default)]
pub struct PollOutcome {
    pub had_events: bool,
    pub detached: Vec<DeviceHandle>,
}

/// Owns every matched device for the lifetime of a session.
pub struct DeviceMatcher {
    match_set: MatchSet,
    api: HidApi,
    open: BTreeMap<PathBuf, OpenDevice>,
}

impl DeviceMatcher {
    pub fn new(match_set: MatchSet) -> Result<Self, EngineError> {
        let api =
            HidApi::new().map_err(|e| EngineError::EnumerationFailed(e.to_string()))?;
        Ok(Self {
            match_set,
            api,
            open: BTreeMap::new(),
        })
    }

    /// (vendor, product) identities whose HID interfaces match the
    /// registered criteria.
    fn matched_ids(&mut self) -> BTreeSet<(u16, u16)> {
        if let Err(e) = self.api.refresh_devices() {
            warn!("HID enumeration refresh failed: {e}");
        }

        let mut ids = BTreeSet::new();
        for info in self.api.device_list() {
            if self
                .match_set
                .matches(info.usage_page(), info.usage(), info.vendor_id())
            {
                ids.insert((info.vendor_id(), info.product_id()));
            }
        }
        ids
    }

    /// Reconcile the open set against what is currently plugged in.
    pub fn rescan(&mut self) -> RescanOutcome {
        let ids = self.matched_ids();
        let mut outcome = RescanOutcome::default();
        let mut seen: BTreeSet<PathBuf> = BTreeSet::new();

        for (path, dev) in evdev::enumerate() {
            let name = dev.name().unwrap_or_default().to_string();
            if name == VIRTUAL_DEVICE_NAME {
                continue;
            }

            let id = dev.input_id();
            if !ids.contains(&(id.vendor(), id.product())) {
                continue;
            }
            if !is_pointer_node(&dev) {
                debug!("skipping non-pointer interface {:?} ('{}')", path, name);
                continue;
            }

            seen.insert(path.clone());
            if self.open.contains_key(&path) {
                continue;
            }

            let handle = DeviceHandle {
                path: path.clone(),
                name,
                vendor_id: id.vendor(),
                product_id: id.product(),
            };
            let mut dev = dev;
            if let Err(e) = set_nonblocking(&dev) {
                warn!("Failed to set {:?} non-blocking: {e}", handle.path);
                outcome.failures.push((handle.path, e));
                continue;
            }
            let grabbed = match dev.grab() {
                Ok(()) => {
                    info!(
                        "Grabbed pointer device {:?} ('{}', {:04x}:{:04x})",
                        handle.path, handle.name, handle.vendor_id, handle.product_id
                    );
                    true
                }
                Err(e) => {
                    // Keep the device; the liveness check retries the grab.
                    warn!("Failed to grab {:?}: {e}", handle.path);
                    outcome.failures.push((handle.path.clone(), e));
                    false
                }
            };
            outcome.attached.push(handle.clone());
            self.open.insert(path, OpenDevice { handle, dev, grabbed });
        }

        // Anything we hold that enumeration no longer reports is gone.
        let gone: Vec<PathBuf> = self
            .open
            .keys()
            .filter(|p| !seen.contains(*p))
            .cloned()
            .collect();
        for path in gone {
            if let Some(mut open) = self.open.remove(&path) {
                let _ = open.dev.ungrab();
                info!("Device detached: {:?} ('{}')", path, open.handle.name);
                outcome.detached.push(open.handle);
            }
        }

        outcome
    }

    /// Drain pending events from every open device into `f`. Devices that
    /// report a hard error (unplugged mid-read) are closed and returned as
    /// detached.
    pub fn poll(&mut self, f: &mut dyn FnMut(InputEvent)) -> PollOutcome {
        let mut outcome = PollOutcome::default();
        let mut dead: Vec<PathBuf> = Vec::new();

        for (path, open) in self.open.iter_mut() {
            match open.dev.fetch_events() {
                Ok(events) => {
                    for ev in events {
                        // Without the grab the OS already received this
                        // event; processing it too would double-deliver.
                        if !open.grabbed {
                            continue;
                        }
                        outcome.had_events = true;
                        f(ev);
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => {
                    warn!("read error from {:?}: {e}", path);
                    dead.push(path.clone());
                }
            }
        }

        for path in dead {
            if let Some(mut open) = self.open.remove(&path) {
                let _ = open.dev.ungrab();
                outcome.detached.push(open.handle);
            }
        }
        outcome
    }

    /// Re-assert the exclusive grab on any device that lost it. Returns
    /// the handles that still cannot be grabbed.
    pub fn ensure_grabbed(&mut self) -> Vec<DeviceHandle> {
        let mut failing = Vec::new();
        for open in self.open.values_mut() {
            if open.grabbed {
                continue;
            }
            match open.dev.grab() {
                Ok(()) => {
                    info!("Re-grabbed {:?}", open.handle.path);
                    open.grabbed = true;
                }
                Err(e) => {
                    debug!("grab retry failed for {:?}: {e}", open.handle.path);
                    failing.push(open.handle.clone());
                }
            }
        }
        failing
    }

    /// Union of key/axis capabilities across the open devices, for sizing
    /// the virtual output device.
    pub fn capabilities(&self) -> (AttributeSet<Key>, AttributeSet<RelativeAxisType>) {
        let mut keys: AttributeSet<Key> = AttributeSet::new();
        let mut axes: AttributeSet<RelativeAxisType> = AttributeSet::new();
        for open in self.open.values() {
            if let Some(src_keys) = open.dev.supported_keys() {
                for k in src_keys.iter() {
                    keys.insert(k);
                }
            }
            if let Some(rel) = open.dev.supported_relative_axes() {
                for axis in rel.iter() {
                    axes.insert(axis);
                }
            }
        }
        (keys, axes)
    }

    pub fn open_count(&self) -> usize {
        self.open.len()
    }

    /// Ungrab and close everything. Idempotent.
    pub fn close_all(&mut self) {
        for (path, mut open) in std::mem::take(&mut self.open) {
            let _ = open.dev.ungrab();
            debug!("closed {:?}", path);
        }
    }
}

impl Drop for DeviceMatcher {
    fn drop(&mut self) {
        self.close_all();
    }
}

fn is_pointer_node(dev: &Device) -> bool {
    let has_button = dev
        .supported_keys()
        .map(|k| k.contains(Key::BTN_LEFT) || k.contains(Key::BTN_MIDDLE))
        .unwrap_or(false);
    let has_motion = dev
        .supported_relative_axes()
        .map(|r| r.contains(RelativeAxisType::REL_X))
        .unwrap_or(false);
    has_button || has_motion
}

fn set_nonblocking(dev: &Device) -> io::Result<()> {
    let raw_fd = dev.as_raw_fd();

    // Preserve existing flags; just OR in O_NONBLOCK.
    let current = unsafe { libc::fcntl(raw_fd, libc::F_GETFL) };
    if current < 0 {
        return Err(io::Error::last_os_error());
    }

    let rc = unsafe { libc::fcntl(raw_fd, libc::F_SETFL, current | libc::O_NONBLOCK) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Non-blocking udev monitor that flags input-subsystem churn.
pub struct HotplugMonitor {
    socket: udev::MonitorSocket,
}

// The monitor is constructed on the caller's thread and then moved into the
// worker thread, where it is the sole owner and the only accessor. `udev`
// marks `MonitorBuilder` `Send` but omits the same marker on the resulting
// `MonitorSocket`; the single-owner hand-off here is sound.
unsafe impl Send for HotplugMonitor {}

impl HotplugMonitor {
    pub fn new() -> Result<Self> {
        let socket = udev::MonitorBuilder::new()
            .context("Failed to create udev monitor")?
            .match_subsystem("input")
            .context("Failed to filter udev monitor to input subsystem")?
            .listen()
            .context("Failed to start udev monitor")?;
        Ok(Self { socket })
    }

    /// Drain pending udev events; true when a device was added or removed
    /// since the last call.
    pub fn poll_changed(&mut self) -> bool {
        let mut changed = false;
        for event in self.socket.iter() {
            match event.event_type() {
                udev::EventType::Add | udev::EventType::Remove => changed = true,
                _ => {}
            }
        }
        changed
    }
}
