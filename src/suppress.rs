//! Event suppression layer.
//!
//! The source devices are grabbed exclusively, so the OS only ever sees
//! what this layer chooses to re-emit on the virtual output device. Per
//! intercepted event the rule is:
//!
//! - scroll mode inactive: forward verbatim;
//! - scroll mode active: X/Y motion is consumed and routed to the scroll
//!   accumulator, events for the buttons that originated the mode are
//!   consumed, everything else forwards untouched, and the cursor pin is
//!   re-asserted after handling.
//!
//! The decision always derives from the current [`ScrollMode`] read under
//! the shared-state mutex; nothing is cached, so a mode exit immediately
//! stops suppression. The layer also remembers which buttons it has
//! forwarded as pressed so it can synthesize the release the OS would
//! otherwise never see (chord entry, `stop()` mid-press).

use std::io;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Instant;

use evdev::uinput::{VirtualDevice, VirtualDeviceBuilder};
use evdev::{AttributeSet, EventType, InputEvent, InputEventKind, Key, RelativeAxisType};
use tracing::{debug, warn};

use crate::chord::{self, ButtonState, ScrollMode};
use crate::config::EngineConfig;
use crate::cursor::{self, CursorBackend, CursorLock};
use crate::decode;
use crate::events::{Axis, Button, EngineEvent, ObserverRegistry, SemanticEvent};
use crate::scroll::{ScrollAccumulator, WheelDelta};

/// Name of the virtual output device; the matcher skips it during
/// enumeration so the pipeline cannot feed on its own output.
pub const VIRTUAL_DEVICE_NAME: &str = "midscroll virtual pointer";

/// One hi-res wheel notch, per the kernel's REL_WHEEL_HI_RES contract.
const HI_RES_PER_NOTCH: f64 = 120.0;
/// How many accumulator units make up one wheel notch.
const UNITS_PER_NOTCH: f64 = 10.0;

/// Everything the three execution contexts share, guarded by one mutex
/// with strictly bounded critical sections. No I/O happens under the lock.
#[derive(Debug)]
pub struct PipelineState {
    pub buttons: ButtonState,
    pub mode: ScrollMode,
    pub accum: ScrollAccumulator,
    pub lock: CursorLock,
    forwarded: ForwardedButtons,
}

impl PipelineState {
    pub fn new(now: Instant) -> Self {
        Self {
            buttons: ButtonState::default(),
            mode: ScrollMode::Inactive,
            accum: ScrollAccumulator::new(now),
            lock: CursorLock::default(),
            forwarded: ForwardedButtons::default(),
        }
    }
}

/// Buttons currently held down from the virtual device's point of view.
#[derive(Debug, Clone, Copy, Default)]
struct ForwardedButtons {
    left: bool,
    right: bool,
    middle: bool,
}

impl ForwardedButtons {
    fn set(&mut self, button: Button, pressed: bool) {
        match button {
            Button::Left => self.left = pressed,
            Button::Right => self.right = pressed,
            Button::Middle => self.middle = pressed,
        }
    }

    fn is_down(&self, button: Button) -> bool {
        match button {
            Button::Left => self.left,
            Button::Right => self.right,
            Button::Middle => self.middle,
        }
    }

    fn drain_held(&mut self) -> Vec<Button> {
        let mut held = Vec::new();
        if self.left {
            held.push(Button::Left);
        }
        if self.right {
            held.push(Button::Right);
        }
        if self.middle {
            held.push(Button::Middle);
        }
        *self = Self::default();
        held
    }
}

/// Where pass-through events and synthesized output go. The production
/// implementation is [`UinputSink`]; tests substitute a recorder.
pub trait EventSink: Send {
    /// Re-emit an intercepted event unchanged.
    fn forward(&mut self, event: InputEvent) -> io::Result<()>;

    /// Emit a synthetic button transition.
    fn emit_button(&mut self, button: Button, pressed: bool) -> io::Result<()>;

    /// Emit one synthetic wheel event.
    fn emit_wheel(&mut self, wheel: WheelDelta) -> io::Result<()>;
}

/// uinput-backed sink.
pub struct UinputSink {
    vdev: VirtualDevice,
    v_residue: i32,
    h_residue: i32,
}

impl UinputSink {
    /// Build the virtual device. `keys`/`axes` are the union of the
    /// grabbed source capabilities so every forwarded event is legal on
    /// the output side.
    pub fn new(
        mut keys: AttributeSet<Key>,
        mut axes: AttributeSet<RelativeAxisType>,
    ) -> io::Result<Self> {
        for key in [Key::BTN_LEFT, Key::BTN_RIGHT, Key::BTN_MIDDLE] {
            keys.insert(key);
        }
        for axis in [
            RelativeAxisType::REL_X,
            RelativeAxisType::REL_Y,
            RelativeAxisType::REL_WHEEL,
            RelativeAxisType::REL_HWHEEL,
            RelativeAxisType::REL_WHEEL_HI_RES,
            RelativeAxisType::REL_HWHEEL_HI_RES,
        ] {
            axes.insert(axis);
        }

        let vdev = VirtualDeviceBuilder::new()?
            .name(VIRTUAL_DEVICE_NAME)
            .with_keys(&keys)?
            .with_relative_axes(&axes)?
            .build()?;

        Ok(Self {
            vdev,
            v_residue: 0,
            h_residue: 0,
        })
    }
}

impl EventSink for UinputSink {
    fn forward(&mut self, event: InputEvent) -> io::Result<()> {
        let sync = InputEvent::new(EventType::SYNCHRONIZATION, 0, 0);
        self.vdev.emit(&[event, sync])
    }

    fn emit_button(&mut self, button: Button, pressed: bool) -> io::Result<()> {
        let code = match button {
            Button::Left => Key::BTN_LEFT.0,
            Button::Right => Key::BTN_RIGHT.0,
            Button::Middle => Key::BTN_MIDDLE.0,
        };
        let ev = InputEvent::new(EventType::KEY, code, i32::from(pressed));
        let sync = InputEvent::new(EventType::SYNCHRONIZATION, 0, 0);
        self.vdev.emit(&[ev, sync])
    }

    fn emit_wheel(&mut self, wheel: WheelDelta) -> io::Result<()> {
        let events = wheel_events(wheel, &mut self.v_residue, &mut self.h_residue);
        if events.is_empty() {
            return Ok(());
        }
        self.vdev.emit(&events)
    }
}

/// Convert a wheel delta into hi-res events plus legacy notch events fed
/// from the residue accumulators. Positive `vertical` (motion toward the
/// user) scrolls content down, which is a negative REL_WHEEL value.
fn wheel_events(wheel: WheelDelta, v_residue: &mut i32, h_residue: &mut i32) -> Vec<InputEvent> {
    let v_hi = (-wheel.vertical * HI_RES_PER_NOTCH / UNITS_PER_NOTCH).round() as i32;
    let h_hi = (wheel.horizontal * HI_RES_PER_NOTCH / UNITS_PER_NOTCH).round() as i32;

    let mut events = Vec::with_capacity(5);
    if v_hi != 0 {
        events.push(InputEvent::new(
            EventType::RELATIVE,
            RelativeAxisType::REL_WHEEL_HI_RES.0,
            v_hi,
        ));
        *v_residue += v_hi;
    }
    if h_hi != 0 {
        events.push(InputEvent::new(
            EventType::RELATIVE,
            RelativeAxisType::REL_HWHEEL_HI_RES.0,
            h_hi,
        ));
        *h_residue += h_hi;
    }

    let v_notches = *v_residue / HI_RES_PER_NOTCH as i32;
    if v_notches != 0 {
        *v_residue -= v_notches * HI_RES_PER_NOTCH as i32;
        events.push(InputEvent::new(
            EventType::RELATIVE,
            RelativeAxisType::REL_WHEEL.0,
            v_notches,
        ));
    }
    let h_notches = *h_residue / HI_RES_PER_NOTCH as i32;
    if h_notches != 0 {
        *h_residue -= h_notches * HI_RES_PER_NOTCH as i32;
        events.push(InputEvent::new(
            EventType::RELATIVE,
            RelativeAxisType::REL_HWHEEL.0,
            h_notches,
        ));
    }

    if !events.is_empty() {
        events.push(InputEvent::new(EventType::SYNCHRONIZATION, 0, 0));
    }
    events
}

/// Per-event decision engine tying the state machine, the scroll
/// accumulator and the cursor lock to the output sink.
pub struct EventPipeline {
    state: Arc<Mutex<PipelineState>>,
    config: Arc<RwLock<EngineConfig>>,
    observers: Arc<ObserverRegistry>,
    sink: Box<dyn EventSink>,
    cursor: Box<dyn CursorBackend>,
    dropped_reports: u64,
}

impl EventPipeline {
    pub fn new(
        state: Arc<Mutex<PipelineState>>,
        config: Arc<RwLock<EngineConfig>>,
        observers: Arc<ObserverRegistry>,
        sink: Box<dyn EventSink>,
        cursor: Box<dyn CursorBackend>,
    ) -> Self {
        Self {
            state,
            config,
            observers,
            sink,
            cursor,
            dropped_reports: 0,
        }
    }

    /// Handle one intercepted event from a grabbed device.
    pub fn process(&mut self, ev: InputEvent) {
        if matches!(ev.kind(), InputEventKind::Synchronization(_)) {
            // The sink emits its own report boundaries.
            return;
        }

        match decode::decode_evdev(&ev) {
            Some(SemanticEvent::Button { button, pressed }) => self.on_button(ev, button, pressed),
            Some(SemanticEvent::Axis {
                axis: Axis::Wheel, ..
            }) => {
                // A physical wheel stays a wheel, in or out of scroll mode.
                self.forward(ev);
            }
            Some(SemanticEvent::Axis { axis, delta }) => self.on_motion(ev, axis, delta),
            None => {
                if matches!(
                    ev.kind(),
                    InputEventKind::Key(_) | InputEventKind::RelAxis(_)
                ) {
                    // Unrecognized usage: not an error, but worth counting.
                    self.dropped_reports += 1;
                    debug!(
                        "unrecognized report type={:?} code={} value={}",
                        ev.event_type(),
                        ev.code(),
                        ev.value()
                    );
                }
                self.forward(ev);
            }
        }
    }

    fn on_button(&mut self, ev: InputEvent, button: Button, pressed: bool) {
        let now = Instant::now();
        let window = self
            .config
            .read()
            .map(|c| c.chord_window)
            .unwrap_or_else(|e| e.into_inner().chord_window);

        // Decide under the lock; emit after releasing it.
        let (outcome, releases, logical) = {
            let mut st = self.lock_state();
            let st = &mut *st;
            let outcome =
                chord::on_button(&mut st.buttons, &mut st.mode, button, pressed, now, window);

            let mut releases = Vec::new();
            if outcome.release_left && st.forwarded.is_down(Button::Left) {
                st.forwarded.set(Button::Left, false);
                releases.push(Button::Left);
            }
            if outcome.release_right && st.forwarded.is_down(Button::Right) {
                st.forwarded.set(Button::Right, false);
                releases.push(Button::Right);
            }
            if outcome.forward {
                st.forwarded.set(button, pressed);
            }
            match outcome.mode_change {
                Some(true) => st.accum.reset(now),
                Some(false) => {
                    st.accum.reset(now);
                    st.lock.deactivate();
                }
                None => {}
            }

            let logical = chord::logical_state(&st.buttons, st.mode);
            (outcome, releases, logical)
        };

        for b in releases {
            if let Err(e) = self.sink.emit_button(b, false) {
                warn!("failed to emit compensating release: {e}");
            }
        }
        if outcome.forward {
            self.forward(ev);
        }

        if outcome.mode_change == Some(true) {
            // Sample the cursor only after the critical section.
            let pinned = self.cursor.position();
            let mut st = self.lock_state();
            if st.mode.is_active() {
                st.lock.activate(pinned);
            }
        }

        let (left, right, middle) = logical;
        self.observers.broadcast(EngineEvent::ButtonState {
            left,
            right,
            middle,
        });
        if let Some(active) = outcome.mode_change {
            debug!("scroll mode {}", if active { "entered" } else { "exited" });
            self.observers
                .broadcast(EngineEvent::ScrollModeChanged { active });
        }
    }

    fn on_motion(&mut self, ev: InputEvent, axis: Axis, delta: i32) {
        let now = Instant::now();
        let config = self
            .config
            .read()
            .map(|c| *c)
            .unwrap_or_else(|e| *e.into_inner());

        let (wheel, pinned) = {
            let mut st = self.lock_state();
            if !st.mode.is_active() {
                drop(st);
                self.forward(ev);
                return;
            }
            let (dx, dy) = match axis {
                Axis::X => (f64::from(delta), 0.0),
                Axis::Y => (0.0, f64::from(delta)),
                Axis::Wheel => unreachable!("wheel reports are forwarded in process()"),
            };
            let wheel = st.accum.on_motion(dx, dy, now, &config);
            (wheel, st.lock.pinned())
        };

        if let Some(wheel) = wheel {
            if let Err(e) = self.sink.emit_wheel(wheel) {
                warn!("failed to emit wheel event: {e}");
            }
        }
        if let Some(pinned) = pinned {
            cursor::reassert(self.cursor.as_mut(), pinned);
        }
    }

    /// Tear down: release every button the virtual device still holds and
    /// force the shared state back to `Inactive`. Called by `stop()`.
    pub fn shutdown(&mut self) {
        let (was_active, releases) = {
            let mut st = self.lock_state();
            let st = &mut *st;
            let releases = st.forwarded.drain_held();
            let was_active = chord::reset(&mut st.buttons, &mut st.mode);
            st.accum.reset(Instant::now());
            st.lock.deactivate();
            (was_active, releases)
        };

        for b in releases {
            if let Err(e) = self.sink.emit_button(b, false) {
                warn!("failed to release {:?} on shutdown: {e}", b);
            }
        }
        if was_active {
            self.observers
                .broadcast(EngineEvent::ScrollModeChanged { active: false });
        }
    }

    /// Unrecognized reports seen so far (diagnostics only).
    pub fn dropped_reports(&self) -> u64 {
        self.dropped_reports
    }

    fn forward(&mut self, ev: InputEvent) {
        if let Err(e) = self.sink.forward(ev) {
            warn!("uinput emit failed: {e}");
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, PipelineState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wheel_events_hi_res_scaling() {
        let mut v = 0;
        let mut h = 0;
        // 10 units = one notch = 120 hi-res units; vertical sign flips.
        let events = wheel_events(
            WheelDelta {
                vertical: 10.0,
                horizontal: 0.0,
            },
            &mut v,
            &mut h,
        );
        // hi-res, legacy notch, sync
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].code(), RelativeAxisType::REL_WHEEL_HI_RES.0);
        assert_eq!(events[0].value(), -120);
        assert_eq!(events[1].code(), RelativeAxisType::REL_WHEEL.0);
        assert_eq!(events[1].value(), -1);
        assert_eq!(v, 0);
    }

    #[test]
    fn test_wheel_events_residue_accumulates_into_notches() {
        let mut v = 0;
        let mut h = 0;
        // 4 units = 48 hi-res units; below one notch.
        for _ in 0..2 {
            let events = wheel_events(
                WheelDelta {
                    vertical: -4.0,
                    horizontal: 0.0,
                },
                &mut v,
                &mut h,
            );
            assert_eq!(events.len(), 2); // hi-res + sync only
        }
        assert_eq!(v, 96);

        // Third emission crosses a full notch.
        let events = wheel_events(
            WheelDelta {
                vertical: -4.0,
                horizontal: 0.0,
            },
            &mut v,
            &mut h,
        );
        assert!(
            events
                .iter()
                .any(|e| e.code() == RelativeAxisType::REL_WHEEL.0 && e.value() == 1)
        );
        assert_eq!(v, 24);
    }

    #[test]
    fn test_wheel_events_horizontal_keeps_sign() {
        let mut v = 0;
        let mut h = 0;
        let events = wheel_events(
            WheelDelta {
                vertical: 0.0,
                horizontal: 20.0,
            },
            &mut v,
            &mut h,
        );
        assert_eq!(events[0].code(), RelativeAxisType::REL_HWHEEL_HI_RES.0);
        assert_eq!(events[0].value(), 240);
        assert_eq!(events[1].code(), RelativeAxisType::REL_HWHEEL.0);
        assert_eq!(events[1].value(), 2);
    }

    #[test]
    fn test_wheel_events_empty_for_negligible_delta() {
        let mut v = 0;
        let mut h = 0;
        let events = wheel_events(
            WheelDelta {
                vertical: 0.01,
                horizontal: 0.0,
            },
            &mut v,
            &mut h,
        );
        assert!(events.is_empty());
    }
}
