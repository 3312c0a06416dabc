//! Button state machine: decides when the left+right chord or the physical
//! middle button enters and leaves scroll mode.
//!
//! The functions here are pure state transitions. The caller (the event
//! pipeline) holds the shared-state lock while calling them and performs
//! every side effect (cursor queries, downstream emission, observer
//! notification) after the lock is released.

use std::time::{Duration, Instant};

use crate::events::Button;

/// Scroll-mode tri-state. A single enum so the chord-emulated and
/// physical-middle variants can never be active at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScrollMode {
    #[default]
    Inactive,
    ChordEmulated,
    PhysicalActive,
}

impl ScrollMode {
    pub fn is_active(self) -> bool {
        self != ScrollMode::Inactive
    }
}

/// Raw button tracking. `left_down_at`/`right_down_at` are set on the
/// transition to pressed and are meaningless once the button releases;
/// both are cleared whenever the mode returns to `Inactive`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ButtonState {
    pub left_down: bool,
    pub right_down: bool,
    pub middle_down: bool,
    pub left_down_at: Option<Instant>,
    pub right_down_at: Option<Instant>,
}

/// What the suppression layer must do with a button event after the state
/// machine has seen it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ButtonOutcome {
    /// Deliver the event downstream as an ordinary click.
    pub forward: bool,
    /// Synthesize a left-button release downstream. Set on chord entry when
    /// the left press had already been forwarded.
    pub release_left: bool,
    /// Same for the right button.
    pub release_right: bool,
    /// `Some(true)` when scroll mode was entered, `Some(false)` on exit.
    pub mode_change: Option<bool>,
}

/// Apply one button event. `now` is the event timestamp; `window` the
/// configured chord window (boundary inclusive).
pub fn on_button(
    buttons: &mut ButtonState,
    mode: &mut ScrollMode,
    button: Button,
    pressed: bool,
    now: Instant,
    window: Duration,
) -> ButtonOutcome {
    let mut outcome = ButtonOutcome::default();

    match *mode {
        ScrollMode::Inactive => match button {
            Button::Middle => {
                buttons.middle_down = pressed;
                if pressed {
                    *mode = ScrollMode::PhysicalActive;
                    outcome.mode_change = Some(true);
                } else {
                    // Release with no matching press: clamp to up and let
                    // it through.
                    outcome.forward = true;
                }
            }
            Button::Left => {
                if pressed && !buttons.left_down {
                    buttons.left_down = true;
                    buttons.left_down_at = Some(now);
                    if chord_satisfied(buttons.right_down, buttons.right_down_at, now, window) {
                        *mode = ScrollMode::ChordEmulated;
                        outcome.mode_change = Some(true);
                        // The right press already went downstream.
                        outcome.release_right = true;
                    } else {
                        outcome.forward = true;
                    }
                } else {
                    buttons.left_down = pressed;
                    outcome.forward = true;
                }
            }
            Button::Right => {
                if pressed && !buttons.right_down {
                    buttons.right_down = true;
                    buttons.right_down_at = Some(now);
                    if chord_satisfied(buttons.left_down, buttons.left_down_at, now, window) {
                        *mode = ScrollMode::ChordEmulated;
                        outcome.mode_change = Some(true);
                        outcome.release_left = true;
                    } else {
                        outcome.forward = true;
                    }
                } else {
                    buttons.right_down = pressed;
                    outcome.forward = true;
                }
            }
        },
        ScrollMode::ChordEmulated => {
            match button {
                Button::Left => buttons.left_down = pressed,
                Button::Right => buttons.right_down = pressed,
                Button::Middle => buttons.middle_down = pressed,
            }
            if !buttons.left_down && !buttons.right_down {
                enter_inactive(buttons, mode);
                outcome.mode_change = Some(false);
            }
            // Everything else stays consumed while the chord holds.
        }
        ScrollMode::PhysicalActive => {
            match button {
                Button::Middle => {
                    buttons.middle_down = pressed;
                    if !pressed {
                        enter_inactive(buttons, mode);
                        outcome.mode_change = Some(false);
                    }
                }
                Button::Left => {
                    buttons.left_down = pressed;
                    buttons.left_down_at = pressed.then_some(now);
                }
                Button::Right => {
                    buttons.right_down = pressed;
                    buttons.right_down_at = pressed.then_some(now);
                }
            }
            // All button events are suppressed while the physical middle
            // button drives the mode.
        }
    }

    outcome
}

fn chord_satisfied(
    other_down: bool,
    other_down_at: Option<Instant>,
    now: Instant,
    window: Duration,
) -> bool {
    other_down
        && other_down_at
            .map(|at| now.saturating_duration_since(at) <= window)
            .unwrap_or(false)
}

/// Return to `Inactive`: press timestamps become meaningless and are
/// cleared so a still-held button cannot seed a later chord.
fn enter_inactive(buttons: &mut ButtonState, mode: &mut ScrollMode) {
    *mode = ScrollMode::Inactive;
    buttons.left_down_at = None;
    buttons.right_down_at = None;
}

/// Force everything back to the resting state. Returns true when scroll
/// mode was active. Used by `stop()`.
pub fn reset(buttons: &mut ButtonState, mode: &mut ScrollMode) -> bool {
    let was_active = mode.is_active();
    *buttons = ButtonState::default();
    *mode = ScrollMode::Inactive;
    was_active
}

/// Post-emulation logical button state reported to observers: while scroll
/// mode is active the physical buttons driving it are absorbed into a
/// logical middle press.
pub fn logical_state(buttons: &ButtonState, mode: ScrollMode) -> (bool, bool, bool) {
    if mode.is_active() {
        (false, false, true)
    } else {
        (buttons.left_down, buttons.right_down, buttons.middle_down)
    }
}
