//! Raw-value decoding.
//!
//! [`decode`] is a pure function from a (usage page, usage, value) triple to
//! a semantic event; the evdev adapter below turns kernel input events into
//! those triples. Reports neither recognizes are not errors; they stay in
//! the raw stream and the suppression layer forwards them verbatim.

use evdev::{InputEvent, InputEventKind, Key, RelativeAxisType};

use crate::events::{Axis, Button, SemanticEvent};
use crate::hid::{self, RawReport, generic_desktop};

/// Decode one raw HID value. Returns `None` for usages the pipeline has no
/// semantics for.
pub fn decode(usage_page: u16, usage: u16, value: i32) -> Option<SemanticEvent> {
    match usage_page {
        hid::PAGE_BUTTON => {
            let button = match usage {
                1 => Button::Left,
                2 => Button::Right,
                3 => Button::Middle,
                _ => return None,
            };
            Some(SemanticEvent::Button {
                button,
                pressed: value != 0,
            })
        }
        hid::PAGE_GENERIC_DESKTOP => {
            let axis = match usage {
                generic_desktop::X => Axis::X,
                generic_desktop::Y => Axis::Y,
                generic_desktop::WHEEL => Axis::Wheel,
                _ => return None,
            };
            Some(SemanticEvent::Axis { axis, delta: value })
        }
        _ => None,
    }
}

/// Map an evdev event onto the HID usage triple it corresponds to, so the
/// same decoder core serves both report-level and evdev-level input.
pub fn raw_from_evdev(ev: &InputEvent) -> Option<RawReport> {
    match ev.kind() {
        InputEventKind::Key(key) => {
            let usage = match key {
                Key::BTN_LEFT => 1,
                Key::BTN_RIGHT => 2,
                Key::BTN_MIDDLE => 3,
                _ => return None,
            };
            Some(RawReport::new(hid::PAGE_BUTTON, usage, ev.value()))
        }
        InputEventKind::RelAxis(axis) => {
            let usage = match axis {
                RelativeAxisType::REL_X => generic_desktop::X,
                RelativeAxisType::REL_Y => generic_desktop::Y,
                RelativeAxisType::REL_WHEEL => generic_desktop::WHEEL,
                _ => return None,
            };
            Some(RawReport::new(
                hid::PAGE_GENERIC_DESKTOP,
                usage,
                ev.value(),
            ))
        }
        _ => None,
    }
}

/// Convenience: decode an evdev event in one step.
pub fn decode_evdev(ev: &InputEvent) -> Option<SemanticEvent> {
    raw_from_evdev(ev).and_then(|raw| decode(raw.usage_page, raw.usage, raw.value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use evdev::EventType;

    #[test]
    fn test_button_usages_decode() {
        assert_eq!(
            decode(hid::PAGE_BUTTON, 1, 1),
            Some(SemanticEvent::Button {
                button: Button::Left,
                pressed: true
            })
        );
        assert_eq!(
            decode(hid::PAGE_BUTTON, 2, 0),
            Some(SemanticEvent::Button {
                button: Button::Right,
                pressed: false
            })
        );
        assert_eq!(
            decode(hid::PAGE_BUTTON, 3, 1),
            Some(SemanticEvent::Button {
                button: Button::Middle,
                pressed: true
            })
        );
    }

    #[test]
    fn test_nonzero_value_means_pressed() {
        // Some devices report press values other than 1.
        assert_eq!(
            decode(hid::PAGE_BUTTON, 1, 2),
            Some(SemanticEvent::Button {
                button: Button::Left,
                pressed: true
            })
        );
    }

    #[test]
    fn test_axis_usages_decode() {
        assert_eq!(
            decode(hid::PAGE_GENERIC_DESKTOP, generic_desktop::X, -7),
            Some(SemanticEvent::Axis {
                axis: Axis::X,
                delta: -7
            })
        );
        assert_eq!(
            decode(hid::PAGE_GENERIC_DESKTOP, generic_desktop::Y, 3),
            Some(SemanticEvent::Axis {
                axis: Axis::Y,
                delta: 3
            })
        );
        assert_eq!(
            decode(hid::PAGE_GENERIC_DESKTOP, generic_desktop::WHEEL, 1),
            Some(SemanticEvent::Axis {
                axis: Axis::Wheel,
                delta: 1
            })
        );
    }

    #[test]
    fn test_unrecognized_usages_are_dropped() {
        assert_eq!(decode(hid::PAGE_BUTTON, 4, 1), None);
        assert_eq!(decode(hid::PAGE_GENERIC_DESKTOP, 0x39, 1), None);
        assert_eq!(decode(0x0C, 0xE9, 1), None); // consumer page
    }

    #[test]
    fn test_evdev_adapter() {
        let left = InputEvent::new(EventType::KEY, Key::BTN_LEFT.0, 1);
        assert_eq!(
            decode_evdev(&left),
            Some(SemanticEvent::Button {
                button: Button::Left,
                pressed: true
            })
        );

        let rel_x = InputEvent::new(EventType::RELATIVE, RelativeAxisType::REL_X.0, 5);
        assert_eq!(
            decode_evdev(&rel_x),
            Some(SemanticEvent::Axis {
                axis: Axis::X,
                delta: 5
            })
        );

        // Side buttons are not part of the semantic model.
        let side = InputEvent::new(EventType::KEY, Key::BTN_SIDE.0, 1);
        assert_eq!(decode_evdev(&side), None);

        let sync = InputEvent::new(EventType::SYNCHRONIZATION, 0, 0);
        assert_eq!(decode_evdev(&sync), None);
    }
}
