//! Accumulate-then-threshold conversion of relative motion into wheel
//! deltas.
//!
//! Raw samples from a pointing surface are small and frequent; emitting a
//! wheel tick per sample gives jittery, low-resolution scrolling. Motion is
//! therefore accumulated (with speed-proportional acceleration) until it
//! crosses a perceptible step, then flushed as one wheel event.

use std::time::{Duration, Instant};

use crate::config::EngineConfig;

/// Accumulated motion below the emission threshold, in input units.
const MIN_MOVEMENT_THRESHOLD: f64 = 1.0;
/// Per-tick cap on each axis, to bound a single wheel step.
const MAX_STEP: f64 = 32.0;
/// Elapsed-time cap so scheduling jitter cannot spike the acceleration
/// factor.
const MAX_ELAPSED: Duration = Duration::from_millis(100);

/// One synthesized wheel event, in the same units the accumulator runs in.
/// Positive `vertical` means motion toward the user (down on the pad).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WheelDelta {
    pub vertical: f64,
    pub horizontal: f64,
}

/// Running sub-threshold motion. Reset whenever a wheel event is emitted
/// and whenever scroll mode exits.
#[derive(Debug, Clone, Copy)]
pub struct ScrollAccumulator {
    accum_x: f64,
    accum_y: f64,
    last_event_time: Instant,
}

impl ScrollAccumulator {
    pub fn new(now: Instant) -> Self {
        Self {
            accum_x: 0.0,
            accum_y: 0.0,
            last_event_time: now,
        }
    }

    /// Zero the accumulators and restart the acceleration clock.
    pub fn reset(&mut self, now: Instant) {
        self.accum_x = 0.0;
        self.accum_y = 0.0;
        self.last_event_time = now;
    }

    /// Feed one motion sample. Returns a wheel delta exactly when the
    /// accumulated motion crosses the threshold on either axis.
    pub fn on_motion(
        &mut self,
        dx: f64,
        dy: f64,
        now: Instant,
        config: &EngineConfig,
    ) -> Option<WheelDelta> {
        let elapsed = now
            .saturating_duration_since(self.last_event_time)
            .min(MAX_ELAPSED)
            .as_secs_f64();

        let factor = if config.scroll_acceleration > 0.0 {
            let speed = (dx * dx + dy * dy).sqrt();
            speed * config.scroll_acceleration * elapsed
        } else {
            1.0
        };

        self.accum_x += dx * config.scroll_speed_multiplier * factor;
        self.accum_y += dy * config.scroll_speed_multiplier * factor;

        if self.accum_x.abs() < MIN_MOVEMENT_THRESHOLD
            && self.accum_y.abs() < MIN_MOVEMENT_THRESHOLD
        {
            return None;
        }

        let mut horizontal = self.accum_x.clamp(-MAX_STEP, MAX_STEP);
        let mut vertical = self.accum_y.clamp(-MAX_STEP, MAX_STEP);

        if config.invert_x {
            horizontal = -horizontal;
        }
        if config.invert_y {
            vertical = -vertical;
        }
        if config.natural_scrolling {
            vertical = -vertical;
        }

        self.accum_x = 0.0;
        self.accum_y = 0.0;
        self.last_event_time = now;

        Some(WheelDelta {
            vertical,
            horizontal,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linear_config() -> EngineConfig {
        EngineConfig {
            scroll_speed_multiplier: 1.0,
            scroll_acceleration: 0.0,
            natural_scrolling: false,
            invert_x: false,
            invert_y: false,
            ..EngineConfig::default()
        }
    }

    #[test]
    fn test_no_emission_below_threshold() {
        let base = Instant::now();
        let mut accum = ScrollAccumulator::new(base);
        let config = EngineConfig {
            scroll_speed_multiplier: 0.25,
            ..linear_config()
        };

        // 0.25 units per sample: three samples stay below 1.0.
        for i in 1..4 {
            let out = accum.on_motion(1.0, 0.0, base + Duration::from_millis(i), &config);
            assert_eq!(out, None, "sample {i} must not emit");
        }
        let out = accum.on_motion(1.0, 0.0, base + Duration::from_millis(4), &config);
        assert!(out.is_some(), "fourth sample crosses the threshold");
    }

    #[test]
    fn test_exactly_one_emission_at_crossing_then_reset() {
        let base = Instant::now();
        let mut accum = ScrollAccumulator::new(base);
        let config = linear_config();

        let out = accum
            .on_motion(5.0, 0.0, base + Duration::from_millis(1), &config)
            .expect("5 units crosses threshold");
        assert_eq!(out.horizontal, 5.0);
        assert_eq!(out.vertical, 0.0);

        // Accumulators were zeroed: a tiny follow-up sample emits nothing.
        let out = accum.on_motion(0.2, 0.0, base + Duration::from_millis(2), &config);
        assert_eq!(out, None);
    }

    #[test]
    fn test_per_tick_clamp() {
        let base = Instant::now();
        let mut accum = ScrollAccumulator::new(base);
        let config = linear_config();

        let out = accum
            .on_motion(1000.0, -1000.0, base + Duration::from_millis(1), &config)
            .unwrap();
        assert_eq!(out.horizontal, MAX_STEP);
        assert_eq!(out.vertical, -MAX_STEP);
    }

    #[test]
    fn test_invert_twice_round_trips() {
        let base = Instant::now();
        let plain = linear_config();
        let mut inverted = plain;
        inverted.invert_x = true;
        inverted.invert_y = true;

        let mut a = ScrollAccumulator::new(base);
        let mut b = ScrollAccumulator::new(base);
        let at = base + Duration::from_millis(1);

        let plain_out = a.on_motion(3.0, 4.0, at, &plain).unwrap();
        let inverted_out = b.on_motion(3.0, 4.0, at, &inverted).unwrap();
        assert_eq!(plain_out.horizontal, -inverted_out.horizontal);
        assert_eq!(plain_out.vertical, -inverted_out.vertical);

        // Toggling twice lands back on the plain output.
        let mut c = ScrollAccumulator::new(base);
        let again = c.on_motion(3.0, 4.0, at, &plain).unwrap();
        assert_eq!(plain_out, again);
    }

    #[test]
    fn test_natural_scrolling_flips_vertical_only() {
        let base = Instant::now();
        let mut natural = linear_config();
        natural.natural_scrolling = true;

        let mut a = ScrollAccumulator::new(base);
        let mut b = ScrollAccumulator::new(base);
        let at = base + Duration::from_millis(1);

        let plain_out = a.on_motion(3.0, 4.0, at, &linear_config()).unwrap();
        let natural_out = b.on_motion(3.0, 4.0, at, &natural).unwrap();
        assert_eq!(plain_out.horizontal, natural_out.horizontal);
        assert_eq!(plain_out.vertical, -natural_out.vertical);
    }

    #[test]
    fn test_invert_y_composes_with_natural_scrolling() {
        // invert_y and natural_scrolling both flip the vertical sign, so
        // together they cancel.
        let base = Instant::now();
        let mut both = linear_config();
        both.invert_y = true;
        both.natural_scrolling = true;

        let mut a = ScrollAccumulator::new(base);
        let mut b = ScrollAccumulator::new(base);
        let at = base + Duration::from_millis(1);

        let plain_out = a.on_motion(0.0, 4.0, at, &linear_config()).unwrap();
        let both_out = b.on_motion(0.0, 4.0, at, &both).unwrap();
        assert_eq!(plain_out, both_out);
    }

    #[test]
    fn test_zero_acceleration_is_linear_passthrough() {
        let base = Instant::now();
        let mut accum = ScrollAccumulator::new(base);
        let config = linear_config();

        // With acceleration off the factor is 1.0 regardless of elapsed
        // time, so 2 units accumulate as exactly 2 units.
        let out = accum
            .on_motion(2.0, 0.0, base + Duration::from_secs(5), &config)
            .unwrap();
        assert_eq!(out.horizontal, 2.0);
    }

    #[test]
    fn test_acceleration_scales_with_elapsed_and_speed() {
        let base = Instant::now();
        let config = EngineConfig {
            scroll_acceleration: 1.0,
            ..linear_config()
        };

        // factor = speed * accel * elapsed; 50 ms elapsed, speed 10.
        let mut accum = ScrollAccumulator::new(base);
        let out = accum
            .on_motion(10.0, 0.0, base + Duration::from_millis(50), &config)
            .unwrap();
        assert!((out.horizontal - 10.0 * 10.0 * 0.05).abs() < 1e-9);
    }

    #[test]
    fn test_elapsed_is_clamped() {
        let base = Instant::now();
        let config = EngineConfig {
            scroll_acceleration: 1.0,
            ..linear_config()
        };

        // Ten seconds of idle must accelerate no more than 100 ms worth.
        let mut long_idle = ScrollAccumulator::new(base);
        let mut short_idle = ScrollAccumulator::new(base);
        let long_out = long_idle
            .on_motion(10.0, 0.0, base + Duration::from_secs(10), &config)
            .unwrap();
        let short_out = short_idle
            .on_motion(10.0, 0.0, base + Duration::from_millis(100), &config)
            .unwrap();
        assert_eq!(long_out, short_out);
    }

    #[test]
    fn test_reset_clears_accumulation() {
        let base = Instant::now();
        let mut accum = ScrollAccumulator::new(base);
        let config = EngineConfig {
            scroll_speed_multiplier: 0.3,
            ..linear_config()
        };

        accum.on_motion(1.0, 1.0, base + Duration::from_millis(1), &config);
        accum.reset(base + Duration::from_millis(2));

        // Post-reset the partial accumulation is gone.
        let out = accum.on_motion(1.0, 1.0, base + Duration::from_millis(3), &config);
        assert_eq!(out, None);
    }
}
