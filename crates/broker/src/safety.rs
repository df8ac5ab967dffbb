//! Speed-input sanitization. Bad input is corrected, never rejected: a
//! joystick glitch must not fault the control path.

use driver::MAX_DRIVE_SPEED_DEG_S;
use shared::domain::Angles;
use tracing::warn;

/// Largest accepted change per control tick, degrees/second. Requests beyond
/// this step toward the target instead of jumping.
pub const MAX_SPEED_STEP_DEG_S: f64 = 200.0;

/// Per-device slew state. The previously accepted value per axis carries
/// across calls; an emergency stop resets it.
#[derive(Debug, Clone, Copy, Default)]
pub struct SlewLimiter {
    prev: Angles,
}

impl SlewLimiter {
    pub fn sanitize(&mut self, requested: Angles) -> Angles {
        let accepted = Angles {
            pitch: sanitize_axis(self.prev.pitch, requested.pitch),
            roll: sanitize_axis(self.prev.roll, requested.roll),
            yaw: sanitize_axis(self.prev.yaw, requested.yaw),
        };
        self.prev = accepted;
        accepted
    }

    pub fn reset(&mut self) {
        self.prev = Angles::ZERO;
    }
}

fn sanitize_axis(prev: f64, raw: f64) -> f64 {
    if !raw.is_finite() {
        // Safety fallback, not a failure: the axis zeroes immediately and
        // the slew carry-over restarts from rest.
        warn!(value = %raw, "non-finite speed input, substituting 0");
        return 0.0;
    }
    let validated = raw.clamp(-MAX_DRIVE_SPEED_DEG_S, MAX_DRIVE_SPEED_DEG_S);

    let diff = validated - prev;
    if diff.abs() > MAX_SPEED_STEP_DEG_S {
        prev + MAX_SPEED_STEP_DEG_S * diff.signum()
    } else {
        validated
    }
}

#[cfg(test)]
#[path = "tests/safety_tests.rs"]
mod tests;
