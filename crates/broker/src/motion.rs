//! Per-device kinematics: velocity integration, homing/preset interpolation,
//! and the mechanical envelope applied after every update.

use serde::Serialize;
use shared::domain::{Angles, Axis, ALL_AXES};

/// Nominal seconds per motion tick (20 Hz loop).
pub const TICK_SECONDS: f64 = 0.05;

/// Interpolation speed at multiplier 1.0, degrees/second.
pub const BASE_HOMING_SPEED_DEG_S: f64 = 60.0;

/// An animating axis counts as arrived within this many degrees of target.
pub const ARRIVAL_TOLERANCE_DEG: f64 = 0.1;

pub const SPEED_BOOST_FACTOR: f64 = 2.0;

pub const MIN_SPEED_MULTIPLIER: f64 = 0.1;
pub const MAX_SPEED_MULTIPLIER: f64 = 2.0;

pub const PITCH_LIMIT_DEG: f64 = 90.0;
pub const ROLL_LIMIT_DEG: f64 = 45.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct KinematicState {
    pub position: Angles,
    pub speed: Angles,
    pub home: Angles,
    pub tracking: bool,
    pub speed_boost: bool,
    pub zoom: f64,
    pub focus: f64,
    pub connected: bool,
}

impl Default for KinematicState {
    fn default() -> Self {
        Self {
            position: Angles::ZERO,
            speed: Angles::ZERO,
            home: Angles::ZERO,
            tracking: false,
            speed_boost: false,
            zoom: 50.0,
            focus: 50.0,
            connected: false,
        }
    }
}

/// In-flight home/preset recall. Cleared by the tick that finds every axis
/// within tolerance.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Animation {
    pub active: bool,
    pub target: Angles,
}

impl Animation {
    pub fn start(target: Angles) -> Self {
        Self {
            active: true,
            target,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionPhase {
    Idle,
    SpeedDriven,
    Animating,
}

pub fn phase(state: &KinematicState, animation: &Animation) -> MotionPhase {
    if animation.active {
        MotionPhase::Animating
    } else if !state.speed.is_zero() {
        MotionPhase::SpeedDriven
    } else {
        MotionPhase::Idle
    }
}

/// Normalize a yaw angle into (-180, 180]. The pan axis is circular; every
/// stored yaw goes through this after mutation.
pub fn normalize_yaw(deg: f64) -> f64 {
    let wrapped = ((deg % 360.0) + 540.0) % 360.0 - 180.0;
    if wrapped == -180.0 {
        180.0
    } else {
        wrapped
    }
}

/// Shortest signed rotation taking `diff` degrees across the wrap boundary.
pub fn shortest_yaw_diff(mut diff: f64) -> f64 {
    while diff > 180.0 {
        diff -= 360.0;
    }
    while diff < -180.0 {
        diff += 360.0;
    }
    diff
}

/// Advance a simulated device by `dt` seconds. An active animation overrides
/// speed-driven motion; the multiplier is the caller's current value, read
/// fresh so live changes steer in-flight interpolation.
pub fn tick(state: &mut KinematicState, animation: &mut Animation, multiplier: f64, dt: f64) {
    if animation.active {
        let rate = BASE_HOMING_SPEED_DEG_S * multiplier * dt;
        let mut all_reached = true;

        for axis in ALL_AXES {
            let current = state.position.axis(axis);
            let target = animation.target.axis(axis);
            let mut diff = target - current;
            if axis == Axis::Yaw {
                diff = shortest_yaw_diff(diff);
            }

            if diff.abs() > ARRIVAL_TOLERANCE_DEG {
                all_reached = false;
                let slot = state.position.axis_mut(axis);
                if diff.abs() <= rate {
                    // Yaw snaps by adding the normalized diff so the final
                    // step never jumps the long way around the wrap point.
                    *slot = if axis == Axis::Yaw { current + diff } else { target };
                } else {
                    *slot += if diff > 0.0 { rate } else { -rate };
                }
            }
        }

        if all_reached {
            animation.active = false;
        }
    } else {
        let boost = if state.speed_boost {
            SPEED_BOOST_FACTOR
        } else {
            1.0
        };
        state.position.pitch += state.speed.pitch * dt * boost;
        state.position.roll += state.speed.roll * dt * boost;
        state.position.yaw += state.speed.yaw * dt * boost;
    }

    clamp_mechanical(&mut state.position);
}

fn clamp_mechanical(position: &mut Angles) {
    position.pitch = position.pitch.clamp(-PITCH_LIMIT_DEG, PITCH_LIMIT_DEG);
    position.roll = position.roll.clamp(-ROLL_LIMIT_DEG, ROLL_LIMIT_DEG);
    position.yaw = normalize_yaw(position.yaw);
}

#[cfg(test)]
#[path = "tests/motion_tests.rs"]
mod tests;
