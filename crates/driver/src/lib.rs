//! Capability interface over the native motion-driver and camera-switcher
//! bindings. The broker only ever talks to these traits; the real protocol
//! implementations live outside this repository.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use shared::domain::{Angles, Axis};
use thiserror::Error;

mod sim;
mod switcher;

pub use sim::{SimulatedConnector, SimulatedGimbal};
pub use switcher::{CameraSwitcher, NoHardwareSwitcher, SimulatedSwitcher, SwitcherError};

/// Failure taxonomy of the native driver. Setter failures are surfaced to
/// callers verbatim; they are state errors, not retryable faults.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DriverError {
    #[error("{axis} angle below configured minimum")]
    AngleBelowMinimum { axis: Axis },
    #[error("{axis} angle above configured maximum")]
    AngleAboveMaximum { axis: Axis },
    #[error("speed below supported minimum")]
    SpeedBelowMinimum,
    #[error("speed above supported maximum")]
    SpeedAboveMaximum,
    #[error("device is not activated")]
    NotActivated,
    #[error("device is already active")]
    AlreadyActive,
    #[error("no device found")]
    NotFound,
    #[error("device unreachable")]
    Unreachable,
}

/// Per-axis mechanical limits, as reported and enforced by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GimbalConfig {
    pub pitch_min_deg: f64,
    pub pitch_max_deg: f64,
    pub roll_min_deg: f64,
    pub roll_max_deg: f64,
    pub yaw_min_deg: f64,
    pub yaw_max_deg: f64,
}

impl Default for GimbalConfig {
    fn default() -> Self {
        Self {
            pitch_min_deg: -90.0,
            pitch_max_deg: 90.0,
            roll_min_deg: -45.0,
            roll_max_deg: 45.0,
            yaw_min_deg: -180.0,
            yaw_max_deg: 180.0,
        }
    }
}

/// Speed envelope shared by every supported device, degrees/second.
pub const MAX_DRIVE_SPEED_DEG_S: f64 = 360.0;

impl GimbalConfig {
    pub fn axis_bounds(&self, axis: Axis) -> (f64, f64) {
        match axis {
            Axis::Pitch => (self.pitch_min_deg, self.pitch_max_deg),
            Axis::Roll => (self.roll_min_deg, self.roll_max_deg),
            Axis::Yaw => (self.yaw_min_deg, self.yaw_max_deg),
        }
    }

    /// Angle-range validation exactly as the native driver performs it: the
    /// first violating axis is reported, minimum checked before maximum.
    pub fn validate_position(&self, target: Angles) -> Result<(), DriverError> {
        for axis in shared::domain::ALL_AXES {
            let (min, max) = self.axis_bounds(axis);
            let value = target.axis(axis);
            if value < min {
                return Err(DriverError::AngleBelowMinimum { axis });
            }
            if value > max {
                return Err(DriverError::AngleAboveMaximum { axis });
            }
        }
        Ok(())
    }

    pub fn validate_speed(&self, speed: Angles) -> Result<(), DriverError> {
        for axis in shared::domain::ALL_AXES {
            let value = speed.axis(axis);
            if value < -MAX_DRIVE_SPEED_DEG_S {
                return Err(DriverError::SpeedBelowMinimum);
            }
            if value > MAX_DRIVE_SPEED_DEG_S {
                return Err(DriverError::SpeedAboveMaximum);
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverInfo {
    pub name: String,
    pub address: String,
    pub version: String,
}

/// One activated gimbal behind the native binding.
#[async_trait]
pub trait GimbalDriver: Send + Sync {
    async fn activate(&self) -> Result<(), DriverError>;
    async fn release(&self);
    async fn position(&self) -> Result<Angles, DriverError>;
    async fn set_position(&self, target: Angles) -> Result<(), DriverError>;
    async fn set_speed(&self, speed: Angles) -> Result<(), DriverError>;
    async fn stop(&self) -> Result<(), DriverError>;
    async fn config(&self) -> Result<GimbalConfig, DriverError>;
    async fn set_config(&self, config: GimbalConfig) -> Result<(), DriverError>;
    async fn info(&self) -> Result<DriverInfo, DriverError>;
    async fn set_focus(&self, pct: f64) -> Result<(), DriverError>;
    async fn toggle_tracking(&self) -> Result<(), DriverError>;
}

/// Detects and opens drivers for devices on the network. Implementations are
/// expected to block on I/O; callers run them off the tick path.
#[async_trait]
pub trait GimbalConnector: Send + Sync {
    /// Number of devices the native binding can currently see.
    async fn detect(&self) -> Result<usize, DriverError>;
    async fn connect(&self, address: &str) -> Result<Arc<dyn GimbalDriver>, DriverError>;
}

/// Connector used when no native library is present: every attempt fails
/// gracefully and the device stays disconnected until re-triggered.
pub struct NoHardwareConnector;

#[async_trait]
impl GimbalConnector for NoHardwareConnector {
    async fn detect(&self) -> Result<usize, DriverError> {
        Ok(0)
    }

    async fn connect(&self, _address: &str) -> Result<Arc<dyn GimbalDriver>, DriverError> {
        Err(DriverError::Unreachable)
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
