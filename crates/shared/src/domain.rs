use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

id_newtype!(DeviceId);
id_newtype!(SessionId);

impl DeviceId {
    /// Id of the always-present mirror device.
    pub fn virtual_device() -> Self {
        Self("device-virtual".to_string())
    }

    /// Deterministic id for a real device, derived from its network address.
    pub fn for_address(address: &str) -> Self {
        Self(format!("device-{}", address.replace('.', "-").replace(':', "-")))
    }

    pub fn is_virtual(&self) -> bool {
        self.0 == "device-virtual"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Axis {
    Pitch,
    Roll,
    Yaw,
}

impl std::fmt::Display for Axis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Axis::Pitch => f.write_str("pitch"),
            Axis::Roll => f.write_str("roll"),
            Axis::Yaw => f.write_str("yaw"),
        }
    }
}

/// One value per gimbal axis, in degrees (positions) or degrees/second (speeds).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Angles {
    pub pitch: f64,
    pub roll: f64,
    pub yaw: f64,
}

impl Angles {
    pub const ZERO: Angles = Angles {
        pitch: 0.0,
        roll: 0.0,
        yaw: 0.0,
    };

    pub fn new(pitch: f64, roll: f64, yaw: f64) -> Self {
        Self { pitch, roll, yaw }
    }

    pub fn axis(&self, axis: Axis) -> f64 {
        match axis {
            Axis::Pitch => self.pitch,
            Axis::Roll => self.roll,
            Axis::Yaw => self.yaw,
        }
    }

    pub fn axis_mut(&mut self, axis: Axis) -> &mut f64 {
        match axis {
            Axis::Pitch => &mut self.pitch,
            Axis::Roll => &mut self.roll,
            Axis::Yaw => &mut self.yaw,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.pitch == 0.0 && self.roll == 0.0 && self.yaw == 0.0
    }
}

pub const ALL_AXES: [Axis; 3] = [Axis::Pitch, Axis::Roll, Axis::Yaw];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    Virtual,
    Real,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSummary {
    pub id: DeviceId,
    pub name: String,
    pub model: String,
    pub kind: DeviceKind,
    pub connected: bool,
    pub connecting: bool,
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controlled_by: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceStatus {
    pub connected: bool,
    pub tracking: bool,
    pub speed_boost: bool,
    pub mode: DeviceKind,
}

/// 2 Hz snapshot. Temperature and battery are reported only while a real
/// device is active; in virtual mode the fields are absent, never fabricated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    pub timestamp_ms: i64,
    pub position: Angles,
    pub speed: Angles,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature_c: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub battery_pct: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PresetSummary {
    pub slot: u8,
    pub position: Angles,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraPortMapping {
    pub device_id: DeviceId,
    pub port: u8,
}

#[cfg(test)]
#[path = "tests/domain_tests.rs"]
mod tests;
