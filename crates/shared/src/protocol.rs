use serde::{Deserialize, Serialize};

use crate::{
    domain::{
        Angles, CameraPortMapping, DeviceId, DeviceStatus, DeviceSummary, PresetSummary,
        SessionId, TelemetrySnapshot,
    },
    error::ApiError,
};

/// Intents a client may send over the WebSocket. Speed axes arrive normalized
/// to [-1, 1] and are scaled to degrees/second server-side.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ClientCommand {
    SelectDevice {
        device_id: DeviceId,
    },
    SetSpeed {
        #[serde(default)]
        pitch: f64,
        #[serde(default)]
        roll: f64,
        #[serde(default)]
        yaw: f64,
    },
    Stop,
    GoHome,
    SetHome,
    SetSpeedMultiplier {
        value: f64,
    },
    ToggleTracking {
        enabled: bool,
    },
    ToggleSpeedBoost {
        enabled: bool,
    },
    Rename {
        name: String,
    },
    SetZoom {
        value: f64,
    },
    SetFocus {
        value: f64,
    },
    CalibrateFocus,
    AddDevice {
        name: String,
        address: String,
    },
    RemoveDevice {
        device_id: DeviceId,
    },
    UpdateDevice {
        device_id: DeviceId,
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        address: Option<String>,
    },
    ConnectDevice {
        device_id: DeviceId,
    },
    SavePreset {
        slot: u8,
    },
    RecallPreset {
        slot: u8,
    },
    DeletePreset {
        slot: u8,
    },
    SetCameraPort {
        device_id: DeviceId,
        port: u8,
    },
    ListCameraPorts,
    SwitcherConnect {
        address: String,
    },
    SwitcherDisconnect,
    CameraFocus {
        port: u8,
        value: f64,
    },
    CameraAutoFocus {
        port: u8,
    },
    CameraAperture {
        port: u8,
        value: f64,
    },
    CameraAutoAperture {
        port: u8,
    },
    CameraGain {
        port: u8,
        value: f64,
    },
    CameraZoomSpeed {
        port: u8,
        value: f64,
    },
    CameraZoomPosition {
        port: u8,
        value: f64,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerEvent {
    DeviceList {
        devices: Vec<DeviceSummary>,
    },
    DeviceSelected {
        device_id: DeviceId,
    },
    Identity {
        name: String,
        session_id: SessionId,
    },
    Position {
        position: Angles,
    },
    Status {
        status: DeviceStatus,
    },
    Telemetry {
        telemetry: TelemetrySnapshot,
    },
    DeviceAdded {
        device: DeviceSummary,
    },
    DeviceRemoved {
        device_id: DeviceId,
    },
    PresetList {
        device_id: DeviceId,
        presets: Vec<PresetSummary>,
    },
    CameraPorts {
        ports: Vec<CameraPortMapping>,
    },
    SwitcherStatus {
        connected: bool,
    },
    Error(ApiError),
}

#[cfg(test)]
#[path = "tests/protocol_tests.rs"]
mod tests;
