//! Device-ownership arbitration and the real-time motion/safety loop.
//!
//! All mutable state lives in one lifecycle-scoped [`Broker`]: client intents
//! and the fixed-rate tick serialize on its lock, so the 20 Hz loop always
//! reads a consistent registry/ownership/kinematics snapshot. The native
//! gimbal driver and the camera switcher stay behind the capability traits in
//! the `driver` crate; connection attempts run in spawned tasks so slow
//! hardware never stalls the loop.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use driver::{
    CameraSwitcher, DriverError, GimbalConnector, GimbalDriver, SwitcherError,
};
use shared::{
    domain::{
        Angles, DeviceId, DeviceKind, DeviceStatus, SessionId, TelemetrySnapshot,
    },
    error::{ApiError, ErrorCode},
    protocol::{ClientCommand, ServerEvent},
};
use storage::{CameraPortMap, Storage};
use thiserror::Error;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, warn};

pub mod arbiter;
pub mod camera;
pub mod motion;
pub mod presets;
pub mod registry;
pub mod safety;
pub mod session;

use arbiter::ControlArbiter;
use motion::{Animation, KinematicState};
use presets::PresetStore;
use registry::DeviceRegistry;
use session::SessionManager;

/// Client speed inputs are normalized to [-1, 1]; the wire contract scales
/// them to degrees/second here.
pub const SPEED_INPUT_SCALE: f64 = 30.0;

pub const MOTION_TICK_INTERVAL: Duration = Duration::from_millis(50);
pub const TELEMETRY_INTERVAL: Duration = Duration::from_millis(500);

/// Fixed readings reported while a real device is active; the driver
/// contract exposes no telemetry call of its own.
const REAL_DEVICE_TEMPERATURE_C: f64 = 35.0;
const REAL_DEVICE_BATTERY_PCT: f64 = 85.0;

/// Camera-switcher operations, dispatched through one table.
#[derive(Debug, Clone, Copy)]
enum SwitcherCall {
    Focus(f64),
    AutoFocus,
    Aperture(f64),
    AutoAperture,
    Gain(f64),
    ZoomSpeed(f64),
    ZoomPosition(f64),
}

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("a device with address '{0}' already exists")]
    DuplicateAddress(String),
    #[error("device '{0}' not found")]
    NotFound(DeviceId),
    #[error("the virtual device cannot be modified")]
    ProtectedDevice,
    #[error("invalid address '{0}'")]
    InvalidAddress(String),
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Driver(#[from] DriverError),
    #[error(transparent)]
    Switcher(#[from] SwitcherError),
}

impl BrokerError {
    pub fn to_api(&self) -> ApiError {
        let code = match self {
            BrokerError::DuplicateAddress(_) => ErrorCode::DuplicateAddress,
            BrokerError::NotFound(_) => ErrorCode::NotFound,
            BrokerError::ProtectedDevice => ErrorCode::ProtectedDevice,
            BrokerError::InvalidAddress(_) | BrokerError::Validation(_) => ErrorCode::Validation,
            BrokerError::Driver(DriverError::Unreachable | DriverError::NotFound) => {
                ErrorCode::HardwareUnavailable
            }
            BrokerError::Driver(_) => ErrorCode::DeviceState,
            BrokerError::Switcher(SwitcherError::Unreachable) => ErrorCode::HardwareUnavailable,
            BrokerError::Switcher(_) => ErrorCode::DeviceState,
        };
        ApiError::new(code, self.to_string())
    }
}

struct BrokerState {
    registry: DeviceRegistry,
    sessions: SessionManager,
    arbiter: ControlArbiter,
    presets: PresetStore,
    camera_ports: CameraPortMap,
    switcher_connected: bool,
    drivers: HashMap<DeviceId, Arc<dyn GimbalDriver>>,
    active_device: DeviceId,
    speed_multiplier: f64,
}

impl BrokerState {
    fn new() -> Self {
        Self {
            registry: DeviceRegistry::new(),
            sessions: SessionManager::default(),
            arbiter: ControlArbiter::default(),
            presets: PresetStore::default(),
            camera_ports: CameraPortMap::new(),
            switcher_connected: false,
            drivers: HashMap::new(),
            active_device: DeviceId::virtual_device(),
            speed_multiplier: 1.0,
        }
    }

    fn controller_name(&self, device: &DeviceId) -> Option<String> {
        let session = self.arbiter.controller_of(device)?;
        self.sessions.name_of(session)
    }

    fn device_list(&self) -> ServerEvent {
        ServerEvent::DeviceList {
            devices: self
                .registry
                .summaries(|device| self.controller_name(device)),
        }
    }

    fn status_of(&self, device: &DeviceId) -> Option<DeviceStatus> {
        let entry = self.registry.get(device)?;
        Some(DeviceStatus {
            connected: entry.state.connected,
            tracking: entry.state.tracking,
            speed_boost: entry.state.speed_boost,
            mode: entry.kind,
        })
    }

    fn active_is_real(&self) -> bool {
        !self.active_device.is_virtual()
    }
}

pub struct Broker {
    state: Mutex<BrokerState>,
    events: broadcast::Sender<ServerEvent>,
    connector: Arc<dyn GimbalConnector>,
    switcher: Arc<dyn CameraSwitcher>,
    storage: Storage,
}

impl Broker {
    pub fn new(
        events: broadcast::Sender<ServerEvent>,
        connector: Arc<dyn GimbalConnector>,
        switcher: Arc<dyn CameraSwitcher>,
        storage: Storage,
    ) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(BrokerState::new()),
            events,
            connector,
            switcher,
            storage,
        })
    }

    /// Restore persisted devices, presets and camera ports. Registered
    /// devices come back disconnected; reconnection is explicit.
    pub async fn load_persisted(&self) -> anyhow::Result<()> {
        let devices = self.storage.load_devices().await?;
        let presets = self.storage.load_presets().await?;
        let ports = self.storage.load_camera_ports().await?;

        let mut state = self.state.lock().await;
        for record in devices {
            state.registry.restore(record.id, record.name, record.address);
        }
        state.presets = PresetStore::from_map(presets);
        state.camera_ports = ports;
        Ok(())
    }

    fn broadcast(&self, event: ServerEvent) {
        let _ = self.events.send(event);
    }

    /// Initial per-client events, written only to the new connection.
    pub async fn handle_connect(&self, session_id: &SessionId) -> Vec<ServerEvent> {
        let mut state = self.state.lock().await;
        let session = state.sessions.session_for(session_id);
        let name = session.name.clone();
        let selected = session.selected.clone();
        debug!(session = %session_id, %name, "client connected");

        let active = state.active_device.clone();
        let position = state
            .registry
            .get(&active)
            .map(|entry| entry.state.position)
            .unwrap_or_default();
        let status = state.status_of(&active);

        let mut events = vec![
            state.device_list(),
            ServerEvent::DeviceSelected {
                device_id: selected,
            },
            ServerEvent::Identity {
                name,
                session_id: session_id.clone(),
            },
            ServerEvent::Position { position },
        ];
        if let Some(status) = status {
            events.push(ServerEvent::Status { status });
        }
        events
    }

    /// Disconnect releases ownership but never touches device motion: the
    /// device keeps its last commanded speed or in-flight animation.
    pub async fn handle_disconnect(&self, session_id: &SessionId) {
        let mut state = self.state.lock().await;
        let name = state.sessions.name_of(session_id);
        state.sessions.remove(session_id);
        let released = state.arbiter.release_session(session_id);
        debug!(session = %session_id, name = ?name, released = released.len(), "client disconnected");
        if !released.is_empty() {
            let list = state.device_list();
            drop(state);
            self.broadcast(list);
        }
    }

    /// Dispatch one client intent. Returned events go to the sender only;
    /// observer-wide updates go out through the broadcast channel.
    pub async fn handle_command(
        self: &Arc<Self>,
        session_id: &SessionId,
        command: ClientCommand,
    ) -> Vec<ServerEvent> {
        match command {
            ClientCommand::SelectDevice { device_id } => {
                self.select_device(session_id, device_id).await
            }
            ClientCommand::SetSpeed { pitch, roll, yaw } => {
                self.set_speed(session_id, Angles::new(pitch, roll, yaw))
                    .await
            }
            ClientCommand::Stop => self.emergency_stop(session_id).await,
            ClientCommand::GoHome => self.go_home(session_id).await,
            ClientCommand::SetHome => self.set_home(session_id).await,
            ClientCommand::SetSpeedMultiplier { value } => {
                self.set_speed_multiplier(value).await
            }
            ClientCommand::ToggleTracking { enabled } => {
                self.toggle_tracking(session_id, enabled).await
            }
            ClientCommand::ToggleSpeedBoost { enabled } => {
                self.toggle_speed_boost(session_id, enabled).await
            }
            ClientCommand::Rename { name } => self.rename(session_id, &name).await,
            ClientCommand::SetZoom { value } => self.set_zoom(session_id, value).await,
            ClientCommand::SetFocus { value } => self.set_focus(session_id, value).await,
            ClientCommand::CalibrateFocus => self.calibrate_focus(session_id).await,
            ClientCommand::AddDevice { name, address } => {
                self.add_device(&name, &address).await
            }
            ClientCommand::RemoveDevice { device_id } => self.remove_device(&device_id).await,
            ClientCommand::UpdateDevice {
                device_id,
                name,
                address,
            } => {
                self.update_device(&device_id, name.as_deref(), address.as_deref())
                    .await
            }
            ClientCommand::ConnectDevice { device_id } => self.connect_device(&device_id).await,
            ClientCommand::SavePreset { slot } => self.save_preset(session_id, slot).await,
            ClientCommand::RecallPreset { slot } => self.recall_preset(session_id, slot).await,
            ClientCommand::DeletePreset { slot } => self.delete_preset(session_id, slot).await,
            ClientCommand::SetCameraPort { device_id, port } => {
                self.set_camera_port(&device_id, port).await
            }
            ClientCommand::ListCameraPorts => self.list_camera_ports().await,
            ClientCommand::SwitcherConnect { address } => self.switcher_connect(&address).await,
            ClientCommand::SwitcherDisconnect => self.switcher_disconnect().await,
            ClientCommand::CameraFocus { port, value } => {
                self.switcher_call(port, SwitcherCall::Focus(value)).await
            }
            ClientCommand::CameraAutoFocus { port } => {
                self.switcher_call(port, SwitcherCall::AutoFocus).await
            }
            ClientCommand::CameraAperture { port, value } => {
                self.switcher_call(port, SwitcherCall::Aperture(value)).await
            }
            ClientCommand::CameraAutoAperture { port } => {
                self.switcher_call(port, SwitcherCall::AutoAperture).await
            }
            ClientCommand::CameraGain { port, value } => {
                self.switcher_call(port, SwitcherCall::Gain(value)).await
            }
            ClientCommand::CameraZoomSpeed { port, value } => {
                self.switcher_call(port, SwitcherCall::ZoomSpeed(value)).await
            }
            ClientCommand::CameraZoomPosition { port, value } => {
                self.switcher_call(port, SwitcherCall::ZoomPosition(value))
                    .await
            }
        }
    }

    async fn select_device(
        self: &Arc<Self>,
        session_id: &SessionId,
        device_id: DeviceId,
    ) -> Vec<ServerEvent> {
        let mut state = self.state.lock().await;
        if !state.registry.contains(&device_id) {
            return vec![error_event(BrokerError::NotFound(device_id))];
        }

        let previous = state.sessions.selected_of(session_id);
        state
            .arbiter
            .release_if_controller(&previous, session_id);
        state.sessions.set_selected(session_id, device_id.clone());
        state
            .arbiter
            .claim(device_id.clone(), session_id.clone());
        state.active_device = device_id.clone();

        let status = state.status_of(&device_id);
        let list = state.device_list();
        drop(state);
        self.broadcast(list);

        let mut events = vec![ServerEvent::DeviceSelected { device_id }];
        if let Some(status) = status {
            events.push(ServerEvent::Status { status });
        }
        events
    }

    async fn set_speed(
        self: &Arc<Self>,
        session_id: &SessionId,
        normalized: Angles,
    ) -> Vec<ServerEvent> {
        let mut state = self.state.lock().await;
        let device = state.sessions.selected_of(session_id);
        if !state.arbiter.may_drive(session_id, &device) {
            debug!(session = %session_id, %device, "speed intent dropped: not the controller");
            return Vec::new();
        }

        let requested = Angles::new(
            normalized.pitch * SPEED_INPUT_SCALE,
            normalized.roll * SPEED_INPUT_SCALE,
            normalized.yaw * SPEED_INPUT_SCALE,
        );
        let driver = state.drivers.get(&device).cloned();
        let Some(entry) = state.registry.get_mut(&device) else {
            return Vec::new();
        };
        let accepted = entry.slew.sanitize(requested);
        entry.state.speed = accepted;
        let forward = entry.kind == DeviceKind::Real && entry.connected;
        drop(state);

        if forward {
            if let Some(driver) = driver {
                if let Err(err) = driver.set_speed(accepted).await {
                    warn!(%device, %err, "driver rejected speed, stopping device");
                    if let Err(stop_err) = driver.stop().await {
                        warn!(%device, %stop_err, "driver stop after failed speed also failed");
                    }
                }
            }
        }
        Vec::new()
    }

    /// Emergency stop is deliberately exempt from ownership: any observer of
    /// a device may halt it.
    async fn emergency_stop(self: &Arc<Self>, session_id: &SessionId) -> Vec<ServerEvent> {
        let mut state = self.state.lock().await;
        let device = state.sessions.selected_of(session_id);
        let driver = state.drivers.get(&device).cloned();
        let Some(entry) = state.registry.get_mut(&device) else {
            return Vec::new();
        };
        entry.slew.reset();
        entry.state.speed = Angles::ZERO;
        let forward = entry.kind == DeviceKind::Real && entry.connected;
        drop(state);

        warn!(session = %session_id, %device, "emergency stop");
        if forward {
            if let Some(driver) = driver {
                if let Err(err) = driver.stop().await {
                    warn!(%device, %err, "driver stop failed");
                }
            }
        }
        Vec::new()
    }

    async fn go_home(self: &Arc<Self>, session_id: &SessionId) -> Vec<ServerEvent> {
        let target = {
            let mut state = self.state.lock().await;
            let device = state.sessions.selected_of(session_id);
            if !state.arbiter.may_drive(session_id, &device) {
                debug!(session = %session_id, %device, "home intent dropped: not the controller");
                return Vec::new();
            }
            match state.registry.get(&device) {
                Some(entry) => entry.state.home,
                None => return Vec::new(),
            }
        };
        self.animate_to(session_id, target).await
    }

    async fn set_home(self: &Arc<Self>, session_id: &SessionId) -> Vec<ServerEvent> {
        let mut state = self.state.lock().await;
        let device = state.sessions.selected_of(session_id);
        if !state.arbiter.may_drive(session_id, &device) {
            debug!(session = %session_id, %device, "set-home intent dropped: not the controller");
            return Vec::new();
        }
        if let Some(entry) = state.registry.get_mut(&device) {
            entry.state.home = entry.state.position;
        }
        Vec::new()
    }

    /// Start interpolating the sender's device toward `target`. For real
    /// devices the target forwards to the driver and its verdict is
    /// surfaced; for the virtual device the same validation taxonomy is
    /// applied locally.
    async fn animate_to(
        self: &Arc<Self>,
        session_id: &SessionId,
        target: Angles,
    ) -> Vec<ServerEvent> {
        let mut state = self.state.lock().await;
        let device = state.sessions.selected_of(session_id);
        let driver = state.drivers.get(&device).cloned();
        let Some(entry) = state.registry.get_mut(&device) else {
            return Vec::new();
        };

        if entry.kind == DeviceKind::Virtual {
            if let Err(err) = entry.config.validate_position(target) {
                return vec![error_event(BrokerError::Driver(err))];
            }
            entry.animation = Animation::start(target);
            return Vec::new();
        }

        entry.animation = Animation::start(target);
        let forward = entry.connected;
        drop(state);

        if forward {
            if let Some(driver) = driver {
                if let Err(err) = driver.set_position(target).await {
                    warn!(%device, %err, "driver rejected position target");
                    return vec![error_event(BrokerError::Driver(err))];
                }
            }
        }
        Vec::new()
    }

    async fn set_speed_multiplier(self: &Arc<Self>, value: f64) -> Vec<ServerEvent> {
        let mut state = self.state.lock().await;
        let clamped = if value.is_finite() {
            value.clamp(motion::MIN_SPEED_MULTIPLIER, motion::MAX_SPEED_MULTIPLIER)
        } else {
            1.0
        };
        state.speed_multiplier = clamped;
        debug!(multiplier = clamped, "speed multiplier updated");
        Vec::new()
    }

    async fn toggle_tracking(
        self: &Arc<Self>,
        session_id: &SessionId,
        enabled: bool,
    ) -> Vec<ServerEvent> {
        let mut state = self.state.lock().await;
        let device = state.sessions.selected_of(session_id);
        if !state.arbiter.may_drive(session_id, &device) {
            debug!(session = %session_id, %device, "tracking intent dropped: not the controller");
            return Vec::new();
        }
        let driver = state.drivers.get(&device).cloned();
        let Some(entry) = state.registry.get_mut(&device) else {
            return Vec::new();
        };
        entry.state.tracking = enabled;
        let forward = entry.kind == DeviceKind::Real && entry.connected;
        let status = state.status_of(&device);
        drop(state);

        if forward {
            if let Some(driver) = driver {
                if let Err(err) = driver.toggle_tracking().await {
                    warn!(%device, %err, "driver tracking toggle failed");
                }
            }
        }
        if let Some(status) = status {
            self.broadcast(ServerEvent::Status { status });
        }
        Vec::new()
    }

    async fn toggle_speed_boost(
        self: &Arc<Self>,
        session_id: &SessionId,
        enabled: bool,
    ) -> Vec<ServerEvent> {
        let mut state = self.state.lock().await;
        let device = state.sessions.selected_of(session_id);
        if !state.arbiter.may_drive(session_id, &device) {
            debug!(session = %session_id, %device, "boost intent dropped: not the controller");
            return Vec::new();
        }
        if let Some(entry) = state.registry.get_mut(&device) {
            entry.state.speed_boost = enabled;
        }
        let status = state.status_of(&device);
        drop(state);

        if let Some(status) = status {
            self.broadcast(ServerEvent::Status { status });
        }
        Vec::new()
    }

    async fn rename(self: &Arc<Self>, session_id: &SessionId, proposed: &str) -> Vec<ServerEvent> {
        let mut state = self.state.lock().await;
        let name = state.sessions.rename(session_id, proposed);
        let list = state.device_list();
        drop(state);
        self.broadcast(list);
        vec![ServerEvent::Identity {
            name,
            session_id: session_id.clone(),
        }]
    }

    async fn set_zoom(self: &Arc<Self>, session_id: &SessionId, value: f64) -> Vec<ServerEvent> {
        let mut state = self.state.lock().await;
        let device = state.sessions.selected_of(session_id);
        if !state.arbiter.may_drive(session_id, &device) {
            return Vec::new();
        }
        if let Some(entry) = state.registry.get_mut(&device) {
            entry.state.zoom = clamp_percent(value);
        }
        Vec::new()
    }

    async fn set_focus(self: &Arc<Self>, session_id: &SessionId, value: f64) -> Vec<ServerEvent> {
        let mut state = self.state.lock().await;
        let device = state.sessions.selected_of(session_id);
        if !state.arbiter.may_drive(session_id, &device) {
            return Vec::new();
        }
        let driver = state.drivers.get(&device).cloned();
        let Some(entry) = state.registry.get_mut(&device) else {
            return Vec::new();
        };
        let pct = clamp_percent(value);
        entry.state.focus = pct;
        let forward = entry.kind == DeviceKind::Real && entry.connected;
        drop(state);

        if forward {
            if let Some(driver) = driver {
                if let Err(err) = driver.set_focus(pct).await {
                    warn!(%device, %err, "driver focus set failed");
                }
            }
        }
        Vec::new()
    }

    /// Recenter focus to 50% and push it to an active real device.
    async fn calibrate_focus(self: &Arc<Self>, session_id: &SessionId) -> Vec<ServerEvent> {
        self.set_focus(session_id, 50.0).await
    }

    async fn add_device(self: &Arc<Self>, name: &str, address: &str) -> Vec<ServerEvent> {
        if let Err(err) = validate_address(address) {
            return vec![error_event(err)];
        }
        let name = if name.trim().is_empty() {
            "New Device"
        } else {
            name.trim()
        };

        let mut state = self.state.lock().await;
        let (id, summary) = match state.registry.add(name, address) {
            Ok(entry) => (entry.id.clone(), entry.summary(None)),
            Err(err) => return vec![error_event(err)],
        };
        let records = state.registry.records();
        let list = state.device_list();
        drop(state);

        self.persist_devices(records).await;
        self.broadcast(list);
        self.broadcast(ServerEvent::DeviceAdded { device: summary });
        self.spawn_connect(id, address.to_string());
        Vec::new()
    }

    async fn remove_device(self: &Arc<Self>, device_id: &DeviceId) -> Vec<ServerEvent> {
        let mut state = self.state.lock().await;
        if let Err(err) = state.registry.remove(device_id) {
            return vec![error_event(err)];
        }

        if let Some(driver) = state.drivers.remove(device_id) {
            driver.release().await;
        }
        state.arbiter.release_device(device_id);
        state.presets.remove_device(device_id);
        state.camera_ports.remove(device_id);
        state.sessions.reset_selections_of(device_id);
        if state.active_device == *device_id {
            state.active_device = DeviceId::virtual_device();
        }

        let records = state.registry.records();
        let presets = state.presets.as_map().clone();
        let ports = state.camera_ports.clone();
        let list = state.device_list();
        drop(state);

        self.persist_devices(records).await;
        if let Err(err) = self.storage.save_presets(&presets).await {
            warn!(%err, "failed to persist presets");
        }
        if let Err(err) = self.storage.save_camera_ports(&ports).await {
            warn!(%err, "failed to persist camera ports");
        }
        self.broadcast(list);
        self.broadcast(ServerEvent::DeviceRemoved {
            device_id: device_id.clone(),
        });
        Vec::new()
    }

    async fn update_device(
        self: &Arc<Self>,
        device_id: &DeviceId,
        name: Option<&str>,
        address: Option<&str>,
    ) -> Vec<ServerEvent> {
        if let Some(address) = address {
            if let Err(err) = validate_address(address) {
                return vec![error_event(err)];
            }
        }

        let mut state = self.state.lock().await;
        let address_changed = match state.registry.update(device_id, name, address) {
            Ok(changed) => changed,
            Err(err) => return vec![error_event(err)],
        };
        if address_changed {
            if let Some(driver) = state.drivers.remove(device_id) {
                driver.release().await;
            }
        }
        let records = state.registry.records();
        let reconnect_address = address_changed
            .then(|| state.registry.get(device_id).map(|e| e.address.clone()))
            .flatten();
        let list = state.device_list();
        drop(state);

        self.persist_devices(records).await;
        self.broadcast(list);
        if let Some(address) = reconnect_address {
            self.spawn_connect(device_id.clone(), address);
        }
        Vec::new()
    }

    async fn connect_device(self: &Arc<Self>, device_id: &DeviceId) -> Vec<ServerEvent> {
        let state = self.state.lock().await;
        let Some(entry) = state.registry.get(device_id) else {
            return vec![error_event(BrokerError::NotFound(device_id.clone()))];
        };
        if entry.kind == DeviceKind::Virtual {
            return vec![error_event(BrokerError::ProtectedDevice)];
        }
        let address = entry.address.clone();
        drop(state);

        self.spawn_connect(device_id.clone(), address);
        Vec::new()
    }

    /// The connection workflow runs off the tick path: a slow or failing
    /// hardware link must never stall the loop or other clients' intents.
    fn spawn_connect(self: &Arc<Self>, device_id: DeviceId, address: String) {
        let broker = Arc::clone(self);
        tokio::spawn(async move {
            broker.try_connect(device_id, address).await;
        });
    }

    async fn try_connect(self: &Arc<Self>, device_id: DeviceId, address: String) {
        {
            let mut state = self.state.lock().await;
            match state.registry.get_mut(&device_id) {
                Some(entry) => entry.connecting = true,
                None => return,
            }
            let list = state.device_list();
            drop(state);
            self.broadcast(list);
        }

        debug!(%device_id, %address, "attempting device connection");
        let outcome = match self.connector.detect().await {
            Ok(0) => Err(DriverError::NotFound),
            Ok(count) => {
                debug!(count, "devices visible to the native binding");
                self.connector.connect(&address).await
            }
            Err(err) => Err(err),
        };
        let info = match &outcome {
            Ok(driver) => driver.info().await.ok(),
            Err(_) => None,
        };

        let mut state = self.state.lock().await;
        match outcome {
            Ok(driver) => {
                state
                    .registry
                    .set_connectivity(&device_id, true, info.as_ref());
                state.drivers.insert(device_id.clone(), driver);
                debug!(%device_id, "device connected");
            }
            Err(err) => {
                state.registry.set_connectivity(&device_id, false, None);
                state.drivers.remove(&device_id);
                warn!(%device_id, %address, %err, "device connection failed");
            }
        }
        let list = state.device_list();
        drop(state);
        self.broadcast(list);
    }

    async fn save_preset(self: &Arc<Self>, session_id: &SessionId, slot: u8) -> Vec<ServerEvent> {
        if !presets::valid_slot(slot) {
            return vec![error_event(BrokerError::Validation(format!(
                "preset slot {slot} is out of range (1-9)"
            )))];
        }
        let mut state = self.state.lock().await;
        let device = state.sessions.selected_of(session_id);
        if !state.arbiter.may_drive(session_id, &device) {
            return Vec::new();
        }
        let Some(entry) = state.registry.get(&device) else {
            return Vec::new();
        };
        let position = entry.state.position;
        state.presets.save(&device, slot, position);
        let presets = state.presets.as_map().clone();
        let listing = state.presets.list(&device);
        drop(state);

        if let Err(err) = self.storage.save_presets(&presets).await {
            warn!(%err, "failed to persist presets");
        }
        vec![ServerEvent::PresetList {
            device_id: device,
            presets: listing,
        }]
    }

    async fn recall_preset(self: &Arc<Self>, session_id: &SessionId, slot: u8) -> Vec<ServerEvent> {
        if !presets::valid_slot(slot) {
            return vec![error_event(BrokerError::Validation(format!(
                "preset slot {slot} is out of range (1-9)"
            )))];
        }
        let target = {
            let mut state = self.state.lock().await;
            let device = state.sessions.selected_of(session_id);
            if !state.arbiter.may_drive(session_id, &device) {
                debug!(session = %session_id, %device, "recall intent dropped: not the controller");
                return Vec::new();
            }
            match state.presets.recall(&device, slot) {
                Some(target) => target,
                None => {
                    return vec![error_event(BrokerError::Validation(format!(
                        "preset slot {slot} is empty"
                    )))]
                }
            }
        };
        self.animate_to(session_id, target).await
    }

    async fn delete_preset(self: &Arc<Self>, session_id: &SessionId, slot: u8) -> Vec<ServerEvent> {
        let mut state = self.state.lock().await;
        let device = state.sessions.selected_of(session_id);
        if !state.arbiter.may_drive(session_id, &device) {
            return Vec::new();
        }
        state.presets.delete(&device, slot);
        let presets = state.presets.as_map().clone();
        let listing = state.presets.list(&device);
        drop(state);

        if let Err(err) = self.storage.save_presets(&presets).await {
            warn!(%err, "failed to persist presets");
        }
        vec![ServerEvent::PresetList {
            device_id: device,
            presets: listing,
        }]
    }

    async fn set_camera_port(
        self: &Arc<Self>,
        device_id: &DeviceId,
        port: u8,
    ) -> Vec<ServerEvent> {
        if !camera::valid_port(port) {
            return vec![error_event(BrokerError::Validation(format!(
                "camera port {port} is out of range ({}-{})",
                camera::MIN_CAMERA_PORT,
                camera::MAX_CAMERA_PORT
            )))];
        }
        let mut state = self.state.lock().await;
        if !state.registry.contains(device_id) {
            return vec![error_event(BrokerError::NotFound(device_id.clone()))];
        }
        camera::set_mapping(&mut state.camera_ports, device_id.clone(), port);
        let ports = state.camera_ports.clone();
        let mappings = camera::mappings(&state.camera_ports);
        drop(state);

        if let Err(err) = self.storage.save_camera_ports(&ports).await {
            warn!(%err, "failed to persist camera ports");
        }
        self.broadcast(ServerEvent::CameraPorts { ports: mappings });
        Vec::new()
    }

    async fn list_camera_ports(self: &Arc<Self>) -> Vec<ServerEvent> {
        let state = self.state.lock().await;
        vec![ServerEvent::CameraPorts {
            ports: camera::mappings(&state.camera_ports),
        }]
    }

    async fn switcher_connect(self: &Arc<Self>, address: &str) -> Vec<ServerEvent> {
        if let Err(err) = validate_address(address) {
            return vec![error_event(err)];
        }
        match self.switcher.connect(address).await {
            Ok(()) => {
                self.state.lock().await.switcher_connected = true;
                self.broadcast(ServerEvent::SwitcherStatus { connected: true });
                Vec::new()
            }
            Err(err) => {
                self.state.lock().await.switcher_connected = false;
                warn!(%address, %err, "switcher connection failed");
                vec![error_event(BrokerError::Switcher(err))]
            }
        }
    }

    async fn switcher_disconnect(self: &Arc<Self>) -> Vec<ServerEvent> {
        self.switcher.disconnect().await;
        self.state.lock().await.switcher_connected = false;
        self.broadcast(ServerEvent::SwitcherStatus { connected: false });
        Vec::new()
    }

    async fn switcher_call(self: &Arc<Self>, port: u8, call: SwitcherCall) -> Vec<ServerEvent> {
        if !camera::valid_port(port) {
            return vec![error_event(BrokerError::Validation(format!(
                "camera port {port} is out of range ({}-{})",
                camera::MIN_CAMERA_PORT,
                camera::MAX_CAMERA_PORT
            )))];
        }
        if !self.state.lock().await.switcher_connected {
            return vec![error_event(BrokerError::Switcher(
                SwitcherError::NotConnected,
            ))];
        }
        let result = match call {
            SwitcherCall::Focus(value) => self.switcher.set_focus(port, value).await,
            SwitcherCall::AutoFocus => self.switcher.auto_focus(port).await,
            SwitcherCall::Aperture(value) => self.switcher.set_aperture(port, value).await,
            SwitcherCall::AutoAperture => self.switcher.auto_aperture(port).await,
            SwitcherCall::Gain(value) => self.switcher.set_gain(port, value).await,
            SwitcherCall::ZoomSpeed(value) => self.switcher.set_zoom_speed(port, value).await,
            SwitcherCall::ZoomPosition(value) => {
                self.switcher.set_zoom_position(port, value).await
            }
        };
        match result {
            Ok(()) => Vec::new(),
            Err(err) => {
                warn!(port, ?call, %err, "switcher command failed");
                vec![error_event(BrokerError::Switcher(err))]
            }
        }
    }

    /// One 20 Hz step: read back the active real device (mirroring it into
    /// the virtual device), or integrate the virtual device's kinematics,
    /// then broadcast the authoritative position.
    pub async fn motion_tick(&self, dt: f64) {
        let mut state = self.state.lock().await;
        let active = state.active_device.clone();

        if state.active_is_real() {
            let driver = state.drivers.get(&active).cloned();
            let connected = state
                .registry
                .get(&active)
                .map(|entry| entry.connected)
                .unwrap_or(false);
            if connected {
                if let Some(driver) = driver {
                    // Readback is authoritative for hardware devices.
                    drop(state);
                    let readback = driver.position().await;
                    state = self.state.lock().await;
                    match readback {
                        Ok(position) => {
                            if let Some(entry) = state.registry.get_mut(&active) {
                                entry.state.position = position;
                            }
                            state.registry.virtual_entry_mut().state.position = position;
                        }
                        Err(err) => {
                            debug!(device = %active, %err, "position readback failed");
                        }
                    }
                }
            }
        } else {
            let multiplier = state.speed_multiplier;
            let entry = state.registry.virtual_entry_mut();
            let was_animating = entry.animation.active;
            motion::tick(&mut entry.state, &mut entry.animation, multiplier, dt);
            if was_animating && !entry.animation.active {
                debug!("animation target reached");
            }
        }

        let position = state
            .registry
            .get(&state.active_device)
            .map(|entry| entry.state.position)
            .unwrap_or_default();
        drop(state);
        self.broadcast(ServerEvent::Position { position });
    }

    pub async fn telemetry_tick(&self) {
        let state = self.state.lock().await;
        let active_real = state.active_is_real();
        let Some(entry) = state.registry.get(&state.active_device) else {
            return;
        };
        let telemetry = TelemetrySnapshot {
            timestamp_ms: Utc::now().timestamp_millis(),
            position: entry.state.position,
            speed: entry.state.speed,
            temperature_c: active_real.then_some(REAL_DEVICE_TEMPERATURE_C),
            battery_pct: active_real.then_some(REAL_DEVICE_BATTERY_PCT),
        };
        drop(state);
        self.broadcast(ServerEvent::Telemetry { telemetry });
    }

    /// 20 Hz motion/broadcast cycle for the process lifetime. A failing tick
    /// logs and continues so unaffected devices keep streaming.
    pub async fn run_motion_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(MOTION_TICK_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            self.motion_tick(motion::TICK_SECONDS).await;
        }
    }

    /// 2 Hz telemetry cycle, independent of the motion cycle.
    pub async fn run_telemetry_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(TELEMETRY_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            self.telemetry_tick().await;
        }
    }

    async fn persist_devices(&self, records: Vec<storage::DeviceRecord>) {
        if let Err(err) = self.storage.save_devices(&records).await {
            warn!(%err, "failed to persist device list");
        }
    }

    /// Diagnostic query: current kinematics of one device.
    pub async fn device_state(&self, device: &DeviceId) -> Option<KinematicState> {
        let state = self.state.lock().await;
        state.registry.get(device).map(|entry| entry.state)
    }

    /// Diagnostic query: display name of the session controlling `device`.
    pub async fn controller_of(&self, device: &DeviceId) -> Option<String> {
        let state = self.state.lock().await;
        state.controller_name(device)
    }

    /// Read-only snapshot for the HTTP status surface.
    pub async fn status_snapshot(&self) -> BrokerSnapshot {
        let state = self.state.lock().await;
        let active = state.active_device.clone();
        BrokerSnapshot {
            active_device_id: active.clone(),
            active_mode: if state.active_is_real() {
                DeviceKind::Real
            } else {
                DeviceKind::Virtual
            },
            active_state: state.registry.get(&active).map(|entry| entry.state),
            connected_real_devices: state
                .registry
                .list()
                .filter(|entry| entry.kind == DeviceKind::Real && entry.connected)
                .count(),
            devices: state
                .registry
                .summaries(|device| state.controller_name(device)),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct BrokerSnapshot {
    pub active_device_id: DeviceId,
    pub active_mode: DeviceKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_state: Option<KinematicState>,
    pub connected_real_devices: usize,
    pub devices: Vec<shared::domain::DeviceSummary>,
}

fn clamp_percent(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 100.0)
    } else {
        0.0
    }
}

fn validate_address(address: &str) -> Result<(), BrokerError> {
    let trimmed = address.trim();
    if trimmed.is_empty() {
        return Err(BrokerError::Validation("address is required".to_string()));
    }
    trimmed
        .parse::<IpAddr>()
        .map(|_| ())
        .map_err(|_| BrokerError::InvalidAddress(address.to_string()))
}

fn error_event(err: BrokerError) -> ServerEvent {
    ServerEvent::Error(err.to_api())
}

#[cfg(test)]
#[path = "tests/broker_tests.rs"]
mod tests;
