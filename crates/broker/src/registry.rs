//! Catalog of known devices. The virtual mirror device is created first,
//! stays first in listing order, and can never be removed.

use driver::{DriverInfo, GimbalConfig};
use shared::domain::{DeviceId, DeviceKind, DeviceSummary};

use crate::{
    motion::{Animation, KinematicState},
    safety::SlewLimiter,
    BrokerError,
};

pub const VIRTUAL_DEVICE_NAME: &str = "Virtual Device";
pub const VIRTUAL_DEVICE_MODEL: &str = "Mirror/Simulation";
pub const DEFAULT_REAL_MODEL: &str = "DJI RS/Ronin";

#[derive(Debug)]
pub struct DeviceEntry {
    pub id: DeviceId,
    pub name: String,
    pub model: String,
    pub kind: DeviceKind,
    pub connected: bool,
    pub connecting: bool,
    pub address: String,
    pub config: GimbalConfig,
    pub state: KinematicState,
    pub animation: Animation,
    pub slew: SlewLimiter,
}

impl DeviceEntry {
    fn real(id: DeviceId, name: String, address: String) -> Self {
        Self {
            id,
            name,
            model: DEFAULT_REAL_MODEL.to_string(),
            kind: DeviceKind::Real,
            connected: false,
            connecting: false,
            address,
            config: GimbalConfig::default(),
            state: KinematicState::default(),
            animation: Animation::default(),
            slew: SlewLimiter::default(),
        }
    }

    pub fn summary(&self, controlled_by: Option<String>) -> DeviceSummary {
        DeviceSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            model: self.model.clone(),
            kind: self.kind,
            connected: self.connected,
            connecting: self.connecting,
            address: self.address.clone(),
            controlled_by,
        }
    }
}

#[derive(Debug)]
pub struct DeviceRegistry {
    devices: Vec<DeviceEntry>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        let mut virtual_state = KinematicState::default();
        virtual_state.connected = true;
        Self {
            devices: vec![DeviceEntry {
                id: DeviceId::virtual_device(),
                name: VIRTUAL_DEVICE_NAME.to_string(),
                model: VIRTUAL_DEVICE_MODEL.to_string(),
                kind: DeviceKind::Virtual,
                connected: true,
                connecting: false,
                address: "127.0.0.1".to_string(),
                config: GimbalConfig::default(),
                state: virtual_state,
                animation: Animation::default(),
                slew: SlewLimiter::default(),
            }],
        }
    }

    pub fn list(&self) -> impl Iterator<Item = &DeviceEntry> {
        self.devices.iter()
    }

    pub fn contains(&self, id: &DeviceId) -> bool {
        self.devices.iter().any(|entry| entry.id == *id)
    }

    pub fn get(&self, id: &DeviceId) -> Option<&DeviceEntry> {
        self.devices.iter().find(|entry| entry.id == *id)
    }

    pub fn get_mut(&mut self, id: &DeviceId) -> Option<&mut DeviceEntry> {
        self.devices.iter_mut().find(|entry| entry.id == *id)
    }

    pub fn virtual_entry_mut(&mut self) -> &mut DeviceEntry {
        // Index 0 by construction.
        &mut self.devices[0]
    }

    /// Register a real device. The id derives from the address, so a
    /// duplicate address is the only collision to reject.
    pub fn add(&mut self, name: &str, address: &str) -> Result<&DeviceEntry, BrokerError> {
        if self.devices.iter().any(|entry| entry.address == address) {
            return Err(BrokerError::DuplicateAddress(address.to_string()));
        }
        let id = DeviceId::for_address(address);
        self.devices.push(DeviceEntry::real(
            id,
            name.to_string(),
            address.to_string(),
        ));
        Ok(self.devices.last().expect("just pushed"))
    }

    /// Re-register a persisted device under its stored id.
    pub fn restore(&mut self, id: DeviceId, name: String, address: String) {
        if self.contains(&id) {
            return;
        }
        self.devices.push(DeviceEntry::real(id, name, address));
    }

    pub fn remove(&mut self, id: &DeviceId) -> Result<DeviceEntry, BrokerError> {
        if id.is_virtual() {
            return Err(BrokerError::ProtectedDevice);
        }
        let index = self
            .devices
            .iter()
            .position(|entry| entry.id == *id)
            .ok_or_else(|| BrokerError::NotFound(id.clone()))?;
        Ok(self.devices.remove(index))
    }

    /// Rename and/or re-address a device. Returns true when the address
    /// changed (callers re-trigger the connection workflow).
    pub fn update(
        &mut self,
        id: &DeviceId,
        name: Option<&str>,
        address: Option<&str>,
    ) -> Result<bool, BrokerError> {
        if id.is_virtual() {
            return Err(BrokerError::ProtectedDevice);
        }
        if let Some(address) = address {
            let taken = self
                .devices
                .iter()
                .any(|entry| entry.address == address && entry.id != *id);
            if taken {
                return Err(BrokerError::DuplicateAddress(address.to_string()));
            }
        }
        let entry = self
            .devices
            .iter_mut()
            .find(|entry| entry.id == *id)
            .ok_or_else(|| BrokerError::NotFound(id.clone()))?;

        if let Some(name) = name {
            entry.name = name.to_string();
        }
        let mut address_changed = false;
        if let Some(address) = address {
            if entry.address != address {
                entry.address = address.to_string();
                entry.connected = false;
                entry.state.connected = false;
                address_changed = true;
            }
        }
        Ok(address_changed)
    }

    pub fn set_connectivity(&mut self, id: &DeviceId, connected: bool, info: Option<&DriverInfo>) {
        if let Some(entry) = self.get_mut(id) {
            entry.connected = connected;
            entry.connecting = false;
            entry.state.connected = connected;
            if let Some(info) = info {
                entry.model = format!("v{}", info.version);
            }
        }
    }

    pub fn summaries<F>(&self, controller_name: F) -> Vec<DeviceSummary>
    where
        F: Fn(&DeviceId) -> Option<String>,
    {
        self.devices
            .iter()
            .map(|entry| entry.summary(controller_name(&entry.id)))
            .collect()
    }

    /// Real devices only, in listing order, for persistence.
    pub fn records(&self) -> Vec<storage::DeviceRecord> {
        self.devices
            .iter()
            .filter(|entry| entry.kind == DeviceKind::Real)
            .map(|entry| storage::DeviceRecord {
                id: entry.id.clone(),
                name: entry.name.clone(),
                address: entry.address.clone(),
            })
            .collect()
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "tests/registry_tests.rs"]
mod tests;
