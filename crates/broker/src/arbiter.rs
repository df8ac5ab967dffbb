//! Advisory ownership of real devices: at most one controlling session per
//! device, most recent selector wins, virtual device exempt.

use std::collections::HashMap;

use shared::domain::{DeviceId, SessionId};

#[derive(Debug, Default)]
pub struct ControlArbiter {
    controllers: HashMap<DeviceId, SessionId>,
}

impl ControlArbiter {
    pub fn controller_of(&self, device: &DeviceId) -> Option<&SessionId> {
        self.controllers.get(device)
    }

    /// Whether an intent from `session` addressed to `device` is accepted.
    /// The virtual device is an observe target anyone may drive.
    pub fn may_drive(&self, session: &SessionId, device: &DeviceId) -> bool {
        device.is_virtual() || self.controller_of(device) == Some(session)
    }

    /// Claim `device` for `session`, displacing any current controller.
    /// No-op for the virtual device.
    pub fn claim(&mut self, device: DeviceId, session: SessionId) {
        if device.is_virtual() {
            return;
        }
        self.controllers.insert(device, session);
    }

    /// Release `device` only if `session` currently controls it.
    pub fn release_if_controller(&mut self, device: &DeviceId, session: &SessionId) {
        if self.controller_of(device) == Some(session) {
            self.controllers.remove(device);
        }
    }

    pub fn release_device(&mut self, device: &DeviceId) {
        self.controllers.remove(device);
    }

    /// Drop every claim held by `session`; returns the devices released.
    pub fn release_session(&mut self, session: &SessionId) -> Vec<DeviceId> {
        let released: Vec<DeviceId> = self
            .controllers
            .iter()
            .filter(|(_, sid)| *sid == session)
            .map(|(device, _)| device.clone())
            .collect();
        for device in &released {
            self.controllers.remove(device);
        }
        released
    }
}

#[cfg(test)]
#[path = "tests/arbiter_tests.rs"]
mod tests;
