//! Per-connection client sessions: auto-assigned identity and the device the
//! client currently has selected.

use std::collections::HashMap;

use shared::domain::{DeviceId, SessionId};

pub const MAX_NAME_CHARS: usize = 20;

#[derive(Debug, Clone)]
pub struct ClientSession {
    pub name: String,
    pub selected: DeviceId,
}

#[derive(Debug, Default)]
pub struct SessionManager {
    sessions: HashMap<SessionId, ClientSession>,
    counter: u64,
}

impl SessionManager {
    /// Get-or-create. Fresh sessions select the virtual device and get a
    /// numbered display name.
    pub fn session_for(&mut self, id: &SessionId) -> &ClientSession {
        if !self.sessions.contains_key(id) {
            self.counter += 1;
            self.sessions.insert(
                id.clone(),
                ClientSession {
                    name: format!("User {}", self.counter),
                    selected: DeviceId::virtual_device(),
                },
            );
        }
        &self.sessions[id]
    }

    pub fn get(&self, id: &SessionId) -> Option<&ClientSession> {
        self.sessions.get(id)
    }

    pub fn name_of(&self, id: &SessionId) -> Option<String> {
        self.sessions.get(id).map(|s| s.name.clone())
    }

    pub fn set_selected(&mut self, id: &SessionId, device: DeviceId) {
        self.session_for(id);
        if let Some(session) = self.sessions.get_mut(id) {
            session.selected = device;
        }
    }

    pub fn selected_of(&mut self, id: &SessionId) -> DeviceId {
        self.session_for(id).selected.clone()
    }

    /// Sanitize and store a proposed display name; returns the stored name.
    pub fn rename(&mut self, id: &SessionId, proposed: &str) -> String {
        self.session_for(id);
        let name = sanitize_name(proposed, id);
        if let Some(session) = self.sessions.get_mut(id) {
            session.name = name.clone();
        }
        name
    }

    pub fn remove(&mut self, id: &SessionId) -> Option<ClientSession> {
        self.sessions.remove(id)
    }

    /// Point every session that had `device` selected back at the virtual
    /// device (used when a device is removed from the registry).
    pub fn reset_selections_of(&mut self, device: &DeviceId) -> Vec<SessionId> {
        let mut reset = Vec::new();
        for (id, session) in self.sessions.iter_mut() {
            if session.selected == *device {
                session.selected = DeviceId::virtual_device();
                reset.push(id.clone());
            }
        }
        reset
    }
}

fn sanitize_name(proposed: &str, session_id: &SessionId) -> String {
    let trimmed = proposed.trim();
    if trimmed.is_empty() {
        let prefix: String = session_id.0.chars().take(6).collect();
        return format!("User-{prefix}");
    }
    trimmed.chars().take(MAX_NAME_CHARS).collect()
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
