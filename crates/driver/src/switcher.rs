use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SwitcherError {
    #[error("switcher is not connected")]
    NotConnected,
    #[error("switcher unreachable")]
    Unreachable,
}

/// Camera-switcher binding. Ports address the physical camera inputs.
#[async_trait]
pub trait CameraSwitcher: Send + Sync {
    async fn connect(&self, address: &str) -> Result<(), SwitcherError>;
    async fn disconnect(&self);
    async fn set_focus(&self, port: u8, value: f64) -> Result<(), SwitcherError>;
    async fn auto_focus(&self, port: u8) -> Result<(), SwitcherError>;
    async fn set_aperture(&self, port: u8, value: f64) -> Result<(), SwitcherError>;
    async fn auto_aperture(&self, port: u8) -> Result<(), SwitcherError>;
    async fn set_gain(&self, port: u8, value: f64) -> Result<(), SwitcherError>;
    async fn set_zoom_speed(&self, port: u8, value: f64) -> Result<(), SwitcherError>;
    async fn set_zoom_position(&self, port: u8, value: f64) -> Result<(), SwitcherError>;
}

/// Switcher used when no native binding is present: connection attempts fail
/// gracefully and every control reports the missing link.
pub struct NoHardwareSwitcher;

#[async_trait]
impl CameraSwitcher for NoHardwareSwitcher {
    async fn connect(&self, _address: &str) -> Result<(), SwitcherError> {
        Err(SwitcherError::Unreachable)
    }

    async fn disconnect(&self) {}

    async fn set_focus(&self, _port: u8, _value: f64) -> Result<(), SwitcherError> {
        Err(SwitcherError::NotConnected)
    }

    async fn auto_focus(&self, _port: u8) -> Result<(), SwitcherError> {
        Err(SwitcherError::NotConnected)
    }

    async fn set_aperture(&self, _port: u8, _value: f64) -> Result<(), SwitcherError> {
        Err(SwitcherError::NotConnected)
    }

    async fn auto_aperture(&self, _port: u8) -> Result<(), SwitcherError> {
        Err(SwitcherError::NotConnected)
    }

    async fn set_gain(&self, _port: u8, _value: f64) -> Result<(), SwitcherError> {
        Err(SwitcherError::NotConnected)
    }

    async fn set_zoom_speed(&self, _port: u8, _value: f64) -> Result<(), SwitcherError> {
        Err(SwitcherError::NotConnected)
    }

    async fn set_zoom_position(&self, _port: u8, _value: f64) -> Result<(), SwitcherError> {
        Err(SwitcherError::NotConnected)
    }
}

/// Switcher stand-in that records the last value per port and control.
pub struct SimulatedSwitcher {
    state: Mutex<SwitcherState>,
}

#[derive(Debug, Default)]
struct SwitcherState {
    connected_to: Option<String>,
    values: HashMap<(u8, &'static str), f64>,
}

impl SimulatedSwitcher {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SwitcherState::default()),
        }
    }

    pub fn connected_to(&self) -> Option<String> {
        self.state.lock().expect("switcher state").connected_to.clone()
    }

    pub fn last_value(&self, port: u8, control: &'static str) -> Option<f64> {
        self.state
            .lock()
            .expect("switcher state")
            .values
            .get(&(port, control))
            .copied()
    }

    fn record(&self, port: u8, control: &'static str, value: f64) -> Result<(), SwitcherError> {
        let mut state = self.state.lock().expect("switcher state");
        if state.connected_to.is_none() {
            return Err(SwitcherError::NotConnected);
        }
        state.values.insert((port, control), value);
        Ok(())
    }
}

impl Default for SimulatedSwitcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CameraSwitcher for SimulatedSwitcher {
    async fn connect(&self, address: &str) -> Result<(), SwitcherError> {
        let mut state = self.state.lock().expect("switcher state");
        state.connected_to = Some(address.to_string());
        Ok(())
    }

    async fn disconnect(&self) {
        let mut state = self.state.lock().expect("switcher state");
        state.connected_to = None;
    }

    async fn set_focus(&self, port: u8, value: f64) -> Result<(), SwitcherError> {
        self.record(port, "focus", value)
    }

    async fn auto_focus(&self, port: u8) -> Result<(), SwitcherError> {
        self.record(port, "auto_focus", 1.0)
    }

    async fn set_aperture(&self, port: u8, value: f64) -> Result<(), SwitcherError> {
        self.record(port, "aperture", value)
    }

    async fn auto_aperture(&self, port: u8) -> Result<(), SwitcherError> {
        self.record(port, "auto_aperture", 1.0)
    }

    async fn set_gain(&self, port: u8, value: f64) -> Result<(), SwitcherError> {
        self.record(port, "gain", value)
    }

    async fn set_zoom_speed(&self, port: u8, value: f64) -> Result<(), SwitcherError> {
        self.record(port, "zoom_speed", value)
    }

    async fn set_zoom_position(&self, port: u8, value: f64) -> Result<(), SwitcherError> {
        self.record(port, "zoom_position", value)
    }
}
