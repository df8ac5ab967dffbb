use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use shared::domain::Angles;

use crate::{
    DriverError, DriverInfo, GimbalConfig, GimbalConnector, GimbalDriver,
};

/// In-process gimbal with the native driver's exact validation behavior.
/// Backs the virtual device's setter paths and stands in for hardware in
/// tests and simulation deployments.
pub struct SimulatedGimbal {
    info: DriverInfo,
    state: Mutex<SimState>,
}

#[derive(Debug)]
struct SimState {
    active: bool,
    position: Angles,
    speed: Angles,
    config: GimbalConfig,
    focus_pct: f64,
    tracking: bool,
}

impl SimulatedGimbal {
    pub fn new(address: &str) -> Self {
        Self {
            info: DriverInfo {
                name: "Simulated Gimbal".to_string(),
                address: address.to_string(),
                version: "0.0.0".to_string(),
            },
            state: Mutex::new(SimState {
                active: false,
                position: Angles::ZERO,
                speed: Angles::ZERO,
                config: GimbalConfig::default(),
                focus_pct: 50.0,
                tracking: false,
            }),
        }
    }

    /// Already-activated variant, for callers that skip the detect/activate
    /// handshake (the broker's virtual device).
    pub fn activated(address: &str) -> Self {
        let sim = Self::new(address);
        sim.state.lock().expect("sim state").active = true;
        sim
    }

    pub fn tracking(&self) -> bool {
        self.state.lock().expect("sim state").tracking
    }

    pub fn focus_pct(&self) -> f64 {
        self.state.lock().expect("sim state").focus_pct
    }
}

#[async_trait]
impl GimbalDriver for SimulatedGimbal {
    async fn activate(&self) -> Result<(), DriverError> {
        let mut state = self.state.lock().expect("sim state");
        if state.active {
            return Err(DriverError::AlreadyActive);
        }
        state.active = true;
        Ok(())
    }

    async fn release(&self) {
        let mut state = self.state.lock().expect("sim state");
        state.active = false;
        state.speed = Angles::ZERO;
    }

    async fn position(&self) -> Result<Angles, DriverError> {
        let state = self.state.lock().expect("sim state");
        if !state.active {
            return Err(DriverError::NotActivated);
        }
        Ok(state.position)
    }

    async fn set_position(&self, target: Angles) -> Result<(), DriverError> {
        let mut state = self.state.lock().expect("sim state");
        if !state.active {
            return Err(DriverError::NotActivated);
        }
        state.config.validate_position(target)?;
        state.position = target;
        Ok(())
    }

    async fn set_speed(&self, speed: Angles) -> Result<(), DriverError> {
        let mut state = self.state.lock().expect("sim state");
        if !state.active {
            return Err(DriverError::NotActivated);
        }
        state.config.validate_speed(speed)?;
        state.speed = speed;
        Ok(())
    }

    async fn stop(&self) -> Result<(), DriverError> {
        let mut state = self.state.lock().expect("sim state");
        if !state.active {
            return Err(DriverError::NotActivated);
        }
        state.speed = Angles::ZERO;
        Ok(())
    }

    async fn config(&self) -> Result<GimbalConfig, DriverError> {
        Ok(self.state.lock().expect("sim state").config)
    }

    async fn set_config(&self, config: GimbalConfig) -> Result<(), DriverError> {
        let mut state = self.state.lock().expect("sim state");
        if !state.active {
            return Err(DriverError::NotActivated);
        }
        state.config = config;
        Ok(())
    }

    async fn info(&self) -> Result<DriverInfo, DriverError> {
        Ok(self.info.clone())
    }

    async fn set_focus(&self, pct: f64) -> Result<(), DriverError> {
        let mut state = self.state.lock().expect("sim state");
        if !state.active {
            return Err(DriverError::NotActivated);
        }
        state.focus_pct = pct.clamp(0.0, 100.0);
        Ok(())
    }

    async fn toggle_tracking(&self) -> Result<(), DriverError> {
        let mut state = self.state.lock().expect("sim state");
        if !state.active {
            return Err(DriverError::NotActivated);
        }
        state.tracking = !state.tracking;
        Ok(())
    }
}

/// Connector that fabricates a simulated gimbal for any address. Used by the
/// server's simulation mode and by broker tests.
pub struct SimulatedConnector;

#[async_trait]
impl GimbalConnector for SimulatedConnector {
    async fn detect(&self) -> Result<usize, DriverError> {
        Ok(1)
    }

    async fn connect(&self, address: &str) -> Result<Arc<dyn GimbalDriver>, DriverError> {
        let driver = SimulatedGimbal::new(address);
        driver.activate().await?;
        Ok(Arc::new(driver))
    }
}
