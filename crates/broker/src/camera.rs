//! Device-to-switcher-port table. Camera control intents address switcher
//! ports directly; the table lets observers map devices onto them.

use shared::domain::{CameraPortMapping, DeviceId};
use storage::CameraPortMap;

pub const MIN_CAMERA_PORT: u8 = 1;
pub const MAX_CAMERA_PORT: u8 = 8;

pub fn valid_port(port: u8) -> bool {
    (MIN_CAMERA_PORT..=MAX_CAMERA_PORT).contains(&port)
}

/// Stable, id-ordered view of the table for broadcasting.
pub fn mappings(ports: &CameraPortMap) -> Vec<CameraPortMapping> {
    let mut out: Vec<CameraPortMapping> = ports
        .iter()
        .map(|(device_id, port)| CameraPortMapping {
            device_id: device_id.clone(),
            port: *port,
        })
        .collect();
    out.sort_by(|a, b| a.device_id.0.cmp(&b.device_id.0));
    out
}

pub fn set_mapping(ports: &mut CameraPortMap, device: DeviceId, port: u8) {
    ports.insert(device, port);
}
