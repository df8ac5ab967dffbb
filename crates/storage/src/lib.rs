//! Best-effort JSON snapshots of operator configuration: the real-device
//! list, per-device position presets, and the camera-port table. Losing a
//! snapshot loses convenience, never correctness, so every load tolerates a
//! missing file.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use shared::domain::{Angles, DeviceId};
use tokio::fs;

const DEVICES_FILE: &str = "devices.json";
const PRESETS_FILE: &str = "presets.json";
const CAMERA_PORTS_FILE: &str = "camera_ports.json";

#[derive(Clone)]
pub struct Storage {
    root: PathBuf,
}

/// Configured real device. The virtual device is never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub id: DeviceId,
    pub name: String,
    pub address: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct DevicesFile {
    devices: Vec<DeviceRecord>,
}

pub type PresetMap = HashMap<DeviceId, BTreeMap<u8, Angles>>;
pub type CameraPortMap = HashMap<DeviceId, u8>;

#[derive(Debug, Default, Serialize, Deserialize)]
struct PresetsFile {
    presets: PresetMap,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CameraPortsFile {
    ports: CameraPortMap,
}

impl Storage {
    pub async fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)
            .await
            .with_context(|| format!("failed to create data directory '{}'", root.display()))?;
        Ok(Self { root })
    }

    pub async fn load_devices(&self) -> Result<Vec<DeviceRecord>> {
        Ok(self
            .load::<DevicesFile>(DEVICES_FILE)
            .await?
            .unwrap_or_default()
            .devices)
    }

    pub async fn save_devices(&self, devices: &[DeviceRecord]) -> Result<()> {
        self.save(
            DEVICES_FILE,
            &DevicesFile {
                devices: devices.to_vec(),
            },
        )
        .await
    }

    pub async fn load_presets(&self) -> Result<PresetMap> {
        Ok(self
            .load::<PresetsFile>(PRESETS_FILE)
            .await?
            .unwrap_or_default()
            .presets)
    }

    pub async fn save_presets(&self, presets: &PresetMap) -> Result<()> {
        self.save(
            PRESETS_FILE,
            &PresetsFile {
                presets: presets.clone(),
            },
        )
        .await
    }

    pub async fn load_camera_ports(&self) -> Result<CameraPortMap> {
        Ok(self
            .load::<CameraPortsFile>(CAMERA_PORTS_FILE)
            .await?
            .unwrap_or_default()
            .ports)
    }

    pub async fn save_camera_ports(&self, ports: &CameraPortMap) -> Result<()> {
        self.save(
            CAMERA_PORTS_FILE,
            &CameraPortsFile {
                ports: ports.clone(),
            },
        )
        .await
    }

    async fn load<T: for<'de> Deserialize<'de>>(&self, file: &str) -> Result<Option<T>> {
        let path = self.root.join(file);
        let raw = match fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to read '{}'", path.display()))
            }
        };
        let parsed = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse '{}'", path.display()))?;
        Ok(Some(parsed))
    }

    async fn save<T: Serialize>(&self, file: &str, value: &T) -> Result<()> {
        let path = self.root.join(file);
        let raw = serde_json::to_string_pretty(value).context("failed to serialize snapshot")?;
        fs::write(&path, raw)
            .await
            .with_context(|| format!("failed to write '{}'", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
