use std::fs;

use serde::Deserialize;

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub server_bind: String,
    pub data_dir: String,
    pub simulate_hardware: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_bind: "127.0.0.1:3001".into(),
            data_dir: "./data".into(),
            simulate_hardware: false,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct FileSettings {
    pub bind_addr: Option<String>,
    pub data_dir: Option<String>,
    pub simulate_hardware: Option<bool>,
}

/// Defaults, overlaid by an optional `broker.toml`, overlaid by environment
/// variables.
pub fn load_settings() -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string("broker.toml") {
        match toml::from_str::<FileSettings>(&raw) {
            Ok(file_cfg) => overlay_file(&mut settings, &file_cfg),
            Err(err) => tracing::warn!(%err, "ignoring malformed broker.toml"),
        }
    }

    if let Ok(v) = std::env::var("BROKER_BIND") {
        settings.server_bind = v;
    }
    if let Ok(v) = std::env::var("APP__BIND_ADDR") {
        settings.server_bind = v;
    }

    if let Ok(v) = std::env::var("BROKER_DATA_DIR") {
        settings.data_dir = v;
    }
    if let Ok(v) = std::env::var("APP__DATA_DIR") {
        settings.data_dir = v;
    }

    if let Ok(v) = std::env::var("BROKER_SIMULATE_HARDWARE") {
        if let Some(parsed) = parse_bool(&v) {
            settings.simulate_hardware = parsed;
        }
    }
    if let Ok(v) = std::env::var("APP__SIMULATE_HARDWARE") {
        if let Some(parsed) = parse_bool(&v) {
            settings.simulate_hardware = parsed;
        }
    }

    settings
}

pub fn overlay_file(settings: &mut Settings, file_cfg: &FileSettings) {
    if let Some(v) = &file_cfg.bind_addr {
        settings.server_bind = v.clone();
    }
    if let Some(v) = &file_cfg.data_dir {
        settings.data_dir = v.clone();
    }
    if let Some(v) = file_cfg.simulate_hardware {
        settings.simulate_hardware = v;
    }
}

pub fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
