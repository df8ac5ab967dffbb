//! Numbered position presets, slots 1-9 per device. Recall rides the same
//! interpolation path as homing.

use shared::domain::{Angles, DeviceId, PresetSummary};
use storage::PresetMap;

pub const MIN_PRESET_SLOT: u8 = 1;
pub const MAX_PRESET_SLOT: u8 = 9;

pub fn valid_slot(slot: u8) -> bool {
    (MIN_PRESET_SLOT..=MAX_PRESET_SLOT).contains(&slot)
}

#[derive(Debug, Default)]
pub struct PresetStore {
    presets: PresetMap,
}

impl PresetStore {
    pub fn from_map(presets: PresetMap) -> Self {
        Self { presets }
    }

    pub fn as_map(&self) -> &PresetMap {
        &self.presets
    }

    pub fn save(&mut self, device: &DeviceId, slot: u8, position: Angles) {
        self.presets
            .entry(device.clone())
            .or_default()
            .insert(slot, position);
    }

    pub fn recall(&self, device: &DeviceId, slot: u8) -> Option<Angles> {
        self.presets
            .get(device)
            .and_then(|slots| slots.get(&slot))
            .copied()
    }

    pub fn delete(&mut self, device: &DeviceId, slot: u8) -> bool {
        self.presets
            .get_mut(device)
            .map(|slots| slots.remove(&slot).is_some())
            .unwrap_or(false)
    }

    pub fn list(&self, device: &DeviceId) -> Vec<PresetSummary> {
        self.presets
            .get(device)
            .map(|slots| {
                slots
                    .iter()
                    .map(|(slot, position)| PresetSummary {
                        slot: *slot,
                        position: *position,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn remove_device(&mut self, device: &DeviceId) {
        self.presets.remove(device);
    }
}
