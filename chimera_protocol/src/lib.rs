use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const SLOT_COUNT: usize = 6;
pub const PARAM_COUNT: usize = 15;
pub const ENGINE_NONE: u8 = 0;
pub const MAX_ENGINE_ID: u8 = 56;

/// Value written into every parameter an engine does not define.
pub const NEUTRAL_PARAM: f32 = 0.5;

/// Raw creative output, before any refinement.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Blueprint {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub slots: Vec<BlueprintSlot>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct BlueprintSlot {
    /// Explicit target slot; positional order is used when absent.
    #[serde(default)]
    pub slot: Option<i64>,
    pub engine_id: i64,
    #[serde(default)]
    pub character: Option<String>,
    #[serde(default)]
    pub parameters: Vec<f32>,
    #[serde(default)]
    pub mix: Option<f32>,
    #[serde(default)]
    pub bypass: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Intent {
    pub mood: String,
    pub intensity: f32,
    pub space: f32,
    pub character: String,
    pub request_text: String,
}

impl Default for Intent {
    fn default() -> Self {
        Self {
            mood: String::new(),
            intensity: 0.5,
            space: 0.5,
            character: String::new(),
            request_text: String::new(),
        }
    }
}

/// Plugin-ready preset: always exactly six slots of fifteen parameters.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PresetRecord {
    pub name: String,
    pub slots: [PresetSlot; SLOT_COUNT],
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct PresetSlot {
    pub engine_id: u8,
    pub bypass: bool,
    pub mix: f32,
    pub parameters: [f32; PARAM_COUNT],
}

impl Default for PresetSlot {
    fn default() -> Self {
        Self {
            engine_id: ENGINE_NONE,
            bypass: false,
            mix: NEUTRAL_PARAM,
            parameters: [NEUTRAL_PARAM; PARAM_COUNT],
        }
    }
}

impl PresetRecord {
    /// Flattens into the plugin's parameter namespace (`slot1_engine`, `slot1_param1`, ...).
    pub fn to_parameter_map(&self) -> BTreeMap<String, f32> {
        let mut out = BTreeMap::new();
        for (i, slot) in self.slots.iter().enumerate() {
            let n = i + 1;
            out.insert(format!("slot{n}_engine"), f32::from(slot.engine_id));
            out.insert(
                format!("slot{n}_bypass"),
                if slot.bypass { 1.0 } else { 0.0 },
            );
            out.insert(format!("slot{n}_mix"), slot.mix);
            for (p, value) in slot.parameters.iter().enumerate() {
                out.insert(format!("slot{n}_param{}", p + 1), *value);
            }
        }
        out
    }

    /// Inverse of [`PresetRecord::to_parameter_map`]. Missing keys fall back to an empty slot.
    pub fn from_parameter_map(name: &str, map: &BTreeMap<String, f32>) -> Self {
        let mut slots = [PresetSlot::default(); SLOT_COUNT];
        for (i, slot) in slots.iter_mut().enumerate() {
            let n = i + 1;
            if let Some(v) = map.get(&format!("slot{n}_engine")) {
                let id = v.round();
                slot.engine_id = if (0.0..=f32::from(MAX_ENGINE_ID)).contains(&id) {
                    id as u8
                } else {
                    ENGINE_NONE
                };
            }
            if let Some(v) = map.get(&format!("slot{n}_bypass")) {
                slot.bypass = *v >= 0.5;
            }
            if let Some(v) = map.get(&format!("slot{n}_mix")) {
                slot.mix = *v;
            }
            for (p, value) in slot.parameters.iter_mut().enumerate() {
                if let Some(v) = map.get(&format!("slot{n}_param{}", p + 1)) {
                    *value = *v;
                }
            }
        }
        Self {
            name: name.to_string(),
            slots,
        }
    }
}

/// Telemetry attached to a refined preset. Not needed to use the preset.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub modifications: Vec<String>,
}

impl Default for ValidationReport {
    fn default() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
            modifications: Vec::new(),
        }
    }
}

impl ValidationReport {
    pub fn error(&mut self, msg: impl Into<String>) {
        self.valid = false;
        self.errors.push(msg.into());
    }

    pub fn warn(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }

    pub fn modified(&mut self, msg: impl Into<String>) {
        self.modifications.push(msg.into());
    }

    pub fn merge(&mut self, other: ValidationReport) {
        self.valid &= other.valid;
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
        self.modifications.extend(other.modifications);
    }
}
