use crate::modules::chain::{Slot, SlotChain};
use crate::modules::protocol::{PresetRecord, PresetSlot, NEUTRAL_PARAM, PARAM_COUNT};

/// Flattens a chain into the fixed 6 x 15 plugin layout.
#[derive(Debug, Default, Clone, Copy)]
pub struct PresetFormatter;

impl PresetFormatter {
    pub fn new() -> Self {
        Self
    }

    pub fn format(&self, chain: &SlotChain) -> PresetRecord {
        PresetRecord {
            name: chain.name.clone(),
            slots: std::array::from_fn(|i| format_slot(&chain.slots[i])),
        }
    }
}

fn format_slot(slot: &Slot) -> PresetSlot {
    let defined = slot.descriptor().param_count();
    let mut parameters = [NEUTRAL_PARAM; PARAM_COUNT];
    parameters[..defined].copy_from_slice(&slot.parameters[..defined]);
    PresetSlot {
        engine_id: slot.engine_id,
        bypass: slot.bypass,
        mix: slot.mix,
        parameters,
    }
}
