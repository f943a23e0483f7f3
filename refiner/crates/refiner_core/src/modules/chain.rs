use crate::modules::catalog::{EngineCatalog, EngineDescriptor, ParamRole};
use crate::modules::error::{RefineError, RefineResult};
use crate::modules::protocol::{
    Blueprint, BlueprintSlot, Intent, PresetRecord, ENGINE_NONE, MAX_ENGINE_ID, NEUTRAL_PARAM,
    PARAM_COUNT, SLOT_COUNT,
};
use tracing::warn;

pub const DEFAULT_PRESET_NAME: &str = "Refined Preset";
const DEFAULT_MIX: f32 = 0.5;

#[derive(Debug, Clone, PartialEq)]
pub struct Slot {
    pub index: usize,
    pub engine_id: u8,
    pub bypass: bool,
    pub mix: f32,
    pub parameters: [f32; PARAM_COUNT],
    /// Character tag the blueprint attached to this slot.
    pub character: Option<String>,
}

impl Slot {
    pub fn empty(index: usize) -> Self {
        Self {
            index,
            engine_id: ENGINE_NONE,
            bypass: false,
            mix: DEFAULT_MIX,
            parameters: [NEUTRAL_PARAM; PARAM_COUNT],
            character: None,
        }
    }

    /// A fresh slot running `engine` with every parameter at its role default.
    pub fn with_engine(index: usize, engine: &EngineDescriptor) -> Self {
        let mut slot = Self::empty(index);
        slot.engine_id = engine.id;
        for (i, role) in engine.roles.iter().enumerate() {
            slot.parameters[i] = role.default_value();
        }
        slot.set_mix(DEFAULT_MIX);
        slot
    }

    pub fn descriptor(&self) -> &'static EngineDescriptor {
        EngineCatalog::global().get_or_none(self.engine_id)
    }

    pub fn is_empty(&self) -> bool {
        self.engine_id == ENGINE_NONE
    }

    pub fn is_active(&self) -> bool {
        !self.is_empty() && !self.bypass
    }

    pub fn param(&self, index: usize) -> f32 {
        self.parameters.get(index).copied().unwrap_or(NEUTRAL_PARAM)
    }

    /// Writes a parameter clamped to [0,1]. Writes past the engine's
    /// parameter count are ignored; writes to the mix parameter update `mix`.
    pub fn set_param(&mut self, index: usize, value: f32) {
        let desc = self.descriptor();
        if index >= desc.param_count() {
            return;
        }
        let v = sanitize(value, NEUTRAL_PARAM);
        self.parameters[index] = v;
        if desc.mix_param_index() == Some(index) {
            self.mix = v;
        }
    }

    /// Adds `delta` to a parameter and returns the change actually applied.
    pub fn nudge_param(&mut self, index: usize, delta: f32) -> f32 {
        if index >= self.descriptor().param_count() {
            return 0.0;
        }
        let before = self.param(index);
        self.set_param(index, before + delta);
        self.param(index) - before
    }

    pub fn set_mix(&mut self, value: f32) {
        let v = sanitize(value, DEFAULT_MIX);
        self.mix = v;
        if let Some(idx) = self.descriptor().mix_param_index() {
            self.parameters[idx] = v;
        }
    }

    /// Indices of every parameter on this slot's engine carrying `role`.
    pub fn role_indices(&self, role: ParamRole) -> Vec<usize> {
        self.descriptor().indices_of(role).collect()
    }

    pub fn clear(&mut self) {
        *self = Self::empty(self.index);
    }
}

fn sanitize(value: f32, fallback: f32) -> f32 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        fallback
    }
}

/// The working preset handed from stage to stage.
#[derive(Debug, Clone, PartialEq)]
pub struct SlotChain {
    pub name: String,
    pub intent: Intent,
    pub slots: [Slot; SLOT_COUNT],
}

impl SlotChain {
    pub fn empty(name: &str, intent: Intent) -> Self {
        Self {
            name: name.to_string(),
            intent: sanitize_intent(intent),
            slots: std::array::from_fn(Slot::empty),
        }
    }

    pub fn from_blueprint(blueprint: &Blueprint, intent: &Intent) -> Self {
        Self::ingest(blueprint, intent).0
    }

    /// Builds a chain from raw creative output, coercing everything it
    /// cannot use. Returns the notes describing each coercion.
    pub fn ingest(blueprint: &Blueprint, intent: &Intent) -> (Self, Vec<String>) {
        let catalog = EngineCatalog::global();
        let mut notes: Vec<String> = Vec::new();
        let name = match blueprint.name.trim() {
            "" => DEFAULT_PRESET_NAME,
            n => n,
        };
        let mut chain = Self::empty(name, intent.clone());
        let mut taken = [false; SLOT_COUNT];

        // Explicitly placed entries claim their slots before positional ones.
        let (explicit, positional): (Vec<&BlueprintSlot>, Vec<&BlueprintSlot>) =
            blueprint.slots.iter().partition(|s| s.slot.is_some());

        for entry in explicit.into_iter().chain(positional) {
            let wanted = entry
                .slot
                .and_then(|i| usize::try_from(i).ok())
                .filter(|i| *i < SLOT_COUNT);
            if entry.slot.is_some() && wanted.is_none() {
                notes.push(format!(
                    "blueprint slot index {:?} out of range, placing positionally",
                    entry.slot
                ));
            }
            let target = match wanted {
                Some(i) if !taken[i] => Some(i),
                Some(i) => {
                    notes.push(format!("blueprint slot {i} given twice, placing positionally"));
                    taken.iter().position(|t| !t)
                }
                None => taken.iter().position(|t| !t),
            };
            let Some(target) = target else {
                notes.push(format!(
                    "dropped blueprint entry for engine {}: all {SLOT_COUNT} slots in use",
                    entry.engine_id
                ));
                continue;
            };
            taken[target] = true;

            let engine = match u8::try_from(entry.engine_id)
                .ok()
                .filter(|id| *id <= MAX_ENGINE_ID)
                .and_then(|id| catalog.get(id))
            {
                Some(e) => e,
                None => {
                    let err = RefineError::InvalidReference(format!(
                        "engine id {} in slot {target}",
                        entry.engine_id
                    ));
                    warn!(slot = target, engine = entry.engine_id, "{err}");
                    notes.push(format!("{err}, coerced to none"));
                    catalog.get_or_none(ENGINE_NONE)
                }
            };

            chain.slots[target] = ingest_slot(target, engine, entry, &mut notes);
        }

        (chain, notes)
    }

    /// Re-ingests a formatted preset without reinterpreting any value.
    pub fn from_record(record: &PresetRecord) -> Self {
        let mut chain = Self::empty(&record.name, Intent::default());
        for (i, src) in record.slots.iter().enumerate() {
            let slot = &mut chain.slots[i];
            if src.engine_id > MAX_ENGINE_ID {
                continue;
            }
            slot.engine_id = src.engine_id;
            slot.bypass = src.bypass;
            slot.mix = sanitize(src.mix, DEFAULT_MIX);
            for (dst, v) in slot.parameters.iter_mut().zip(src.parameters.iter()) {
                *dst = sanitize(*v, NEUTRAL_PARAM);
            }
        }
        chain
    }

    pub fn active(&self) -> impl Iterator<Item = &Slot> {
        self.slots.iter().filter(|s| s.is_active())
    }

    pub fn active_count(&self) -> usize {
        self.active().count()
    }

    pub fn active_indices(&self) -> Vec<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_active())
            .map(|(i, _)| i)
            .collect()
    }

    pub fn empty_indices(&self) -> Vec<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_empty())
            .map(|(i, _)| i)
            .collect()
    }

    pub fn reindex(&mut self) {
        for (i, slot) in self.slots.iter_mut().enumerate() {
            slot.index = i;
        }
    }

    /// Product of `0.5 + value` over every active gain, drive and output
    /// parameter. A chain of neutral (0.5) controls yields 1.0.
    pub fn gain_product(&self) -> f32 {
        self.active()
            .flat_map(|s| {
                let desc = s.descriptor();
                desc.roles
                    .iter()
                    .enumerate()
                    .filter(|(_, r)| r.is_gain_stage())
                    .map(move |(i, _)| 0.5 + s.param(i))
            })
            .product()
    }

    pub fn grid(&self) -> [[f32; PARAM_COUNT]; SLOT_COUNT] {
        std::array::from_fn(|i| self.slots[i].parameters)
    }

    /// Checks the invariants every stage must hand on.
    pub fn check_consistency(&self) -> RefineResult<()> {
        for (i, slot) in self.slots.iter().enumerate() {
            if slot.index != i {
                return Err(RefineError::InternalFailure(format!(
                    "slot {i} carries index {}",
                    slot.index
                )));
            }
            if slot.engine_id > MAX_ENGINE_ID {
                return Err(RefineError::InvalidReference(format!(
                    "engine id {} in slot {i}",
                    slot.engine_id
                )));
            }
            if !slot.mix.is_finite() {
                return Err(RefineError::InternalFailure(format!("non-finite mix in slot {i}")));
            }
            if let Some(p) = slot.parameters.iter().position(|v| !v.is_finite()) {
                return Err(RefineError::InternalFailure(format!(
                    "non-finite parameter {p} in slot {i}"
                )));
            }
        }
        Ok(())
    }
}

fn ingest_slot(
    index: usize,
    engine: &'static EngineDescriptor,
    entry: &BlueprintSlot,
    notes: &mut Vec<String>,
) -> Slot {
    let mut slot = Slot::empty(index);
    if engine.is_none() {
        return slot;
    }
    slot.engine_id = engine.id;
    slot.bypass = entry.bypass;
    slot.character = entry
        .character
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_ascii_lowercase);

    if entry.parameters.len() > engine.param_count() {
        notes.push(format!(
            "slot {index}: {} has {} parameters, ignored {} extra",
            engine.name,
            engine.param_count(),
            entry.parameters.len() - engine.param_count()
        ));
    }

    let explicit_mix = entry.mix.filter(|m| m.is_finite());
    for (i, role) in engine.roles.iter().enumerate() {
        let fallback = match (role, explicit_mix) {
            (ParamRole::Mix, Some(m)) => m.clamp(0.0, 1.0),
            _ => role.default_value(),
        };
        slot.parameters[i] = match entry.parameters.get(i) {
            Some(v) if v.is_finite() => v.clamp(0.0, 1.0),
            Some(v) => {
                notes.push(format!(
                    "slot {index}: non-finite value {v} for parameter {i}, using default"
                ));
                fallback
            }
            None => fallback,
        };
    }

    let mix = explicit_mix.map(|m| m.clamp(0.0, 1.0)).unwrap_or_else(|| {
        engine
            .mix_param_index()
            .map_or(DEFAULT_MIX, |idx| slot.parameters[idx])
    });
    slot.set_mix(mix);
    slot
}

fn sanitize_intent(mut intent: Intent) -> Intent {
    intent.intensity = sanitize(intent.intensity, 0.5);
    intent.space = sanitize(intent.space, 0.5);
    intent.mood = intent.mood.trim().to_ascii_lowercase();
    intent.character = intent.character.trim().to_ascii_lowercase();
    intent
}
