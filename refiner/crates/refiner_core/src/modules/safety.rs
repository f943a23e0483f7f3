use crate::modules::catalog::{ids, Category, EngineCatalog, ParamRole, UtilityJob};
use crate::modules::chain::{Slot, SlotChain};
use crate::modules::config::RefinerConfig;
use crate::modules::error::{RefineError, RefineResult};
use crate::modules::protocol::{Intent, ValidationReport, NEUTRAL_PARAM, PARAM_COUNT};
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::{error, warn};

const GAIN_CORRECTION_HIGH: f32 = 1.5;
const GAIN_CORRECTION_LOW: f32 = 0.6;
const LOW_TONE: f32 = 0.4;
const WIDE_SPACE: f32 = 0.7;

/// Plate reverb settings used whenever a chain has to be rebuilt from nothing.
const SAFE_PLATE: [f32; 8] = [0.4, 0.6, 0.2, 0.2, 0.6, 0.2, 0.7, 0.25];

/// A single conservative plate reverb in slot 0. The last-resort preset.
pub fn minimal_safe_chain(name: &str) -> SlotChain {
    let mut chain = SlotChain::empty(name, Intent::default());
    chain.slots[0] = safe_default_slot(0);
    chain
}

fn safe_default_slot(index: usize) -> Slot {
    let plate = EngineCatalog::global().get_or_none(ids::PLATE_REVERB);
    let mut slot = Slot::with_engine(index, plate);
    for (i, v) in SAFE_PLATE.iter().enumerate() {
        slot.set_param(i, *v);
    }
    slot
}

/// Final pass before a preset reaches the audio engine. Never fails: any
/// error or panic inside the phases yields [`minimal_safe_chain`].
pub struct SafetyValidator<'a> {
    config: &'a RefinerConfig,
}

impl<'a> SafetyValidator<'a> {
    pub fn new(config: &'a RefinerConfig) -> Self {
        Self { config }
    }

    pub fn validate(&self, chain: SlotChain) -> (SlotChain, ValidationReport) {
        let name = chain.name.clone();
        let outcome = catch_unwind(AssertUnwindSafe(|| self.run_phases(chain)));
        let failure = match outcome {
            Ok(Ok(done)) => return done,
            Ok(Err(e)) => e,
            Err(panic) => RefineError::InternalFailure(panic_message(&*panic)),
        };

        error!("safety validation fell back to minimal preset: {failure}");
        let mut report = ValidationReport::default();
        report.error(failure.to_string());
        report.modified("replaced chain with minimal safe preset");
        (minimal_safe_chain(&name), report)
    }

    fn run_phases(&self, mut chain: SlotChain) -> RefineResult<(SlotChain, ValidationReport)> {
        let mut report = ValidationReport::default();
        self.clamp_ranges(&mut chain, &mut report);
        self.mitigate_combinations(&mut chain, &mut report);
        self.ensure_liveness(&mut chain, &mut report);
        self.enforce_mix_floor(&mut chain, &mut report);
        self.inject_utilities(&mut chain, &mut report);
        self.verify(&chain)?;
        Ok((chain, report))
    }

    /// Phase A.
    fn clamp_ranges(&self, chain: &mut SlotChain, report: &mut ValidationReport) {
        let catalog = EngineCatalog::global();
        chain.reindex();
        for slot in chain.slots.iter_mut() {
            let Some(desc) = catalog.get(slot.engine_id) else {
                let err = RefineError::InvalidReference(format!(
                    "engine id {} in slot {}",
                    slot.engine_id, slot.index
                ));
                warn!(slot = slot.index, "{err}");
                report.warn(format!("{err}, slot reset"));
                slot.clear();
                continue;
            };
            if desc.is_none() {
                slot.clear();
                continue;
            }

            let mut clamped = 0;
            for i in 0..PARAM_COUNT {
                let before = slot.parameters[i];
                let after = match desc.role(i) {
                    None => NEUTRAL_PARAM,
                    Some(role) => {
                        let mut bound = role.upper_bound();
                        if role == ParamRole::Feedback {
                            bound = bound.min(self.config.feedback_hard_ceiling);
                        }
                        if before.is_finite() {
                            before.clamp(0.0, bound)
                        } else {
                            role.default_value().min(bound)
                        }
                    }
                };
                if after.to_bits() != before.to_bits() {
                    slot.parameters[i] = after;
                    clamped += 1;
                }
            }

            // The slot mix is authoritative over a diverging mix parameter.
            let mix = if slot.mix.is_finite() {
                slot.mix.clamp(0.0, 1.0)
            } else {
                NEUTRAL_PARAM
            };
            if mix.to_bits() != slot.mix.to_bits()
                || desc
                    .mix_param_index()
                    .is_some_and(|idx| slot.parameters[idx].to_bits() != mix.to_bits())
            {
                clamped += 1;
            }
            slot.set_mix(mix);

            if clamped > 0 {
                report.modified(format!(
                    "slot {}: clamped {clamped} value(s) on {}",
                    slot.index, desc.name
                ));
            }
        }
    }

    /// Phase B.
    fn mitigate_combinations(&self, chain: &mut SlotChain, report: &mut ValidationReport) {
        let distortions = active_in(chain, Category::Distortion);
        if distortions.len() > self.config.max_distortion_stack {
            for idx in &distortions[self.config.max_distortion_stack..] {
                let slot = &mut chain.slots[*idx];
                for p in slot.role_indices(ParamRole::Drive) {
                    slot.set_param(p, slot.param(p) * 0.5);
                }
                report.modified(format!("slot {idx}: drive halved (distortion stack)"));
            }
            report.warn(format!(
                "distortion stack: {} distortion engines, drive halved on the excess",
                distortions.len()
            ));
        }

        let delays = active_in(chain, Category::Delay);
        let reverbs = active_in(chain, Category::Reverb);
        if !delays.is_empty() && !reverbs.is_empty() {
            let loop_params: Vec<(usize, usize)> = delays
                .iter()
                .chain(reverbs.iter())
                .flat_map(|idx| {
                    chain.slots[*idx]
                        .role_indices(ParamRole::Feedback)
                        .into_iter()
                        .map(move |p| (*idx, p))
                })
                .collect();
            let combined: f32 = loop_params
                .iter()
                .map(|(idx, p)| chain.slots[*idx].param(*p))
                .sum();
            let cap = self.config.combined_feedback_cap;
            if combined > cap {
                let scale = cap / combined;
                for (idx, p) in &loop_params {
                    let slot = &mut chain.slots[*idx];
                    slot.set_param(*p, slot.param(*p) * scale);
                }
                report.warn(format!(
                    "feedback loop: delay + reverb feedback {combined:.3} scaled to {cap}"
                ));
            }
        }

        if reverbs.len() > self.config.max_reverbs {
            for idx in &reverbs[self.config.max_reverbs..] {
                let slot = &mut chain.slots[*idx];
                slot.set_mix(slot.mix * 0.5);
                report.modified(format!("slot {idx}: mix halved (multiple reverbs)"));
            }
            report.warn(format!(
                "multiple reverbs: {} reverb engines, mix halved on the excess",
                reverbs.len()
            ));
        }

        let resonant = chain
            .active()
            .flat_map(|s| {
                s.role_indices(ParamRole::Resonance)
                    .into_iter()
                    .map(move |p| s.param(p))
            })
            .filter(|v| *v > self.config.resonance_alert)
            .count();
        if resonant >= 2 {
            report.warn(format!(
                "resonance buildup: {resonant} resonance controls above {}",
                self.config.resonance_alert
            ));
        }

        let heavy = chain.active().filter(|s| s.descriptor().cpu_heavy).count();
        if heavy >= self.config.cpu_heavy_limit {
            report.warn(format!("cpu overload: {heavy} heavy engines in one chain"));
        }
    }

    /// Phase C.
    fn ensure_liveness(&self, chain: &mut SlotChain, report: &mut ValidationReport) {
        if chain.active_count() > 0 {
            return;
        }
        let err = RefineError::StructuralDeficiency("no active slot".into());
        warn!("{err}");
        chain.slots[0] = safe_default_slot(0);
        report.warn(format!("{err}, slot 0 set to safe default"));
        report.modified("slot 0: safe default plate reverb");
    }

    /// Phase D.
    fn enforce_mix_floor(&self, chain: &mut SlotChain, report: &mut ValidationReport) {
        let active = chain.active_indices();
        let floor = self.config.mix_floor_for(active.len());
        for idx in active {
            let slot = &mut chain.slots[idx];
            if slot.mix < floor {
                slot.set_mix(floor);
                report.modified(format!("slot {idx}: mix raised to floor {floor}"));
            }
        }
    }

    /// Phase E.
    fn inject_utilities(&self, chain: &mut SlotChain, report: &mut ValidationReport) {
        let catalog = EngineCatalog::global();
        let needs = self.detect_needs(chain);
        let mut free = chain.empty_indices().into_iter();

        for (job, setting) in needs {
            let Some(desc) = catalog.utility_for(job) else {
                continue;
            };
            let Some(idx) = free.next() else {
                report.warn(format!("no empty slot left for {}", desc.name));
                break;
            };
            let mut slot = Slot::with_engine(idx, desc);
            slot.set_mix(1.0);
            if let Some((param, value)) = setting {
                slot.set_param(param, value);
            }
            chain.slots[idx] = slot;
            report.modified(format!("slot {idx}: injected {}", desc.name));
        }
    }

    /// Utility jobs the chain needs, in priority order, with an optional
    /// initial parameter setting.
    fn detect_needs(&self, chain: &SlotChain) -> Vec<(UtilityJob, Option<(usize, f32)>)> {
        let catalog = EngineCatalog::global();
        let present = |job: UtilityJob| chain.active().any(|s| s.descriptor().utility == Some(job));
        let mut needs = Vec::new();

        let product = chain.gain_product();
        if !present(UtilityJob::GainCorrection)
            && !(GAIN_CORRECTION_LOW..=GAIN_CORRECTION_HIGH).contains(&product)
        {
            let trim = (1.0 / product.max(f32::EPSILON) - 0.5).clamp(0.0, 1.0);
            let param = catalog
                .utility_for(UtilityJob::GainCorrection)
                .and_then(|d| d.first_index_of(ParamRole::Output));
            needs.push((UtilityJob::GainCorrection, param.map(|p| (p, trim))));
        }

        let time_based = chain
            .active()
            .filter(|s| s.descriptor().category.is_time_based())
            .count();
        if time_based >= 2 && !present(UtilityJob::PhaseAlignment) {
            needs.push((UtilityJob::PhaseAlignment, None));
        }

        let tones: Vec<f32> = chain
            .active()
            .flat_map(|s| {
                s.role_indices(ParamRole::Tone)
                    .into_iter()
                    .map(move |p| s.param(p))
            })
            .collect();
        let low_tone =
            !tones.is_empty() && tones.iter().sum::<f32>() / (tones.len() as f32) < LOW_TONE;
        let bass_engine = chain.active().any(|s| s.descriptor().bass_emphasis);
        if bass_engine && low_tone && !present(UtilityJob::MonoCompatibility) {
            needs.push((UtilityJob::MonoCompatibility, None));
        }

        let spatial = chain
            .active()
            .any(|s| s.descriptor().category == Category::Spatial);
        if chain.intent.space >= WIDE_SPACE && !spatial && !present(UtilityJob::MidSideWidth) {
            let param = catalog
                .utility_for(UtilityJob::MidSideWidth)
                .and_then(|d| d.first_index_of(ParamRole::Width));
            needs.push((UtilityJob::MidSideWidth, param.map(|p| (p, chain.intent.space))));
        }

        needs
    }

    fn verify(&self, chain: &SlotChain) -> RefineResult<()> {
        chain.check_consistency()?;
        if chain.active_count() == 0 {
            return Err(RefineError::StructuralDeficiency(
                "no active slot after repair".into(),
            ));
        }
        for slot in &chain.slots {
            let desc = slot.descriptor();
            for (i, v) in slot.parameters.iter().enumerate() {
                let mut bound = desc.upper_bound(i);
                if desc.role(i) == Some(ParamRole::Feedback) {
                    bound = bound.min(self.config.feedback_hard_ceiling);
                }
                if !(0.0..=bound).contains(v) {
                    return Err(RefineError::InternalFailure(format!(
                        "slot {} param {i} = {v} outside [0, {bound}]",
                        slot.index
                    )));
                }
            }
            if !(0.0..=1.0).contains(&slot.mix) {
                return Err(RefineError::InternalFailure(format!(
                    "slot {} mix = {} outside [0, 1]",
                    slot.index, slot.mix
                )));
            }
        }
        Ok(())
    }
}

fn active_in(chain: &SlotChain, category: Category) -> Vec<usize> {
    chain
        .active_indices()
        .into_iter()
        .filter(|i| chain.slots[*i].descriptor().category == category)
        .collect()
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}
