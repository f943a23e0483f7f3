use crate::modules::catalog::{Category, ParamRole};
use crate::modules::chain::SlotChain;
use crate::modules::config::{RefinerConfig, DEFAULT_RATE_RATIOS, DEFAULT_SPECTRUM_ANCHORS};
use crate::modules::error::RefineError;
use tracing::{debug, warn};

const BISECTION_STEPS: usize = 60;
const MIN_BASE_RATE: f32 = 0.05;

/// Cross-slot numeric constraints: gain staging, feedback accumulation,
/// frequency staggering, modulation-rate diversity and mix density.
pub struct ParameterRelationshipManager<'a> {
    config: &'a RefinerConfig,
}

impl<'a> ParameterRelationshipManager<'a> {
    pub fn new(config: &'a RefinerConfig) -> Self {
        Self { config }
    }

    pub fn apply(&self, chain: SlotChain) -> SlotChain {
        self.apply_with_notes(chain).0
    }

    pub fn apply_with_notes(&self, mut chain: SlotChain) -> (SlotChain, Vec<String>) {
        let mut notes = Vec::new();
        self.stage_gain(&mut chain, &mut notes);
        self.limit_feedback(&mut chain, &mut notes);
        self.stagger_frequencies(&mut chain, &mut notes);
        self.diversify_rates(&mut chain, &mut notes);
        self.balance_mix_density(&mut chain, &mut notes);
        (chain, notes)
    }

    /// Pulls boosting gain/drive/output controls toward unity until the
    /// cumulative multiplier equals the ceiling. Cuts are left alone.
    fn stage_gain(&self, chain: &mut SlotChain, notes: &mut Vec<String>) {
        let ceiling = f64::from(self.config.gain_ceiling);
        let product = f64::from(chain.gain_product());
        if product <= ceiling {
            return;
        }

        let mut fixed = 1.0_f64;
        let mut boosts: Vec<(usize, usize, f64)> = Vec::new();
        for idx in chain.active_indices() {
            let slot = &chain.slots[idx];
            for (p, role) in slot.descriptor().roles.iter().enumerate() {
                if !role.is_gain_stage() {
                    continue;
                }
                let v = f64::from(slot.param(p));
                if v > 0.5 {
                    boosts.push((idx, p, v - 0.5));
                } else {
                    fixed *= 0.5 + v;
                }
            }
        }

        let product_at = |alpha: f64| {
            boosts
                .iter()
                .fold(fixed, |acc, (_, _, d)| acc * (1.0 + alpha * d))
        };
        let (mut lo, mut hi) = (0.0_f64, 1.0_f64);
        for _ in 0..BISECTION_STEPS {
            let mid = 0.5 * (lo + hi);
            if product_at(mid) > ceiling {
                hi = mid;
            } else {
                lo = mid;
            }
        }

        for (idx, p, d) in &boosts {
            chain.slots[*idx].set_param(*p, (0.5 + lo * d) as f32);
        }

        let err = RefineError::ConstraintViolation(format!(
            "gain product {product:.3} above ceiling {ceiling:.3}"
        ));
        warn!(product, ceiling, scale = lo, "{err}");
        notes.push(format!(
            "gain staging: scaled {} boosting controls by {lo:.3} toward unity",
            boosts.len()
        ));
    }

    fn limit_feedback(&self, chain: &mut SlotChain, notes: &mut Vec<String>) {
        let mut entries: Vec<(usize, usize, bool, f32)> = Vec::new();
        for idx in chain.active_indices() {
            let desc = chain.slots[idx].descriptor();
            for p in desc.indices_of(ParamRole::Feedback) {
                entries.push((idx, p, desc.feedback_loop, desc.category.feedback_weight()));
            }
        }
        if entries.is_empty() {
            return;
        }

        // Only recirculating delay lines count toward the weighted budget.
        let weighted: f32 = entries
            .iter()
            .filter(|(_, _, looped, _)| *looped)
            .map(|(idx, p, _, w)| w * chain.slots[*idx].param(*p))
            .sum();
        let ceiling = self.config.feedback_sum_ceiling;
        if weighted > ceiling {
            let scale = ceiling / weighted;
            for (idx, p, _, _) in entries.iter().filter(|(_, _, looped, _)| *looped) {
                let slot = &mut chain.slots[*idx];
                slot.set_param(*p, slot.param(*p) * scale);
            }
            let err = RefineError::ConstraintViolation(format!(
                "weighted feedback {weighted:.3} above ceiling {ceiling:.3}"
            ));
            warn!(weighted, ceiling, scale, "{err}");
            notes.push(format!("feedback accumulation: scaled by {scale:.3}"));
        }

        // A lone runaway control can self-oscillate even when the sum is fine.
        let hard = self.config.feedback_hard_ceiling;
        for (idx, p, _, _) in &entries {
            let slot = &mut chain.slots[*idx];
            if slot.param(*p) > hard {
                slot.set_param(*p, hard);
                notes.push(format!("feedback: slot {idx} param {p} capped at {hard}"));
            }
        }
    }

    fn stagger_frequencies(&self, chain: &mut SlotChain, notes: &mut Vec<String>) {
        let targets: Vec<(usize, usize)> = chain
            .active_indices()
            .into_iter()
            .filter_map(|idx| {
                let desc = chain.slots[idx].descriptor();
                if desc.category != Category::Filter {
                    return None;
                }
                desc.first_index_of(ParamRole::Frequency).map(|p| (idx, p))
            })
            .collect();
        if targets.len() < 2 {
            return;
        }

        let anchors = or_default(&self.config.spectrum_anchors, DEFAULT_SPECTRUM_ANCHORS);
        for (k, (idx, p)) in targets.iter().enumerate() {
            chain.slots[*idx].set_param(*p, anchors[k % anchors.len()]);
        }
        debug!(filters = targets.len(), "filter frequencies staggered");
        notes.push(format!(
            "frequency staggering: spread {} filters across the spectrum",
            targets.len()
        ));
    }

    fn diversify_rates(&self, chain: &mut SlotChain, notes: &mut Vec<String>) {
        let targets: Vec<(usize, usize)> = chain
            .active_indices()
            .into_iter()
            .filter_map(|idx| {
                let desc = chain.slots[idx].descriptor();
                if desc.category != Category::Modulation {
                    return None;
                }
                desc.first_index_of(ParamRole::Rate).map(|p| (idx, p))
            })
            .collect();
        if targets.len() < 2 {
            return;
        }

        let ratios = or_default(&self.config.rate_ratios, DEFAULT_RATE_RATIOS);
        let ratio = |k: usize| ratios[k % ratios.len()];
        // Keep the fastest ratio below 1.0 so no two rates clamp to the same value.
        let max_ratio = (0..targets.len()).map(ratio).fold(0.0_f32, f32::max);
        let (first_idx, first_p) = targets[0];
        let base = chain.slots[first_idx]
            .param(first_p)
            .min(1.0 / max_ratio)
            .max(MIN_BASE_RATE);

        for (k, (idx, p)) in targets.iter().enumerate() {
            chain.slots[*idx].set_param(*p, base * ratio(k));
        }
        notes.push(format!(
            "modulation rates: diversified {} modulators from base {base:.3}",
            targets.len()
        ));
    }

    fn balance_mix_density(&self, chain: &mut SlotChain, notes: &mut Vec<String>) {
        let active = chain.active_indices();
        let n = active.len();
        if n == 0 {
            return;
        }
        let scale = self.config.mix_scale_for(n);
        let ceiling = self.config.mix_ceiling_for(n);
        let floor = self.config.mix_floor_for(n).min(ceiling);

        let mut changed = 0;
        for idx in active {
            let slot = &mut chain.slots[idx];
            let target = (slot.mix * scale).max(floor).min(ceiling);
            if (target - slot.mix).abs() > f32::EPSILON {
                slot.set_mix(target);
                changed += 1;
            }
        }
        if changed > 0 {
            notes.push(format!(
                "mix density: {changed} of {n} mixes fitted to [{floor}, {ceiling}] (scale {scale})"
            ));
        }
    }
}

/// An empty table in an unvalidated config falls back to the built-in one.
fn or_default<'a>(values: &'a [f32], fallback: &'a [f32]) -> &'a [f32] {
    if values.is_empty() {
        fallback
    } else {
        values
    }
}
