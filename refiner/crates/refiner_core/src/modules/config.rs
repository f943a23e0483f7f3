use crate::modules::error::{RefineError, RefineResult};
use crate::modules::protocol::SLOT_COUNT;
use serde::{Deserialize, Serialize};
use tracing::warn;

pub const DEFAULT_SPECTRUM_ANCHORS: &[f32] = &[0.15, 0.3, 0.5, 0.7, 0.85];
pub const DEFAULT_RATE_RATIOS: &[f32] = &[1.0, 0.66, 1.5, 0.5, 2.0];

/// One entry per active-slot count, 0 through 6.
pub type DensityTable = [f32; SLOT_COUNT + 1];

/// Every tunable the refinement stages read. Immutable once a
/// [`crate::pipeline::Refiner`] is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefinerConfig {
    /// Ceiling on the product of all gain-stage multipliers.
    pub gain_ceiling: f32,
    /// Ceiling on the category-weighted sum of feedback parameters.
    pub feedback_sum_ceiling: f32,
    /// No single feedback parameter may exceed this.
    pub feedback_hard_ceiling: f32,
    /// Cap on summed delay + reverb feedback when both are present.
    pub combined_feedback_cap: f32,

    pub spectrum_anchors: Vec<f32>,
    pub rate_ratios: Vec<f32>,

    pub mix_floor: DensityTable,
    pub mix_ceiling: DensityTable,
    pub mix_scale: DensityTable,

    pub named_mix_floor: f32,
    pub signature_boost: f32,

    pub max_distortion_stack: usize,
    pub max_reverbs: usize,
    pub resonance_alert: f32,
    pub cpu_heavy_limit: usize,
}

impl Default for RefinerConfig {
    fn default() -> Self {
        Self {
            gain_ceiling: 2.0,
            feedback_sum_ceiling: 2.0,
            feedback_hard_ceiling: 0.85,
            combined_feedback_cap: 1.5,
            spectrum_anchors: DEFAULT_SPECTRUM_ANCHORS.to_vec(),
            rate_ratios: DEFAULT_RATE_RATIOS.to_vec(),
            mix_floor: [0.3, 0.3, 0.3, 0.25, 0.2, 0.15, 0.12],
            mix_ceiling: [1.0, 1.0, 1.0, 0.9, 0.8, 0.7, 0.6],
            mix_scale: [1.0, 1.0, 1.0, 0.95, 0.9, 0.85, 0.8],
            named_mix_floor: 0.7,
            signature_boost: 0.2,
            max_distortion_stack: 2,
            max_reverbs: 2,
            resonance_alert: 0.7,
            cpu_heavy_limit: 3,
        }
    }
}

const GAIN_CEILING_RANGE: (f32, f32) = (1.0, 3.0);
const FEEDBACK_SUM_RANGE: (f32, f32) = (1.0, 2.5);
const FEEDBACK_HARD_RANGE: (f32, f32) = (0.70, 0.85);

impl RefinerConfig {
    /// Defaults overridden by `REFINER_GAIN_CEILING`, `REFINER_FEEDBACK_SUM_CEILING`
    /// and `REFINER_FEEDBACK_HARD_CEILING`, each clamped into its accepted range.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Some(v) = env_f32("REFINER_GAIN_CEILING") {
            cfg.gain_ceiling = v.clamp(GAIN_CEILING_RANGE.0, GAIN_CEILING_RANGE.1);
        }
        if let Some(v) = env_f32("REFINER_FEEDBACK_SUM_CEILING") {
            cfg.feedback_sum_ceiling = v.clamp(FEEDBACK_SUM_RANGE.0, FEEDBACK_SUM_RANGE.1);
        }
        if let Some(v) = env_f32("REFINER_FEEDBACK_HARD_CEILING") {
            cfg.feedback_hard_ceiling = v.clamp(FEEDBACK_HARD_RANGE.0, FEEDBACK_HARD_RANGE.1);
        }
        cfg
    }

    pub fn from_json_str(raw: &str) -> RefineResult<Self> {
        let cfg: Self =
            serde_json::from_str(raw).map_err(|e| RefineError::Config(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> RefineResult<()> {
        check_range("gain_ceiling", self.gain_ceiling, GAIN_CEILING_RANGE)?;
        check_range("feedback_sum_ceiling", self.feedback_sum_ceiling, FEEDBACK_SUM_RANGE)?;
        check_range("feedback_hard_ceiling", self.feedback_hard_ceiling, FEEDBACK_HARD_RANGE)?;
        check_range("combined_feedback_cap", self.combined_feedback_cap, (0.5, 2.0))?;
        check_range("named_mix_floor", self.named_mix_floor, (0.0, 1.0))?;
        check_range("signature_boost", self.signature_boost, (0.0, 0.5))?;
        check_range("resonance_alert", self.resonance_alert, (0.0, 1.0))?;

        if self.spectrum_anchors.is_empty() {
            return Err(RefineError::Config("spectrum_anchors must not be empty".into()));
        }
        for v in &self.spectrum_anchors {
            check_range("spectrum_anchors", *v, (0.0, 1.0))?;
        }
        if self.rate_ratios.is_empty() {
            return Err(RefineError::Config("rate_ratios must not be empty".into()));
        }
        for v in &self.rate_ratios {
            check_range("rate_ratios", *v, (0.05, 4.0))?;
        }

        for n in 0..=SLOT_COUNT {
            check_range("mix_floor", self.mix_floor[n], (0.0, 1.0))?;
            check_range("mix_ceiling", self.mix_ceiling[n], (0.0, 1.0))?;
            check_range("mix_scale", self.mix_scale[n], (0.0, 1.0))?;
            if self.mix_floor[n] > self.mix_ceiling[n] {
                return Err(RefineError::Config(format!(
                    "mix_floor[{n}] = {} exceeds mix_ceiling[{n}] = {}",
                    self.mix_floor[n], self.mix_ceiling[n]
                )));
            }
        }
        if self.max_reverbs == 0 {
            return Err(RefineError::Config("max_reverbs must be at least 1".into()));
        }
        Ok(())
    }

    pub fn mix_floor_for(&self, active: usize) -> f32 {
        self.mix_floor[active.min(SLOT_COUNT)]
    }

    pub fn mix_ceiling_for(&self, active: usize) -> f32 {
        self.mix_ceiling[active.min(SLOT_COUNT)]
    }

    pub fn mix_scale_for(&self, active: usize) -> f32 {
        self.mix_scale[active.min(SLOT_COUNT)]
    }
}

fn check_range(field: &str, value: f32, (lo, hi): (f32, f32)) -> RefineResult<()> {
    if value.is_finite() && (lo..=hi).contains(&value) {
        Ok(())
    } else {
        Err(RefineError::Config(format!(
            "{field} must be in [{lo}, {hi}], got {value}"
        )))
    }
}

fn env_f32(key: &str) -> Option<f32> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse::<f32>() {
        Ok(v) if v.is_finite() => Some(v),
        _ => {
            warn!("ignoring unparseable {key}={raw:?}");
            None
        }
    }
}
