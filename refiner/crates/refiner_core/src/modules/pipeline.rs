use crate::modules::chain::{SlotChain, DEFAULT_PRESET_NAME};
use crate::modules::config::RefinerConfig;
use crate::modules::error::{RefineError, RefineResult};
use crate::modules::formatter::PresetFormatter;
use crate::modules::nudge::{Adjustment, ContextualNudgeEngine};
use crate::modules::optimizer::SignalChainOptimizer;
use crate::modules::protocol::{Blueprint, Intent, PresetRecord, ValidationReport};
use crate::modules::relationships::ParameterRelationshipManager;
use crate::modules::safety::{minimal_safe_chain, panic_message, SafetyValidator};
use serde::Serialize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::{error, info};

/// Hook for an external creative rewrite, run after the contextual nudges
/// and before safety validation. Anything it writes is still subject to
/// every safety rule.
pub trait CreativeOverride: Send + Sync {
    fn rewrite(&self, chain: &mut SlotChain);
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RefineOutcome {
    pub record: PresetRecord,
    pub report: ValidationReport,
    pub adjustments: Vec<Adjustment>,
}

/// Runs the refinement stages in order:
/// ingest, reorder, relationships, nudge, override, safety, format.
pub struct Refiner {
    config: RefinerConfig,
    creative_override: Option<Box<dyn CreativeOverride>>,
}

impl Default for Refiner {
    fn default() -> Self {
        Self {
            config: RefinerConfig::default(),
            creative_override: None,
        }
    }
}

impl Refiner {
    pub fn new(config: RefinerConfig) -> RefineResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            creative_override: None,
        })
    }

    pub fn with_override(mut self, creative_override: Box<dyn CreativeOverride>) -> Self {
        self.creative_override = Some(creative_override);
        self
    }

    pub fn config(&self) -> &RefinerConfig {
        &self.config
    }

    /// Always returns a playable preset. Failures upstream of the safety
    /// pass are reported and replaced by the minimal-safe preset.
    pub fn refine(&self, blueprint: &Blueprint, intent: &Intent) -> RefineOutcome {
        let staged = match catch_unwind(AssertUnwindSafe(|| self.run_stages(blueprint, intent))) {
            Ok(result) => result,
            Err(panic) => Err(RefineError::InternalFailure(panic_message(&*panic))),
        };

        let (chain, mut report, adjustments) = match staged {
            Ok(done) => done,
            Err(e) => {
                error!("refinement failed, substituting minimal preset: {e}");
                let mut report = ValidationReport::default();
                report.error(e.to_string());
                report.modified("replaced chain with minimal safe preset");
                (minimal_safe_chain(preset_name(blueprint)), report, Vec::new())
            }
        };

        let (chain, safety) = SafetyValidator::new(&self.config).validate(chain);
        report.merge(safety);
        let record = PresetFormatter::new().format(&chain);

        info!(
            name = %record.name,
            valid = report.valid,
            warnings = report.warnings.len(),
            modifications = report.modifications.len(),
            "preset refined"
        );
        RefineOutcome {
            record,
            report,
            adjustments,
        }
    }

    fn run_stages(
        &self,
        blueprint: &Blueprint,
        intent: &Intent,
    ) -> RefineResult<(SlotChain, ValidationReport, Vec<Adjustment>)> {
        let mut report = ValidationReport::default();

        let (chain, notes) = SlotChain::ingest(blueprint, intent);
        notes.into_iter().for_each(|n| report.warn(n));
        chain.check_consistency()?;

        let chain = SignalChainOptimizer::new().reorder(chain);
        chain.check_consistency()?;

        let (chain, notes) =
            ParameterRelationshipManager::new(&self.config).apply_with_notes(chain);
        notes.into_iter().for_each(|n| report.modified(n));
        chain.check_consistency()?;

        let sanitized = chain.intent.clone();
        let (mut chain, adjustments) =
            ContextualNudgeEngine::new(&self.config).nudge_audited(chain, &sanitized);
        if !adjustments.is_empty() {
            report.modified(format!("contextual nudges: {} adjustments", adjustments.len()));
        }
        chain.check_consistency()?;

        // Whatever the override writes is repaired by the safety pass.
        if let Some(o) = &self.creative_override {
            o.rewrite(&mut chain);
            chain.reindex();
            report.modified("creative override applied");
        }

        Ok((chain, report, adjustments))
    }
}

fn preset_name(blueprint: &Blueprint) -> &str {
    match blueprint.name.trim() {
        "" => DEFAULT_PRESET_NAME,
        n => n,
    }
}
