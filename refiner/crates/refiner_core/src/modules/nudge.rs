use crate::modules::catalog::{tokenize, Category, EngineCatalog, ParamRole};
use crate::modules::chain::SlotChain;
use crate::modules::config::RefinerConfig;
use crate::modules::protocol::Intent;
use serde::Serialize;
use std::collections::HashSet;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NudgeLayer {
    NamedEngine,
    CreativeAnalysis,
    Keyword,
    Character,
    HarmonicBalance,
}

/// One recorded change. `param_index` is `None` for the slot mix or bypass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Adjustment {
    pub slot_index: usize,
    pub param_index: Option<usize>,
    pub delta: f32,
    pub reason: String,
    pub layer: NudgeLayer,
}

/// A delta on every parameter with `role`, optionally only on engines of `scope`.
#[derive(Debug, Clone, Copy)]
struct RoleDelta {
    role: ParamRole,
    scope: Option<Category>,
    delta: f32,
}

const fn any(role: ParamRole, delta: f32) -> RoleDelta {
    RoleDelta {
        role,
        scope: None,
        delta,
    }
}

const fn on(scope: Category, role: ParamRole, delta: f32) -> RoleDelta {
    RoleDelta {
        role,
        scope: Some(scope),
        delta,
    }
}

const MOODS: &[(&str, &[RoleDelta])] = &[
    (
        "warm",
        &[
            any(ParamRole::Tone, -0.1),
            any(ParamRole::Drive, 0.05),
            any(ParamRole::HighCut, -0.1),
        ],
    ),
    (
        "aggressive",
        &[any(ParamRole::Drive, 0.15), any(ParamRole::Tone, 0.05)],
    ),
    (
        "dark",
        &[
            any(ParamRole::Tone, -0.15),
            any(ParamRole::HighCut, -0.15),
            on(Category::Reverb, ParamRole::Mix, 0.05),
        ],
    ),
    (
        "bright",
        &[any(ParamRole::Tone, 0.15), any(ParamRole::HighCut, 0.1)],
    ),
    (
        "ethereal",
        &[
            on(Category::Reverb, ParamRole::Mix, 0.15),
            on(Category::Reverb, ParamRole::Size, 0.1),
            any(ParamRole::Tone, 0.05),
        ],
    ),
];

const KEYWORDS: &[(&str, f32, &[RoleDelta])] = &[
    (
        "vintage",
        1.0,
        &[
            any(ParamRole::Tone, -0.05),
            any(ParamRole::Drive, 0.05),
            any(ParamRole::HighCut, -0.05),
        ],
    ),
    (
        "modern",
        1.0,
        &[any(ParamRole::Tone, 0.05), any(ParamRole::HighCut, 0.05)],
    ),
    (
        "aggressive",
        1.2,
        &[any(ParamRole::Drive, 0.1), any(ParamRole::Attack, 0.05)],
    ),
    (
        "subtle",
        0.8,
        &[
            any(ParamRole::Mix, -0.1),
            any(ParamRole::Drive, -0.05),
            any(ParamRole::Depth, -0.1),
        ],
    ),
    (
        "spacious",
        1.0,
        &[
            any(ParamRole::Size, 0.1),
            any(ParamRole::Width, 0.1),
            on(Category::Reverb, ParamRole::Mix, 0.05),
        ],
    ),
    (
        "tight",
        1.0,
        &[
            any(ParamRole::Release, -0.1),
            any(ParamRole::Size, -0.1),
            any(ParamRole::Feedback, -0.05),
        ],
    ),
    (
        "warm",
        1.0,
        &[any(ParamRole::Tone, -0.08), any(ParamRole::HighCut, -0.05)],
    ),
    (
        "bright",
        1.0,
        &[any(ParamRole::Tone, 0.08), any(ParamRole::HighCut, 0.05)],
    ),
    (
        "punchy",
        1.1,
        &[any(ParamRole::Attack, 0.1), any(ParamRole::Ratio, 0.05)],
    ),
    (
        "smooth",
        0.9,
        &[
            any(ParamRole::Attack, -0.05),
            any(ParamRole::Drive, -0.05),
            any(ParamRole::Resonance, -0.05),
        ],
    ),
];

const CHARACTERS: &[(&str, &[RoleDelta])] = &[
    (
        "warm",
        &[any(ParamRole::Tone, -0.1), any(ParamRole::Drive, 0.05)],
    ),
    (
        "bright",
        &[any(ParamRole::Tone, 0.1), any(ParamRole::HighCut, 0.1)],
    ),
    (
        "dark",
        &[any(ParamRole::Tone, -0.12), any(ParamRole::HighCut, -0.1)],
    ),
    (
        "aggressive",
        &[any(ParamRole::Drive, 0.15), any(ParamRole::Resonance, 0.05)],
    ),
    (
        "smooth",
        &[
            any(ParamRole::Drive, -0.08),
            any(ParamRole::Attack, -0.05),
            any(ParamRole::Resonance, -0.05),
        ],
    ),
    (
        "vintage",
        &[any(ParamRole::Tone, -0.05), any(ParamRole::Drive, 0.08)],
    ),
    ("modern", &[any(ParamRole::Tone, 0.05)]),
    ("clean", &[any(ParamRole::Drive, -0.15)]),
    (
        "lush",
        &[
            any(ParamRole::Mix, 0.1),
            any(ParamRole::Depth, 0.1),
            any(ParamRole::Size, 0.1),
        ],
    ),
    (
        "subtle",
        &[any(ParamRole::Mix, -0.1), any(ParamRole::Depth, -0.1)],
    ),
    (
        "experimental",
        &[any(ParamRole::Depth, 0.15), any(ParamRole::Rate, 0.1)],
    ),
];

const SPACE_SPAN: f32 = 0.4;
const TONE_LOW_SKEW: f32 = 0.35;
const TONE_HIGH_SKEW: f32 = 0.65;
const TONE_CORRECTION: f32 = 0.05;

/// Applies prompt-derived semantic deltas on top of a structurally sound chain.
///
/// Layers run in a fixed order and every write is clamped to [0,1]. Slots
/// are never added or removed. Running it twice drifts a little further;
/// each pass is additive.
pub struct ContextualNudgeEngine<'a> {
    config: &'a RefinerConfig,
}

impl<'a> ContextualNudgeEngine<'a> {
    pub fn new(config: &'a RefinerConfig) -> Self {
        Self { config }
    }

    pub fn nudge(&self, chain: SlotChain, intent: &Intent) -> SlotChain {
        self.nudge_audited(chain, intent).0
    }

    pub fn nudge_audited(
        &self,
        mut chain: SlotChain,
        intent: &Intent,
    ) -> (SlotChain, Vec<Adjustment>) {
        let mut log: Vec<Adjustment> = Vec::new();

        let named = self.boost_named_engines(&mut chain, intent, &mut log);
        self.apply_creative_analysis(&mut chain, intent, &mut log);
        self.apply_keywords(&mut chain, intent, &mut log);
        self.apply_character(&mut chain, intent, &mut log);
        self.balance_harmonics(&mut chain, &mut log);

        // Requested engines keep their floor through the later layers.
        for idx in named {
            self.ensure_audible(&mut chain, idx, &mut log);
        }

        debug!(adjustments = log.len(), "contextual nudges applied");
        (chain, log)
    }

    fn boost_named_engines(
        &self,
        chain: &mut SlotChain,
        intent: &Intent,
        log: &mut Vec<Adjustment>,
    ) -> Vec<usize> {
        let mentioned = EngineCatalog::global().mentioned_in(&intent.request_text);
        if mentioned.is_empty() {
            return Vec::new();
        }

        let mut named = Vec::new();
        for idx in 0..chain.slots.len() {
            let slot = &chain.slots[idx];
            if slot.is_empty() || !mentioned.contains(&slot.engine_id) {
                continue;
            }
            named.push(idx);
            self.ensure_audible(chain, idx, log);

            let slot = &mut chain.slots[idx];
            if let Some(sig) = slot.descriptor().signature {
                let applied = slot.nudge_param(sig, self.config.signature_boost);
                record(
                    log,
                    idx,
                    Some(sig),
                    applied,
                    "requested by name",
                    NudgeLayer::NamedEngine,
                );
            }
        }
        named
    }

    fn ensure_audible(&self, chain: &mut SlotChain, idx: usize, log: &mut Vec<Adjustment>) {
        let slot = &mut chain.slots[idx];
        if slot.bypass {
            slot.bypass = false;
            record(
                log,
                idx,
                None,
                0.0,
                "un-bypassed: requested by name",
                NudgeLayer::NamedEngine,
            );
        }
        let floor = self.config.named_mix_floor;
        if slot.mix < floor {
            let delta = floor - slot.mix;
            slot.set_mix(floor);
            record(
                log,
                idx,
                None,
                delta,
                "mix floored: requested by name",
                NudgeLayer::NamedEngine,
            );
        }
    }

    fn apply_creative_analysis(
        &self,
        chain: &mut SlotChain,
        intent: &Intent,
        log: &mut Vec<Adjustment>,
    ) {
        let mood = intent.mood.trim().to_ascii_lowercase();
        if let Some((_, deltas)) = MOODS.iter().find(|(m, _)| *m == mood) {
            let reason = format!("mood {mood}");
            for d in *deltas {
                apply_delta(chain, d, d.delta, &reason, NudgeLayer::CreativeAnalysis, log);
            }
        }

        let k = intensity_factor(intent.intensity);
        if (k - 1.0).abs() > f32::EPSILON {
            for idx in chain.active_indices() {
                let slot = &mut chain.slots[idx];
                for p in slot.role_indices(ParamRole::Drive) {
                    let v = slot.param(p);
                    let applied = slot.nudge_param(p, (v - 0.5) * (k - 1.0));
                    let layer = NudgeLayer::CreativeAnalysis;
                    record(log, idx, Some(p), applied, "intensity", layer);
                }
                let before = slot.mix;
                slot.set_mix(0.5 + (before - 0.5) * k);
                let delta = slot.mix - before;
                record(log, idx, None, delta, "intensity", NudgeLayer::CreativeAnalysis);
            }
        }

        let space_delta = (intent.space - 0.5) * SPACE_SPAN;
        if space_delta.abs() > f32::EPSILON {
            for idx in chain.active_indices() {
                let slot = &mut chain.slots[idx];
                if !slot.descriptor().category.is_late_chain() {
                    continue;
                }
                for role in [ParamRole::Size, ParamRole::Width] {
                    for p in slot.role_indices(role) {
                        let applied = slot.nudge_param(p, space_delta);
                        record(log, idx, Some(p), applied, "space", NudgeLayer::CreativeAnalysis);
                    }
                }
            }
        }
    }

    fn apply_keywords(&self, chain: &mut SlotChain, intent: &Intent, log: &mut Vec<Adjustment>) {
        let words: HashSet<String> = tokenize(&intent.request_text).into_iter().collect();
        for (keyword, weight, deltas) in KEYWORDS {
            if !words.contains(*keyword) {
                continue;
            }
            let reason = format!("keyword {keyword}");
            for d in *deltas {
                apply_delta(chain, d, d.delta * weight, &reason, NudgeLayer::Keyword, log);
            }
        }
    }

    fn apply_character(&self, chain: &mut SlotChain, intent: &Intent, log: &mut Vec<Adjustment>) {
        for idx in chain.active_indices() {
            let tag = chain.slots[idx]
                .character
                .clone()
                .unwrap_or_else(|| intent.character.clone());
            let mut seen: HashSet<String> = HashSet::new();
            for word in tokenize(&tag) {
                if !seen.insert(word.clone()) {
                    continue;
                }
                let Some((_, deltas)) = CHARACTERS.iter().find(|(c, _)| *c == word) else {
                    continue;
                };
                let reason = format!("character {word}");
                for d in *deltas {
                    apply_to_slot(chain, idx, d, d.delta, &reason, NudgeLayer::Character, log);
                }
            }
        }
    }

    /// Evens out the tonal tilt of the whole chain by touching its later half.
    fn balance_harmonics(&self, chain: &mut SlotChain, log: &mut Vec<Adjustment>) {
        let active = chain.active_indices();
        let tones: Vec<f32> = active
            .iter()
            .flat_map(|idx| {
                let slot = &chain.slots[*idx];
                slot.role_indices(ParamRole::Tone)
                    .into_iter()
                    .map(move |p| slot.param(p))
            })
            .collect();
        if tones.len() < 2 {
            return;
        }

        let mean = tones.iter().sum::<f32>() / tones.len() as f32;
        let correction = if mean < TONE_LOW_SKEW {
            TONE_CORRECTION
        } else if mean > TONE_HIGH_SKEW {
            -TONE_CORRECTION
        } else {
            return;
        };

        for idx in &active[active.len() / 2..] {
            let slot = &mut chain.slots[*idx];
            for p in slot.role_indices(ParamRole::Tone) {
                let applied = slot.nudge_param(p, correction);
                record(log, *idx, Some(p), applied, "tonal balance", NudgeLayer::HarmonicBalance);
            }
        }
    }
}

/// Maps intensity 0..1 to a spread factor 0.5..1.6, neutral at 0.5.
fn intensity_factor(intensity: f32) -> f32 {
    let i = intensity.clamp(0.0, 1.0);
    if i < 0.5 {
        0.5 + i
    } else {
        1.0 + (i - 0.5) * 1.2
    }
}

fn apply_delta(
    chain: &mut SlotChain,
    d: &RoleDelta,
    delta: f32,
    reason: &str,
    layer: NudgeLayer,
    log: &mut Vec<Adjustment>,
) {
    for idx in chain.active_indices() {
        apply_to_slot(chain, idx, d, delta, reason, layer, log);
    }
}

fn apply_to_slot(
    chain: &mut SlotChain,
    idx: usize,
    d: &RoleDelta,
    delta: f32,
    reason: &str,
    layer: NudgeLayer,
    log: &mut Vec<Adjustment>,
) {
    let slot = &mut chain.slots[idx];
    let desc = slot.descriptor();
    if d.scope.is_some_and(|c| c != desc.category) {
        return;
    }
    if d.role == ParamRole::Mix {
        let before = slot.mix;
        slot.set_mix(before + delta);
        record(log, idx, desc.mix_param_index(), slot.mix - before, reason, layer);
        return;
    }
    for p in desc.indices_of(d.role) {
        let applied = slot.nudge_param(p, delta);
        record(log, idx, Some(p), applied, reason, layer);
    }
}

fn record(
    log: &mut Vec<Adjustment>,
    slot_index: usize,
    param_index: Option<usize>,
    delta: f32,
    reason: &str,
    layer: NudgeLayer,
) {
    log.push(Adjustment {
        slot_index,
        param_index,
        delta,
        reason: reason.to_string(),
        layer,
    });
}
