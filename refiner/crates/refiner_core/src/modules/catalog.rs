use crate::modules::protocol::{ENGINE_NONE, MAX_ENGINE_ID};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::OnceLock;

/// Engines the pipeline refers to by identity rather than by role.
pub mod ids {
    pub const NONE: u8 = 0;
    pub const CLASSIC_COMPRESSOR: u8 = 2;
    pub const NOISE_GATE: u8 = 4;
    pub const MASTERING_LIMITER: u8 = 5;
    pub const PARAMETRIC_EQ: u8 = 7;
    pub const LADDER_FILTER: u8 = 9;
    pub const STATE_VARIABLE_FILTER: u8 = 10;
    pub const COMB_RESONATOR: u8 = 13;
    pub const VINTAGE_TUBE_PREAMP: u8 = 15;
    pub const MUFF_FUZZ: u8 = 20;
    pub const RODENT_DISTORTION: u8 = 21;
    pub const K_STYLE_OVERDRIVE: u8 = 22;
    pub const STEREO_CHORUS: u8 = 23;
    pub const ANALOG_PHASER: u8 = 25;
    pub const CLASSIC_TREMOLO: u8 = 29;
    pub const TAPE_ECHO: u8 = 34;
    pub const DIGITAL_DELAY: u8 = 35;
    pub const PLATE_REVERB: u8 = 39;
    pub const SPRING_REVERB: u8 = 40;
    pub const CONVOLUTION_REVERB: u8 = 41;
    pub const SHIMMER_REVERB: u8 = 42;
    pub const STEREO_WIDENER: u8 = 44;
    pub const CHAOS_GENERATOR: u8 = 51;
    pub const MID_SIDE_PROCESSOR: u8 = 53;
    pub const GAIN_UTILITY: u8 = 54;
    pub const MONO_MAKER: u8 = 55;
    pub const PHASE_ALIGN: u8 = 56;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Dynamics,
    Filter,
    Distortion,
    Modulation,
    Pitch,
    Delay,
    Reverb,
    Spatial,
    Special,
    Utility,
}

impl Category {
    /// Ordinal used to sort slots into conventional processing order.
    pub fn chain_position(self) -> u8 {
        match self {
            Category::Dynamics => 1,
            Category::Filter => 2,
            Category::Distortion => 3,
            Category::Modulation => 4,
            Category::Pitch => 5,
            Category::Special => 6,
            Category::Delay => 7,
            Category::Reverb => 8,
            Category::Utility => 9,
            Category::Spatial => 10,
        }
    }

    pub fn is_time_based(self) -> bool {
        matches!(self, Category::Delay | Category::Reverb)
    }

    /// Reverb and spatial engines sit at the end of the chain.
    pub fn is_late_chain(self) -> bool {
        matches!(self, Category::Reverb | Category::Spatial)
    }

    /// Multiplier applied to this category's feedback when summing loop gain.
    pub fn feedback_weight(self) -> f32 {
        match self {
            Category::Delay => 1.5,
            Category::Reverb => 1.2,
            _ => 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamRole {
    Gain,
    Drive,
    Output,
    Tone,
    Mix,
    Feedback,
    Frequency,
    Resonance,
    Rate,
    Depth,
    Threshold,
    Ratio,
    Attack,
    Release,
    Time,
    Size,
    Damping,
    Width,
    HighCut,
    LowCut,
    Pitch,
    Other,
}

impl ParamRole {
    pub fn default_value(self) -> f32 {
        match self {
            ParamRole::Feedback => 0.3,
            ParamRole::Drive => 0.35,
            ParamRole::Resonance => 0.3,
            ParamRole::Threshold => 0.6,
            ParamRole::Rate => 0.3,
            ParamRole::HighCut => 0.8,
            ParamRole::LowCut => 0.2,
            _ => 0.5,
        }
    }

    /// Hard upper bound the safety pass enforces for this role.
    pub fn upper_bound(self) -> f32 {
        match self {
            ParamRole::Feedback => 0.85,
            ParamRole::Resonance => 0.9,
            ParamRole::Drive => 0.95,
            _ => 1.0,
        }
    }

    /// Roles that contribute to cumulative gain through the chain.
    pub fn is_gain_stage(self) -> bool {
        matches!(self, ParamRole::Gain | ParamRole::Drive | ParamRole::Output)
    }
}

/// Where the optimizer pins an engine regardless of its category ordinal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    Natural,
    Head,
    DynamicsTail,
}

/// Corrective job a utility engine performs when injected into an empty slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UtilityJob {
    GainCorrection,
    PhaseAlignment,
    MonoCompatibility,
    MidSideWidth,
}

#[derive(Debug, Clone, Copy)]
pub struct EngineDescriptor {
    pub id: u8,
    pub name: &'static str,
    pub aliases: &'static [&'static str],
    pub category: Category,
    pub roles: &'static [ParamRole],
    /// Parameter that best carries the engine's identity.
    pub signature: Option<usize>,
    pub placement: Placement,
    pub utility: Option<UtilityJob>,
    pub bass_emphasis: bool,
    pub cpu_heavy: bool,
    /// Feedback recirculates through a delay line, so it counts toward the
    /// weighted feedback budget.
    pub feedback_loop: bool,
}

impl EngineDescriptor {
    const fn new(
        id: u8,
        name: &'static str,
        category: Category,
        roles: &'static [ParamRole],
    ) -> Self {
        Self {
            id,
            name,
            aliases: &[],
            category,
            roles,
            signature: None,
            placement: Placement::Natural,
            utility: None,
            bass_emphasis: false,
            cpu_heavy: false,
            feedback_loop: false,
        }
    }

    const fn aka(mut self, aliases: &'static [&'static str]) -> Self {
        self.aliases = aliases;
        self
    }

    const fn sig(mut self, index: usize) -> Self {
        self.signature = Some(index);
        self
    }

    const fn pinned(mut self, placement: Placement) -> Self {
        self.placement = placement;
        self
    }

    const fn job(mut self, job: UtilityJob) -> Self {
        self.utility = Some(job);
        self
    }

    const fn bass(mut self) -> Self {
        self.bass_emphasis = true;
        self
    }

    const fn heavy(mut self) -> Self {
        self.cpu_heavy = true;
        self
    }

    const fn looped(mut self) -> Self {
        self.feedback_loop = true;
        self
    }

    pub fn is_none(&self) -> bool {
        self.id == ENGINE_NONE
    }

    pub fn param_count(&self) -> usize {
        self.roles.len()
    }

    pub fn mix_param_index(&self) -> Option<usize> {
        self.first_index_of(ParamRole::Mix)
    }

    pub fn signal_chain_position(&self) -> u8 {
        self.category.chain_position()
    }

    pub fn role(&self, index: usize) -> Option<ParamRole> {
        self.roles.get(index).copied()
    }

    pub fn first_index_of(&self, role: ParamRole) -> Option<usize> {
        self.roles.iter().position(|r| *r == role)
    }

    pub fn indices_of(&self, role: ParamRole) -> impl Iterator<Item = usize> + '_ {
        self.roles
            .iter()
            .enumerate()
            .filter(move |(_, r)| **r == role)
            .map(|(i, _)| i)
    }

    pub fn upper_bound(&self, index: usize) -> f32 {
        self.role(index).map_or(1.0, ParamRole::upper_bound)
    }
}

use Category::{Delay, Distortion, Dynamics, Filter, Modulation, Reverb, Spatial, Special, Utility};
use ParamRole::*;

static ENGINES: [EngineDescriptor; 57] = [
    EngineDescriptor::new(0, "None", Utility, &[]),
    // Dynamics
    EngineDescriptor::new(
        1,
        "Vintage Opto Compressor",
        Dynamics,
        &[Gain, Threshold, Tone, Output, Mix, Other, Drive, Other],
    )
    .aka(&["opto compressor", "opto", "la2a", "la-2a"])
    .sig(1),
    EngineDescriptor::new(
        2,
        "Classic Compressor",
        Dynamics,
        &[Threshold, Ratio, Attack, Release, Other, Output, Mix, Other, Other, Other],
    )
    .aka(&["compressor", "vca compressor", "compression"])
    .sig(1),
    EngineDescriptor::new(
        3,
        "Transient Shaper",
        Dynamics,
        &[Attack, Other, Time, Release, Output, Mix],
    )
    .aka(&["transient designer", "transients"])
    .sig(0),
    EngineDescriptor::new(
        4,
        "Noise Gate",
        Dynamics,
        &[Threshold, Other, Attack, Other, Release, Other, LowCut, Other],
    )
    .aka(&["gate", "noise suppressor"])
    .sig(0)
    .pinned(Placement::Head),
    EngineDescriptor::new(
        5,
        "Mastering Limiter",
        Dynamics,
        &[Threshold, Output, Release, Other, Other, Mix],
    )
    .aka(&["limiter", "brickwall"])
    .sig(0)
    .pinned(Placement::DynamicsTail),
    EngineDescriptor::new(
        6,
        "Dynamic EQ",
        Dynamics,
        &[Frequency, Threshold, Ratio, Attack, Release, Gain, Mix, Other],
    )
    .aka(&["dynamic equalizer"])
    .sig(1),
    // Filters and EQ
    EngineDescriptor::new(
        7,
        "Parametric EQ",
        Filter,
        &[
            Frequency, Gain, Resonance, Frequency, Gain, Resonance, Frequency, Gain, Resonance,
            Output, Mix,
        ],
    )
    .aka(&["eq", "equalizer", "parametric"])
    .sig(0),
    EngineDescriptor::new(
        8,
        "Vintage Console EQ",
        Filter,
        &[Tone, Tone, Tone, Frequency, Drive, Output, Mix],
    )
    .aka(&["console eq", "neve", "pultec"])
    .sig(4)
    .bass(),
    EngineDescriptor::new(
        9,
        "Ladder Filter",
        Filter,
        &[Frequency, Resonance, Drive, Other, Other, Other, Mix],
    )
    .aka(&["moog filter", "ladder", "lowpass filter"])
    .sig(1)
    .bass(),
    EngineDescriptor::new(
        10,
        "State Variable Filter",
        Filter,
        &[Frequency, Resonance, Drive, Other, Other, Depth, Attack, Release, Mix],
    )
    .aka(&["svf", "multimode filter", "filter"])
    .sig(0),
    EngineDescriptor::new(
        11,
        "Formant Filter",
        Filter,
        &[Other, Frequency, Resonance, Drive, Output, Mix],
    )
    .aka(&["vowel filter", "formant"])
    .sig(0),
    EngineDescriptor::new(
        12,
        "Envelope Filter",
        Filter,
        &[Threshold, Attack, Release, Frequency, Resonance, Other, Mix],
    )
    .aka(&["auto wah", "autowah", "envelope follower", "mu tron"])
    .sig(4),
    EngineDescriptor::new(
        13,
        "Comb Resonator",
        Filter,
        &[Frequency, Resonance, Other, Damping, Feedback, Mix],
    )
    .aka(&["comb filter", "resonator"])
    .sig(1)
    .looped(),
    EngineDescriptor::new(
        14,
        "Vocal Formant Filter",
        Filter,
        &[Other, Other, Other, Frequency, Resonance, Rate, Depth, Output, Mix],
    )
    .aka(&["talk box", "talkbox", "vocal filter"])
    .sig(2),
    // Distortion and saturation
    EngineDescriptor::new(
        15,
        "Vintage Tube Preamp",
        Distortion,
        &[Gain, Drive, Tone, Tone, Tone, Tone, Output, Other, Mix],
    )
    .aka(&["tube preamp", "tube", "preamp", "valve"])
    .sig(1)
    .bass(),
    EngineDescriptor::new(
        16,
        "Wave Folder",
        Distortion,
        &[Drive, Other, Other, Tone, Output, Mix],
    )
    .aka(&["wavefolder", "folder"])
    .sig(0),
    EngineDescriptor::new(
        17,
        "Harmonic Exciter",
        Distortion,
        &[Drive, Frequency, Other, Tone, Output, Mix],
    )
    .aka(&["exciter", "aural exciter"])
    .sig(0),
    EngineDescriptor::new(
        18,
        "Bit Crusher",
        Distortion,
        &[Other, Other, Other, Tone, Output, Mix],
    )
    .aka(&["bitcrusher", "lofi", "lo fi", "decimator"])
    .sig(0),
    EngineDescriptor::new(
        19,
        "Multiband Saturator",
        Distortion,
        &[Frequency, Frequency, Drive, Drive, Drive, Other, Output, Mix],
    )
    .aka(&["multiband saturation", "saturator", "saturation"])
    .sig(3)
    .bass(),
    EngineDescriptor::new(
        20,
        "Muff Fuzz",
        Distortion,
        &[Drive, Tone, Output, Other, Other, Other, Mix],
    )
    .aka(&["big muff", "fuzz"])
    .sig(0)
    .bass(),
    EngineDescriptor::new(
        21,
        "Rodent Distortion",
        Distortion,
        &[Drive, Tone, Output, Other, Mix],
    )
    .aka(&["rat", "distortion"])
    .sig(0),
    EngineDescriptor::new(
        22,
        "K-Style Overdrive",
        Distortion,
        &[Drive, Tone, Output, Mix],
    )
    .aka(&["overdrive", "klon", "tube screamer"])
    .sig(0),
    // Modulation
    EngineDescriptor::new(
        23,
        "Stereo Chorus",
        Modulation,
        &[Rate, Depth, Time, Feedback, Width, Tone, Mix],
    )
    .aka(&["digital chorus", "chorus"])
    .sig(1)
    .looped(),
    EngineDescriptor::new(
        24,
        "Resonant Chorus",
        Modulation,
        &[Rate, Depth, Resonance, Feedback, Width, Mix],
    )
    .aka(&["flanger", "resonant flanger"])
    .sig(2)
    .looped(),
    EngineDescriptor::new(
        25,
        "Analog Phaser",
        Modulation,
        &[Rate, Depth, Feedback, Other, Frequency, Width, Mix],
    )
    .aka(&["phaser", "phase shifter"])
    .sig(2),
    EngineDescriptor::new(
        26,
        "Ring Modulator",
        Modulation,
        &[Frequency, Depth, Other, Feedback, Mix],
    )
    .aka(&["ring mod", "ringmod"])
    .sig(0),
    EngineDescriptor::new(
        27,
        "Frequency Shifter",
        Modulation,
        &[Frequency, Feedback, Other, Rate, Depth, Mix],
    )
    .aka(&["freq shifter", "bode shifter"])
    .sig(0),
    EngineDescriptor::new(
        28,
        "Harmonic Tremolo",
        Modulation,
        &[Rate, Depth, Frequency, Width, Mix],
    )
    .aka(&["brownface tremolo"])
    .sig(1),
    EngineDescriptor::new(
        29,
        "Classic Tremolo",
        Modulation,
        &[Rate, Depth, Other, Width, Mix],
    )
    .aka(&["tremolo", "trem"])
    .sig(1),
    EngineDescriptor::new(
        30,
        "Rotary Speaker",
        Modulation,
        &[Rate, Other, Drive, Other, Width, Mix],
    )
    .aka(&["leslie", "rotary"])
    .sig(0),
    // Pitch
    EngineDescriptor::new(31, "Pitch Shifter", Category::Pitch, &[Pitch, Pitch, Other, Mix])
        .aka(&["pitch shift", "whammy", "octaver"])
        .sig(0)
        .heavy(),
    EngineDescriptor::new(
        32,
        "Detune Doubler",
        Category::Pitch,
        &[Pitch, Time, Width, Depth, Mix],
    )
    .aka(&["doubler", "detune", "double tracking"])
    .sig(0),
    EngineDescriptor::new(
        33,
        "Intelligent Harmonizer",
        Category::Pitch,
        &[Pitch, Other, Other, Other, Width, Mix],
    )
    .aka(&["harmonizer"])
    .sig(0)
    .heavy(),
    // Delay
    EngineDescriptor::new(
        34,
        "Tape Echo",
        Delay,
        &[Time, Feedback, Other, Drive, Mix],
    )
    .aka(&["tape delay", "space echo", "echoplex"])
    .sig(1)
    .looped(),
    EngineDescriptor::new(
        35,
        "Digital Delay",
        Delay,
        &[Time, Feedback, Mix, Other, HighCut, LowCut, Width],
    )
    .aka(&["delay", "digital echo", "ping pong delay"])
    .sig(1)
    .looped(),
    EngineDescriptor::new(
        36,
        "Magnetic Drum Echo",
        Delay,
        &[Time, Feedback, Other, Drive, Tone, Mix],
    )
    .aka(&["drum echo", "binson"])
    .sig(2)
    .looped(),
    EngineDescriptor::new(
        37,
        "Bucket Brigade Delay",
        Delay,
        &[Time, Feedback, Rate, Depth, Tone, Mix],
    )
    .aka(&["bbd", "analog delay", "bucket brigade"])
    .sig(3)
    .looped(),
    EngineDescriptor::new(
        38,
        "Buffer Repeat",
        Delay,
        &[Other, Other, Feedback, Pitch, Other, Mix],
    )
    .aka(&["stutter", "glitch", "beat repeat"])
    .sig(0),
    // Reverb
    EngineDescriptor::new(
        39,
        "Plate Reverb",
        Reverb,
        &[Size, Damping, Time, Feedback, Width, LowCut, HighCut, Mix],
    )
    .aka(&["plate"])
    .sig(0)
    .looped(),
    EngineDescriptor::new(
        40,
        "Spring Reverb",
        Reverb,
        &[Size, Damping, Tone, Other, Mix],
    )
    .aka(&["spring"])
    .sig(3),
    EngineDescriptor::new(
        41,
        "Convolution Reverb",
        Reverb,
        &[Other, Size, Time, Damping, LowCut, HighCut, Width, Mix],
    )
    .aka(&["convolution", "impulse response", "ir reverb"])
    .sig(1)
    .heavy(),
    EngineDescriptor::new(
        42,
        "Shimmer Reverb",
        Reverb,
        &[Size, Pitch, Feedback, Damping, Width, Mix],
    )
    .aka(&["shimmer"])
    .sig(2)
    .looped()
    .heavy(),
    EngineDescriptor::new(
        43,
        "Gated Reverb",
        Reverb,
        &[Size, Threshold, Time, Release, Damping, Mix],
    )
    .aka(&["gated verb", "80s drums"])
    .sig(0),
    // Spatial
    EngineDescriptor::new(
        44,
        "Stereo Widener",
        Spatial,
        &[Width, Frequency, Time, Output, Mix],
    )
    .aka(&["widener", "haas"])
    .sig(0),
    EngineDescriptor::new(
        45,
        "Stereo Imager",
        Spatial,
        &[Width, Width, Width, Frequency, Frequency, Mix],
    )
    .aka(&["imager", "multiband imager"])
    .sig(1),
    EngineDescriptor::new(
        46,
        "Dimension Expander",
        Spatial,
        &[Size, Width, Depth, Mix],
    )
    .aka(&["dimension", "dimension d"])
    .sig(1),
    // Special
    EngineDescriptor::new(
        47,
        "Spectral Freeze",
        Special,
        &[Other, Other, Pitch, Mix],
    )
    .aka(&["freeze", "spectral hold"])
    .sig(0)
    .heavy(),
    EngineDescriptor::new(
        48,
        "Spectral Gate",
        Special,
        &[Threshold, Ratio, Attack, Release, Frequency, Frequency, Mix],
    )
    .aka(&["spectral gating"])
    .sig(0)
    .heavy(),
    EngineDescriptor::new(
        49,
        "Phased Vocoder",
        Special,
        &[Other, Pitch, Other, Mix],
    )
    .aka(&["vocoder", "phase vocoder"])
    .sig(2)
    .heavy(),
    EngineDescriptor::new(
        50,
        "Granular Cloud",
        Special,
        &[Size, Other, Pitch, Other, Feedback, Mix],
    )
    .aka(&["granular", "grain cloud", "granulator"])
    .sig(1)
    .heavy(),
    EngineDescriptor::new(
        51,
        "Chaos Generator",
        Special,
        &[Rate, Depth, Other, Other, Other, Mix],
    )
    .aka(&["chaos", "random modulation"])
    .sig(1),
    EngineDescriptor::new(
        52,
        "Feedback Network",
        Special,
        &[Time, Feedback, Other, Other, Rate, Mix],
    )
    .aka(&["feedback matrix"])
    .sig(1),
    // Utility
    EngineDescriptor::new(
        53,
        "Mid-Side Processor",
        Utility,
        &[Gain, Gain, Width, Other],
    )
    .aka(&["mid side", "m s processor"])
    .sig(2)
    .job(UtilityJob::MidSideWidth),
    EngineDescriptor::new(
        54,
        "Gain Utility",
        Utility,
        &[Output, Other, Other, Other],
    )
    .aka(&["utility gain", "gain trim"])
    .sig(0)
    .job(UtilityJob::GainCorrection),
    EngineDescriptor::new(55, "Mono Maker", Utility, &[Frequency, Other])
        .aka(&["mono bass", "bass mono"])
        .sig(0)
        .job(UtilityJob::MonoCompatibility),
    EngineDescriptor::new(
        56,
        "Phase Align",
        Utility,
        &[Other, Other, Other, Other],
    )
    .aka(&["phase alignment", "phase aligner"])
    .sig(0)
    .job(UtilityJob::PhaseAlignment),
];

/// Read-only registry of every engine the plugin hosts.
pub struct EngineCatalog {
    engines: &'static [EngineDescriptor],
    by_name: HashMap<String, u8>,
    phrases: Vec<(Vec<String>, u8)>,
}

impl EngineCatalog {
    fn build() -> Self {
        let mut by_name = HashMap::new();
        let mut phrases = Vec::new();
        for e in ENGINES.iter().filter(|e| !e.is_none()) {
            by_name.insert(e.name.to_ascii_lowercase(), e.id);
            for phrase in std::iter::once(e.name).chain(e.aliases.iter().copied()) {
                let tokens = tokenize(phrase);
                if !tokens.is_empty() {
                    phrases.push((tokens, e.id));
                }
            }
        }
        // Longer phrases first so "digital delay" wins over "delay" when reporting.
        phrases.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        Self {
            engines: &ENGINES,
            by_name,
            phrases,
        }
    }

    pub fn global() -> &'static EngineCatalog {
        static CATALOG: OnceLock<EngineCatalog> = OnceLock::new();
        CATALOG.get_or_init(EngineCatalog::build)
    }

    pub fn get(&self, id: u8) -> Option<&'static EngineDescriptor> {
        if id > MAX_ENGINE_ID {
            return None;
        }
        self.engines.get(usize::from(id))
    }

    /// Like [`EngineCatalog::get`], but unknown ids resolve to the empty engine.
    pub fn get_or_none(&self, id: u8) -> &'static EngineDescriptor {
        self.get(id).unwrap_or(&self.engines[usize::from(ENGINE_NONE)])
    }

    pub fn by_name(&self, name: &str) -> Option<&'static EngineDescriptor> {
        let id = *self.by_name.get(&name.trim().to_ascii_lowercase())?;
        self.get(id)
    }

    pub fn utility_for(&self, job: UtilityJob) -> Option<&'static EngineDescriptor> {
        self.engines.iter().find(|e| e.utility == Some(job))
    }

    pub fn iter(&self) -> impl Iterator<Item = &'static EngineDescriptor> {
        self.engines.iter()
    }

    /// Engines whose name or alias appears as a whole phrase in `text`.
    pub fn mentioned_in(&self, text: &str) -> Vec<u8> {
        let words = tokenize(text);
        let mut out: Vec<u8> = Vec::new();
        for (phrase, id) in &self.phrases {
            if out.contains(id) {
                continue;
            }
            if words.windows(phrase.len()).any(|w| w == phrase.as_slice()) {
                out.push(*id);
            }
        }
        out
    }
}

/// Lowercase alphanumeric words; everything else separates.
pub fn tokenize(s: &str) -> Vec<String> {
    s.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_ascii_lowercase())
        .collect()
}
