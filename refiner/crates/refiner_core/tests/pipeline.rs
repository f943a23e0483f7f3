use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use refiner_core::catalog::{ids, EngineCatalog, ParamRole};
use refiner_core::chain::SlotChain;
use refiner_core::config::RefinerConfig;
use refiner_core::error::RefineError;
use refiner_core::nudge::NudgeLayer;
use refiner_core::pipeline::{CreativeOverride, RefineOutcome, Refiner};
use refiner_core::protocol::{Blueprint, BlueprintSlot, Intent, PresetSlot, ENGINE_NONE};

fn at(engine: u8, slot: i64, parameters: Vec<f32>) -> BlueprintSlot {
    BlueprintSlot {
        slot: Some(slot),
        engine_id: i64::from(engine),
        parameters,
        ..Default::default()
    }
}

fn find(outcome: &RefineOutcome, engine: u8) -> &PresetSlot {
    outcome
        .record
        .slots
        .iter()
        .find(|s| s.engine_id == engine)
        .unwrap_or_else(|| panic!("engine {engine} missing"))
}

fn assert_playable(outcome: &RefineOutcome) {
    let active = outcome
        .record
        .slots
        .iter()
        .filter(|s| s.engine_id != ENGINE_NONE && !s.bypass)
        .count();
    assert!(active >= 1);
    for slot in &outcome.record.slots {
        assert!((0.0..=1.0).contains(&slot.mix));
        assert!(slot.parameters.iter().all(|v| (0.0..=1.0).contains(v)));
    }
}

#[test]
fn six_silent_reverbs_are_thinned_and_kept_audible() {
    let bp = Blueprint {
        name: "Cathedral".into(),
        slots: (0..6)
            .map(|_| BlueprintSlot {
                engine_id: i64::from(ids::PLATE_REVERB),
                mix: Some(0.0),
                ..Default::default()
            })
            .collect(),
    };
    let outcome = Refiner::default().refine(&bp, &Intent::default());

    assert_playable(&outcome);
    assert!(outcome.record.slots.iter().all(|s| s.mix >= 0.12));
    assert!(outcome
        .report
        .warnings
        .iter()
        .any(|w| w.contains("multiple reverbs")));
    let halved = outcome
        .report
        .modifications
        .iter()
        .filter(|m| m.contains("mix halved"))
        .count();
    assert_eq!(halved, 4);
    assert!(outcome.report.valid);
}

#[test]
fn gate_limiter_echo_plate_is_ordered_and_tamed() {
    let bp = Blueprint {
        name: "Scenario".into(),
        slots: vec![
            at(ids::NOISE_GATE, 3, vec![]),
            at(ids::MASTERING_LIMITER, 0, vec![]),
            at(ids::TAPE_ECHO, 1, vec![0.5, 0.95]),
            at(ids::PLATE_REVERB, 2, vec![0.5, 0.5, 0.5, 0.9]),
        ],
    };
    let outcome = Refiner::default().refine(&bp, &Intent::default());
    let order: Vec<u8> = outcome.record.slots[..4].iter().map(|s| s.engine_id).collect();
    assert_eq!(
        order,
        vec![
            ids::NOISE_GATE,
            ids::MASTERING_LIMITER,
            ids::TAPE_ECHO,
            ids::PLATE_REVERB
        ]
    );

    let echo_fb = outcome.record.slots[2].parameters[1];
    let plate_fb = outcome.record.slots[3].parameters[3];
    assert!((echo_fb - 0.76).abs() < 0.01, "echo feedback {echo_fb}");
    assert!((plate_fb - 0.72).abs() < 0.01, "plate feedback {plate_fb}");

    // two time-based engines: phase alignment lands in the first free slot
    assert_eq!(outcome.record.slots[4].engine_id, ids::PHASE_ALIGN);
    assert_playable(&outcome);
}

#[test]
fn requested_engine_is_unbypassed() {
    let mut chaos = at(ids::CHAOS_GENERATOR, 4, vec![]);
    chaos.bypass = true;
    chaos.mix = Some(0.1);
    let bp = Blueprint {
        name: "Chaos".into(),
        slots: vec![
            at(ids::NOISE_GATE, 0, vec![]),
            at(ids::K_STYLE_OVERDRIVE, 1, vec![]),
            at(ids::STEREO_CHORUS, 2, vec![]),
            at(ids::TAPE_ECHO, 3, vec![]),
            chaos,
        ],
    };
    let intent = Intent {
        request_text: "chaos generator".into(),
        ..Default::default()
    };
    let outcome = Refiner::default().refine(&bp, &intent);

    let slot = find(&outcome, ids::CHAOS_GENERATOR);
    assert!(!slot.bypass);
    assert!(slot.mix >= 0.7);
    assert!(outcome
        .adjustments
        .iter()
        .any(|a| a.layer == NudgeLayer::NamedEngine));
}

#[test]
fn empty_blueprint_yields_the_safe_default() {
    let outcome = Refiner::default().refine(&Blueprint::default(), &Intent::default());
    assert_eq!(outcome.record.name, "Refined Preset");
    assert_eq!(outcome.record.slots[0].engine_id, ids::PLATE_REVERB);
    assert!(outcome.report.valid);
    assert!(outcome
        .report
        .warnings
        .iter()
        .any(|w| w.contains("no active slot")));
    assert_playable(&outcome);
}

#[test]
fn blueprint_json_with_garbage_still_refines() {
    let raw = r#"{
        "name": "  Broken  ",
        "slots": [
            {"engine_id": 999, "parameters": [2.0, -1.0]},
            {"slot": 1, "engine_id": 20, "parameters": [1.0, 0.0, 1.0], "mix": 7.5},
            {"slot": 1, "engine_id": 39, "character": "Lush"}
        ]
    }"#;
    let bp: Blueprint = serde_json::from_str(raw).expect("blueprint json");
    let outcome = Refiner::default().refine(&bp, &Intent::default());
    assert_eq!(outcome.record.name, "Broken");
    assert!(outcome.record.slots.iter().all(|s| s.engine_id <= 56));
    assert!(outcome
        .report
        .warnings
        .iter()
        .any(|w| w.contains("engine id 999")));
    assert_playable(&outcome);
}

fn wild(rng: &mut StdRng) -> f32 {
    match rng.gen_range(0..10) {
        0 => f32::NAN,
        1 => f32::INFINITY,
        2 => f32::NEG_INFINITY,
        3 => rng.gen_range(-1e6..1e6),
        _ => rng.gen_range(0.0..1.0),
    }
}

#[test]
fn adversarial_blueprints_always_refine_to_a_playable_preset() {
    let mut rng = StdRng::seed_from_u64(0xB1_0E);
    let refiner = Refiner::default();
    let moods = ["", "warm", "aggressive", "dark", "bright", "ethereal", "???"];
    let words = ["chaos generator", "plate", "aggressive tight", "subtle lush", "delay"];

    for _ in 0..500 {
        let entries = rng.gen_range(0..10);
        let slots = (0..entries)
            .map(|_| BlueprintSlot {
                slot: rng.gen_bool(0.4).then(|| rng.gen_range(-2..9)),
                engine_id: rng.gen_range(-5..70),
                character: rng.gen_bool(0.3).then(|| "warm experimental".to_string()),
                parameters: (0..rng.gen_range(0..20)).map(|_| wild(&mut rng)).collect(),
                mix: rng.gen_bool(0.5).then(|| wild(&mut rng)),
                bypass: rng.gen_bool(0.2),
            })
            .collect();
        let bp = Blueprint {
            name: "fuzz".into(),
            slots,
        };
        let intent = Intent {
            mood: moods[rng.gen_range(0..moods.len())].into(),
            intensity: wild(&mut rng),
            space: wild(&mut rng),
            character: String::new(),
            request_text: words[rng.gen_range(0..words.len())].into(),
        };

        let outcome = refiner.refine(&bp, &intent);
        assert!(outcome.report.valid, "{:?}", outcome.report.errors);
        assert_playable(&outcome);
        for slot in &outcome.record.slots {
            let desc = EngineCatalog::global().get_or_none(slot.engine_id);
            for p in desc.indices_of(ParamRole::Feedback) {
                assert!(slot.parameters[p] <= 0.85);
            }
        }
    }
}

#[test]
fn refinement_is_deterministic() {
    let bp = Blueprint {
        name: "Again".into(),
        slots: vec![
            at(ids::MUFF_FUZZ, 0, vec![0.9, 0.2, 0.9]),
            at(ids::ANALOG_PHASER, 1, vec![0.3]),
            at(ids::STEREO_CHORUS, 2, vec![0.3]),
            at(ids::DIGITAL_DELAY, 3, vec![0.4, 0.8]),
        ],
    };
    let intent = Intent {
        mood: "ethereal".into(),
        intensity: 0.9,
        space: 0.85,
        character: "lush".into(),
        request_text: "spacious vintage phaser".into(),
    };
    let refiner = Refiner::default();
    assert_eq!(refiner.refine(&bp, &intent), refiner.refine(&bp, &intent));
}

#[test]
fn refiner_is_shareable_across_threads() {
    let refiner = Refiner::default();
    let bp = Blueprint {
        name: "Threads".into(),
        slots: vec![at(ids::PLATE_REVERB, 0, vec![])],
    };
    let expected = refiner.refine(&bp, &Intent::default());
    std::thread::scope(|s| {
        let handles: Vec<_> = (0..4)
            .map(|_| s.spawn(|| refiner.refine(&bp, &Intent::default())))
            .collect();
        for h in handles {
            assert_eq!(h.join().expect("worker"), expected);
        }
    });
}

struct Vandal;

impl CreativeOverride for Vandal {
    fn rewrite(&self, chain: &mut SlotChain) {
        chain.slots[0].engine_id = 200;
        chain.slots[1].mix = f32::NAN;
        chain.slots[1].parameters = [9.0; 15];
    }
}

#[test]
fn override_output_is_repaired_by_safety() {
    let bp = Blueprint {
        name: "Override".into(),
        slots: vec![
            at(ids::K_STYLE_OVERDRIVE, 0, vec![]),
            at(ids::TAPE_ECHO, 1, vec![]),
        ],
    };
    let refiner = Refiner::default().with_override(Box::new(Vandal));
    let outcome = refiner.refine(&bp, &Intent::default());
    assert!(outcome.report.valid);
    assert_playable(&outcome);
    let echo = find(&outcome, ids::TAPE_ECHO);
    assert!(echo.parameters[1] <= 0.85);
    assert!(outcome
        .report
        .modifications
        .iter()
        .any(|m| m.contains("creative override")));
}

struct Crash;

impl CreativeOverride for Crash {
    fn rewrite(&self, _chain: &mut SlotChain) {
        panic!("override exploded");
    }
}

#[test]
fn panics_fall_back_to_minimal_preset() {
    let bp = Blueprint {
        name: "Doomed".into(),
        slots: vec![at(ids::MUFF_FUZZ, 0, vec![])],
    };
    let outcome = Refiner::default()
        .with_override(Box::new(Crash))
        .refine(&bp, &Intent::default());
    assert!(!outcome.report.valid);
    assert!(outcome.report.errors[0].contains("override exploded"));
    assert_eq!(outcome.record.name, "Doomed");
    assert_eq!(outcome.record.slots[0].engine_id, ids::PLATE_REVERB);
    assert!(outcome.record.slots[1..]
        .iter()
        .all(|s| s.engine_id == ENGINE_NONE));
    assert!(outcome.adjustments.is_empty());
}

#[test]
fn invalid_config_is_rejected() {
    let bad = RefinerConfig {
        feedback_hard_ceiling: 0.99,
        ..Default::default()
    };
    assert!(matches!(Refiner::new(bad), Err(RefineError::Config(_))));

    let inverted = RefinerConfig {
        mix_floor: [0.9; 7],
        ..Default::default()
    };
    assert!(Refiner::new(inverted).is_err());
}

#[test]
fn config_loads_from_partial_json() {
    let cfg = RefinerConfig::from_json_str(r#"{"gain_ceiling": 1.5, "max_reverbs": 1}"#)
        .expect("config");
    assert_eq!(cfg.gain_ceiling, 1.5);
    assert_eq!(cfg.max_reverbs, 1);
    assert_eq!(cfg.feedback_hard_ceiling, 0.85);

    assert!(RefinerConfig::from_json_str(r#"{"gain_ceiling": 9.0}"#).is_err());
    assert!(RefinerConfig::from_json_str("not json").is_err());
}

#[test]
fn config_env_overrides_are_clamped() {
    std::env::set_var("REFINER_GAIN_CEILING", "2.5");
    std::env::set_var("REFINER_FEEDBACK_HARD_CEILING", "0.99");
    std::env::set_var("REFINER_FEEDBACK_SUM_CEILING", "lots");
    let cfg = RefinerConfig::from_env();
    std::env::remove_var("REFINER_GAIN_CEILING");
    std::env::remove_var("REFINER_FEEDBACK_HARD_CEILING");
    std::env::remove_var("REFINER_FEEDBACK_SUM_CEILING");

    assert_eq!(cfg.gain_ceiling, 2.5);
    assert_eq!(cfg.feedback_hard_ceiling, 0.85);
    assert_eq!(cfg.feedback_sum_ceiling, RefinerConfig::default().feedback_sum_ceiling);
    assert!(cfg.validate().is_ok());
}

#[test]
fn lower_hard_ceiling_reaches_every_feedback_control() {
    let config = RefinerConfig {
        feedback_hard_ceiling: 0.7,
        ..Default::default()
    };
    let bp = Blueprint {
        name: "Tight".into(),
        slots: vec![
            at(ids::STEREO_CHORUS, 0, vec![0.5, 0.5, 0.5, 1.0]),
            at(ids::SHIMMER_REVERB, 1, vec![0.5, 0.5, 1.0]),
        ],
    };
    let outcome = Refiner::new(config).expect("config").refine(&bp, &Intent::default());
    for slot in &outcome.record.slots {
        let desc = EngineCatalog::global().get_or_none(slot.engine_id);
        for p in desc.indices_of(ParamRole::Feedback) {
            assert!(slot.parameters[p] <= 0.7, "{} feedback {}", desc.name, slot.parameters[p]);
        }
    }
}
