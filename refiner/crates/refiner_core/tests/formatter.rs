use refiner_core::catalog::ids;
use refiner_core::chain::SlotChain;
use refiner_core::formatter::PresetFormatter;
use refiner_core::pipeline::Refiner;
use refiner_core::protocol::{
    Blueprint, BlueprintSlot, Intent, PresetRecord, ENGINE_NONE, NEUTRAL_PARAM,
};

fn blueprint() -> Blueprint {
    let slot = |engine: u8, parameters: Vec<f32>| BlueprintSlot {
        engine_id: i64::from(engine),
        parameters,
        ..Default::default()
    };
    Blueprint {
        name: "Round Trip".into(),
        slots: vec![
            slot(ids::MUFF_FUZZ, vec![0.9, 0.3, 0.7]),
            slot(ids::STEREO_CHORUS, vec![0.37, 0.61]),
            slot(ids::TAPE_ECHO, vec![0.41, 0.77]),
            slot(ids::PLATE_REVERB, vec![0.6, 0.4, 0.2, 0.5, 0.7]),
        ],
    }
}

#[test]
fn short_engines_are_padded_with_neutral() {
    let chain = SlotChain::from_blueprint(&blueprint(), &Intent::default());
    let record = PresetFormatter::new().format(&chain);
    assert_eq!(record.name, "Round Trip");

    // Muff Fuzz defines seven parameters; the rest of the row is neutral.
    let fuzz = &record.slots[0];
    assert_eq!(fuzz.engine_id, ids::MUFF_FUZZ);
    assert_eq!(fuzz.parameters[0], 0.9);
    assert!(fuzz.parameters[7..].iter().all(|v| *v == NEUTRAL_PARAM));

    let empty = &record.slots[5];
    assert_eq!(empty.engine_id, ENGINE_NONE);
    assert!(empty.parameters.iter().all(|v| *v == NEUTRAL_PARAM));
}

#[test]
fn stale_values_past_param_count_never_leak() {
    let mut chain = SlotChain::from_blueprint(&blueprint(), &Intent::default());
    chain.slots[0].parameters[14] = 0.01;
    let record = PresetFormatter::new().format(&chain);
    assert_eq!(record.slots[0].parameters[14], NEUTRAL_PARAM);
}

#[test]
fn format_then_reingest_reproduces_the_grid() {
    let outcome = Refiner::default().refine(
        &blueprint(),
        &Intent {
            mood: "dark".into(),
            intensity: 0.8,
            request_text: "tape echo into a plate".into(),
            ..Default::default()
        },
    );
    let record = outcome.record;

    let again = SlotChain::from_record(&record);
    assert_eq!(again.grid(), record.slots.map(|s| s.parameters));
    assert_eq!(PresetFormatter::new().format(&again), record);
}

#[test]
fn parameter_map_round_trip() {
    let outcome = Refiner::default().refine(&blueprint(), &Intent::default());
    let map = outcome.record.to_parameter_map();
    assert_eq!(map.len(), 6 * (3 + 15));
    assert_eq!(map["slot1_engine"], f32::from(outcome.record.slots[0].engine_id));

    let back = PresetRecord::from_parameter_map(&outcome.record.name, &map);
    assert_eq!(back, outcome.record);
}

#[test]
fn record_serializes_as_json() {
    let outcome = Refiner::default().refine(&blueprint(), &Intent::default());
    let json = serde_json::to_string(&outcome.record).expect("serialize");
    let back: PresetRecord = serde_json::from_str(&json).expect("deserialize");
    assert_eq!(back, outcome.record);
}
