use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use refiner_core::catalog::{ids, EngineCatalog};
use refiner_core::chain::{Slot, SlotChain};
use refiner_core::optimizer::SignalChainOptimizer;
use refiner_core::protocol::{Intent, ENGINE_NONE};

fn chain_of(engines: &[u8]) -> SlotChain {
    let catalog = EngineCatalog::global();
    let mut chain = SlotChain::empty("order", Intent::default());
    for (i, id) in engines.iter().enumerate() {
        chain.slots[i] = Slot::with_engine(i, catalog.get_or_none(*id));
    }
    chain
}

fn order(chain: &SlotChain) -> Vec<u8> {
    chain.slots.iter().map(|s| s.engine_id).collect()
}

#[test]
fn gate_first_and_limiter_at_tail_of_dynamics() {
    let chain = chain_of(&[
        ids::MASTERING_LIMITER,
        ids::TAPE_ECHO,
        ids::PLATE_REVERB,
        ids::NOISE_GATE,
    ]);
    let out = SignalChainOptimizer::new().reorder(chain);
    assert_eq!(
        order(&out),
        vec![
            ids::NOISE_GATE,
            ids::MASTERING_LIMITER,
            ids::TAPE_ECHO,
            ids::PLATE_REVERB,
            ENGINE_NONE,
            ENGINE_NONE,
        ]
    );
    for (i, s) in out.slots.iter().enumerate() {
        assert_eq!(s.index, i);
    }
}

#[test]
fn limiter_sits_right_before_first_distortion() {
    let chain = chain_of(&[
        ids::MUFF_FUZZ,
        ids::MASTERING_LIMITER,
        ids::STEREO_CHORUS,
        ids::CLASSIC_COMPRESSOR,
        ids::NOISE_GATE,
    ]);
    let out = SignalChainOptimizer::new().reorder(chain);
    assert_eq!(
        order(&out)[..5],
        [
            ids::NOISE_GATE,
            ids::CLASSIC_COMPRESSOR,
            ids::MASTERING_LIMITER,
            ids::MUFF_FUZZ,
            ids::STEREO_CHORUS,
        ]
    );
}

#[test]
fn limiter_stays_ahead_of_filters_when_distortion_follows() {
    let chain = chain_of(&[
        ids::MUFF_FUZZ,
        ids::LADDER_FILTER,
        ids::MASTERING_LIMITER,
        ids::CLASSIC_COMPRESSOR,
    ]);
    let with_drive = SignalChainOptimizer::new().reorder(chain);
    assert_eq!(
        order(&with_drive)[..4],
        [
            ids::CLASSIC_COMPRESSOR,
            ids::MASTERING_LIMITER,
            ids::LADDER_FILTER,
            ids::MUFF_FUZZ,
        ]
    );

    let chain = chain_of(&[ids::LADDER_FILTER, ids::MASTERING_LIMITER, ids::CLASSIC_COMPRESSOR]);
    let without_drive = SignalChainOptimizer::new().reorder(chain);
    assert_eq!(
        order(&without_drive)[..3],
        [ids::CLASSIC_COMPRESSOR, ids::MASTERING_LIMITER, ids::LADDER_FILTER]
    );
}

#[test]
fn spatial_goes_after_reverb() {
    let chain = chain_of(&[
        ids::STEREO_WIDENER,
        ids::PLATE_REVERB,
        ids::GAIN_UTILITY,
        ids::STEREO_CHORUS,
    ]);
    let out = SignalChainOptimizer::new().reorder(chain);
    assert_eq!(
        order(&out)[..4],
        [
            ids::STEREO_CHORUS,
            ids::PLATE_REVERB,
            ids::GAIN_UTILITY,
            ids::STEREO_WIDENER,
        ]
    );
}

#[test]
fn same_category_keeps_blueprint_order() {
    let chain = chain_of(&[ids::SPRING_REVERB, ids::PLATE_REVERB, ids::SHIMMER_REVERB]);
    let out = SignalChainOptimizer::new().reorder(chain);
    assert_eq!(
        order(&out)[..3],
        [ids::SPRING_REVERB, ids::PLATE_REVERB, ids::SHIMMER_REVERB]
    );
}

#[test]
fn unknown_ids_sort_last_and_empties_are_appended() {
    let mut chain = chain_of(&[ENGINE_NONE, ids::PLATE_REVERB]);
    chain.slots[0].engine_id = 120;
    let out = SignalChainOptimizer::new().reorder(chain);
    assert_eq!(order(&out)[..2], [ids::PLATE_REVERB, 120]);
    assert!(out.slots[2..].iter().all(|s| s.is_empty()));
}

#[test]
fn bypassed_slots_are_ordered_too() {
    let mut chain = chain_of(&[ids::PLATE_REVERB, ids::NOISE_GATE]);
    chain.slots[1].bypass = true;
    let out = SignalChainOptimizer::new().reorder(chain);
    assert_eq!(out.slots[0].engine_id, ids::NOISE_GATE);
    assert!(out.slots[0].bypass);
}

#[test]
fn reorder_is_idempotent_on_random_chains() {
    let mut rng = StdRng::seed_from_u64(0x5107);
    let optimizer = SignalChainOptimizer::new();
    for _ in 0..500 {
        let engines: Vec<u8> = (0..6)
            .map(|_| {
                if rng.gen_bool(0.2) {
                    ENGINE_NONE
                } else {
                    rng.gen_range(0..=60)
                }
            })
            .collect();
        let mut chain = chain_of(&engines);
        for (slot, id) in chain.slots.iter_mut().zip(&engines) {
            slot.engine_id = *id;
            slot.bypass = rng.gen_bool(0.25);
        }

        let once = optimizer.reorder(chain.clone());
        let twice = optimizer.reorder(once.clone());
        assert_eq!(once, twice, "not idempotent for {engines:?}");

        let mut before: Vec<u8> = engines.clone();
        let mut after = order(&once);
        before.sort_unstable();
        after.sort_unstable();
        assert_eq!(before, after, "engines lost or duplicated");
    }
}
