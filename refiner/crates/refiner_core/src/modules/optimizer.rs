use crate::modules::catalog::{Category, EngineCatalog, Placement};
use crate::modules::chain::{Slot, SlotChain};
use tracing::debug;

const SPATIAL_KEY: u16 = 1_000;
/// Past every dynamics engine (position 1), ahead of the filter block.
const DYNAMICS_TAIL_KEY: u16 = 15;
const UNKNOWN_KEY: u16 = u16::MAX;

/// Reorders slots into canonical processing order.
///
/// The ordering is a single stable sort over a key that depends only on the
/// set of engines present, never on their current order, which makes
/// `reorder(reorder(c)) == reorder(c)`:
///
/// - engines sort by their category's chain position;
/// - gates go first;
/// - limiters close the dynamics block, so they always precede filters and
///   distortion engines;
/// - spatial engines go after everything else, reverbs included;
/// - ids the catalog does not know sort last;
/// - empty slots are appended after every occupied one.
///
/// Bypassed slots keep their engine and are ordered like active ones, so a
/// later stage that re-enables one finds it in the right place.
#[derive(Debug, Default, Clone, Copy)]
pub struct SignalChainOptimizer;

impl SignalChainOptimizer {
    pub fn new() -> Self {
        Self
    }

    pub fn reorder(&self, chain: SlotChain) -> SlotChain {
        let SlotChain {
            name,
            intent,
            slots,
        } = chain;

        let (mut occupied, empties): (Vec<Slot>, Vec<Slot>) =
            slots.into_iter().partition(|s| !s.is_empty());

        occupied.sort_by_key(sort_key);

        let mut ordered = occupied.into_iter().chain(empties);
        let mut out = SlotChain {
            name,
            intent,
            slots: std::array::from_fn(|i| ordered.next().unwrap_or_else(|| Slot::empty(i))),
        };
        out.reindex();

        debug!(
            order = ?out.slots.iter().map(|s| s.engine_id).collect::<Vec<_>>(),
            "signal chain reordered"
        );
        out
    }
}

fn sort_key(slot: &Slot) -> u16 {
    let Some(desc) = EngineCatalog::global().get(slot.engine_id) else {
        return UNKNOWN_KEY;
    };
    let base = u16::from(desc.signal_chain_position()) * 10;
    match desc.placement {
        Placement::Head => 0,
        Placement::DynamicsTail => DYNAMICS_TAIL_KEY,
        Placement::Natural if desc.category == Category::Spatial => SPATIAL_KEY,
        Placement::Natural => base,
    }
}
