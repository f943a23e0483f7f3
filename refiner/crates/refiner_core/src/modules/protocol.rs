//! Wire types shared with every consumer of the refiner.
pub use chimera_protocol::*;
