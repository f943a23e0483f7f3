//! Refinement and safety validation for six-slot effect presets.
//!
//! A [`pipeline::Refiner`] takes a raw [`protocol::Blueprint`] plus the
//! user's [`protocol::Intent`] and always hands back a playable
//! [`protocol::PresetRecord`] together with a [`protocol::ValidationReport`].

pub mod modules;

pub use modules::{
    catalog, chain, config, error, formatter, nudge, optimizer, pipeline, protocol, relationships,
    safety,
};
