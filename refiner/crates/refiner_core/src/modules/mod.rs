pub mod catalog;
pub mod chain;
pub mod config;
pub mod error;
pub mod formatter;
pub mod nudge;
pub mod optimizer;
pub mod pipeline;
pub mod protocol;
pub mod relationships;
pub mod safety;
