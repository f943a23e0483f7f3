use thiserror::Error;

/// Failure classes the refinement pipeline distinguishes.
///
/// Only [`RefineError::Config`] can reach a caller; the others are either
/// repaired in place or turned into the minimal-safe preset at the safety
/// boundary.
#[derive(Debug, Error)]
pub enum RefineError {
    #[error("invalid reference: {0}")]
    InvalidReference(String),
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),
    #[error("structural deficiency: {0}")]
    StructuralDeficiency(String),
    #[error("internal failure: {0}")]
    InternalFailure(String),
    #[error("config error: {0}")]
    Config(String),
}

pub type RefineResult<T> = Result<T, RefineError>;
