use thiserror::Error;

/// Engine layer errors - combines all error types
///
/// Iterator corruption is deliberately absent: a corrupt cursor is
/// recovered inside the expander by restarting from the derived starting
/// point and never reaches a caller.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Retryable storage failure; the atomic commit wrote nothing, so the
    /// next scheduled trigger simply tries again.
    #[error(transparent)]
    Transient(#[from] almanac_store::StoreError),

    #[error(transparent)]
    CoreError(#[from] almanac_core::error::CoreError),

    /// Coverage was still incomplete after the maximum number of
    /// expansion passes. The cache stays usable with partial coverage.
    #[error("Expansion exhausted after {passes} passes")]
    ExpansionExhausted { passes: u32 },

    /// The sync source could not provide data. Only post-sync triggers
    /// raise this; purely local expansion is unaffected.
    #[error("Sync source unavailable: {0}")]
    SourceUnavailable(String),

    /// A recurrence rule failed to parse or validate.
    #[error("Invalid recurrence rule: {0}")]
    InvalidRule(String),

    #[error("Invariant violation: {0}")]
    InvariantViolation(&'static str),
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;
