use thiserror::Error;

/// Store-level errors
#[derive(Error, Debug)]
pub enum StoreError {
    /// A retryable failure; commits are atomic so no partial state was
    /// written. Retried at the next scheduled trigger.
    #[error("Transient storage error: {0}")]
    Transient(String),

    /// Persisted data failed to deserialize or violated an invariant.
    #[error("Corrupt record: {0}")]
    Corrupt(String),

    #[error("Not found: {0}")]
    NotFound(uuid::Uuid),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
