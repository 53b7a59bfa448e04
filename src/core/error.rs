use thiserror::Error;

/// Errors surfaced by a [`QueueProvider`](crate::provider::QueueProvider).
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("queue provider unavailable: {0}")]
    Unavailable(String),

    #[error("batch of {size} entries exceeds the provider limit of {max}")]
    BatchTooLarge { size: usize, max: usize },

    #[error("batch must contain at least one entry")]
    EmptyBatch,

    #[error("{failed} of {total} batch entries were rejected")]
    PartialBatch { failed: usize, total: usize },

    #[error("FIFO queue {0} requires a message group id")]
    MissingGroupId(String),

    #[error("receipt handle is invalid or expired: {0}")]
    InvalidReceipt(String),

    #[error("provider error: {0}")]
    Sdk(String),
}

/// Errors returned by the producer to the command interface.
#[derive(Debug, Error)]
pub enum ProducerError {
    #[error("count must be a whole number of at least 1")]
    InvalidCount,

    #[error("count must not exceed {max}")]
    CountTooLarge { max: usize },

    #[error("failure rate must be within 0..=100, got {0}")]
    InvalidFailureRate(f64),

    #[error("group id must not be empty")]
    EmptyGroupId,

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

impl ProducerError {
    /// Validation errors are the caller's fault, everything else is the provider's.
    pub fn is_validation(&self) -> bool {
        !matches!(self, ProducerError::Provider(_))
    }
}

/// The engine task has stopped and no longer accepts commands.
#[derive(Debug, Error)]
#[error("lifecycle engine is not running")]
pub struct EngineError;

#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error("poll failed: {0}")]
    Poll(#[from] ProviderError),

    #[error(transparent)]
    Engine(#[from] EngineError),
}
