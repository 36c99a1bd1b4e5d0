use thiserror::Error;

/// A convenience `Result` type for engine operations.
pub type Result<T> = std::result::Result<T, TsdbError>;

/// Custom error type for the storage engine operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TsdbError {
    /// A point carried no tags, so it has no series identifier.
    #[error("tsdb: point missing tag")]
    MissingTag,

    /// A mutating operation was issued after `Engine::close`.
    #[error("tsdb: db is closed")]
    Closed,

    #[error("Lock acquisition failed: {0}")]
    LockPoisoned(String),

    #[error("Configuration Error: {0}")]
    Config(String),

    #[error("Background task error: {0}")]
    BackgroundTask(String),

    #[error("Metrics recorder error: {0}")]
    Metrics(String),
}

// Implement conversion from lock poison errors for convenience
impl<T> From<std::sync::PoisonError<T>> for TsdbError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        TsdbError::LockPoisoned(format!("Mutex/RwLock poisoned: {}", err))
    }
}
