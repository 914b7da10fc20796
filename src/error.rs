use crate::limit::MAX_RATE_PER_SECOND;

/// The limiter could not be built from the supplied configuration.
///
/// Raised synchronously by the constructors; when it is returned no
/// background refill work has been started.
#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    #[error("rate must be a positive number of permits per second, got {0}")]
    NonPositiveRate(i64),
    #[error(
        "rate of {0} permits per second exceeds the supported maximum of {max}",
        max = MAX_RATE_PER_SECOND
    )]
    RateTooHigh(i64),
    #[error("failed to spawn the refill thread")]
    Spawn(#[source] std::io::Error),
}

/// A blocking or suspending acquisition did not obtain a permit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AcquireError {
    /// The limiter was stopped before or while the caller was waiting.
    #[error("rate limiter has been stopped")]
    Stopped,
    /// The caller's deadline passed first.
    #[error("timed out waiting for a permit")]
    TimedOut,
    /// The caller's cancellation signal fired first.
    #[error("permit acquisition was cancelled")]
    Cancelled,
}

/// A non-blocking acquisition did not obtain a permit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TryAcquireError {
    #[error("no permits available")]
    Exhausted,
    #[error("rate limiter has been stopped")]
    Stopped,
}

impl From<TryAcquireError> for AcquireError {
    fn from(err: TryAcquireError) -> Self {
        match err {
            TryAcquireError::Exhausted => AcquireError::TimedOut,
            TryAcquireError::Stopped => AcquireError::Stopped,
        }
    }
}
