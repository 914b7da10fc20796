use std::num::NonZeroU32;
use std::time::Duration;

use crate::error::ConfigurationError;

const NANOS_PER_SECOND: u64 = 1_000_000_000;

/// Highest supported rate. Above this the refill interval would be shorter
/// than one nanosecond.
pub const MAX_RATE_PER_SECOND: u32 = 1_000_000_000;

/// Configuration for a rate limiter.
///
/// The rate is expressed in permits per second. It doubles as the bucket
/// capacity, so a freshly built limiter admits a burst of up to one second's
/// worth of permits before callers start waiting for the refill process.
///
/// # Examples
///
/// ```rust
/// use std::num::NonZeroU32;
/// use std::time::Duration;
///
/// use tollgate::RateLimit;
///
/// let limit = RateLimit::per_second(NonZeroU32::new(5).unwrap());
/// assert_eq!(limit.rate_per_second(), 5);
/// assert_eq!(limit.refill_interval(), Duration::from_millis(200));
///
/// // untyped input goes through the fallible conversion
/// assert!(RateLimit::try_from(0i64).is_err());
/// ```
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    rate: NonZeroU32,
}

impl std::fmt::Debug for RateLimit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "RateLimit(rate_per_second={}, refill_interval={:?})",
            self.rate_per_second(),
            self.refill_interval()
        )
    }
}

impl RateLimit {
    /// Creates a rate limit of `rate` permits per second.
    ///
    /// # Panics
    ///
    /// Panics if `rate` exceeds [`MAX_RATE_PER_SECOND`]. Use
    /// [`RateLimit::try_from`] to validate untrusted input instead.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use tollgate::RateLimit;
    /// use std::num::NonZeroU32;
    ///
    /// let limit = RateLimit::per_second(NonZeroU32::new(100).unwrap());
    /// assert_eq!(limit.capacity(), NonZeroU32::new(100).unwrap());
    /// ```
    pub const fn per_second(rate: NonZeroU32) -> Self {
        assert!(
            rate.get() <= MAX_RATE_PER_SECOND,
            "rate exceeds MAX_RATE_PER_SECOND"
        );
        Self { rate }
    }

    /// Returns the sustained rate in permits per second.
    pub const fn rate_per_second(&self) -> u32 {
        self.rate.get()
    }

    /// Returns the bucket capacity, i.e. the largest burst a limiter admits.
    pub const fn capacity(&self) -> NonZeroU32 {
        self.rate
    }

    /// Returns the period between two single-permit refills.
    ///
    /// The division truncates, so rates that do not divide one second evenly
    /// refill marginally faster than nominal.
    pub const fn refill_interval(&self) -> Duration {
        Duration::from_nanos(NANOS_PER_SECOND / self.rate.get() as u64)
    }
}

impl TryFrom<i64> for RateLimit {
    type Error = ConfigurationError;

    fn try_from(rate: i64) -> Result<Self, Self::Error> {
        if rate <= 0 {
            return Err(ConfigurationError::NonPositiveRate(rate));
        }
        let rate = u32::try_from(rate)
            .ok()
            .filter(|rate| *rate <= MAX_RATE_PER_SECOND)
            .and_then(NonZeroU32::new)
            .ok_or(ConfigurationError::RateTooHigh(rate))?;
        Ok(Self { rate })
    }
}
