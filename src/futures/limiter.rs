use std::future::Future;
use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{Either, select};
use tokio::sync::{Semaphore, TryAcquireError as SemaphoreTryAcquireError};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, trace};

use crate::error::{AcquireError, ConfigurationError, TryAcquireError};
use crate::limit::RateLimit;

/// A token-bucket rate limiter for tokio tasks.
///
/// Same contract as [`RateLimiter`](crate::RateLimiter), with suspension in
/// place of blocking. The permits live in a single
/// [`Semaphore`](tokio::sync::Semaphore) that only the refill task ever adds
/// to; acquired permits are forgotten, never returned.
///
/// Constructors spawn the refill task and must be called from within a
/// tokio runtime with the time driver enabled.
///
/// # Examples
///
/// ```rust
/// use std::time::Duration;
///
/// use tollgate::AsyncRateLimiter;
///
/// # #[tokio::main(flavor = "current_thread", start_paused = true)]
/// # async fn main() {
/// let limiter = AsyncRateLimiter::new(5).unwrap();
/// for _ in 0..5 {
///     limiter.wait().await.unwrap();
/// }
/// // the bucket is empty and the next refill is 200ms away
/// assert!(limiter.wait_timeout(Duration::from_millis(100)).await.is_err());
/// limiter.wait().await.unwrap();
/// limiter.stop();
/// # }
/// ```
pub struct AsyncRateLimiter {
    limit: RateLimit,
    permits: Arc<Semaphore>,
    refiller: JoinHandle<()>,
}

impl AsyncRateLimiter {
    /// Creates a limiter admitting `rate_per_second` permits per second and
    /// spawns its refill task.
    pub fn new(rate_per_second: i64) -> Result<Self, ConfigurationError> {
        Ok(Self::with_limit(RateLimit::try_from(rate_per_second)?))
    }

    /// Creates a limiter from an already validated [`RateLimit`].
    pub fn with_limit(limit: RateLimit) -> Self {
        let permits = Arc::new(Semaphore::new(limit.capacity().get() as usize));
        let refiller = tokio::spawn(refill(Arc::clone(&permits), limit));
        debug!(
            capacity = limit.rate_per_second(),
            refill_interval = ?limit.refill_interval(),
            "async rate limiter started"
        );
        Self {
            limit,
            permits,
            refiller,
        }
    }

    /// Waits until a permit is available and takes it.
    ///
    /// Resolves to [`AcquireError::Stopped`] if the limiter is stopped first.
    /// Dropping the returned future before it completes consumes nothing.
    pub async fn wait(&self) -> Result<(), AcquireError> {
        let permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| AcquireError::Stopped)?;
        permit.forget();
        Ok(())
    }

    /// Waits at most `timeout` for a permit.
    pub async fn wait_timeout(&self, timeout: Duration) -> Result<(), AcquireError> {
        tokio::time::timeout(timeout, self.wait())
            .await
            .map_err(|_| AcquireError::TimedOut)?
    }

    /// Waits for a permit unless `cancel` completes first, in which case
    /// [`AcquireError::Cancelled`] is returned and nothing is consumed.
    pub async fn wait_or_cancel<F>(&self, cancel: F) -> Result<(), AcquireError>
    where
        F: Future,
    {
        let acquire = pin!(self.wait());
        let cancel = pin!(cancel);
        match select(acquire, cancel).await {
            Either::Left((acquired, _)) => acquired,
            Either::Right(_) => Err(AcquireError::Cancelled),
        }
    }

    /// Takes a permit if one is available right now.
    pub fn try_acquire(&self) -> Result<(), TryAcquireError> {
        match self.permits.try_acquire() {
            Ok(permit) => {
                permit.forget();
                Ok(())
            }
            Err(SemaphoreTryAcquireError::NoPermits) => Err(TryAcquireError::Exhausted),
            Err(SemaphoreTryAcquireError::Closed) => Err(TryAcquireError::Stopped),
        }
    }

    /// Stops the refill task and releases all waiting tasks with
    /// [`AcquireError::Stopped`]. Calling it more than once is harmless.
    pub fn stop(&self) {
        if !self.permits.is_closed() {
            self.permits.close();
            debug!(
                capacity = self.limit.rate_per_second(),
                "async rate limiter stopped"
            );
        }
        self.refiller.abort();
    }

    /// Whether [`stop`](Self::stop) has been called.
    pub fn is_stopped(&self) -> bool {
        self.permits.is_closed()
    }

    /// Number of permits that can be taken right now without waiting.
    pub fn available_permits(&self) -> u32 {
        // bounded by capacity, which is a u32
        self.permits.available_permits() as u32
    }

    /// Maximum number of permits the bucket holds, equal to the rate.
    pub fn capacity(&self) -> u32 {
        self.limit.capacity().get()
    }

    /// Period between two single-permit refills.
    pub fn refill_interval(&self) -> Duration {
        self.limit.refill_interval()
    }

    /// The configuration this limiter was built from.
    pub fn limit(&self) -> &RateLimit {
        &self.limit
    }
}

async fn refill(permits: Arc<Semaphore>, limit: RateLimit) {
    let capacity = limit.capacity().get() as usize;
    let period = limit.refill_interval();
    let mut ticks = tokio::time::interval_at(Instant::now() + period, period);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        ticks.tick().await;
        if permits.is_closed() {
            break;
        }
        // only this task adds permits, so the count can only have dropped
        // since the check
        if permits.available_permits() < capacity {
            permits.add_permits(1);
            trace!(
                available = permits.available_permits(),
                "refilled one permit"
            );
        }
    }
}

impl Drop for AsyncRateLimiter {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for AsyncRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncRateLimiter")
            .field("limit", &self.limit)
            .field("available", &self.permits.available_permits())
            .field("running", &!self.permits.is_closed())
            .finish()
    }
}
