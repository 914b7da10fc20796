use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use likely_stable::unlikely;
use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, trace, warn};

use crate::error::{AcquireError, ConfigurationError, TryAcquireError};
use crate::limit::RateLimit;
use crate::tick::TickSchedule;

const REFILL_THREAD_NAME: &str = "tollgate-refill";

/// A token-bucket rate limiter for threaded code.
///
/// The bucket starts full with [`capacity`](Self::capacity) permits. A
/// dedicated refill thread adds one permit every
/// [`refill_interval`](Self::refill_interval) as long as the bucket is not
/// full; ticks that find the bucket full are discarded and late ticks are
/// never made up for. Callers take one permit per [`wait`](Self::wait).
///
/// The permit count lives in a single mutex-guarded counter, which is also
/// where the refill thread parks between ticks. Blocked callers are woken
/// one per refilled permit, in no particular order.
///
/// # Shutdown
///
/// [`stop`](Self::stop) ends the refill thread and releases every blocked
/// caller with [`AcquireError::Stopped`]. Dropping the limiter stops it too,
/// so the refill thread never outlives its owner.
///
/// # Examples
///
/// ```rust
/// use tollgate::RateLimiter;
///
/// let limiter = RateLimiter::new(5).unwrap();
///
/// // the first five calls go through immediately
/// for _ in 0..5 {
///     limiter.wait().unwrap();
/// }
/// assert_eq!(0, limiter.available_permits());
///
/// // the sixth one waits for the next refill tick, roughly 200ms later
/// limiter.wait().unwrap();
///
/// limiter.stop();
/// assert!(limiter.wait().is_err());
/// ```
pub struct RateLimiter {
    shared: Arc<Shared>,
    refiller: Mutex<Option<JoinHandle<()>>>,
}

struct Shared {
    limit: RateLimit,
    state: Mutex<State>,
    permit_available: Condvar,
    shutdown: Condvar,
}

struct State {
    available: u32,
    running: bool,
}

impl State {
    fn take(&mut self) -> Result<(), TryAcquireError> {
        if unlikely(!self.running) {
            return Err(TryAcquireError::Stopped);
        }
        if self.available == 0 {
            return Err(TryAcquireError::Exhausted);
        }
        self.available -= 1;
        Ok(())
    }
}

impl RateLimiter {
    /// Creates a limiter admitting `rate_per_second` permits per second and
    /// starts its refill thread.
    ///
    /// Fails with [`ConfigurationError`] if the rate is not positive, is above
    /// [`MAX_RATE_PER_SECOND`](crate::MAX_RATE_PER_SECOND), or the thread
    /// cannot be spawned.
    pub fn new(rate_per_second: i64) -> Result<Self, ConfigurationError> {
        Self::try_with_limit(RateLimit::try_from(rate_per_second)?)
    }

    /// Creates a limiter from an already validated [`RateLimit`].
    ///
    /// # Panics
    ///
    /// Panics if the operating system refuses to spawn the refill thread, the
    /// same way [`std::thread::spawn`] does. See
    /// [`try_with_limit`](Self::try_with_limit) for a non-panicking variant.
    pub fn with_limit(limit: RateLimit) -> Self {
        match Self::try_with_limit(limit) {
            Ok(limiter) => limiter,
            Err(err) => construction_failed(err),
        }
    }

    /// Like [`with_limit`](Self::with_limit), but reports a thread spawn
    /// failure as [`ConfigurationError::Spawn`].
    pub fn try_with_limit(limit: RateLimit) -> Result<Self, ConfigurationError> {
        let shared = Arc::new(Shared {
            limit,
            state: Mutex::new(State {
                available: limit.capacity().get(),
                running: true,
            }),
            permit_available: Condvar::new(),
            shutdown: Condvar::new(),
        });
        let refiller = thread::Builder::new()
            .name(REFILL_THREAD_NAME.to_owned())
            .spawn({
                let shared = Arc::clone(&shared);
                move || shared.refill_loop()
            })
            .map_err(ConfigurationError::Spawn)?;
        debug!(
            capacity = limit.rate_per_second(),
            refill_interval = ?limit.refill_interval(),
            "rate limiter started"
        );
        Ok(Self {
            shared,
            refiller: Mutex::new(Some(refiller)),
        })
    }

    /// Blocks until a permit is available and takes it.
    ///
    /// Returns [`AcquireError::Stopped`] if the limiter is stopped before a
    /// permit could be taken. There is no timeout: on a limiter that is
    /// never stopped this returns once the refill thread gets to it. Use
    /// [`wait_timeout`](Self::wait_timeout) to bound the wait.
    pub fn wait(&self) -> Result<(), AcquireError> {
        let mut state = self.shared.state.lock();
        loop {
            match state.take() {
                Err(TryAcquireError::Exhausted) => {}
                taken => return taken.map_err(AcquireError::from),
            }
            self.shared.permit_available.wait(&mut state);
        }
    }

    /// Blocks for at most `timeout` waiting for a permit.
    ///
    /// Returns [`AcquireError::TimedOut`] without consuming anything if no
    /// permit showed up in time.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<(), AcquireError> {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.wait_deadline(deadline),
            None => self.wait(),
        }
    }

    /// Blocks until `deadline` at the latest waiting for a permit.
    pub fn wait_deadline(&self, deadline: Instant) -> Result<(), AcquireError> {
        let mut state = self.shared.state.lock();
        loop {
            match state.take() {
                Err(TryAcquireError::Exhausted) => {}
                taken => return taken.map_err(AcquireError::from),
            }
            if self
                .shared
                .permit_available
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                // a permit may have landed right at the deadline
                return state.take().map_err(AcquireError::from);
            }
        }
    }

    /// Takes a permit if one is available right now.
    pub fn try_acquire(&self) -> Result<(), TryAcquireError> {
        self.shared.state.lock().take()
    }

    /// Stops the refill thread and releases all blocked callers with
    /// [`AcquireError::Stopped`].
    ///
    /// Returns once the refill thread has exited. Calling it more than once
    /// is harmless.
    pub fn stop(&self) {
        {
            let mut state = self.shared.state.lock();
            if state.running {
                state.running = false;
                debug!(
                    capacity = self.shared.limit.rate_per_second(),
                    "rate limiter stopped"
                );
            }
            self.shared.permit_available.notify_all();
            self.shared.shutdown.notify_all();
        }
        if let Some(refiller) = self.refiller.lock().take() {
            if refiller.join().is_err() {
                warn!("rate limiter refill thread panicked");
            }
        }
    }

    /// Whether [`stop`](Self::stop) has been called.
    pub fn is_stopped(&self) -> bool {
        !self.shared.state.lock().running
    }

    /// Number of permits that can be taken right now without blocking.
    ///
    /// Always within `0..=capacity`. The value may be stale by the time the
    /// caller looks at it.
    pub fn available_permits(&self) -> u32 {
        self.shared.state.lock().available
    }

    /// Maximum number of permits the bucket holds, equal to the rate.
    pub fn capacity(&self) -> u32 {
        self.shared.limit.capacity().get()
    }

    /// Period between two single-permit refills.
    pub fn refill_interval(&self) -> Duration {
        self.shared.limit.refill_interval()
    }

    /// The configuration this limiter was built from.
    pub fn limit(&self) -> &RateLimit {
        &self.shared.limit
    }
}

impl Shared {
    fn refill_loop(&self) {
        let capacity = self.limit.capacity().get();
        let mut schedule = TickSchedule::new(self.limit.refill_interval(), Instant::now());
        let mut state = self.state.lock();
        loop {
            let deadline = schedule.deadline();
            while state.running && Instant::now() < deadline {
                self.shutdown.wait_until(&mut state, deadline);
            }
            if !state.running {
                break;
            }
            if state.available < capacity {
                state.available += 1;
                self.permit_available.notify_one();
                trace!(available = state.available, "refilled one permit");
            }
            schedule.advance(Instant::now());
            // at high rates the next tick is already due here and the wait
            // above never parks, so hand the lock to blocked callers
            MutexGuard::bump(&mut state);
        }
    }
}

#[cold]
fn construction_failed(err: ConfigurationError) -> ! {
    match std::error::Error::source(&err) {
        Some(source) => panic!("{err}: {source}"),
        None => panic!("{err}"),
    }
}

impl Drop for RateLimiter {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("RateLimiter")
            .field("limit", &self.shared.limit)
            .field("available", &state.available)
            .field("running", &state.running)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use nonzero_ext::nonzero;

    use super::*;

    #[test]
    fn starts_full() {
        let limiter = RateLimiter::new(7).unwrap();
        assert_eq!(7, limiter.capacity());
        assert_eq!(7, limiter.available_permits());
        assert!(!limiter.is_stopped());
    }

    #[test]
    fn rejects_bad_rates_before_spawning() {
        assert!(matches!(
            RateLimiter::new(0),
            Err(ConfigurationError::NonPositiveRate(0))
        ));
        assert!(matches!(
            RateLimiter::new(-3),
            Err(ConfigurationError::NonPositiveRate(-3))
        ));
        assert!(matches!(
            RateLimiter::new(5_000_000_000),
            Err(ConfigurationError::RateTooHigh(_))
        ));
    }

    #[test]
    fn try_acquire_drains_the_burst() {
        let limiter = RateLimiter::with_limit(RateLimit::per_second(nonzero!(3u32)));
        assert_eq!(Ok(()), limiter.try_acquire());
        assert_eq!(Ok(()), limiter.try_acquire());
        assert_eq!(Ok(()), limiter.try_acquire());
        assert_eq!(Err(TryAcquireError::Exhausted), limiter.try_acquire());
        assert_eq!(0, limiter.available_permits());
    }

    #[test]
    fn refill_never_exceeds_capacity() {
        let limiter = RateLimiter::new(100).unwrap();
        // 20 refill ticks elapse on a full bucket
        thread::sleep(Duration::from_millis(200));
        assert_eq!(100, limiter.available_permits());
    }

    #[test]
    fn refill_adds_one_permit_per_tick() {
        let limiter = RateLimiter::new(10).unwrap();
        while limiter.try_acquire().is_ok() {}
        let start = Instant::now();
        limiter.wait().unwrap();
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(50), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(500), "{elapsed:?}");
        assert_eq!(0, limiter.available_permits());
    }

    #[test]
    fn wait_timeout_gives_up_without_consuming() {
        let limiter = RateLimiter::new(1).unwrap();
        limiter.wait().unwrap();
        let start = Instant::now();
        assert_eq!(
            Err(AcquireError::TimedOut),
            limiter.wait_timeout(Duration::from_millis(50))
        );
        assert!(start.elapsed() >= Duration::from_millis(50));
        assert_eq!(0, limiter.available_permits());
    }

    #[test]
    fn wait_timeout_succeeds_when_a_permit_is_free() {
        let limiter = RateLimiter::new(2).unwrap();
        assert_eq!(Ok(()), limiter.wait_timeout(Duration::ZERO));
        assert_eq!(Ok(()), limiter.wait_timeout(Duration::from_millis(1)));
        assert_eq!(
            Err(AcquireError::TimedOut),
            limiter.wait_timeout(Duration::ZERO)
        );
    }

    #[test]
    fn huge_timeout_falls_back_to_wait() {
        let limiter = RateLimiter::new(1).unwrap();
        assert_eq!(Ok(()), limiter.wait_timeout(Duration::MAX));
    }

    #[test]
    fn stop_releases_blocked_waiters() {
        let limiter = RateLimiter::new(1).unwrap();
        limiter.wait().unwrap();
        let released = AtomicU32::new(0);
        thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    assert_eq!(Err(AcquireError::Stopped), limiter.wait());
                    released.fetch_add(1, Ordering::Relaxed);
                });
            }
            thread::sleep(Duration::from_millis(50));
            let start = Instant::now();
            limiter.stop();
            // joining the refill thread must not wait for its next tick
            assert!(start.elapsed() < Duration::from_millis(500));
        });
        assert_eq!(4, released.load(Ordering::Relaxed));
    }

    #[test]
    fn stop_is_idempotent_and_final() {
        let limiter = RateLimiter::new(3).unwrap();
        limiter.stop();
        limiter.stop();
        assert!(limiter.is_stopped());
        assert_eq!(Err(AcquireError::Stopped), limiter.wait());
        assert_eq!(
            Err(AcquireError::Stopped),
            limiter.wait_timeout(Duration::from_millis(10))
        );
        assert_eq!(Err(TryAcquireError::Stopped), limiter.try_acquire());
    }

    #[test]
    fn stopped_limiter_no_longer_refills() {
        let limiter = RateLimiter::new(50).unwrap();
        while limiter.try_acquire().is_ok() {}
        limiter.stop();
        thread::sleep(Duration::from_millis(100));
        assert_eq!(0, limiter.available_permits());
    }

    #[test]
    #[should_panic(expected = "failed to spawn the refill thread: no threads left")]
    fn spawn_failure_panic_names_the_cause() {
        construction_failed(ConfigurationError::Spawn(std::io::Error::other(
            "no threads left",
        )));
    }

    #[test]
    fn debug_shows_state() {
        let limiter = RateLimiter::new(2).unwrap();
        limiter.try_acquire().unwrap();
        let printed = format!("{limiter:?}");
        assert!(printed.contains("available: 1"), "{printed}");
        assert!(printed.contains("running: true"), "{printed}");
    }
}
