use std::time::{Duration, Instant};

/// Fixed-rate schedule for the refill thread.
///
/// Ticks are anchored to the instant the schedule was created. A tick that
/// is delivered late never causes the ones it overran to be delivered in a
/// burst: the schedule jumps to the first boundary after the late delivery.
#[derive(Debug, Clone)]
pub(crate) struct TickSchedule {
    period: Duration,
    next: Instant,
}

impl TickSchedule {
    pub fn new(period: Duration, start: Instant) -> Self {
        debug_assert!(!period.is_zero());
        Self {
            period,
            next: start + period,
        }
    }

    /// When the pending tick is due.
    pub fn deadline(&self) -> Instant {
        self.next
    }

    /// Records that the pending tick was handled at `now` and returns the
    /// deadline of the following one.
    pub fn advance(&mut self, now: Instant) -> Instant {
        let on_time = self.next + self.period;
        if now < on_time {
            self.next = on_time;
        } else {
            let period_nanos = self.period.as_nanos();
            // < period, which is at most one second
            let overshoot = now.duration_since(self.next).as_nanos() % period_nanos;
            self.next = now + (self.period - Duration::from_nanos(overshoot as u64));
        }
        self.next
    }
}
