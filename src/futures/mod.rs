//! Async flavour of the limiter, for code running on tokio.

mod limiter;
mod stream;

pub use limiter::AsyncRateLimiter;
pub use stream::RateLimitedStream;

use std::sync::Arc;

use futures::Stream;

pub trait RateLimitedStreamExt: Stream + Sized {
    /// Takes one permit from `limiter` before yielding each item.
    fn rate_limit(self, limiter: Arc<AsyncRateLimiter>) -> RateLimitedStream<Self>;
}

impl<S> RateLimitedStreamExt for S
where
    S: Stream,
{
    fn rate_limit(self, limiter: Arc<AsyncRateLimiter>) -> RateLimitedStream<Self> {
        RateLimitedStream::new(self, limiter)
    }
}
