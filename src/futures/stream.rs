use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};

use futures::Stream;
use futures::future::BoxFuture;
use pin_project_lite::pin_project;

use super::limiter::AsyncRateLimiter;
use crate::error::{AcquireError, TryAcquireError};

pin_project! {
    /// A stream wrapper that takes one permit from an [`AsyncRateLimiter`]
    /// before yielding each item.
    ///
    /// Items are pulled from the inner stream first and held back until a
    /// permit is granted, so an exhausted inner stream never costs a permit.
    /// Once the limiter is stopped the stream ends; an item held back at that
    /// point is dropped.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use std::sync::Arc;
    ///
    /// use futures::{StreamExt, stream};
    /// use tollgate::{AsyncRateLimiter, RateLimitedStreamExt};
    ///
    /// # #[tokio::main(flavor = "current_thread", start_paused = true)]
    /// # async fn main() {
    /// let limiter = Arc::new(AsyncRateLimiter::new(10).unwrap());
    /// let items: Vec<_> = stream::iter(0..20).rate_limit(limiter).collect().await;
    /// assert_eq!(20, items.len());
    /// # }
    /// ```
    pub struct RateLimitedStream<S>
    where
        S: Stream,
    {
        #[pin]
        stream: S,
        limiter: Arc<AsyncRateLimiter>,
        acquire: Option<BoxFuture<'static, Result<(), AcquireError>>>,
        pending_item: Option<S::Item>,
        stopped: bool,
    }
}

impl<S> RateLimitedStream<S>
where
    S: Stream,
{
    /// Creates a new rate-limited stream.
    ///
    /// # Arguments
    ///
    /// * `stream` - The underlying stream to rate limit
    /// * `limiter` - The limiter every item takes a permit from
    pub fn new(stream: S, limiter: Arc<AsyncRateLimiter>) -> Self {
        Self {
            stream,
            limiter,
            acquire: None,
            pending_item: None,
            stopped: false,
        }
    }

    /// Returns the limiter this stream draws permits from.
    pub fn limiter(&self) -> &Arc<AsyncRateLimiter> {
        &self.limiter
    }
}

impl<S> Stream for RateLimitedStream<S>
where
    S: Stream,
{
    type Item = S::Item;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();
        loop {
            // an item is held back until its permit arrives
            if let Some(acquire) = this.acquire.as_mut() {
                let acquired = ready!(acquire.as_mut().poll(cx));
                *this.acquire = None;
                let item = this.pending_item.take();
                return match acquired {
                    Ok(()) => Poll::Ready(item),
                    Err(_) => {
                        *this.stopped = true;
                        Poll::Ready(None)
                    }
                };
            }
            if *this.stopped {
                return Poll::Ready(None);
            }

            let Some(item) = ready!(this.stream.as_mut().poll_next(cx)) else {
                return Poll::Ready(None);
            };
            match this.limiter.try_acquire() {
                Ok(()) => return Poll::Ready(Some(item)),
                Err(TryAcquireError::Stopped) => {
                    *this.stopped = true;
                    return Poll::Ready(None);
                }
                Err(TryAcquireError::Exhausted) => {
                    let limiter = Arc::clone(this.limiter);
                    *this.pending_item = Some(item);
                    *this.acquire = Some(Box::pin(async move { limiter.wait().await }));
                }
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.stopped {
            return (0, Some(0));
        }
        let pending = usize::from(self.pending_item.is_some());
        let (lower, upper) = self.stream.size_hint();
        (
            lower.saturating_add(pending),
            upper.and_then(|upper| upper.checked_add(pending)),
        )
    }
}
