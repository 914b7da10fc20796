use std::sync::Arc;

use futures::{StreamExt, stream};
use tokio::task::JoinSet;
use tollgate::{AsyncRateLimiter, RateLimitedStreamExt};

#[tokio::main(flavor = "multi_thread")]
async fn main() {
    let limiter = Arc::new(AsyncRateLimiter::new(5).unwrap());

    let start = tokio::time::Instant::now();
    let mut handles = JoinSet::new();
    for i in 1..=4 {
        handles.spawn({
            let limiter = Arc::clone(&limiter);
            async move {
                let mut stream1 = std::pin::pin!(stream::iter(1..=5).rate_limit(limiter));
                while let Some(item) = stream1.next().await {
                    println!("[stream={i}] item: {}, elapsed={:?}", item, start.elapsed());
                }
            }
        });
    }

    handles.join_all().await;
    limiter.stop();
    println!("Completed in {:?}", start.elapsed());
}
