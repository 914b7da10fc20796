use std::time::Instant;

use tollgate::RateLimiter;

fn main() {
    let limiter = RateLimiter::new(5).unwrap();
    let start = Instant::now();
    // five calls ride the initial burst, the rest are spaced 200ms apart
    for i in 1..=10 {
        limiter.wait().unwrap();
        println!("request {i} at {:?}", start.elapsed());
    }
    limiter.stop();
}
