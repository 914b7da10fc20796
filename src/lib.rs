#![doc = include_str!("../README.md")]
//!
//! # Core Components
//!
//! - [`RateLimiter`] - Token bucket with a refill thread, for threaded code
//! - [`AsyncRateLimiter`] - The same bucket on tokio (requires the `async` feature)
//! - [`RateLimit`] - Validated rate configuration
//! - [`RateLimitedStreamExt`] - Stream adapter taking one permit per item (`async` feature)
//!
//! # Quick Start
//!
//! ```rust
//! use tollgate::RateLimiter;
//!
//! // 10 permits per second, all of them available right away
//! let limiter = RateLimiter::new(10).unwrap();
//!
//! // call before every outbound request
//! limiter.wait().unwrap();
//!
//! // stop during teardown; blocked callers are released with an error
//! limiter.stop();
//! ```

mod error;
#[cfg(feature = "async")]
pub mod futures;
mod limit;
mod limiter;
mod tick;

pub use error::*;
#[cfg(feature = "async")]
pub use crate::futures::{AsyncRateLimiter, RateLimitedStreamExt};
pub use limit::{MAX_RATE_PER_SECOND, RateLimit};
pub use limiter::RateLimiter;
