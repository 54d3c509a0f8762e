//! Dispatch client, provider router, and rate limiter.

mod dispatch;
mod limiter;
mod router;

pub use dispatch::*;
pub use limiter::*;
pub use router::*;
