//! Rate limiting utilities

use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::num::NonZeroU32;
use std::sync::Arc;

/// Rate limiter type alias
pub type Limiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Create a rate limiter with the specified requests per second
pub fn create_limiter(requests_per_second: u32) -> Arc<Limiter> {
    let quota = Quota::per_second(NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN));
    Arc::new(RateLimiter::direct(quota))
}

/// Budget for streamed messages (aim updates, pings), above the observation rate
pub const STREAM_RATE_LIMIT: u32 = 60;

/// Per-connection rate limiter state
#[derive(Clone)]
pub struct ConnectionRateLimiter {
    stream_limiter: Arc<Limiter>,
}

impl ConnectionRateLimiter {
    pub fn new() -> Self {
        Self {
            stream_limiter: create_limiter(STREAM_RATE_LIMIT),
        }
    }

    /// Check if a streamed message is allowed (returns true if allowed)
    pub fn check_stream(&self) -> bool {
        self.stream_limiter.check().is_ok()
    }
}

impl Default for ConnectionRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burst_beyond_quota_is_refused() {
        let limiter = ConnectionRateLimiter::new();
        let allowed = (0..STREAM_RATE_LIMIT * 2)
            .filter(|_| limiter.check_stream())
            .count();
        assert!(allowed >= 1);
        assert!(allowed <= STREAM_RATE_LIMIT as usize + 1);
    }
}
