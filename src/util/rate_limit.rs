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
pub fn create_limiter(requests_per_second: u32, burst: u32) -> Arc<Limiter> {
    let rate = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN);
    let burst = NonZeroU32::new(burst).unwrap_or(rate);
    Arc::new(RateLimiter::direct(Quota::per_second(rate).allow_burst(burst)))
}

/// Sustained client messages per second per session. Movement alone is sent
/// every frame, so this sits above a 60 Hz render loop.
pub const MESSAGE_RATE_LIMIT: u32 = 90;

/// Short bursts allowed on top (joining, door groups, chat spam protection)
pub const MESSAGE_BURST: u32 = 120;

/// Authentication attempts per second per session
pub const AUTH_RATE_LIMIT: u32 = 1;

/// Per-session rate limiter state
#[derive(Clone)]
pub struct SessionRateLimiter {
    message_limiter: Arc<Limiter>,
    auth_limiter: Arc<Limiter>,
}

impl SessionRateLimiter {
    pub fn new() -> Self {
        Self {
            message_limiter: create_limiter(MESSAGE_RATE_LIMIT, MESSAGE_BURST),
            auth_limiter: create_limiter(AUTH_RATE_LIMIT, 3),
        }
    }

    /// Check if a client message is allowed (returns true if allowed)
    pub fn check_message(&self) -> bool {
        self.message_limiter.check().is_ok()
    }

    /// Check if a login attempt is allowed
    pub fn check_auth(&self) -> bool {
        self.auth_limiter.check().is_ok()
    }
}

impl Default for SessionRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burst_then_refuse() {
        let limiter = create_limiter(1, 5);
        for _ in 0..5 {
            assert!(limiter.check().is_ok());
        }
        assert!(limiter.check().is_err());
    }

    #[test]
    fn auth_attempts_are_scarce() {
        let limits = SessionRateLimiter::new();
        let allowed = (0..10).filter(|_| limits.check_auth()).count();
        assert_eq!(allowed, 3);
        assert!(limits.check_message());
    }
}
