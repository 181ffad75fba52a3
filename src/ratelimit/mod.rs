// src/ratelimit/mod.rs
// Per-IP rate limiting for the unauthenticated auth/pairing HTTP surface
// (§4.8's token endpoints are the brute-force risk — a pairing token or
// password guess costs nothing to retry without this).
//
// Grounded on the teacher's `utils/rate_limiter.rs` (same `governor::Quota`
// + `Jitter` wrapper) and `watcher/registry.rs`'s `parking_lot::RwLock`-
// guarded map for the per-key registry.

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Jitter, Quota, RateLimiter as GovRateLimiter};
use parking_lot::RwLock;

struct PerKeyLimiter {
    limiter: GovRateLimiter<NotKeyed, InMemoryState, DefaultClock>,
    jitter: Jitter,
}

impl PerKeyLimiter {
    fn new(requests_per_minute: u32) -> Self {
        let quota = Quota::per_minute(NonZeroU32::new(requests_per_minute.max(1)).unwrap());
        Self {
            limiter: GovRateLimiter::direct(quota),
            jitter: Jitter::new(Duration::from_millis(10), Duration::from_millis(100)),
        }
    }

    fn check(&self) -> bool {
        self.limiter.check().is_ok()
    }
}

/// Guards a keyed set of endpoints (one bucket per client IP) against
/// brute-force retries. Never blocks: callers get a yes/no and decide
/// themselves whether to reject with `429`.
pub struct RateLimiterRegistry {
    requests_per_minute: u32,
    limiters: RwLock<HashMap<String, Arc<PerKeyLimiter>>>,
}

impl RateLimiterRegistry {
    pub fn new(requests_per_minute: u32) -> Self {
        Self {
            requests_per_minute,
            limiters: RwLock::new(HashMap::new()),
        }
    }

    /// Returns `true` if `key` (typically a client IP) is still within quota.
    pub fn check(&self, key: &str) -> bool {
        if let Some(limiter) = self.limiters.read().get(key) {
            return limiter.check();
        }

        let mut limiters = self.limiters.write();
        let limiter = limiters
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(PerKeyLimiter::new(self.requests_per_minute)))
            .clone();
        limiter.check()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enforces_quota_then_rejects() {
        let registry = RateLimiterRegistry::new(2);
        assert!(registry.check("1.2.3.4"));
        assert!(registry.check("1.2.3.4"));
        assert!(!registry.check("1.2.3.4"));
    }

    #[test]
    fn keys_are_independent() {
        let registry = RateLimiterRegistry::new(1);
        assert!(registry.check("a"));
        assert!(registry.check("b"));
        assert!(!registry.check("a"));
    }
}
