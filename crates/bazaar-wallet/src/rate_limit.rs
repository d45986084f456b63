//! Fixed-window request throttling.
//!
//! One mechanism, two policies: the general API policy counts every request
//! by client IP; the login policy counts only *failed* attempts by IP+path,
//! so repeated legitimate logins are never penalized while credential
//! guessing is. Buckets reset lazily on next access once their window has
//! elapsed — no background sweep is needed for correctness, the periodic
//! purge only reclaims memory from idle keys.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::config::RateLimitSettings;

/// How attempts are counted toward the cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountMode {
    /// Every admitted request consumes budget at the gate.
    AllRequests,
    /// Only explicit [`RateLimiter::record_failure`] calls consume budget;
    /// the gate merely enforces the cap.
    FailuresOnly,
}

#[derive(Debug, Clone)]
pub struct RateLimitPolicy {
    /// Label used in logs and metrics.
    pub name: &'static str,
    pub window: Duration,
    pub max: u32,
    pub mode: CountMode,
}

/// Failed-login cap per IP+path within the shared window.
pub const LOGIN_MAX_FAILURES: u32 = 5;

struct WindowBucket {
    started: Instant,
    count: u32,
}

/// Per-key fixed-window counter. Cloning shares the underlying buckets.
///
/// Counters are process-local: with multiple service instances each process
/// bounds only its own traffic. The bucket map sits behind this one type so
/// a shared external store can replace it without touching call sites.
#[derive(Clone)]
pub struct RateLimiter {
    policy: RateLimitPolicy,
    buckets: Arc<DashMap<String, WindowBucket>>,
}

/// Gate verdict plus the numbers the 429 headers need.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Time until the active window elapses and the bucket resets.
    pub retry_after: Duration,
}

impl RateLimiter {
    pub fn new(policy: RateLimitPolicy) -> Self {
        RateLimiter {
            policy,
            buckets: Arc::new(DashMap::new()),
        }
    }

    /// General API policy: every request counts, keyed by client IP.
    pub fn general(settings: &RateLimitSettings) -> Self {
        Self::new(RateLimitPolicy {
            name: "api",
            window: settings.window,
            max: settings.max,
            mode: CountMode::AllRequests,
        })
    }

    /// Login policy: only failed attempts count, keyed by IP + route path.
    pub fn login(settings: &RateLimitSettings) -> Self {
        Self::new(RateLimitPolicy {
            name: "login",
            window: settings.window,
            max: LOGIN_MAX_FAILURES,
            mode: CountMode::FailuresOnly,
        })
    }

    pub fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }

    /// Admit or reject a request for `key`. In `AllRequests` mode an admitted
    /// request consumes one unit of budget atomically with the check.
    pub fn check(&self, key: &str) -> RateLimitDecision {
        let now = Instant::now();
        let mut bucket = self
            .buckets
            .entry(key.to_string())
            .or_insert_with(|| WindowBucket { started: now, count: 0 });

        // Lazy reset: the bucket entry lock makes reset + count atomic
        // with respect to concurrent requests on the same key.
        if now.duration_since(bucket.started) >= self.policy.window {
            bucket.started = now;
            bucket.count = 0;
        }

        let retry_after = self
            .policy
            .window
            .saturating_sub(now.duration_since(bucket.started));

        if bucket.count >= self.policy.max {
            return RateLimitDecision {
                allowed: false,
                limit: self.policy.max,
                remaining: 0,
                retry_after,
            };
        }

        if self.policy.mode == CountMode::AllRequests {
            bucket.count += 1;
        }

        RateLimitDecision {
            allowed: true,
            limit: self.policy.max,
            remaining: self.policy.max - bucket.count,
            retry_after,
        }
    }

    /// Count one failed attempt against `key`. Used by `FailuresOnly`
    /// policies after the guarded operation has been observed to fail.
    pub fn record_failure(&self, key: &str) {
        let now = Instant::now();
        let mut bucket = self
            .buckets
            .entry(key.to_string())
            .or_insert_with(|| WindowBucket { started: now, count: 0 });

        if now.duration_since(bucket.started) >= self.policy.window {
            bucket.started = now;
            bucket.count = 0;
        }
        bucket.count = bucket.count.saturating_add(1);
    }

    /// Drop buckets idle past twice the window. Returns the number removed.
    pub fn purge_idle(&self) -> usize {
        let cutoff = self.policy.window * 2;
        let before = self.buckets.len();
        self.buckets.retain(|_, b| b.started.elapsed() < cutoff);
        before - self.buckets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counting(window: Duration, max: u32) -> RateLimiter {
        RateLimiter::new(RateLimitPolicy {
            name: "test",
            window,
            max,
            mode: CountMode::AllRequests,
        })
    }

    fn failures_only(window: Duration, max: u32) -> RateLimiter {
        RateLimiter::new(RateLimitPolicy {
            name: "test-login",
            window,
            max,
            mode: CountMode::FailuresOnly,
        })
    }

    #[test]
    fn cap_enforced_within_window() {
        let limiter = counting(Duration::from_secs(60), 5);
        for _ in 0..5 {
            assert!(limiter.check("10.0.0.1").allowed);
        }
        let denied = limiter.check("10.0.0.1");
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
        assert!(denied.retry_after <= Duration::from_secs(60));
    }

    #[test]
    fn keys_are_independent() {
        let limiter = counting(Duration::from_secs(60), 2);
        assert!(limiter.check("a").allowed);
        assert!(limiter.check("a").allowed);
        assert!(!limiter.check("a").allowed);
        assert!(limiter.check("b").allowed);
    }

    #[test]
    fn window_elapse_resets_counter() {
        let limiter = counting(Duration::from_millis(50), 2);
        assert!(limiter.check("k").allowed);
        assert!(limiter.check("k").allowed);
        assert!(!limiter.check("k").allowed);

        std::thread::sleep(Duration::from_millis(60));
        // Reset happens lazily on this access, not via a sweeper.
        assert!(limiter.check("k").allowed);
    }

    #[test]
    fn remaining_counts_down() {
        let limiter = counting(Duration::from_secs(60), 3);
        assert_eq!(limiter.check("k").remaining, 2);
        assert_eq!(limiter.check("k").remaining, 1);
        assert_eq!(limiter.check("k").remaining, 0);
        assert!(!limiter.check("k").allowed);
    }

    #[test]
    fn failures_only_gate_does_not_consume() {
        let limiter = failures_only(Duration::from_secs(60), 5);
        // Many successful passes never move the counter.
        for _ in 0..20 {
            assert!(limiter.check("ip:login").allowed);
        }
    }

    #[test]
    fn success_between_failures_is_free() {
        let limiter = failures_only(Duration::from_secs(60), 5);
        for _ in 0..4 {
            assert!(limiter.check("ip:login").allowed);
            limiter.record_failure("ip:login");
        }
        // Successful attempt: checked, admitted, not recorded.
        assert!(limiter.check("ip:login").allowed);

        // A later failure still counts against the original four.
        assert!(limiter.check("ip:login").allowed);
        limiter.record_failure("ip:login");
        assert!(!limiter.check("ip:login").allowed);
    }

    #[test]
    fn failure_window_resets() {
        let limiter = failures_only(Duration::from_millis(50), 2);
        limiter.record_failure("k");
        limiter.record_failure("k");
        assert!(!limiter.check("k").allowed);

        std::thread::sleep(Duration::from_millis(60));
        assert!(limiter.check("k").allowed);
    }

    #[test]
    fn purge_drops_idle_buckets() {
        let limiter = counting(Duration::from_millis(20), 5);
        limiter.check("stale");
        std::thread::sleep(Duration::from_millis(50));
        limiter.check("fresh");
        assert_eq!(limiter.purge_idle(), 1);
    }

    #[test]
    fn login_constructor_uses_failure_cap() {
        let settings = RateLimitSettings {
            window: Duration::from_secs(900),
            max: 100,
        };
        let limiter = RateLimiter::login(&settings);
        assert_eq!(limiter.policy().max, LOGIN_MAX_FAILURES);
        assert_eq!(limiter.policy().mode, CountMode::FailuresOnly);
    }
}
