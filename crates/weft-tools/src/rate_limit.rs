use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Instant;

use weft_core::policy::RateLimit;

/// Sliding-window call counter keyed by (tool, tenant).
///
/// Shared by every concurrent execution; all access goes through one mutex
/// so check-and-record is atomic.
#[derive(Default)]
pub struct RateLimiter {
    windows: Mutex<HashMap<(String, String), VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Calls recorded for (tool, tenant) within the window ending at `now`.
    pub fn count_at(&self, tool: &str, tenant: &str, limit: RateLimit, now: Instant) -> usize {
        let mut windows = match self.windows.lock() {
            Ok(w) => w,
            Err(poisoned) => poisoned.into_inner(),
        };
        match windows.get_mut(&(tool.to_string(), tenant.to_string())) {
            Some(calls) => {
                prune(calls, limit, now);
                calls.len()
            }
            None => 0,
        }
    }

    /// Would a call at `now` be allowed? Does not record anything.
    pub fn check_at(&self, tool: &str, tenant: &str, limit: RateLimit, now: Instant) -> bool {
        self.count_at(tool, tenant, limit, now) < limit.max_calls as usize
    }

    /// Record a call at `now` if the window has room. Returns false when denied.
    pub fn try_acquire_at(&self, tool: &str, tenant: &str, limit: RateLimit, now: Instant) -> bool {
        let mut windows = match self.windows.lock() {
            Ok(w) => w,
            Err(poisoned) => poisoned.into_inner(),
        };
        let calls = windows
            .entry((tool.to_string(), tenant.to_string()))
            .or_default();
        prune(calls, limit, now);
        if calls.len() >= limit.max_calls as usize {
            return false;
        }
        calls.push_back(now);
        true
    }

    pub fn try_acquire(&self, tool: &str, tenant: &str, limit: RateLimit) -> bool {
        self.try_acquire_at(tool, tenant, limit, Instant::now())
    }
}

fn prune(calls: &mut VecDeque<Instant>, limit: RateLimit, now: Instant) {
    let window = limit.window();
    while let Some(front) = calls.front() {
        if now.saturating_duration_since(*front) >= window {
            calls.pop_front();
        } else {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn denies_when_window_full() {
        let limiter = RateLimiter::new();
        let limit = RateLimit::new(2, 60);
        let t0 = Instant::now();
        assert!(limiter.try_acquire_at("crm", "acme", limit, t0));
        assert!(limiter.try_acquire_at("crm", "acme", limit, t0));
        assert!(!limiter.try_acquire_at("crm", "acme", limit, t0));
        assert!(!limiter.check_at("crm", "acme", limit, t0));
    }

    #[test]
    fn window_slides() {
        let limiter = RateLimiter::new();
        let limit = RateLimit::new(1, 10);
        let t0 = Instant::now();
        assert!(limiter.try_acquire_at("crm", "acme", limit, t0));
        assert!(!limiter.try_acquire_at("crm", "acme", limit, t0 + Duration::from_secs(9)));
        assert!(limiter.try_acquire_at("crm", "acme", limit, t0 + Duration::from_secs(10)));
    }

    #[test]
    fn keys_are_independent() {
        let limiter = RateLimiter::new();
        let limit = RateLimit::new(1, 60);
        let t0 = Instant::now();
        assert!(limiter.try_acquire_at("crm", "acme", limit, t0));
        assert!(limiter.try_acquire_at("crm", "globex", limit, t0));
        assert!(limiter.try_acquire_at("email", "acme", limit, t0));
        assert_eq!(limiter.count_at("crm", "acme", limit, t0), 1);
    }

    #[test]
    fn zero_limit_denies_everything() {
        let limiter = RateLimiter::new();
        assert!(!limiter.try_acquire("crm", "acme", RateLimit::new(0, 60)));
    }
}
