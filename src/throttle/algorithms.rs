// Four independent rate-limiting algorithms behind one trait, selected by
// `Algorithm.Type` configuration.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

pub struct CheckResult {
    pub allowed: bool,
    pub retry_after: Duration,
    pub remaining: f64,
}

pub trait RateLimitAlgorithm: Send + Sync {
    /// Would a request be admitted right now, without consuming budget.
    fn check(&mut self, now: Instant) -> CheckResult;
    /// Consume budget for an admitted request.
    fn record(&mut self, now: Instant);
}

/// Token bucket: `capacity` tokens, refilled at `refill_per_second`.
pub struct TokenBucket {
    capacity: f64,
    refill_per_second: f64,
    tokens: f64,
    last_refill: Option<Instant>,
}

impl TokenBucket {
    pub fn new(capacity: f64, refill_per_second: f64) -> Self {
        Self {
            capacity: capacity.max(0.0),
            refill_per_second: refill_per_second.max(0.0),
            tokens: capacity.max(0.0),
            last_refill: None,
        }
    }

    fn refill(&mut self, now: Instant) {
        if let Some(last) = self.last_refill {
            let elapsed = now.saturating_duration_since(last).as_secs_f64();
            self.tokens = (self.tokens + elapsed * self.refill_per_second).min(self.capacity);
        }
        self.last_refill = Some(now);
    }
}

impl RateLimitAlgorithm for TokenBucket {
    fn check(&mut self, now: Instant) -> CheckResult {
        self.refill(now);
        if self.tokens >= 1.0 {
            CheckResult {
                allowed: true,
                retry_after: Duration::ZERO,
                remaining: self.tokens - 1.0,
            }
        } else {
            let deficit = 1.0 - self.tokens;
            let retry_secs = if self.refill_per_second > 0.0 {
                deficit / self.refill_per_second
            } else {
                f64::MAX
            };
            CheckResult {
                allowed: false,
                retry_after: Duration::from_secs_f64(retry_secs),
                remaining: 0.0,
            }
        }
    }

    fn record(&mut self, now: Instant) {
        self.refill(now);
        self.tokens = (self.tokens - 1.0).max(0.0);
    }
}

/// Leaky bucket: modeled as a token bucket whose "leak" is the refill rate
/// draining an outstanding-requests counter rather than replenishing
/// tokens — functionally the dual of the token bucket for admission control.
pub struct LeakyBucket {
    inner: TokenBucket,
}

impl LeakyBucket {
    pub fn new(capacity: f64, leak_rate_per_second: f64) -> Self {
        Self {
            inner: TokenBucket::new(capacity, leak_rate_per_second),
        }
    }
}

impl RateLimitAlgorithm for LeakyBucket {
    fn check(&mut self, now: Instant) -> CheckResult {
        self.inner.check(now)
    }

    fn record(&mut self, now: Instant) {
        self.inner.record(now)
    }
}

/// Fixed window: `limit` requests per `window` duration, hard reset at
/// window boundaries.
pub struct FixedWindow {
    limit: f64,
    window: Duration,
    window_start: Option<Instant>,
    count: f64,
}

impl FixedWindow {
    pub fn new(limit: f64, window: Duration) -> Self {
        Self {
            limit: limit.max(0.0),
            window,
            window_start: None,
            count: 0.0,
        }
    }

    fn roll_window(&mut self, now: Instant) {
        match self.window_start {
            Some(start) if now.saturating_duration_since(start) < self.window => {}
            _ => {
                self.window_start = Some(now);
                self.count = 0.0;
            }
        }
    }
}

impl RateLimitAlgorithm for FixedWindow {
    fn check(&mut self, now: Instant) -> CheckResult {
        self.roll_window(now);
        if self.count < self.limit {
            CheckResult {
                allowed: true,
                retry_after: Duration::ZERO,
                remaining: self.limit - self.count,
            }
        } else {
            let elapsed = self.window_start.map(|s| now.saturating_duration_since(s)).unwrap_or(Duration::ZERO);
            let retry_after = self.window.saturating_sub(elapsed);
            CheckResult {
                allowed: false,
                retry_after,
                remaining: 0.0,
            }
        }
    }

    fn record(&mut self, now: Instant) {
        self.roll_window(now);
        self.count += 1.0;
    }
}

/// Sliding window: `number_of_windows` sub-windows of `window / n` each,
/// admitting while the sum of timestamps within the trailing `window` stays
/// under `limit`.
pub struct SlidingWindow {
    limit: f64,
    window: Duration,
    timestamps: VecDeque<Instant>,
}

impl SlidingWindow {
    pub fn new(limit: f64, window: Duration, _number_of_sub_windows: usize) -> Self {
        Self {
            limit: limit.max(0.0),
            window,
            timestamps: VecDeque::new(),
        }
    }

    fn evict_expired(&mut self, now: Instant) {
        while let Some(&front) = self.timestamps.front() {
            if now.saturating_duration_since(front) >= self.window {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }
    }
}

impl RateLimitAlgorithm for SlidingWindow {
    fn check(&mut self, now: Instant) -> CheckResult {
        self.evict_expired(now);
        if (self.timestamps.len() as f64) < self.limit {
            CheckResult {
                allowed: true,
                retry_after: Duration::ZERO,
                remaining: self.limit - self.timestamps.len() as f64,
            }
        } else {
            let retry_after = self
                .timestamps
                .front()
                .map(|&oldest| self.window.saturating_sub(now.saturating_duration_since(oldest)))
                .unwrap_or(Duration::ZERO);
            CheckResult {
                allowed: false,
                retry_after,
                remaining: 0.0,
            }
        }
    }

    fn record(&mut self, now: Instant) {
        self.evict_expired(now);
        self.timestamps.push_back(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_bucket_admits_up_to_capacity_then_denies() {
        let mut bucket = TokenBucket::new(3.0, 0.0);
        let now = Instant::now();
        for _ in 0..3 {
            assert!(bucket.check(now).allowed);
            bucket.record(now);
        }
        assert!(!bucket.check(now).allowed);
    }

    #[test]
    fn fixed_window_resets_after_window_elapses() {
        let mut window = FixedWindow::new(2.0, Duration::from_millis(20));
        let t0 = Instant::now();
        assert!(window.check(t0).allowed);
        window.record(t0);
        assert!(window.check(t0).allowed);
        window.record(t0);
        assert!(!window.check(t0).allowed);

        let t1 = t0 + Duration::from_millis(25);
        assert!(window.check(t1).allowed);
    }

    #[test]
    fn sliding_window_evicts_entries_older_than_window() {
        let mut window = SlidingWindow::new(1.0, Duration::from_millis(20), 4);
        let t0 = Instant::now();
        assert!(window.check(t0).allowed);
        window.record(t0);
        assert!(!window.check(t0).allowed);

        let t1 = t0 + Duration::from_millis(25);
        assert!(window.check(t1).allowed);
    }
}
