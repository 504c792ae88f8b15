//! Timing utilities
//!
//! Monotonic timestamps for packet bookkeeping, a periodic timer for the
//! transport's ack/resend, ping, and stats ticks, and a token-bucket rate
//! limiter serving as the fixed outgoing throttle hook.

use std::time::{Duration, Instant};

/// Monotonic timestamp
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timestamp(Instant);

impl Timestamp {
    #[inline]
    pub fn now() -> Self {
        Timestamp(Instant::now())
    }

    #[inline]
    pub fn as_instant(&self) -> Instant {
        self.0
    }

    #[inline]
    pub fn duration_since(&self, earlier: Timestamp) -> Duration {
        self.0.duration_since(earlier.0)
    }

    #[inline]
    pub fn elapsed(&self) -> Duration {
        self.0.elapsed()
    }
}

/// Timer for periodic operations
///
/// Drives the ack/resend tick, the liveness ping, and periodic statistics.
pub struct Timer {
    interval: Duration,
    last_fire: Timestamp,
}

impl Timer {
    pub fn new(interval: Duration) -> Self {
        Timer {
            interval,
            last_fire: Timestamp::now(),
        }
    }

    pub fn expired(&self) -> bool {
        self.last_fire.elapsed() >= self.interval
    }

    pub fn reset(&mut self) {
        self.last_fire = Timestamp::now();
    }

    /// Time until the next expiration
    pub fn time_until_expiration(&self) -> Duration {
        let elapsed = self.last_fire.elapsed();
        if elapsed >= self.interval {
            Duration::ZERO
        } else {
            self.interval - elapsed
        }
    }

    /// Fire the timer if expired, returning true if it fired
    pub fn try_fire(&mut self) -> bool {
        if self.expired() {
            self.reset();
            true
        } else {
            false
        }
    }
}

/// Token-bucket rate limiter
///
/// The transport consults this before each outbound datagram. Congestion
/// control beyond this fixed throttle is out of scope.
pub struct RateLimiter {
    /// Maximum tokens (burst size in bytes)
    capacity: u64,
    /// Current token count
    tokens: u64,
    /// Tokens added per microsecond
    rate: f64,
    /// Last refill time
    last_update: Timestamp,
}

impl RateLimiter {
    /// Create a limiter allowing `rate_bytes_per_sec` sustained with bursts
    /// up to `burst_bytes`.
    pub fn new(rate_bytes_per_sec: u64, burst_bytes: u64) -> Self {
        RateLimiter {
            capacity: burst_bytes,
            tokens: burst_bytes,
            rate: rate_bytes_per_sec as f64 / 1_000_000.0,
            last_update: Timestamp::now(),
        }
    }

    fn refill(&mut self) {
        let now = Timestamp::now();
        let elapsed_us = now.duration_since(self.last_update).as_micros() as f64;
        let new_tokens = (elapsed_us * self.rate) as u64;

        if new_tokens > 0 {
            self.tokens = (self.tokens + new_tokens).min(self.capacity);
            self.last_update = now;
        }
    }

    /// Consume tokens for `bytes`; false when the bucket is short.
    pub fn consume(&mut self, bytes: usize) -> bool {
        self.refill();
        if self.tokens >= bytes as u64 {
            self.tokens -= bytes as u64;
            true
        } else {
            false
        }
    }

    /// Time to wait before `bytes` worth of tokens become available.
    pub fn time_to_available(&mut self, bytes: usize) -> Duration {
        self.refill();
        if self.tokens >= bytes as u64 {
            return Duration::ZERO;
        }

        let needed = bytes as u64 - self.tokens;
        let micros = (needed as f64 / self.rate).ceil() as u64;
        Duration::from_micros(micros)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_timestamp_ordering() {
        let a = Timestamp::now();
        thread::sleep(Duration::from_millis(5));
        let b = Timestamp::now();
        assert!(b > a);
        assert!(b.duration_since(a) >= Duration::from_millis(5));
    }

    #[test]
    fn test_timer_fires_once_per_interval() {
        let mut timer = Timer::new(Duration::from_millis(10));
        assert!(!timer.try_fire());

        thread::sleep(Duration::from_millis(11));
        assert!(timer.try_fire());
        assert!(!timer.try_fire());
    }

    #[test]
    fn test_timer_time_until_expiration() {
        let timer = Timer::new(Duration::from_millis(50));
        assert!(timer.time_until_expiration() <= Duration::from_millis(50));

        let timer = Timer::new(Duration::ZERO);
        assert_eq!(timer.time_until_expiration(), Duration::ZERO);
    }

    #[test]
    fn test_rate_limiter_burst_then_deplete() {
        // 1 MB/s, 1000-byte burst
        let mut limiter = RateLimiter::new(1_000_000, 1000);

        assert!(limiter.consume(500));
        assert!(limiter.consume(500));
        assert!(!limiter.consume(100));

        thread::sleep(Duration::from_millis(1));
        assert!(limiter.consume(100));
    }

    #[test]
    fn test_rate_limiter_wait_estimate() {
        let mut limiter = RateLimiter::new(100_000, 100);
        limiter.consume(100);

        let wait = limiter.time_to_available(100);
        assert!(wait > Duration::ZERO);
        assert!(wait <= Duration::from_millis(10));
    }
}
