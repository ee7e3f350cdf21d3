//! Single-slot cooldown gate.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// Lets at most one caller through per `delay` window.
#[derive(Debug)]
pub struct RateLimiter {
    delay: Duration,
    last_access: Mutex<Option<Instant>>,
}

impl RateLimiter {
    /// Creates a new rate limiter with the specified cooldown
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            last_access: Mutex::new(None),
        }
    }

    /// Returns true and starts a new cooldown if the previous one expired.
    pub fn allow(&self) -> bool {
        let mut last_access = self.last_access.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();

        match *last_access {
            Some(last) if now.duration_since(last) < self.delay => false,
            _ => {
                *last_access = Some(now);
                true
            }
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_allows_once_per_window() {
        let limiter = RateLimiter::new(Duration::from_secs(60));

        assert!(limiter.allow());
        assert!(!limiter.allow());

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(!limiter.allow());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(limiter.allow());
        assert!(!limiter.allow());
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_delay_always_allows() {
        let limiter = RateLimiter::new(Duration::ZERO);
        assert!(limiter.allow());
        assert!(limiter.allow());
    }
}
