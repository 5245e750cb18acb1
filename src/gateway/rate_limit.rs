//! Sliding-window admission control for gateway requests.
//!
//! The gateway enforces per-lane request quotas; exceeding them earns 429s
//! and, repeated, temporary bans. `acquire` suspends the caller until a slot
//! is free — it never fails and never lets the window overshoot.

use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::warn;

/// Token-bucket rate limiter over a rolling window.
///
/// The lock is held across the admission wait, so pending callers are served
/// in lock-queue order and at most `max_requests` admissions can exist inside
/// any window of `window` length.
pub struct RateLimiter {
    max_requests: usize,
    window: Duration,
    admissions: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    /// Create a limiter admitting `max_requests` per `window_secs` seconds.
    pub fn new(max_requests: usize, window_secs: u64) -> Self {
        Self {
            max_requests,
            window: Duration::from_secs(window_secs),
            admissions: Mutex::new(VecDeque::with_capacity(max_requests)),
        }
    }

    /// Acquire an admission slot, sleeping until one frees up.
    pub async fn acquire(&self) {
        let mut admissions = self.admissions.lock().await;

        loop {
            let now = Instant::now();
            Self::prune(&mut admissions, now, self.window);

            if admissions.len() < self.max_requests {
                admissions.push_back(now);
                return;
            }

            // Window full: the oldest admission leaves it first.
            let oldest = admissions[0];
            let wait = self.window.saturating_sub(now.duration_since(oldest));
            if wait.is_zero() {
                continue;
            }
            warn!(wait_ms = wait.as_millis() as u64, "Rate limit reached, waiting");
            tokio::time::sleep(wait).await;
        }
    }

    /// Admissions currently inside the window.
    pub async fn in_flight(&self) -> usize {
        let mut admissions = self.admissions.lock().await;
        Self::prune(&mut admissions, Instant::now(), self.window);
        admissions.len()
    }

    fn prune(admissions: &mut VecDeque<Instant>, now: Instant, window: Duration) {
        while admissions
            .front()
            .is_some_and(|&t| now.duration_since(t) >= window)
        {
            admissions.pop_front();
        }
    }
}
