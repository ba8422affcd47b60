//! Async rate limiter with adaptive backoff.
//!
//! Shared by reference (`Arc<RateLimiter>`) between every recognition call
//! that draws on the same service quota.  A caller first [`acquire`]s a
//! [`RatePermit`]; acquisition waits for a free in-flight slot and for the
//! minimum spacing since the previous request.  The slot is released when
//! the permit is dropped.
//!
//! [`acquire`]: RateLimiter::acquire

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};
use tokio::sync::{Mutex, Semaphore, SemaphorePermit};
use tokio::time::{sleep, Instant};

use crate::error::RecognitionError;

struct LimiterState {
    last_request: Option<Instant>,
    current_interval: Duration,
    success_count: u32,
}

/// A counting semaphore plus a minimum interval between request starts,
/// with the interval widening on failures and narrowing again on success.
pub struct RateLimiter {
    name: String,
    slots: Semaphore,
    state: Mutex<LimiterState>,
    base_interval: Duration,
    max_interval: Duration,
    successes_to_reduce: u32,
}

/// Held for the duration of one request.
pub struct RatePermit<'a> {
    _slot: SemaphorePermit<'a>,
}

impl RateLimiter {
    /// Create a new rate limiter.
    ///
    /// * `name`: label for log messages (e.g. "shazam", "songrec")
    /// * `max_in_flight`: concurrent requests allowed (at least 1)
    /// * `base_interval`: minimum time between request starts
    /// * `max_interval`: upper bound after repeated failures
    /// * `successes_to_reduce`: consecutive successes before halving the interval
    ///   (0 disables adaptive reduction)
    pub fn new(
        name: &str,
        max_in_flight: usize,
        base_interval: Duration,
        max_interval: Duration,
        successes_to_reduce: u32,
    ) -> Self {
        RateLimiter {
            name: name.to_string(),
            slots: Semaphore::new(max_in_flight.max(1)),
            state: Mutex::new(LimiterState {
                last_request: None,
                current_interval: base_interval,
                success_count: 0,
            }),
            base_interval,
            max_interval: max_interval.max(base_interval),
            successes_to_reduce,
        }
    }

    /// One request at a time, `millis` apart.  Max interval = 16× base,
    /// reduce after 10 successes.
    pub fn from_millis(name: &str, millis: u64) -> Self {
        let base = Duration::from_millis(millis);
        Self::new(name, 1, base, base * 16, 10)
    }

    /// Convenience for building a limiter that several pipelines share.
    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wait for a free slot and for the spacing interval, then claim a request.
    pub async fn acquire(&self) -> Result<RatePermit<'_>, RecognitionError> {
        let slot = self
            .slots
            .acquire()
            .await
            .map_err(|_| RecognitionError::LimiterClosed)?;

        // Reserve the start time under the lock; sleep without it.
        let wait_time = {
            let mut state = self.state.lock().await;
            let now = Instant::now();
            let wait_time = match state.last_request {
                Some(last) => (last + state.current_interval).saturating_duration_since(now),
                None => Duration::ZERO,
            };
            state.last_request = Some(now + wait_time);
            wait_time
        };

        if !wait_time.is_zero() {
            debug!("[{}] Rate limiting: waiting {:.1}s...", self.name, wait_time.as_secs_f64());
            sleep(wait_time).await;
        }

        Ok(RatePermit { _slot: slot })
    }

    pub async fn current_interval(&self) -> Duration {
        self.state.lock().await.current_interval
    }

    /// Report a successful request.  After enough consecutive successes
    /// the interval is halved (down to the base).
    pub async fn report_success(&self) {
        if self.successes_to_reduce == 0 {
            return;
        }

        let mut state = self.state.lock().await;
        state.success_count += 1;

        if state.success_count >= self.successes_to_reduce && state.current_interval > self.base_interval {
            state.current_interval = (state.current_interval / 2).max(self.base_interval);
            info!(
                "[{}] Rate limit reduced to {:.1}s after {} successes",
                self.name,
                state.current_interval.as_secs_f64(),
                state.success_count
            );
            state.success_count = 0;
        }
    }

    /// Report a failed request.  Doubles the interval (up to max).
    pub async fn report_failure(&self) {
        let mut state = self.state.lock().await;
        let doubled = if state.current_interval.is_zero() {
            Duration::from_millis(100)
        } else {
            state.current_interval * 2
        };
        state.current_interval = doubled.min(self.max_interval);
        info!(
            "[{}] Rate limit increased to {:.1}s due to error",
            self.name,
            state.current_interval.as_secs_f64()
        );
        state.success_count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_requests_are_spaced() {
        let limiter = RateLimiter::from_millis("test", 2000);
        let start = Instant::now();

        drop(limiter.acquire().await.unwrap());
        assert!(start.elapsed() < Duration::from_millis(10));

        drop(limiter.acquire().await.unwrap());
        assert!(start.elapsed() >= Duration::from_millis(2000));

        drop(limiter.acquire().await.unwrap());
        assert!(start.elapsed() >= Duration::from_millis(4000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shared_limiter_serializes_concurrent_callers() {
        let limiter = RateLimiter::from_millis("shared", 1000).shared();
        let start = Instant::now();

        let mut handles = Vec::new();
        for _ in 0..3 {
            let limiter = Arc::clone(&limiter);
            handles.push(tokio::spawn(async move {
                let _permit = limiter.acquire().await.unwrap();
                Instant::now()
            }));
        }
        let mut started = Vec::new();
        for h in handles {
            started.push(h.await.unwrap());
        }
        started.sort();

        assert!(started[0] - start < Duration::from_millis(10));
        assert!(started[1] - started[0] >= Duration::from_millis(1000));
        assert!(started[2] - started[1] >= Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reports_do_not_wait_for_a_spacing_sleep() {
        let limiter = RateLimiter::new("wide", 2, Duration::from_millis(1000), Duration::from_millis(16000), 10).shared();
        let start = Instant::now();

        let first = limiter.acquire().await.unwrap();
        let waiter = {
            let limiter = Arc::clone(&limiter);
            tokio::spawn(async move {
                let _permit = limiter.acquire().await.unwrap();
                Instant::now()
            })
        };
        // Let the second caller reserve its slot and start sleeping.
        tokio::task::yield_now().await;

        let reported = tokio::time::timeout(Duration::from_millis(10), limiter.report_failure()).await;
        assert!(reported.is_ok(), "report must not block behind a sleeping acquire");
        assert!(start.elapsed() < Duration::from_millis(10));
        drop(first);

        let second_started = waiter.await.unwrap();
        assert!(second_started - start >= Duration::from_millis(1000));
        assert_eq!(limiter.current_interval().await, Duration::from_millis(2000));
    }

    #[tokio::test]
    async fn test_permit_holds_the_only_slot() {
        let limiter = RateLimiter::new("slots", 1, Duration::ZERO, Duration::ZERO, 0);
        let permit = limiter.acquire().await.unwrap();
        let second = tokio::time::timeout(Duration::from_millis(50), limiter.acquire()).await;
        assert!(second.is_err(), "second acquire should wait for the slot");
        drop(permit);
        assert!(limiter.acquire().await.is_ok());
    }

    #[tokio::test]
    async fn test_adaptive_backoff() {
        let limiter = RateLimiter::new("backoff", 1, Duration::from_millis(500), Duration::from_millis(3000), 2);

        limiter.report_failure().await;
        assert_eq!(limiter.current_interval().await, Duration::from_millis(1000));
        limiter.report_failure().await;
        limiter.report_failure().await;
        assert_eq!(limiter.current_interval().await, Duration::from_millis(3000));

        limiter.report_success().await;
        assert_eq!(limiter.current_interval().await, Duration::from_millis(3000));
        limiter.report_success().await;
        assert_eq!(limiter.current_interval().await, Duration::from_millis(1500));
        limiter.report_success().await;
        limiter.report_success().await;
        assert_eq!(limiter.current_interval().await, Duration::from_millis(750));
        limiter.report_success().await;
        limiter.report_success().await;
        assert_eq!(limiter.current_interval().await, Duration::from_millis(500));
    }
}
