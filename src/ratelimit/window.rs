//! Sliding-window request accounting

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Default trailing window (one minute)
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

/// Log of grant timestamps inside a trailing window
#[derive(Debug, Clone)]
pub struct RequestLog {
    window: Duration,
    entries: VecDeque<Instant>,
}

impl RequestLog {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            entries: VecDeque::new(),
        }
    }

    /// Drop entries that have left the window, returning how many were removed
    pub fn prune(&mut self, now: Instant) -> usize {
        let before = self.entries.len();
        while let Some(oldest) = self.entries.front() {
            if now.saturating_duration_since(*oldest) >= self.window {
                self.entries.pop_front();
            } else {
                break;
            }
        }
        before - self.entries.len()
    }

    pub fn record(&mut self, at: Instant) {
        self.entries.push_back(at);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Time until the oldest entry leaves the window
    pub fn time_until_oldest_expires(&self, now: Instant) -> Option<Duration> {
        self.entries
            .front()
            .map(|oldest| (*oldest + self.window).saturating_duration_since(now))
    }
}

/// Allows at most `max_requests` grants in any trailing window
#[derive(Debug)]
pub struct SlidingWindowLimiter {
    max_requests: usize,
    log: Mutex<RequestLog>,
}

impl SlidingWindowLimiter {
    /// Limiter over a one-minute window
    pub fn per_minute(max_requests: u32) -> Self {
        Self::with_window(max_requests, DEFAULT_WINDOW)
    }

    /// Limiter over a custom window. A cap of zero is raised to one.
    pub fn with_window(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests: max_requests.max(1) as usize,
            log: Mutex::new(RequestLog::new(window)),
        }
    }

    pub fn max_requests(&self) -> usize {
        self.max_requests
    }

    /// Grant a slot if one is free. A rejection leaves the log untouched
    /// apart from pruning expired entries.
    pub fn try_acquire(&self) -> bool {
        let now = Instant::now();
        let mut log = self.log.lock().unwrap_or_else(PoisonError::into_inner);
        log.prune(now);

        if log.len() < self.max_requests {
            log.record(now);
            true
        } else {
            false
        }
    }

    /// How long until a slot frees up (zero if one is free now)
    pub fn time_until_available(&self) -> Duration {
        let now = Instant::now();
        let mut log = self.log.lock().unwrap_or_else(PoisonError::into_inner);
        log.prune(now);

        if log.len() < self.max_requests {
            Duration::ZERO
        } else {
            log.time_until_oldest_expires(now).unwrap_or(Duration::ZERO)
        }
    }

    /// Grants currently inside the window
    pub fn in_window(&self) -> usize {
        let mut log = self.log.lock().unwrap_or_else(PoisonError::into_inner);
        log.prune(Instant::now());
        log.len()
    }

    /// Suspend until a slot is granted, returning the time spent waiting
    pub async fn acquire(&self) -> Duration {
        let start = Instant::now();
        loop {
            if self.try_acquire() {
                return start.elapsed();
            }
            let wait = self.time_until_available().max(Duration::from_millis(1));
            debug!("Sliding window full, waiting {:?}", wait);
            tokio::time::sleep(wait).await;
        }
    }
}
