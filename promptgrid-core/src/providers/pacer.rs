//! Client-side pacing for outbound provider calls.
//!
//! Proactively spaces requests to stay within a provider's sustained quota
//! instead of relying on 429 backpressure. Two limits apply together: a
//! minimum interval between consecutive calls, and an optional sliding
//! one-minute request window.

use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::config::ProviderConfig;

/// Paces calls to one provider. Waiters are served in lock order.
pub struct Pacer {
    min_interval: Duration,
    /// Requests per minute limit (0 = unlimited).
    rpm: usize,
    window: Duration,
    state: Mutex<PacerState>,
}

#[derive(Default)]
struct PacerState {
    last_call: Option<Instant>,
    /// Timestamps of recent calls within the window.
    recent: VecDeque<Instant>,
}

impl PacerState {
    /// How long until a call may start, or `None` if it may start now.
    fn check(&mut self, now: Instant, min_interval: Duration, rpm: usize, window: Duration) -> Option<Duration> {
        while self
            .recent
            .front()
            .is_some_and(|t| now.duration_since(*t) >= window)
        {
            self.recent.pop_front();
        }

        let mut wait = Duration::ZERO;
        if let Some(last) = self.last_call {
            wait = min_interval.saturating_sub(now.duration_since(last));
        }
        if rpm > 0
            && self.recent.len() >= rpm
            && let Some(&oldest) = self.recent.front()
        {
            wait = wait.max(window.saturating_sub(now.duration_since(oldest)));
        }

        if wait.is_zero() { None } else { Some(wait) }
    }

    fn record(&mut self, now: Instant) {
        self.last_call = Some(now);
        self.recent.push_back(now);
    }
}

impl Pacer {
    pub fn new(min_interval: Duration, rpm: usize) -> Self {
        Self {
            min_interval,
            rpm,
            window: Duration::from_secs(60),
            state: Mutex::new(PacerState::default()),
        }
    }

    pub fn from_config(config: &ProviderConfig) -> Self {
        Self::new(
            Duration::from_millis(config.min_interval_ms),
            config.requests_per_minute,
        )
    }

    /// A pacer that never waits.
    pub fn unlimited() -> Self {
        Self::new(Duration::ZERO, 0)
    }

    /// Sleep until a call is allowed, then record it.
    pub async fn wait_turn(&self) {
        let mut state = self.state.lock().await;
        loop {
            let now = Instant::now();
            match state.check(now, self.min_interval, self.rpm, self.window) {
                None => {
                    state.record(now);
                    return;
                }
                Some(delay) => {
                    debug!(delay_ms = delay.as_millis() as u64, "Pacing provider call");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Calls recorded within the current window.
    pub async fn recent_calls(&self) -> usize {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        let window = self.window;
        state.recent.retain(|t| now.duration_since(*t) < window);
        state.recent.len()
    }
}
