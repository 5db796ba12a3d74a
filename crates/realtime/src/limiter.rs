use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimiterConfig {
    pub max_requests: usize,
    pub period: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            max_requests: 30,
            period: Duration::from_secs(10),
        }
    }
}

#[derive(Debug)]
struct KeyWindow {
    hits: VecDeque<Instant>,
    last_seen: Instant,
}

/// Sliding-window admission control keyed by identity (`user:{id}`) or
/// connection handle before authentication. A request timestamp is
/// recorded only on admission; rejected requests do not extend the
/// window. Expired timestamps are evicted on every check; `forget`
/// drops a key on disconnect and `sweep_idle` clears keys idle for a
/// full period, so abandoned keys cannot accumulate.
pub struct RateLimiter {
    config: RateLimiterConfig,
    windows: Mutex<HashMap<String, KeyWindow>>,
}

impl RateLimiter {
    #[must_use]
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            config,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Evicts expired timestamps for `key`, then admits iff the
    /// retained count is strictly below `max_requests`.
    pub async fn check(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut windows = self.windows.lock().await;
        let window = windows.entry(key.to_owned()).or_insert_with(|| KeyWindow {
            hits: VecDeque::new(),
            last_seen: now,
        });

        while let Some(oldest) = window.hits.front() {
            if now.duration_since(*oldest) >= self.config.period {
                window.hits.pop_front();
            } else {
                break;
            }
        }

        window.last_seen = now;
        if window.hits.len() < self.config.max_requests {
            window.hits.push_back(now);
            true
        } else {
            false
        }
    }

    /// Drops the window for a key, called when its connection closes.
    pub async fn forget(&self, key: &str) {
        let mut windows = self.windows.lock().await;
        windows.remove(key);
    }

    /// Drops keys idle for longer than one period. Scheduled
    /// periodically by the app runtime; returns the number removed.
    pub async fn sweep_idle(&self) -> usize {
        let cutoff = Instant::now() - self.config.period;
        let mut windows = self.windows.lock().await;
        let before = windows.len();
        windows.retain(|_, window| window.last_seen > cutoff);
        before - windows.len()
    }

    pub async fn tracked_keys(&self) -> usize {
        self.windows.lock().await.len()
    }
}
