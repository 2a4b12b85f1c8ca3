use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::debug;

pub const DEFAULT_RATE_LIMIT: u32 = 100;
pub const DEFAULT_RATE_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);
const MAX_TRACKED_CLIENTS: usize = 65_536;

/// Fixed-window request counter per client key.
#[derive(Clone)]
pub struct RateLimiter {
    shared: Arc<LimiterShared>,
}

struct LimiterShared {
    limit: u32,
    window_secs: u64,
    windows: Mutex<HashMap<String, ClientWindow>>,
}

#[derive(Debug, Clone, Copy)]
struct ClientWindow {
    count: u32,
    reset_at: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed { remaining: u32 },
    Limited { retry_after_secs: u64 },
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateDecision::Allowed { .. })
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_RATE_LIMIT, DEFAULT_RATE_WINDOW)
    }
}

impl RateLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            shared: Arc::new(LimiterShared {
                limit,
                window_secs: window.as_secs().max(1),
                windows: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn check(&self, client: &str) -> RateDecision {
        self.check_at(client, now_ts())
    }

    /// Counts one request from `client` at unix time `now`.
    pub fn check_at(&self, client: &str, now: u64) -> RateDecision {
        let shared = &self.shared;
        let mut windows = shared.windows.lock();
        if windows.len() >= MAX_TRACKED_CLIENTS && !windows.contains_key(client) {
            windows.retain(|_, window| window.reset_at > now);
        }
        let window = windows.entry(client.to_string()).or_insert(ClientWindow {
            count: 0,
            reset_at: now + shared.window_secs,
        });
        if now >= window.reset_at {
            *window = ClientWindow {
                count: 0,
                reset_at: now + shared.window_secs,
            };
        }
        if window.count >= shared.limit {
            debug!(client, count = window.count, "rate limit reached");
            return RateDecision::Limited {
                retry_after_secs: window.reset_at - now,
            };
        }
        window.count += 1;
        RateDecision::Allowed {
            remaining: shared.limit - window.count,
        }
    }
}

fn now_ts() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
