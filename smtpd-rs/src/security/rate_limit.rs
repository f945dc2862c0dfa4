//! Per-IP and per-identity rate limiting
//!
//! Fixed window per key: each key tracks a count and the instant its
//! current window opened. Distinct ceilings apply to IP keys and
//! authenticated-identity keys; an unauthenticated session is limited by
//! IP only. Elapsed windows are purged by a periodic sweep rather than
//! synchronously per request.
//!
//! The table is a `DashMap`, so sessions hammering unrelated keys never
//! contend on a single lock.

use dashmap::DashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[derive(Debug, Clone, Hash, Eq, PartialEq)]
enum LimitKey {
    Ip(IpAddr),
    User(String),
}

#[derive(Debug)]
struct Window {
    count: u32,
    started: Instant,
}

pub struct RateLimiter {
    windows: DashMap<LimitKey, Window>,
    per_ip: u32,
    per_user: u32,
    window: Duration,
}

impl RateLimiter {
    pub fn new(per_ip: u32, per_user: u32, window: Duration) -> Self {
        Self {
            windows: DashMap::new(),
            per_ip,
            per_user,
            window,
        }
    }

    /// Check and record one request for a client IP
    ///
    /// Returns `false` when the IP has exhausted its window; the caller
    /// must reject the triggering command without touching transaction
    /// state.
    pub fn check_and_record_ip(&self, ip: IpAddr) -> bool {
        let allowed = self.check_and_record(LimitKey::Ip(ip), self.per_ip);
        if !allowed {
            warn!("Rate limit exceeded for IP {} ({}/window)", ip, self.per_ip);
        }
        allowed
    }

    /// Check and record one request for an authenticated identity
    pub fn check_and_record_user(&self, user: &str) -> bool {
        let allowed = self.check_and_record(LimitKey::User(user.to_string()), self.per_user);
        if !allowed {
            warn!(
                "Rate limit exceeded for user {} ({}/window)",
                user, self.per_user
            );
        }
        allowed
    }

    fn check_and_record(&self, key: LimitKey, ceiling: u32) -> bool {
        let mut entry = self.windows.entry(key).or_insert_with(|| Window {
            count: 0,
            started: Instant::now(),
        });

        if entry.started.elapsed() >= self.window {
            entry.count = 0;
            entry.started = Instant::now();
        }

        if entry.count >= ceiling {
            false
        } else {
            entry.count += 1;
            true
        }
    }

    /// Drop every window that has fully elapsed
    ///
    /// Bounds the table to the number of keys active within the last
    /// window. Returns the number of entries removed.
    pub fn sweep(&self) -> usize {
        let before = self.windows.len();
        let window = self.window;
        self.windows.retain(|_, w| w.started.elapsed() < window);
        let removed = before - self.windows.len();
        if removed > 0 {
            debug!("Rate limiter sweep removed {} idle keys", removed);
        }
        removed
    }

    pub fn tracked_keys(&self) -> usize {
        self.windows.len()
    }

    /// Periodic sweep loop, spawned once at server startup
    pub async fn run_sweeper(self: Arc<Self>, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.sweep();
        }
    }
}
