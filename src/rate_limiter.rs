//! Per-client sliding-window admission with a temporary block.
//!
//! A client that reaches the threshold inside the trailing hour is blocked for a
//! full hour from that moment, independent of how its window decays afterwards.

use crate::constants::RATE_LIMIT_WINDOW_SECS;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct ClientWindow {
    requests: VecDeque<Instant>,
    blocked_until: Option<Instant>,
}

impl ClientWindow {
    fn evict_expired(&mut self, now: Instant, window: Duration) {
        while let Some(&oldest) = self.requests.front() {
            if now.saturating_duration_since(oldest) >= window {
                self.requests.pop_front();
            } else {
                break;
            }
        }
    }

    fn is_blocked(&self, now: Instant) -> bool {
        matches!(self.blocked_until, Some(until) if now < until)
    }
}

/// Per-client view exposed on `/stats`.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ClientSnapshot {
    pub requests_count: usize,
    pub blocked_until: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub struct RateLimiter {
    limit: usize,
    window: Duration,
    clients: DashMap<String, ClientWindow>,
}

impl RateLimiter {
    pub fn new(limit: usize) -> Self {
        Self::with_window(limit, Duration::from_secs(RATE_LIMIT_WINDOW_SECS))
    }

    pub fn with_window(limit: usize, window: Duration) -> Self {
        Self {
            limit,
            window,
            clients: DashMap::new(),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Admits or rejects one request from `client` at `now`.
    pub fn admit(&self, client: &str, now: Instant) -> bool {
        // The entry guard holds this client's shard lock for the whole decision.
        let mut entry = self.clients.entry(client.to_string()).or_default();
        let state = entry.value_mut();

        if state.is_blocked(now) {
            return false;
        }

        state.evict_expired(now, self.window);

        if state.requests.len() >= self.limit {
            state.blocked_until = Some(now + self.window);
            tracing::warn!(client = %client, "rate limit exceeded, client blocked");
            return false;
        }

        state.requests.push_back(now);
        true
    }

    /// Drops expired timestamps and forgets clients with nothing left to track.
    /// Returns the number of clients removed.
    pub fn prune(&self, now: Instant) -> usize {
        let before = self.clients.len();
        self.clients.retain(|_, state| {
            state.evict_expired(now, self.window);
            if !state.is_blocked(now) {
                state.blocked_until = None;
            }
            !state.requests.is_empty() || state.blocked_until.is_some()
        });
        before.saturating_sub(self.clients.len())
    }

    pub fn tracked_clients(&self) -> usize {
        self.clients.len()
    }

    pub fn snapshot(&self) -> BTreeMap<String, ClientSnapshot> {
        let now = Instant::now();
        let wall_now = Utc::now();
        self.clients
            .iter()
            .map(|entry| {
                let state = entry.value();
                let blocked_until = state
                    .blocked_until
                    .filter(|until| *until > now)
                    .and_then(|until| chrono::Duration::from_std(until - now).ok())
                    .map(|remaining| wall_now + remaining);
                (
                    entry.key().clone(),
                    ClientSnapshot {
                        requests_count: state.requests.len(),
                        blocked_until,
                    },
                )
            })
            .collect()
    }
}
