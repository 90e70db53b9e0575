// src/filter/predicates.rs
//! Predicate library
//!
//! Every constructor returns a `Predicate` that can be registered with
//! `EventFilter::add_predicate`. All predicates are pure functions of the
//! event except `rate_limit`, which carries per-key sliding-window state.

use crate::events::{EventType, TelemetryEvent};
use crate::filter::event_filter::Predicate;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tracing::trace;

/// Fraction of evaluations that also sweep idle keys
const SWEEP_PROBABILITY: f64 = 0.01;

/// Admit events whose type is in the list
pub fn event_types(types: impl IntoIterator<Item = EventType>) -> Predicate {
    let types: HashSet<EventType> = types.into_iter().collect();
    Arc::new(move |e: &TelemetryEvent| types.contains(&e.event_type))
}

pub fn categories<S: Into<String>>(categories: impl IntoIterator<Item = S>) -> Predicate {
    let set: HashSet<String> = categories.into_iter().map(Into::into).collect();
    Arc::new(move |e: &TelemetryEvent| set.contains(&e.category))
}

pub fn actions<S: Into<String>>(actions: impl IntoIterator<Item = S>) -> Predicate {
    let set: HashSet<String> = actions.into_iter().map(Into::into).collect();
    Arc::new(move |e: &TelemetryEvent| set.contains(&e.action))
}

/// Inclusive timestamp range; open ends are unbounded
pub fn time_range(start: Option<i64>, end: Option<i64>) -> Predicate {
    Arc::new(move |e: &TelemetryEvent| {
        start.map_or(true, |s| e.timestamp >= s) && end.map_or(true, |end| e.timestamp <= end)
    })
}

pub fn sessions<S: Into<String>>(ids: impl IntoIterator<Item = S>) -> Predicate {
    let set: HashSet<String> = ids.into_iter().map(Into::into).collect();
    Arc::new(move |e: &TelemetryEvent| set.contains(&e.session_id))
}

/// Events without a user id never match
pub fn users<S: Into<String>>(ids: impl IntoIterator<Item = S>) -> Predicate {
    let set: HashSet<String> = ids.into_iter().map(Into::into).collect();
    Arc::new(move |e: &TelemetryEvent| e.user_id().map_or(false, |u| set.contains(u)))
}

pub fn metadata_equals(key: impl Into<String>, value: serde_json::Value) -> Predicate {
    let key = key.into();
    Arc::new(move |e: &TelemetryEvent| e.metadata_value(&key) == Some(&value))
}

pub fn metadata_exists(key: impl Into<String>) -> Predicate {
    let key = key.into();
    Arc::new(move |e: &TelemetryEvent| e.metadata_value(&key).is_some())
}

/// Inclusive duration range; events without a duration never match
pub fn duration_range(min: Option<f64>, max: Option<f64>) -> Predicate {
    Arc::new(move |e: &TelemetryEvent| match e.duration {
        Some(d) => min.map_or(true, |m| d >= m) && max.map_or(true, |m| d <= m),
        None => false,
    })
}

/// Admit at most `max_events` per key within `window_ms`
///
/// The limiter is keyed by `key_fn` and uses event timestamps as its clock.
pub fn rate_limit<K>(max_events: usize, window_ms: i64, key_fn: K) -> Predicate
where
    K: Fn(&TelemetryEvent) -> String + Send + Sync + 'static,
{
    let limiter = RateLimiter::new(max_events, window_ms);
    Arc::new(move |e: &TelemetryEvent| limiter.check(&key_fn(e), e.timestamp))
}

/// Per-session rate limit
pub fn rate_limit_per_session(max_events: usize, window_ms: i64) -> Predicate {
    rate_limit(max_events, window_ms, |e| e.session_id.clone())
}

/// Sliding-window rate limiter
#[derive(Debug)]
pub struct RateLimiter {
    max_events: usize,
    window_ms: i64,
    windows: Mutex<HashMap<String, VecDeque<i64>>>,
}

impl RateLimiter {
    pub fn new(max_events: usize, window_ms: i64) -> Self {
        Self {
            max_events,
            window_ms,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Record an attempt at `now` and report whether it is within the limit
    pub fn check(&self, key: &str, now: i64) -> bool {
        let mut windows = self.windows.lock();
        let cutoff = now - self.window_ms;

        let window = windows.entry(key.to_string()).or_default();
        while window.front().map_or(false, |t| *t <= cutoff) {
            window.pop_front();
        }

        let allowed = window.len() < self.max_events;
        if allowed {
            window.push_back(now);
        } else {
            trace!("Rate limit hit for key {}", key);
        }

        if rand::random::<f64>() < SWEEP_PROBABILITY {
            Self::sweep(&mut windows, cutoff);
        }

        allowed
    }

    /// Prune every key and drop the ones left empty
    pub fn sweep_now(&self, now: i64) {
        let mut windows = self.windows.lock();
        Self::sweep(&mut windows, now - self.window_ms);
    }

    fn sweep(windows: &mut HashMap<String, VecDeque<i64>>, cutoff: i64) {
        windows.retain(|_, window| {
            while window.front().map_or(false, |t| *t <= cutoff) {
                window.pop_front();
            }
            !window.is_empty()
        });
    }

    pub fn tracked_keys(&self) -> usize {
        self.windows.lock().len()
    }
}
