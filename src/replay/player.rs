// src/replay/player.rs
//! Timing-preserving replay of a captured event stream
//!
//! The player owns a time-sorted copy of its input. Emission is driven by a
//! single background task per play segment; every control call that changes
//! position, pacing or the event set bumps a generation counter so a stale
//! driver exits at its next wake-up instead of emitting.

use crate::events::TelemetryEvent;
use crate::filter::Predicate;
use crate::utils::config::ReplayDefaults;
use crate::utils::errors::{Result, TelemetryError};
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

/// Pacing delay between events when timing is not preserved
const FIXED_PACING_MS: f64 = 10.0;

/// Replay options
#[derive(Clone)]
pub struct ReplayOptions {
    /// Multiplier on inter-event delay (> 0)
    pub speed: f64,

    /// Inclusive lower bound; defaults to the first event
    pub start_time: Option<i64>,

    /// Inclusive upper bound; defaults to the last event
    pub end_time: Option<i64>,

    pub filter: Option<Predicate>,

    pub loop_playback: bool,

    /// Sleep the original gaps (scaled by speed) instead of fixed pacing
    pub preserve_timing: bool,
}

impl Default for ReplayOptions {
    fn default() -> Self {
        Self::from(&ReplayDefaults::default())
    }
}

impl From<&ReplayDefaults> for ReplayOptions {
    fn from(defaults: &ReplayDefaults) -> Self {
        Self {
            speed: defaults.speed,
            start_time: None,
            end_time: None,
            filter: None,
            loop_playback: defaults.loop_playback,
            preserve_timing: defaults.preserve_timing,
        }
    }
}

impl fmt::Debug for ReplayOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplayOptions")
            .field("speed", &self.speed)
            .field("start_time", &self.start_time)
            .field("end_time", &self.end_time)
            .field("filter", &self.filter.is_some())
            .field("loop_playback", &self.loop_playback)
            .field("preserve_timing", &self.preserve_timing)
            .finish()
    }
}

fn validate_speed(speed: f64) -> Result<()> {
    if speed > 0.0 && speed.is_finite() {
        Ok(())
    } else {
        Err(TelemetryError::InvalidSpeed(speed))
    }
}

/// Snapshot of playback state
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayState {
    pub is_playing: bool,
    pub is_paused: bool,
    /// Next event to emit, in `[0, total_events]`
    pub current_index: usize,
    /// Timestamp of the last emitted event or seek target
    pub current_time: i64,
    pub total_events: usize,
    pub start_time: i64,
    pub end_time: i64,
    /// Wall-clock playing time (ms), excluding pauses
    pub elapsed_time: u64,
    pub events_played: u64,
}

/// Which notifications a subscriber receives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplayScope {
    All,
    /// Everything except event emissions
    Lifecycle,
    EventType(String),
    Category(String),
    Action(String),
}

impl ReplayScope {
    fn matches(&self, notification: &ReplayNotification) -> bool {
        match (self, notification) {
            (ReplayScope::All, _) => true,
            (ReplayScope::Lifecycle, ReplayNotification::Event { .. }) => false,
            (ReplayScope::Lifecycle, _) => true,
            (ReplayScope::EventType(t), ReplayNotification::Event { event, .. }) => {
                event.event_type.as_str() == t.as_str()
            }
            (ReplayScope::Category(c), ReplayNotification::Event { event, .. }) => {
                &event.category == c
            }
            (ReplayScope::Action(a), ReplayNotification::Event { event, .. }) => &event.action == a,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReplayNotification {
    Event { event: TelemetryEvent, index: usize },
    Started,
    Paused,
    Resumed,
    Stopped,
    Seeked { timestamp: i64, index: usize },
    Looped,
    Completed,
    SpeedChanged(f64),
    FilterChanged { total_events: usize },
}

struct Subscriber {
    scope: ReplayScope,
    tx: mpsc::UnboundedSender<ReplayNotification>,
}

struct Playback {
    options: ReplayOptions,
    events: Vec<TelemetryEvent>,
    is_playing: bool,
    is_paused: bool,
    current_index: usize,
    current_time: i64,
    start_time: i64,
    end_time: i64,
    events_played: u64,
    elapsed: Duration,
    resumed_at: Option<Instant>,
    generation: u64,
    driver: Option<JoinHandle<()>>,
}

impl Playback {
    fn running(&self) -> bool {
        self.is_playing && !self.is_paused
    }

    /// Invalidate any driver and abort its pending sleep
    fn cancel_driver(&mut self) {
        self.generation += 1;
        if let Some(driver) = self.driver.take() {
            driver.abort();
        }
    }

    fn bank_elapsed(&mut self) {
        if let Some(resumed) = self.resumed_at.take() {
            self.elapsed += resumed.elapsed();
        }
    }

    fn delay_before(&self, index: usize) -> Duration {
        let speed = self.options.speed;
        let ms = if self.options.preserve_timing {
            if index == 0 || index >= self.events.len() {
                0.0
            } else {
                let gap = self.events[index].timestamp - self.events[index - 1].timestamp;
                (gap as f64 / speed).max(0.0)
            }
        } else {
            FIXED_PACING_MS / speed
        };
        // Very small speeds overflow `Duration`; tokio clamps the far future
        Duration::try_from_secs_f64(ms / 1000.0).unwrap_or(Duration::MAX)
    }
}

struct ReplayInner {
    /// Time-sorted input; never mutated
    source: Vec<TelemetryEvent>,
    playback: Mutex<Playback>,
    subscribers: Mutex<Vec<Subscriber>>,
}

impl ReplayInner {
    fn notify(&self, notification: ReplayNotification) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|s| {
            if !s.scope.matches(&notification) {
                return !s.tx.is_closed();
            }
            s.tx.send(notification.clone()).is_ok()
        });
    }

    fn derive(
        source: &[TelemetryEvent],
        options: &ReplayOptions,
    ) -> (Vec<TelemetryEvent>, i64, i64) {
        let start = options
            .start_time
            .or_else(|| source.first().map(|e| e.timestamp))
            .unwrap_or(0);
        let end = options
            .end_time
            .or_else(|| source.last().map(|e| e.timestamp))
            .unwrap_or(0);

        let events = source
            .iter()
            .filter(|e| e.timestamp >= start && e.timestamp <= end)
            .filter(|e| options.filter.as_ref().map_or(true, |f| f(e)))
            .cloned()
            .collect();

        (events, start, end)
    }

    /// Emit `events[index]` and record it as played
    fn emit(&self, playback: &mut Playback, index: usize) -> TelemetryEvent {
        let event = playback.events[index].clone();
        playback.current_time = event.timestamp;
        playback.events_played += 1;
        self.notify(ReplayNotification::Event {
            event: event.clone(),
            index,
        });
        event
    }

    /// Handle an exhausted index; returns whether playback continues
    fn at_end(&self, playback: &mut Playback) -> bool {
        if playback.options.loop_playback && !playback.events.is_empty() {
            playback.current_index = 0;
            debug!("Replay looped");
            self.notify(ReplayNotification::Looped);
            return true;
        }

        info!("Replay completed ({} events played)", playback.events_played);
        self.notify(ReplayNotification::Completed);
        self.stop_locked(playback);
        false
    }

    fn stop_locked(&self, playback: &mut Playback) {
        playback.cancel_driver();
        playback.is_playing = false;
        playback.is_paused = false;
        playback.current_index = 0;
        playback.current_time = playback.start_time;
        playback.elapsed = Duration::ZERO;
        playback.resumed_at = None;
        self.notify(ReplayNotification::Stopped);
    }

    /// Start a fresh driver for the current position
    fn schedule(self: &Arc<Self>, playback: &mut Playback) {
        playback.cancel_driver();
        let generation = playback.generation;
        let weak = Arc::downgrade(self);
        playback.driver = Some(tokio::spawn(drive(weak, generation)));
    }
}

async fn drive(inner: Weak<ReplayInner>, generation: u64) {
    loop {
        let delay = {
            let Some(inner) = inner.upgrade() else { return };
            let mut playback = inner.playback.lock();
            if playback.generation != generation || !playback.running() {
                return;
            }
            if playback.current_index >= playback.events.len() && !inner.at_end(&mut playback) {
                return;
            }
            playback.delay_before(playback.current_index)
        };

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        {
            let Some(inner) = inner.upgrade() else { return };
            let mut playback = inner.playback.lock();
            if playback.generation != generation || !playback.running() {
                return;
            }
            let index = playback.current_index;
            if index < playback.events.len() {
                inner.emit(&mut playback, index);
                playback.current_index += 1;
            }
        }

        // Let subscribers run between back-to-back emissions
        tokio::task::yield_now().await;
    }
}

/// Replays a fixed, time-sorted set of events
///
/// Control calls must be made from within a tokio runtime.
#[derive(Clone)]
pub struct EventReplay {
    inner: Arc<ReplayInner>,
}

impl EventReplay {
    pub fn new(mut events: Vec<TelemetryEvent>, options: ReplayOptions) -> Result<Self> {
        validate_speed(options.speed)?;
        if let (Some(start), Some(end)) = (options.start_time, options.end_time) {
            if start > end {
                return Err(TelemetryError::ConfigError(format!(
                    "replay start_time {} is after end_time {}",
                    start, end
                )));
            }
        }

        events.sort_by_key(|e| e.timestamp);
        let (filtered, start_time, end_time) = ReplayInner::derive(&events, &options);
        debug!(
            "Replay created: {} of {} events in [{}, {}]",
            filtered.len(),
            events.len(),
            start_time,
            end_time
        );

        let playback = Playback {
            options,
            events: filtered,
            is_playing: false,
            is_paused: false,
            current_index: 0,
            current_time: start_time,
            start_time,
            end_time,
            events_played: 0,
            elapsed: Duration::ZERO,
            resumed_at: None,
            generation: 0,
            driver: None,
        };

        Ok(Self {
            inner: Arc::new(ReplayInner {
                source: events,
                playback: Mutex::new(playback),
                subscribers: Mutex::new(Vec::new()),
            }),
        })
    }

    /// Receive notifications matching `scope`
    pub fn subscribe(&self, scope: ReplayScope) -> mpsc::UnboundedReceiver<ReplayNotification> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.subscribers.lock().push(Subscriber { scope, tx });
        rx
    }

    /// Start or resume playback
    pub fn play(&self) {
        let mut playback = self.inner.playback.lock();
        if playback.running() {
            return;
        }

        if playback.is_paused {
            playback.is_paused = false;
            info!("Replay resumed at index {}", playback.current_index);
            self.inner.notify(ReplayNotification::Resumed);
        } else {
            if playback.current_index >= playback.events.len() {
                playback.current_index = 0;
            }
            playback.is_playing = true;
            info!(
                "Replay started: {} events at {}x",
                playback.events.len(),
                playback.options.speed
            );
            self.inner.notify(ReplayNotification::Started);
        }

        playback.resumed_at = Some(Instant::now());
        self.inner.schedule(&mut playback);
    }

    pub fn pause(&self) {
        let mut playback = self.inner.playback.lock();
        if !playback.running() {
            return;
        }
        playback.cancel_driver();
        playback.is_paused = true;
        playback.bank_elapsed();
        info!("Replay paused at index {}", playback.current_index);
        self.inner.notify(ReplayNotification::Paused);
    }

    /// Stop and rewind to the first event
    pub fn stop(&self) {
        let mut playback = self.inner.playback.lock();
        info!("Replay stopped");
        self.inner.stop_locked(&mut playback);
    }

    /// Move to the first event at or after `timestamp`
    pub fn seek(&self, timestamp: i64) -> Result<()> {
        let mut playback = self.inner.playback.lock();
        if timestamp < playback.start_time || timestamp > playback.end_time {
            return Err(TelemetryError::SeekOutOfRange {
                timestamp,
                start: playback.start_time,
                end: playback.end_time,
            });
        }

        let index = playback.events.partition_point(|e| e.timestamp < timestamp);
        playback.current_index = index;
        playback.current_time = timestamp;
        debug!("Replay seek to {} (index {})", timestamp, index);
        self.inner
            .notify(ReplayNotification::Seeked { timestamp, index });

        if playback.running() {
            self.inner.schedule(&mut playback);
        }
        Ok(())
    }

    /// Emit the event at the current position and advance
    ///
    /// Wraps to the start when looping; returns `None` at the end otherwise.
    pub fn next(&self) -> Option<TelemetryEvent> {
        let mut playback = self.inner.playback.lock();
        if playback.current_index >= playback.events.len() {
            if !playback.options.loop_playback || playback.events.is_empty() {
                return None;
            }
            playback.current_index = 0;
            self.inner.notify(ReplayNotification::Looped);
        }

        let index = playback.current_index;
        let event = self.inner.emit(&mut playback, index);
        playback.current_index += 1;

        if playback.running() {
            self.inner.schedule(&mut playback);
        }
        Some(event)
    }

    /// Step back one event and emit it
    pub fn previous(&self) -> Option<TelemetryEvent> {
        let mut playback = self.inner.playback.lock();
        if playback.current_index == 0 || playback.events.is_empty() {
            return None;
        }

        playback.current_index = (playback.current_index - 1).min(playback.events.len() - 1);
        let index = playback.current_index;
        let event = self.inner.emit(&mut playback, index);

        if playback.running() {
            self.inner.schedule(&mut playback);
        }
        Some(event)
    }

    /// Replace the filter and re-derive the event set
    pub fn set_filter(&self, filter: Option<Predicate>) {
        let mut playback = self.inner.playback.lock();
        playback.options.filter = filter;
        let (events, start, end) = ReplayInner::derive(&self.inner.source, &playback.options);
        playback.events = events;
        playback.start_time = start;
        playback.end_time = end;
        playback.current_index = playback.current_index.min(playback.events.len());

        let total_events = playback.events.len();
        debug!("Replay filter changed: {} events", total_events);
        self.inner
            .notify(ReplayNotification::FilterChanged { total_events });

        if playback.running() {
            self.inner.schedule(&mut playback);
        }
    }

    pub fn set_speed(&self, speed: f64) -> Result<()> {
        validate_speed(speed)?;

        let mut playback = self.inner.playback.lock();
        playback.options.speed = speed;
        debug!("Replay speed set to {}x", speed);
        self.inner.notify(ReplayNotification::SpeedChanged(speed));

        if playback.running() {
            self.inner.schedule(&mut playback);
        }
        Ok(())
    }

    pub fn state(&self) -> ReplayState {
        let playback = self.inner.playback.lock();
        let live = playback
            .resumed_at
            .filter(|_| playback.running())
            .map(|t| t.elapsed())
            .unwrap_or_default();

        ReplayState {
            is_playing: playback.is_playing,
            is_paused: playback.is_paused,
            current_index: playback.current_index,
            current_time: playback.current_time,
            total_events: playback.events.len(),
            start_time: playback.start_time,
            end_time: playback.end_time,
            elapsed_time: (playback.elapsed + live).as_millis() as u64,
            events_played: playback.events_played,
        }
    }

    /// Copy of the current filtered event set
    pub fn export_events(&self) -> Vec<TelemetryEvent> {
        self.inner.playback.lock().events.clone()
    }
}

impl Drop for ReplayInner {
    fn drop(&mut self) {
        if let Some(driver) = self.playback.get_mut().driver.take() {
            driver.abort();
        }
    }
}
