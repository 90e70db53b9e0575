// src/replay/recorder.rs
//! Named recording sessions
//!
//! One session records at a time. Stopped and imported sessions are kept in
//! memory, keyed by id, until deleted.

use crate::events::TelemetryEvent;
use crate::replay::exporter::{import_document, ExportFormat, SessionDocument, SessionExporter};
use crate::replay::player::{EventReplay, ReplayOptions};
use crate::utils::errors::{Result, TelemetryError};
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
struct StoredSession {
    events: Vec<TelemetryEvent>,
    recorded_at: i64,
}

struct ActiveSession {
    id: String,
    events: Vec<TelemetryEvent>,
}

/// Captures live events into replayable sessions
#[derive(Default)]
pub struct ReplayRecorder {
    sessions: DashMap<String, StoredSession>,
    active: Mutex<Option<ActiveSession>>,
}

impl ReplayRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin recording into `session_id`
    pub fn start_recording(&self, session_id: impl Into<String>) -> Result<()> {
        let session_id = session_id.into();
        let mut active = self.active.lock();
        if let Some(current) = active.as_ref() {
            return Err(TelemetryError::AlreadyRecording(current.id.clone()));
        }

        info!("Recording session {}", session_id);
        *active = Some(ActiveSession {
            id: session_id,
            events: Vec::new(),
        });
        Ok(())
    }

    /// Append a copy of `event` to the active session, if any
    pub fn record(&self, event: &TelemetryEvent) {
        if let Some(active) = self.active.lock().as_mut() {
            active.events.push(event.clone());
        }
    }

    /// Finish the active session and store it
    pub fn stop_recording(&self) -> Result<Vec<TelemetryEvent>> {
        let active = self
            .active
            .lock()
            .take()
            .ok_or(TelemetryError::NotRecording)?;

        info!(
            "Stopped recording session {} ({} events)",
            active.id,
            active.events.len()
        );
        self.sessions.insert(
            active.id,
            StoredSession {
                events: active.events.clone(),
                recorded_at: chrono::Utc::now().timestamp_millis(),
            },
        );
        Ok(active.events)
    }

    pub fn is_recording(&self) -> bool {
        self.active.lock().is_some()
    }

    pub fn active_session(&self) -> Option<String> {
        self.active.lock().as_ref().map(|a| a.id.clone())
    }

    pub fn get_session(&self, session_id: &str) -> Option<Vec<TelemetryEvent>> {
        self.sessions.get(session_id).map(|s| s.events.clone())
    }

    /// Stored session ids, sorted
    pub fn list_sessions(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn delete_session(&self, session_id: &str) -> bool {
        let removed = self.sessions.remove(session_id).is_some();
        if removed {
            debug!("Deleted session {}", session_id);
        }
        removed
    }

    /// Session as a document with derived metadata
    pub fn session_document(&self, session_id: &str) -> Result<SessionDocument> {
        let session = self
            .sessions
            .get(session_id)
            .ok_or_else(|| TelemetryError::SessionNotFound(session_id.to_string()))?;
        Ok(SessionDocument::new(
            session_id,
            session.events.clone(),
            session.recorded_at,
        ))
    }

    /// Serialize a stored session as a JSON document
    pub fn export_session(&self, session_id: &str) -> Result<String> {
        let document = self.session_document(session_id)?;
        let json = SessionExporter::new(ExportFormat::Json).export(&document)?;
        info!(
            "Exported session {} ({} events)",
            session_id, document.metadata.event_count
        );
        Ok(json)
    }

    /// Store a session from a JSON document; returns its id
    pub fn import_session(&self, json: &str) -> Result<String> {
        let document = import_document(json)?;
        self.store(document)
    }

    /// Store an already-parsed document; returns its id
    pub fn store(&self, document: SessionDocument) -> Result<String> {
        let session_id = document.session_id;
        if self.sessions.contains_key(&session_id) {
            warn!("Replacing existing session {}", session_id);
        }

        info!(
            "Imported session {} ({} events)",
            session_id,
            document.events.len()
        );
        self.sessions.insert(
            session_id.clone(),
            StoredSession {
                events: document.events,
                recorded_at: document.metadata.recorded_at,
            },
        );
        Ok(session_id)
    }

    /// Build a replay over a stored session
    pub fn create_replay(&self, session_id: &str, options: ReplayOptions) -> Result<EventReplay> {
        let events = self
            .get_session(session_id)
            .ok_or_else(|| TelemetryError::SessionNotFound(session_id.to_string()))?;
        EventReplay::new(events, options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventType;

    fn event(id: &str, ts: i64) -> TelemetryEvent {
        TelemetryEvent::builder("s1", EventType::Stream, "llm", "token")
            .id(id)
            .timestamp(ts)
            .build()
    }

    #[test]
    fn test_record_only_while_active() {
        let recorder = ReplayRecorder::new();
        recorder.record(&event("ignored", 0));
        assert!(!recorder.is_recording());

        recorder.start_recording("run-1").unwrap();
        recorder.record(&event("a", 10));
        recorder.record(&event("b", 20));
        assert_eq!(recorder.active_session().as_deref(), Some("run-1"));

        let events = recorder.stop_recording().unwrap();
        assert_eq!(events.len(), 2);
        assert!(!recorder.is_recording());
        assert_eq!(recorder.get_session("run-1").unwrap().len(), 2);
    }

    #[test]
    fn test_double_start_fails() {
        let recorder = ReplayRecorder::new();
        recorder.start_recording("a").unwrap();
        let err = recorder.start_recording("b").unwrap_err();
        assert!(matches!(err, TelemetryError::AlreadyRecording(id) if id == "a"));
    }

    #[test]
    fn test_stop_without_start() {
        let recorder = ReplayRecorder::new();
        assert!(matches!(
            recorder.stop_recording(),
            Err(TelemetryError::NotRecording)
        ));
    }

    #[test]
    fn test_export_import_round_trip() {
        let recorder = ReplayRecorder::new();
        recorder.start_recording("run-1").unwrap();
        recorder.record(&event("a", 1_000));
        recorder.record(&event("b", 1_750));
        recorder.stop_recording().unwrap();

        let json = recorder.export_session("run-1").unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["metadata"]["duration"], 750);
        assert_eq!(value["metadata"]["eventCount"], 2);

        let other = ReplayRecorder::new();
        assert_eq!(other.import_session(&json).unwrap(), "run-1");
        assert_eq!(
            other.get_session("run-1"),
            recorder.get_session("run-1")
        );
    }

    #[test]
    fn test_unknown_session() {
        let recorder = ReplayRecorder::new();
        assert!(matches!(
            recorder.export_session("missing"),
            Err(TelemetryError::SessionNotFound(_))
        ));
        assert!(matches!(
            recorder.create_replay("missing", ReplayOptions::default()),
            Err(TelemetryError::SessionNotFound(_))
        ));
    }

    #[test]
    fn test_list_and_delete() {
        let recorder = ReplayRecorder::new();
        for id in ["b", "a"] {
            recorder.start_recording(id).unwrap();
            recorder.stop_recording().unwrap();
        }
        assert_eq!(recorder.list_sessions(), vec!["a", "b"]);
        assert!(recorder.delete_session("a"));
        assert!(!recorder.delete_session("a"));
        assert_eq!(recorder.list_sessions(), vec!["b"]);
    }

    #[test]
    fn test_create_replay() {
        let recorder = ReplayRecorder::new();
        recorder.start_recording("run").unwrap();
        recorder.record(&event("late", 50));
        recorder.record(&event("early", 5));
        recorder.stop_recording().unwrap();

        let replay = recorder
            .create_replay("run", ReplayOptions::default())
            .unwrap();
        let ids: Vec<String> = replay.export_events().into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec!["early", "late"]);
    }
}
