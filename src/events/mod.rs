// src/events/mod.rs
//! Telemetry event model
//!
//! Events are produced by the host application and treated as read-only by
//! every pipeline stage. Identity is by `id`, ordering is by `timestamp`
//! (epoch milliseconds).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Event kinds
///
/// The set is open: anything other than the four lifecycle kinds is carried
/// as `Custom` with its name kept verbatim. Lifecycle names match
/// case-insensitively and serialize lowercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventType {
    Start,
    Stream,
    End,
    Error,
    Custom(String),
}

impl EventType {
    pub fn as_str(&self) -> &str {
        match self {
            EventType::Start => "start",
            EventType::Stream => "stream",
            EventType::End => "end",
            EventType::Error => "error",
            EventType::Custom(name) => name,
        }
    }
}

impl From<&str> for EventType {
    fn from(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "start" => EventType::Start,
            "stream" => EventType::Stream,
            "end" => EventType::End,
            "error" => EventType::Error,
            _ => EventType::Custom(value.to_string()),
        }
    }
}

impl From<String> for EventType {
    fn from(value: String) -> Self {
        EventType::from(value.as_str())
    }
}

impl From<EventType> for String {
    fn from(value: EventType) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Optional caller context attached to an event
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    /// Remaining context fields, preserved verbatim
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// A single telemetry event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryEvent {
    /// Unique event ID
    pub id: String,

    /// Epoch milliseconds
    pub timestamp: i64,

    pub session_id: String,

    pub event_type: EventType,

    pub category: String,

    pub action: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    /// Duration in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, serde_json::Value>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<EventContext>,
}

impl TelemetryEvent {
    /// Start building an event stamped with a fresh ULID and the current time
    pub fn builder(
        session_id: impl Into<String>,
        event_type: impl Into<EventType>,
        category: impl Into<String>,
        action: impl Into<String>,
    ) -> EventBuilder {
        EventBuilder {
            event: TelemetryEvent {
                id: ulid::Ulid::new().to_string(),
                timestamp: chrono::Utc::now().timestamp_millis(),
                session_id: session_id.into(),
                event_type: event_type.into(),
                category: category.into(),
                action: action.into(),
                label: None,
                duration: None,
                metadata: None,
                context: None,
            },
        }
    }

    pub fn is_error(&self) -> bool {
        self.event_type == EventType::Error
    }

    pub fn user_id(&self) -> Option<&str> {
        self.context.as_ref().and_then(|c| c.user_id.as_deref())
    }

    pub fn metadata_value(&self, key: &str) -> Option<&serde_json::Value> {
        self.metadata.as_ref().and_then(|m| m.get(key))
    }
}

/// Builder for `TelemetryEvent`
#[derive(Debug, Clone)]
pub struct EventBuilder {
    event: TelemetryEvent,
}

impl EventBuilder {
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.event.id = id.into();
        self
    }

    pub fn timestamp(mut self, timestamp: i64) -> Self {
        self.event.timestamp = timestamp;
        self
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.event.label = Some(label.into());
        self
    }

    pub fn duration(mut self, duration_ms: f64) -> Self {
        self.event.duration = Some(duration_ms);
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.event
            .metadata
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value);
        self
    }

    pub fn user_id(mut self, user_id: impl Into<String>) -> Self {
        self.event
            .context
            .get_or_insert_with(EventContext::default)
            .user_id = Some(user_id.into());
        self
    }

    pub fn build(self) -> TelemetryEvent {
        self.event
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_parsing() {
        assert_eq!(EventType::from("error"), EventType::Error);
        assert_eq!(EventType::from("START"), EventType::Start);
        assert_eq!(
            EventType::from("tool_call"),
            EventType::Custom("tool_call".to_string())
        );
        assert_eq!(EventType::Custom("tool_call".into()).to_string(), "tool_call");
        assert_eq!(
            EventType::from("ToolCall"),
            EventType::Custom("ToolCall".to_string())
        );
    }

    #[test]
    fn test_custom_type_keeps_case_through_serde() {
        let event = TelemetryEvent::builder("sess_1", "ToolCall", "agent", "invoke")
            .id("evt_2")
            .timestamp(7)
            .build();

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""eventType":"ToolCall""#));

        let back: TelemetryEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
        assert_eq!(back.event_type.as_str(), "ToolCall");
    }

    #[test]
    fn test_builder() {
        let event = TelemetryEvent::builder("sess_1", EventType::Stream, "llm", "chunk")
            .timestamp(1_000)
            .duration(42.0)
            .metadata("model", serde_json::json!("gpt"))
            .user_id("user_7")
            .build();

        assert_eq!(event.session_id, "sess_1");
        assert_eq!(event.timestamp, 1_000);
        assert_eq!(event.duration, Some(42.0));
        assert_eq!(event.user_id(), Some("user_7"));
        assert_eq!(event.metadata_value("model"), Some(&serde_json::json!("gpt")));
        assert!(!event.is_error());
        assert_eq!(event.id.len(), 26);
    }

    #[test]
    fn test_camel_case_wire_format() {
        let event = TelemetryEvent::builder("sess_1", "error", "sandbox", "exec")
            .id("evt_1")
            .timestamp(5)
            .build();

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["sessionId"], "sess_1");
        assert_eq!(json["eventType"], "error");
        assert!(json.get("duration").is_none());

        let parsed: TelemetryEvent = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn test_partial_input_deserializes() {
        let json = r#"{"id":"e","timestamp":1,"sessionId":"s","eventType":"stream","category":"c","action":"a","context":{"userId":"u","region":"eu"}}"#;
        let event: TelemetryEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.user_id(), Some("u"));
        assert!(event.metadata.is_none());
        assert_eq!(
            event.context.unwrap().extra.get("region"),
            Some(&serde_json::json!("eu"))
        );
    }
}
