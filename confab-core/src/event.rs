// ABOUTME: Inbound event model for the dispatch pipeline.
// ABOUTME: Classifies raw protocol frames and extracts their semantic data fields.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Identifier for one transport connection in the external registry.
///
/// The engine only ever stores and forwards this id; connection lifetime
/// is owned by the gateway's connection registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub u64);

impl ConnectionId {
    /// Reserved id for events injected over plain HTTP, which have no
    /// persistent connection behind them.
    pub const HTTP: ConnectionId = ConnectionId(0);
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Classes of inbound events, used to route to registered handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventClass {
    /// A chat message (private, group, ...)
    Message,
    /// A protocol notice (member joined, file uploaded, ...)
    Notice,
    /// A request needing approval (friend request, ...)
    Request,
    /// Protocol metadata (heartbeat, lifecycle)
    Meta,
    /// A transport connection opened
    Connect,
    /// A transport connection closed
    Disconnect,
}

impl EventClass {
    /// Map the frame's `post_type` discriminator to an event class.
    pub fn from_post_type(post_type: &str) -> Option<Self> {
        match post_type {
            "message" => Some(Self::Message),
            "notice" => Some(Self::Notice),
            "request" => Some(Self::Request),
            "meta_event" => Some(Self::Meta),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Message => "message",
            Self::Notice => "notice",
            Self::Request => "request",
            Self::Meta => "meta_event",
            Self::Connect => "connect",
            Self::Disconnect => "disconnect",
        }
    }
}

impl std::fmt::Display for EventClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One inbound event as received from the transport.
///
/// `payload` is the raw frame and is never mutated after construction;
/// handler-visible mutable state lives in the context record's `data` map,
/// which starts as a copy of the payload's fields.
#[derive(Debug, Clone)]
pub struct InboundEvent {
    /// Unique event id, for tracing and deduplication
    pub id: String,
    /// Connection the frame arrived on
    pub connection: ConnectionId,
    /// Event class for handler routing
    pub class: EventClass,
    /// Raw frame payload, immutable after construction
    pub payload: Value,
    /// When the gateway received the frame
    pub received_at: DateTime<Utc>,
}

impl InboundEvent {
    pub fn new(connection: ConnectionId, class: EventClass, payload: Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            connection,
            class,
            payload,
            received_at: Utc::now(),
        }
    }

    /// Build an event from a raw protocol frame, classifying by `post_type`.
    ///
    /// Returns `None` for frames that are not events (API responses, unknown
    /// post types); the transport decides what to do with those.
    pub fn from_frame(connection: ConnectionId, payload: Value) -> Option<Self> {
        let class = payload
            .get("post_type")
            .and_then(Value::as_str)
            .and_then(EventClass::from_post_type)?;
        Some(Self::new(connection, class, payload))
    }

    /// Synthesize the event dispatched when a connection opens.
    pub fn connected(connection: ConnectionId, self_id: Option<i64>) -> Self {
        let mut payload = Map::new();
        if let Some(id) = self_id {
            payload.insert("self_id".to_string(), Value::from(id));
        }
        Self::new(connection, EventClass::Connect, Value::Object(payload))
    }

    /// Synthesize the event dispatched when a connection closes.
    pub fn disconnected(connection: ConnectionId, self_id: Option<i64>) -> Self {
        let mut payload = Map::new();
        if let Some(id) = self_id {
            payload.insert("self_id".to_string(), Value::from(id));
        }
        Self::new(connection, EventClass::Disconnect, Value::Object(payload))
    }

    /// Copy the frame's top-level fields into a fresh, mutable data map.
    ///
    /// Every handler context gets its own copy; mutating one never affects
    /// the raw payload or any sibling context.
    pub fn extract_data(&self) -> Map<String, Value> {
        match &self.payload {
            Value::Object(map) => map.clone(),
            _ => Map::new(),
        }
    }

    pub fn message_type(&self) -> Option<&str> {
        self.payload.get("message_type").and_then(Value::as_str)
    }

    pub fn self_id(&self) -> Option<i64> {
        self.payload.get("self_id").and_then(Value::as_i64)
    }
}

/// Field in the data map that identifies the conversation target for a
/// given message type. A follow-up message must agree on this field (in
/// addition to `user_id`/`self_id`) to belong to the same conversation.
pub fn target_id_field(message_type: &str) -> Option<&'static str> {
    match message_type {
        "private" => Some("user_id"),
        "group" => Some("group_id"),
        "discuss" => Some("discuss_id"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_class_from_post_type() {
        assert_eq!(
            EventClass::from_post_type("message"),
            Some(EventClass::Message)
        );
        assert_eq!(
            EventClass::from_post_type("meta_event"),
            Some(EventClass::Meta)
        );
        assert_eq!(EventClass::from_post_type("bogus"), None);
    }

    #[test]
    fn test_from_frame_classifies_message() {
        let payload = json!({
            "post_type": "message",
            "message_type": "private",
            "user_id": 100,
            "self_id": 9,
            "message": "hello"
        });
        let event = InboundEvent::from_frame(ConnectionId(1), payload).unwrap();
        assert_eq!(event.class, EventClass::Message);
        assert_eq!(event.message_type(), Some("private"));
        assert_eq!(event.self_id(), Some(9));
    }

    #[test]
    fn test_from_frame_rejects_api_response() {
        let payload = json!({"status": "ok", "retcode": 0, "echo": "abc"});
        assert!(InboundEvent::from_frame(ConnectionId(1), payload).is_none());
    }

    #[test]
    fn test_extract_data_is_independent_copy() {
        let payload = json!({"post_type": "message", "user_id": 1});
        let event = InboundEvent::from_frame(ConnectionId(1), payload).unwrap();
        let mut data = event.extract_data();
        data.insert("user_id".to_string(), Value::from(2));
        assert_eq!(event.payload.get("user_id"), Some(&Value::from(1)));
    }

    #[test]
    fn test_target_id_field_by_message_type() {
        assert_eq!(target_id_field("private"), Some("user_id"));
        assert_eq!(target_id_field("group"), Some("group_id"));
        assert_eq!(target_id_field("discuss"), Some("discuss_id"));
        assert_eq!(target_id_field("channel"), None);
    }

    #[test]
    fn test_connected_event_carries_self_id() {
        let event = InboundEvent::connected(ConnectionId(3), Some(42));
        assert_eq!(event.class, EventClass::Connect);
        assert_eq!(event.self_id(), Some(42));
    }
}
