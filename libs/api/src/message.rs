use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::TopicError;

/// Opaque, process-unique message identifier (random UUID v4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(Uuid);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Immutable message envelope carried by a topic.
///
/// The id is assigned at construction; the log assigns offsets separately,
/// so ids carry no ordering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message<T> {
    id: MessageId,
    payload: T,
    source: String,
    destination: String,
}

impl<T> Message<T> {
    pub fn new(payload: T, source: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            payload,
            source: source.into(),
            destination: destination.into(),
        }
    }

    pub fn id(&self) -> MessageId {
        self.id
    }

    pub fn payload(&self) -> &T {
        &self.payload
    }

    pub fn into_payload(self) -> T {
        self.payload
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// Shape check applied before a message is admitted to a log.
    pub fn validate(&self) -> Result<(), TopicError> {
        if self.source.trim().is_empty() {
            return Err(TopicError::InvalidMessage(format!("message {}: empty source", self.id)));
        }
        if self.destination.trim().is_empty() {
            return Err(TopicError::InvalidMessage(format!(
                "message {}: empty destination",
                self.id
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn ids_are_unique() {
        let ids: HashSet<MessageId> = (0..1000).map(|i| Message::new(i, "p", "t").id()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn accessors_return_constructor_values() {
        let msg = Message::new("hello".to_string(), "pub-1", "orders");
        assert_eq!(msg.payload(), "hello");
        assert_eq!(msg.source(), "pub-1");
        assert_eq!(msg.destination(), "orders");
        assert_eq!(msg.into_payload(), "hello");
    }

    #[test]
    fn validate_rejects_blank_endpoints() {
        assert!(Message::new(1, "pub-1", "orders").validate().is_ok());

        let err = Message::new(1, "pub-1", "  ").validate().unwrap_err();
        assert!(matches!(
            err,
            TopicError::InvalidMessage(ref m) if m.contains("empty destination")
        ));

        let err = Message::new(1, "", "orders").validate().unwrap_err();
        assert!(matches!(err, TopicError::InvalidMessage(ref m) if m.contains("empty source")));
    }

    #[test]
    fn serializes_id_as_plain_string() {
        let msg = Message::new(serde_json::json!({"qty": 5}), "pub-1", "orders");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["id"], serde_json::Value::String(msg.id().to_string()));
        assert_eq!(json["payload"]["qty"], 5);
        assert_eq!(json["destination"], "orders");
    }
}
