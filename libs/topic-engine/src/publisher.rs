use std::sync::Arc;

use topic_api::{Message, TopicError};

use crate::log::MessageLog;

/// Named producer bound to one topic log.
///
/// Validates and forwards; holds no state beyond its id.
pub struct PublishHandle<T> {
    id: String,
    log: Arc<MessageLog<T>>,
}

impl<T> Clone for PublishHandle<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            log: Arc::clone(&self.log),
        }
    }
}

impl<T> std::fmt::Debug for PublishHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublishHandle")
            .field("id", &self.id)
            .field("topic", &self.log.name())
            .finish()
    }
}

impl<T> PublishHandle<T> {
    pub fn new(log: Arc<MessageLog<T>>, id: impl Into<String>) -> Self {
        Self { id: id.into(), log }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn topic(&self) -> &str {
        self.log.name()
    }

    /// Publish a prepared message. An invalid message is rejected with
    /// `InvalidMessage` and assigned no offset.
    pub fn publish(&self, message: Message<T>) -> Result<u64, TopicError> {
        self.log.publish(message).inspect_err(|e| {
            if let TopicError::InvalidMessage(reason) = e {
                tracing::warn!(
                    publisher = %self.id,
                    topic = %self.log.name(),
                    %reason,
                    "rejected message"
                );
            }
        })
    }

    /// Publish `payload` with this publisher's id as the message source.
    pub fn send(&self, payload: T, destination: impl Into<String>) -> Result<u64, TopicError> {
        self.publish(Message::new(payload, self.id.clone(), destination))
    }
}
