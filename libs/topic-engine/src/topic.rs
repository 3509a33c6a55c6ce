use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::ops::Range;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use topic_api::{Message, TopicConfig, TopicError};

use crate::cursor::SubscriptionCursor;
use crate::log::{MessageLog, TopicStats};
use crate::publisher::PublishHandle;

/// Handle to a named topic. Clones share the same log.
pub struct Topic<T> {
    log: Arc<MessageLog<T>>,
}

impl<T> Clone for Topic<T> {
    fn clone(&self) -> Self {
        Self {
            log: Arc::clone(&self.log),
        }
    }
}

impl<T> std::fmt::Debug for Topic<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Topic").field("name", &self.log.name()).finish()
    }
}

impl<T> Topic<T> {
    pub fn new(name: impl Into<String>, capacity: usize) -> Result<Self, TopicError> {
        Ok(Self {
            log: Arc::new(MessageLog::new(name, capacity)?),
        })
    }

    pub fn name(&self) -> &str {
        self.log.name()
    }

    pub fn capacity(&self) -> usize {
        self.log.capacity()
    }

    pub fn log(&self) -> &Arc<MessageLog<T>> {
        &self.log
    }

    /// Build a message and append it; returns the assigned offset.
    pub fn publish(
        &self,
        payload: T,
        source: impl Into<String>,
        destination: impl Into<String>,
    ) -> Result<u64, TopicError> {
        self.log.publish(Message::new(payload, source, destination))
    }

    pub fn publish_message(&self, message: Message<T>) -> Result<u64, TopicError> {
        self.log.publish(message)
    }

    pub fn publisher(&self, id: impl Into<String>) -> PublishHandle<T> {
        PublishHandle::new(Arc::clone(&self.log), id)
    }

    /// New cursor positioned at the oldest retained offset.
    pub fn subscribe(&self, id: impl Into<String>) -> Result<SubscriptionCursor<T>, TopicError> {
        SubscriptionCursor::new(Arc::clone(&self.log), id)
    }

    /// Drop a subscriber from the registry. The cursor itself stays usable;
    /// it just no longer shows up in stats.
    pub fn unsubscribe(&self, id: &str) -> bool {
        let removed = self.log.remove_subscriber(id);
        if removed {
            tracing::debug!(topic = %self.log.name(), subscriber = %id, "unsubscribed");
        }
        removed
    }

    pub fn subscribers(&self) -> Vec<String> {
        self.log.subscriber_ids()
    }

    pub fn read_at(&self, offset: u64) -> Result<Arc<Message<T>>, TopicError> {
        self.log.read_at(offset)
    }

    pub fn start_offset(&self) -> u64 {
        self.log.start_offset()
    }

    pub fn end_offset(&self) -> u64 {
        self.log.end_offset()
    }

    pub fn retention_window(&self) -> Range<u64> {
        self.log.retention_window()
    }

    pub fn stats(&self) -> TopicStats {
        self.log.stats()
    }
}

// ═══════════════════════════════════════════════════════════════
//  TopicRegistry
// ═══════════════════════════════════════════════════════════════

/// Registry of all topics, keyed by name.
///
/// Uses interior mutability so topics can be created while other threads
/// publish and subscribe.
pub struct TopicRegistry<T> {
    topics: RwLock<HashMap<String, Topic<T>>>,
}

impl<T> std::fmt::Debug for TopicRegistry<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopicRegistry")
            .field("topics", &self.topic_names())
            .finish()
    }
}

impl<T> Default for TopicRegistry<T> {
    fn default() -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
        }
    }
}

impl<T> TopicRegistry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Topic<T>>> {
        match self.topics.read() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!("topic registry read lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Topic<T>>> {
        match self.topics.write() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!("topic registry write lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Create and register a topic.
    ///
    /// Fails with `InvalidCapacity` for a zero capacity and `TopicExists` if
    /// the name is taken; neither affects other topics.
    pub fn create_topic(
        &self,
        name: impl Into<String>,
        capacity: usize,
    ) -> Result<Topic<T>, TopicError> {
        let name = name.into();
        let topic = Topic::new(name.clone(), capacity)?;
        match self.write().entry(name) {
            Entry::Occupied(slot) => Err(TopicError::TopicExists(slot.key().clone())),
            Entry::Vacant(slot) => {
                tracing::info!(topic = %slot.key(), capacity, "created topic");
                Ok(slot.insert(topic).clone())
            }
        }
    }

    pub fn create_from_config(&self, config: &TopicConfig) -> Result<Topic<T>, TopicError> {
        self.create_topic(config.name.clone(), config.capacity)
    }

    pub fn get(&self, name: &str) -> Option<Topic<T>> {
        self.read().get(name).cloned()
    }

    /// Like [`get`](Self::get), but a missing topic is an error.
    pub fn topic(&self, name: &str) -> Result<Topic<T>, TopicError> {
        self.get(name).ok_or_else(|| TopicError::TopicNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.read().contains_key(name)
    }

    /// Topic names, sorted.
    pub fn topic_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}
