use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use topic_api::{Message, TopicError};

use crate::log::MessageLog;

/// A message handed to a subscriber together with its offset.
#[derive(Debug)]
pub struct Delivery<T> {
    offset: u64,
    message: Arc<Message<T>>,
}

impl<T> Clone for Delivery<T> {
    fn clone(&self) -> Self {
        Self {
            offset: self.offset,
            message: Arc::clone(&self.message),
        }
    }
}

impl<T> Delivery<T> {
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn message(&self) -> &Arc<Message<T>> {
        &self.message
    }

    pub fn payload(&self) -> &T {
        self.message.payload()
    }
}

/// A subscriber's private read position in a topic log.
///
/// Starts at the oldest retained offset at subscribe time and only moves on
/// a successful read or an explicit seek. Cursors are owned by one consumer
/// (`poll`/`seek` take `&mut self`) and never affect each other or the log's
/// retention.
///
/// Dropping the cursor deregisters it from the log.
pub struct SubscriptionCursor<T> {
    id: String,
    log: Arc<MessageLog<T>>,
    offset: u64,
    /// Shared with the log's subscriber registry for lag reporting.
    position: Arc<AtomicU64>,
}

impl<T> std::fmt::Debug for SubscriptionCursor<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionCursor")
            .field("id", &self.id)
            .field("topic", &self.log.name())
            .field("offset", &self.offset)
            .finish()
    }
}

impl<T> SubscriptionCursor<T> {
    /// Register `id` on the log and position the cursor at its start offset.
    pub fn new(log: Arc<MessageLog<T>>, id: impl Into<String>) -> Result<Self, TopicError> {
        let id = id.into();
        let offset = log.start_offset();
        let position = Arc::new(AtomicU64::new(offset));
        if !log.add_subscriber(id.clone(), Arc::clone(&position)) {
            return Err(TopicError::SubscriberExists {
                topic: log.name().to_string(),
                subscriber: id,
            });
        }
        tracing::debug!(topic = %log.name(), subscriber = %id, offset, "subscribed");
        Ok(Self {
            id,
            log,
            offset,
            position,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn topic(&self) -> &str {
        self.log.name()
    }

    /// Next offset this cursor will read.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Messages published but not yet read by this cursor.
    pub fn lag(&self) -> u64 {
        self.log.end_offset().saturating_sub(self.offset)
    }

    fn set_offset(&mut self, offset: u64) {
        self.offset = offset;
        self.position.store(offset, Ordering::Relaxed);
    }

    /// Try to read the next message.
    ///
    /// - `Ok(Some(_))`: a message; the cursor advanced by one.
    /// - `Ok(None)`: nothing published at this offset yet; the cursor stays.
    /// - `Err(Evicted)`: the offset fell out of retention; the cursor stays
    ///   and the caller decides whether to `seek` forward.
    pub fn poll(&mut self) -> Result<Option<Delivery<T>>, TopicError> {
        match self.log.read_at(self.offset) {
            Ok(message) => {
                let delivery = Delivery {
                    offset: self.offset,
                    message,
                };
                self.set_offset(self.offset + 1);
                Ok(Some(delivery))
            }
            Err(TopicError::NotYetAvailable { .. }) => Ok(None),
            Err(e) => {
                if let TopicError::Evicted { start_offset, .. } = e {
                    tracing::warn!(
                        topic = %self.log.name(),
                        subscriber = %self.id,
                        offset = self.offset,
                        start_offset,
                        "cursor fell behind retention window"
                    );
                }
                Err(e)
            }
        }
    }

    /// Read up to `max` messages.
    ///
    /// Stops early when the log has nothing more. An eviction on the first
    /// read is returned as the error; after at least one delivery it ends
    /// the batch and the next call reports it.
    pub fn poll_batch(&mut self, max: usize) -> Result<Vec<Delivery<T>>, TopicError> {
        let mut batch = Vec::with_capacity(max.min(self.log.capacity()));
        while batch.len() < max {
            match self.poll() {
                Ok(Some(delivery)) => batch.push(delivery),
                Ok(None) => break,
                Err(e) if batch.is_empty() => return Err(e),
                Err(_) => break,
            }
        }
        Ok(batch)
    }

    /// Wait for the next message.
    ///
    /// Parks on the log's publish notification instead of spinning. Eviction
    /// is still reported, never skipped.
    pub async fn recv(&mut self) -> Result<Delivery<T>, TopicError> {
        let log = Arc::clone(&self.log);
        loop {
            let mut notified = std::pin::pin!(log.notified());
            // Register before polling so a publish in between is not missed.
            notified.as_mut().enable();

            if let Some(delivery) = self.poll()? {
                return Ok(delivery);
            }
            notified.await;
        }
    }

    /// Move to `target`.
    ///
    /// Valid targets are `start_offset..=end_offset`; anything else is
    /// `InvalidSeekTarget` and leaves the cursor where it was.
    pub fn seek(&mut self, target: u64) -> Result<(), TopicError> {
        let window = self.log.retention_window();
        if target < window.start || target > window.end {
            return Err(TopicError::InvalidSeekTarget {
                target,
                start_offset: window.start,
                end_offset: window.end,
            });
        }
        tracing::debug!(
            topic = %self.log.name(),
            subscriber = %self.id,
            from = self.offset,
            to = target,
            "seek"
        );
        self.set_offset(target);
        Ok(())
    }

    /// Jump to the oldest retained offset, accepting the loss of anything
    /// older. Returns how many offsets were skipped. A cursor already inside
    /// the window is rewound to its start.
    pub fn seek_to_start(&mut self) -> u64 {
        let start = self.log.start_offset();
        let skipped = start.saturating_sub(self.offset);
        tracing::debug!(
            topic = %self.log.name(),
            subscriber = %self.id,
            from = self.offset,
            to = start,
            "seek to start"
        );
        self.set_offset(start);
        skipped
    }

    /// Jump past the whole backlog. Returns how many offsets were skipped.
    pub fn seek_to_end(&mut self) -> u64 {
        let end = self.log.end_offset();
        let skipped = end.saturating_sub(self.offset);
        tracing::debug!(
            topic = %self.log.name(),
            subscriber = %self.id,
            from = self.offset,
            to = end,
            "seek to end"
        );
        self.set_offset(end);
        skipped
    }
}

impl<T> Drop for SubscriptionCursor<T> {
    fn drop(&mut self) {
        if self.log.remove_subscriber_if(&self.id, &self.position) {
            tracing::debug!(topic = %self.log.name(), subscriber = %self.id, "unsubscribed");
        }
    }
}
