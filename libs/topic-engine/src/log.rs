use std::collections::hash_map::Entry;
use std::collections::{HashMap, VecDeque};
use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use tokio::sync::Notify;
use tokio::sync::futures::Notified;

use topic_api::{Message, TopicError};

// ═══════════════════════════════════════════════════════════════
//  LogState: buffer and offset numbering, always locked together
// ═══════════════════════════════════════════════════════════════

struct LogState<T> {
    buffer: VecDeque<Arc<Message<T>>>,
    start_offset: u64,
}

impl<T> LogState<T> {
    fn end_offset(&self) -> u64 {
        self.start_offset + self.buffer.len() as u64
    }
}

// ═══════════════════════════════════════════════════════════════
//  MessageLog
// ═══════════════════════════════════════════════════════════════

/// Capacity-bounded, offset-addressed message log of one topic.
///
/// Offsets are dense: the retained messages occupy
/// `[start_offset, start_offset + len)`. When the log is full, a publish
/// evicts the oldest message and advances `start_offset`; publishing never
/// blocks and never waits for slow subscribers. A subscriber that falls more
/// than `capacity` messages behind loses the skipped ones and sees
/// `TopicError::Evicted`.
///
/// `buffer` and `start_offset` share one mutex, so offset assignment and
/// buffer mutation are never observed apart.
pub struct MessageLog<T> {
    name: String,
    capacity: usize,
    state: Mutex<LogState<T>>,
    /// Subscriber id → position mirrored from its cursor.
    subscribers: Mutex<HashMap<String, Arc<AtomicU64>>>,
    /// Woken after every publish.
    notify: Notify,
}

impl<T> std::fmt::Debug for MessageLog<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageLog")
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .finish()
    }
}

impl<T> MessageLog<T> {
    pub fn new(name: impl Into<String>, capacity: usize) -> Result<Self, TopicError> {
        if capacity == 0 {
            return Err(TopicError::InvalidCapacity(capacity));
        }
        Ok(Self {
            name: name.into(),
            capacity,
            state: Mutex::new(LogState {
                buffer: VecDeque::with_capacity(capacity.min(65536)),
                start_offset: 0,
            }),
            subscribers: Mutex::new(HashMap::new()),
            notify: Notify::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn state(&self) -> MutexGuard<'_, LogState<T>> {
        match self.state.lock() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!(topic = %self.name, "log state lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn subscribers(&self) -> MutexGuard<'_, HashMap<String, Arc<AtomicU64>>> {
        match self.subscribers.lock() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!(
                    topic = %self.name,
                    "subscriber registry lock was poisoned, recovering"
                );
                poisoned.into_inner()
            }
        }
    }

    /// Append a message and return its offset.
    ///
    /// Eviction, append and offset read happen in one critical section, so
    /// concurrent publishers receive consecutive offsets with no gaps and no
    /// repeats. An invalid message is rejected before the lock is taken.
    pub fn publish(&self, message: Message<T>) -> Result<u64, TopicError> {
        message.validate()?;
        let id = message.id();
        let message = Arc::new(message);

        let (offset, evicted) = {
            let mut state = self.state();
            let evicted = if state.buffer.len() == self.capacity {
                state.buffer.pop_front();
                state.start_offset += 1;
                true
            } else {
                false
            };
            state.buffer.push_back(message);
            (state.end_offset() - 1, evicted)
        };

        self.notify.notify_waiters();
        tracing::trace!(topic = %self.name, offset, message_id = %id, evicted, "published");
        Ok(offset)
    }

    /// Read the message at `offset`.
    ///
    /// `Evicted` below the retention window, `NotYetAvailable` at or past its
    /// end. The window check and the index are computed from one snapshot.
    pub fn read_at(&self, offset: u64) -> Result<Arc<Message<T>>, TopicError> {
        let state = self.state();
        if offset < state.start_offset {
            return Err(TopicError::Evicted {
                offset,
                start_offset: state.start_offset,
            });
        }
        let end_offset = state.end_offset();
        if offset >= end_offset {
            return Err(TopicError::NotYetAvailable { offset, end_offset });
        }
        // offset - start_offset < len <= capacity, so the index fits in usize.
        Ok(Arc::clone(&state.buffer[(offset - state.start_offset) as usize]))
    }

    /// Oldest retained offset.
    pub fn start_offset(&self) -> u64 {
        self.state().start_offset
    }

    /// Offset the next publish will receive.
    pub fn end_offset(&self) -> u64 {
        self.state().end_offset()
    }

    /// `[start_offset, end_offset)` from a single snapshot.
    pub fn retention_window(&self) -> Range<u64> {
        let state = self.state();
        state.start_offset..state.end_offset()
    }

    pub fn len(&self) -> usize {
        self.state().buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state().buffer.is_empty()
    }

    // ---------------------------------------------------------------------------
    // Subscriber registry
    // ---------------------------------------------------------------------------

    /// Register a subscriber. Returns false if the id is already registered.
    pub fn add_subscriber(&self, id: impl Into<String>, position: Arc<AtomicU64>) -> bool {
        match self.subscribers().entry(id.into()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(position);
                true
            }
        }
    }

    /// Deregister a subscriber by id. Returns false if it was not registered.
    pub fn remove_subscriber(&self, id: &str) -> bool {
        self.subscribers().remove(id).is_some()
    }

    /// Deregister only if `id` still maps to this exact position handle.
    ///
    /// A cursor dropped after its id was reused must not evict the newer
    /// registration.
    pub(crate) fn remove_subscriber_if(&self, id: &str, position: &Arc<AtomicU64>) -> bool {
        let mut subs = self.subscribers();
        let same = subs.get(id).is_some_and(|current| Arc::ptr_eq(current, position));
        if same {
            subs.remove(id);
        }
        same
    }

    /// Registered subscriber ids, sorted.
    pub fn subscriber_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.subscribers().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers().len()
    }

    pub(crate) fn notified(&self) -> Notified<'_> {
        self.notify.notified()
    }

    /// Point-in-time snapshot of the window and every subscriber's lag.
    pub fn stats(&self) -> TopicStats {
        let window = self.retention_window();
        let mut subscribers: Vec<SubscriberStats> = self
            .subscribers()
            .iter()
            .map(|(id, position)| {
                let position = position.load(Ordering::Relaxed);
                SubscriberStats {
                    id: id.clone(),
                    position,
                    lag: window.end.saturating_sub(position),
                }
            })
            .collect();
        subscribers.sort_by(|a, b| a.id.cmp(&b.id));

        TopicStats {
            name: self.name.clone(),
            capacity: self.capacity,
            start_offset: window.start,
            end_offset: window.end,
            len: (window.end - window.start) as usize,
            subscribers,
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Stats
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopicStats {
    pub name: String,
    pub capacity: usize,
    pub start_offset: u64,
    pub end_offset: u64,
    pub len: usize,
    pub subscribers: Vec<SubscriberStats>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriberStats {
    pub id: String,
    /// Next offset the subscriber will read.
    pub position: u64,
    /// Messages published but not yet read (including evicted ones).
    pub lag: u64,
}
