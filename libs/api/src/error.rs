/// Errors returned by topic, log and cursor operations.
///
/// `Evicted` and `NotYetAvailable` must stay distinguishable: the first is
/// permanent for that offset, the second clears as soon as a producer
/// publishes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TopicError {
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("offset {offset} evicted (oldest retained offset is {start_offset})")]
    Evicted { offset: u64, start_offset: u64 },

    #[error("offset {offset} not yet available (next offset is {end_offset})")]
    NotYetAvailable { offset: u64, end_offset: u64 },

    #[error("seek target {target} outside retention window [{start_offset}, {end_offset}]")]
    InvalidSeekTarget {
        target: u64,
        start_offset: u64,
        end_offset: u64,
    },

    #[error("invalid capacity {0}: must be greater than zero")]
    InvalidCapacity(usize),

    #[error("topic not found: {0}")]
    TopicNotFound(String),

    #[error("topic already exists: {0}")]
    TopicExists(String),

    #[error("subscriber '{subscriber}' already registered on topic '{topic}'")]
    SubscriberExists { topic: String, subscriber: String },
}

impl TopicError {
    /// True when retrying the same call later can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TopicError::NotYetAvailable { .. })
    }

    /// Add context to the error.
    ///
    /// Context is prepended to the name carried by message/topic variants.
    /// Offset-carrying variants are returned unchanged so callers can still
    /// match on their fields.
    pub fn with_context(self, ctx: impl std::fmt::Display) -> Self {
        match self {
            TopicError::InvalidMessage(msg) => TopicError::InvalidMessage(format!("{ctx}: {msg}")),
            TopicError::TopicNotFound(name) => TopicError::TopicNotFound(format!("{ctx}: {name}")),
            TopicError::TopicExists(name) => TopicError::TopicExists(format!("{ctx}: {name}")),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_not_yet_available_is_retryable() {
        assert!(TopicError::NotYetAvailable { offset: 3, end_offset: 3 }.is_retryable());
        assert!(!TopicError::Evicted { offset: 0, start_offset: 1 }.is_retryable());
        assert!(!TopicError::InvalidCapacity(0).is_retryable());
        assert!(!TopicError::InvalidMessage("empty destination".into()).is_retryable());
    }

    #[test]
    fn context_is_prepended_to_names() {
        let err = TopicError::TopicNotFound("orders".into()).with_context("consumer c1");
        assert_eq!(err, TopicError::TopicNotFound("consumer c1: orders".into()));
        assert_eq!(err.to_string(), "topic not found: consumer c1: orders");
    }

    #[test]
    fn context_leaves_offsets_untouched() {
        let err = TopicError::Evicted { offset: 0, start_offset: 4 }.with_context("ignored");
        assert_eq!(err, TopicError::Evicted { offset: 0, start_offset: 4 });
    }
}
