use proptest::prelude::*;
use topic_engine::{Message, MessageLog, TopicError};

proptest! {
    #[test]
    fn retention_window_tracks_last_capacity_messages(capacity in 1usize..32, n in 0u64..200) {
        let log = MessageLog::new("p", capacity).unwrap();
        for i in 0..n {
            prop_assert_eq!(log.publish(Message::new(i, "pub", "p")).unwrap(), i);
        }

        let start = n.saturating_sub(capacity as u64);
        prop_assert_eq!(log.start_offset(), start);
        prop_assert_eq!(log.end_offset(), n);
        prop_assert!(log.len() <= capacity);

        for o in 0..n + 2 {
            match log.read_at(o) {
                Ok(msg) => {
                    prop_assert!(start <= o && o < n);
                    prop_assert_eq!(*msg.payload(), o);
                }
                Err(TopicError::Evicted { .. }) => prop_assert!(o < start),
                Err(TopicError::NotYetAvailable { .. }) => prop_assert!(o >= n),
                Err(other) => prop_assert!(false, "unexpected error {}", other),
            }
        }
    }

    #[test]
    fn seek_accepts_exactly_the_inclusive_window(
        capacity in 1usize..16,
        n in 0u64..64,
        target in 0u64..80,
    ) {
        let log = std::sync::Arc::new(MessageLog::new("p", capacity).unwrap());
        for i in 0..n {
            log.publish(Message::new(i, "pub", "p")).unwrap();
        }
        let mut cursor = topic_engine::SubscriptionCursor::new(log.clone(), "c").unwrap();
        let before = cursor.offset();
        let window = log.retention_window();

        let valid = window.start <= target && target <= window.end;
        match cursor.seek(target) {
            Ok(()) => {
                prop_assert!(valid);
                prop_assert_eq!(cursor.offset(), target);
            }
            Err(TopicError::InvalidSeekTarget { .. }) => {
                prop_assert!(!valid);
                prop_assert_eq!(cursor.offset(), before);
            }
            Err(other) => prop_assert!(false, "unexpected error {}", other),
        }
    }
}
