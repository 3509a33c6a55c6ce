//! In-process fan-out message log.
//!
//! Each topic owns a capacity-bounded [`MessageLog`]. Producers append
//! through a [`PublishHandle`] (or [`Topic::publish`]); every subscriber reads
//! the full stream at its own pace through a private [`SubscriptionCursor`].
//! Reading never removes messages; only capacity drives eviction.

pub mod cursor;
pub mod log;
pub mod publisher;
pub mod topic;

pub use cursor::{Delivery, SubscriptionCursor};
pub use log::{MessageLog, SubscriberStats, TopicStats};
pub use publisher::PublishHandle;
pub use topic::{Topic, TopicRegistry};

pub use topic_api::{Message, MessageId, TopicConfig, TopicError};
