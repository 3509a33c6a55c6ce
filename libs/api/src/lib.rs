//! Shared vocabulary of the topic system: the message envelope, the error
//! taxonomy and topic declarations. No runtime dependency; the engine and
//! binaries build on top of it.

pub mod config;
pub mod error;
pub mod message;

pub use config::TopicConfig;
pub use error::TopicError;
pub use message::{Message, MessageId};
