use topic_api::TopicError;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("config ({context}): {detail}")]
    Config { context: &'static str, detail: String },

    #[error("no {0} configured")]
    NoComponents(&'static str),

    #[error("topic: {0}")]
    Topic(#[from] TopicError),

    #[error("consumer '{consumer}': {source}")]
    Consumer { consumer: String, source: TopicError },

    #[error("payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("signal: {0}")]
    Signal(#[from] std::io::Error),

    #[error("{0} task(s) failed")]
    TasksFailed(usize),
}
