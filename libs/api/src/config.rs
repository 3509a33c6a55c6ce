use serde::Deserialize;

/// Declaration of a topic: name plus ring-buffer capacity.
///
/// Capacity is checked when the topic is created, not at parse time, so a
/// zero capacity surfaces as `TopicError::InvalidCapacity` for that topic only.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TopicConfig {
    /// Topic name (e.g. "orders", "quotes.raw").
    pub name: String,
    /// Maximum number of retained messages.
    #[serde(default = "default_capacity")]
    pub capacity: usize,
}

pub fn default_capacity() -> usize {
    1024
}

impl TopicConfig {
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        Self {
            name: name.into(),
            capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Deserialize)]
    struct File {
        topics: Vec<TopicConfig>,
    }

    #[test]
    fn capacity_defaults_when_omitted() {
        let file: File = toml::from_str(
            r#"
            [[topics]]
            name = "orders"

            [[topics]]
            name = "quotes"
            capacity = 3
            "#,
        )
        .unwrap();
        assert_eq!(file.topics[0], TopicConfig::new("orders", 1024));
        assert_eq!(file.topics[1], TopicConfig::new("quotes", 3));
    }
}
