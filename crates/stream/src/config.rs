use {
    ferry_throttle::Priority,
    serde::{Deserialize, Serialize},
};

/// Per-stream delivery settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Minimum gap between remote updates (ms). Fragments arriving sooner are
    /// coalesced into the next update.
    #[serde(alias = "minUpdateIntervalMs")]
    pub min_update_interval_ms: u64,

    /// Sink limit in bytes; longer text is truncated with `truncation_marker`.
    #[serde(alias = "maxMessageLength")]
    pub max_message_length: usize,

    /// Characters to accumulate before the first message is created.
    #[serde(alias = "minInitialChars")]
    pub min_initial_chars: usize,

    pub truncation_marker: String,

    /// Queue priority for intermediate updates.
    pub update_priority: Priority,

    /// Queue priority for the final update.
    pub final_priority: Priority,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            min_update_interval_ms: 1_000,
            max_message_length: 4_096,
            min_initial_chars: 0,
            truncation_marker: "\n\n… (truncated)".into(),
            update_priority: Priority::Normal,
            final_priority: Priority::High,
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = StreamConfig::default();
        assert_eq!(cfg.min_update_interval_ms, 1_000);
        assert_eq!(cfg.max_message_length, 4_096);
        assert_eq!(cfg.final_priority, Priority::High);
    }

    #[test]
    fn priorities_parse_from_snake_case() {
        let cfg: StreamConfig =
            serde_json::from_str(r#"{"update_priority": "low", "minUpdateIntervalMs": 250}"#)
                .unwrap();
        assert_eq!(cfg.update_priority, Priority::Low);
        assert_eq!(cfg.min_update_interval_ms, 250);
        assert_eq!(cfg.final_priority, Priority::High);
    }
}
