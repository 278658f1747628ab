//! Root configuration schema.

use std::collections::HashMap;

use {
    ferry_recovery::RecoveryConfig,
    ferry_sessions::SessionLimits,
    ferry_stream::StreamConfig,
    ferry_throttle::RateLimitConfig,
    serde::{Deserialize, Serialize},
};

/// Everything ferry reads from its config file.
///
/// ```toml
/// [admission]
/// capacity = 20
///
/// [channels.telegram]
/// refill_rate_per_second = 0.5
///
/// [streaming]
/// min_update_interval_ms = 1500
///
/// [recovery.policies.server]
/// strategy = "skip"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FerryConfig {
    /// Admission settings used by every channel without its own entry.
    pub admission: RateLimitConfig,
    /// Per-channel admission settings, keyed by channel name. Each entry
    /// replaces `admission` entirely for that channel.
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub channels: HashMap<String, RateLimitConfig>,
    pub streaming: StreamConfig,
    pub sessions: SessionLimits,
    pub recovery: RecoveryConfig,
}

impl FerryConfig {
    /// Admission settings for `channel`.
    #[must_use]
    pub fn admission_for(&self, channel: &str) -> &RateLimitConfig {
        self.channels.get(channel).unwrap_or(&self.admission)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, ferry_recovery::ErrorClass};

    #[test]
    fn defaults_match_component_defaults() {
        let cfg = FerryConfig::default();
        assert_eq!(cfg.admission.capacity, 30);
        assert_eq!(cfg.streaming.min_update_interval_ms, 1_000);
        assert_eq!(cfg.streaming.max_message_length, 4_096);
        assert_eq!(cfg.sessions.max_sessions_per_owner, 5);
        assert!(cfg.recovery.policies.is_empty());
    }

    #[test]
    fn channel_entry_replaces_default_admission() {
        let cfg: FerryConfig = toml::from_str(
            r#"
            [admission]
            capacity = 10

            [channels.slack]
            capacity = 1
            "#,
        )
        .unwrap();
        assert_eq!(cfg.admission_for("slack").capacity, 1);
        assert_eq!(cfg.admission_for("telegram").capacity, 10);
        assert_eq!(cfg.admission_for("slack").max_queue_depth, 100);
    }

    #[test]
    fn parses_full_toml() {
        let cfg: FerryConfig = toml::from_str(
            r#"
            [streaming]
            min_update_interval_ms = 250
            truncation_marker = " [...]"
            final_priority = "urgent"

            [sessions]
            max_inactivity_ms = 1000

            [recovery.policies.network]
            max_retries = 9
            "#,
        )
        .unwrap();
        assert_eq!(cfg.streaming.min_update_interval_ms, 250);
        assert_eq!(cfg.streaming.truncation_marker, " [...]");
        assert_eq!(cfg.sessions.max_inactivity_ms, 1_000);
        assert_eq!(
            cfg.recovery
                .policy(ErrorClass::Network)
                .and_then(|p| p.max_retries),
            Some(9)
        );
    }

    #[test]
    fn default_round_trips_through_toml() {
        let cfg = FerryConfig::default();
        let text = toml::to_string_pretty(&cfg).unwrap();
        let back: FerryConfig = toml::from_str(&text).unwrap();
        assert_eq!(back, cfg);
    }
}
