use serde::{Deserialize, Serialize};

/// Lifetime limits applied by [`SessionStore`](crate::SessionStore).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionLimits {
    /// Sessions older than this are swept regardless of activity (ms).
    #[serde(alias = "maxSessionAgeMs")]
    pub max_session_age_ms: u64,

    /// Sessions idle for longer than this are swept (ms).
    #[serde(alias = "maxInactivityMs")]
    pub max_inactivity_ms: u64,

    /// Creating one more session than this evicts the owner's oldest. 0 = unlimited.
    #[serde(alias = "maxSessionsPerOwner")]
    pub max_sessions_per_owner: usize,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            max_session_age_ms: 60 * 60 * 1_000,
            max_inactivity_ms: 5 * 60 * 1_000,
            max_sessions_per_owner: 5,
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let limits = SessionLimits::default();
        assert_eq!(limits.max_session_age_ms, 3_600_000);
        assert_eq!(limits.max_inactivity_ms, 300_000);
        assert_eq!(limits.max_sessions_per_owner, 5);
    }

    #[test]
    fn camel_case_aliases() {
        let limits: SessionLimits =
            serde_json::from_str(r#"{"maxInactivityMs": 5000, "maxSessionsPerOwner": 1}"#).unwrap();
        assert_eq!(limits.max_inactivity_ms, 5_000);
        assert_eq!(limits.max_sessions_per_owner, 1);
        assert_eq!(limits.max_session_age_ms, 3_600_000);
    }
}
