use {
    ferry_common::SinkError,
    ferry_throttle::{RetryClassifier, RetryPlan},
    serde::{Deserialize, Serialize},
};

use crate::config::RecoveryConfig;

/// Closed taxonomy of sink failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorClass {
    /// 429 / flood control.
    RateLimited,
    /// The message being edited expired or can no longer be found.
    StaleTarget,
    /// The remote user deleted the message.
    TargetDeleted,
    /// 401/403 or missing rights in the chat.
    PermissionDenied,
    /// The recipient blocked the sender or no longer exists.
    Blocked,
    /// Timeouts, resets, DNS.
    Network,
    /// 5xx.
    Server,
    /// The platform refused the formatting.
    ContentRejected,
    Unknown,
}

impl ErrorClass {
    pub const ALL: [Self; 9] = [
        Self::RateLimited,
        Self::StaleTarget,
        Self::TargetDeleted,
        Self::PermissionDenied,
        Self::Blocked,
        Self::Network,
        Self::Server,
        Self::ContentRejected,
        Self::Unknown,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RateLimited => "rate-limited",
            Self::StaleTarget => "stale-target",
            Self::TargetDeleted => "target-deleted",
            Self::PermissionDenied => "permission-denied",
            Self::Blocked => "blocked",
            Self::Network => "network",
            Self::Server => "server",
            Self::ContentRejected => "content-rejected",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to do about a failed sink call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStrategy {
    /// Same call again after backoff.
    Retry,
    /// Same call again with formatting stripped.
    Fallback,
    /// Drop the remote handle and create a fresh message.
    Recreate,
    /// Pretend the update succeeded.
    Skip,
    /// Stop delivering to this target.
    Abort,
}

impl RecoveryStrategy {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Retry => "retry",
            Self::Fallback => "fallback",
            Self::Recreate => "recreate",
            Self::Skip => "skip",
            Self::Abort => "abort",
        }
    }
}

impl std::fmt::Display for RecoveryStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified failure and the policy attached to its class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorClassification {
    pub class: ErrorClass,
    pub retryable: bool,
    pub max_retries: u32,
    pub strategy: RecoveryStrategy,
    pub multiplier: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub degradation_note: Option<String>,
}

impl ErrorClassification {
    /// Built-in policy for a class.
    #[must_use]
    pub fn default_for(class: ErrorClass) -> Self {
        let (retryable, max_retries, strategy, multiplier, note) = match class {
            ErrorClass::RateLimited => (true, 5, RecoveryStrategy::Retry, 2.0, None),
            ErrorClass::StaleTarget => (false, 0, RecoveryStrategy::Recreate, 1.0, None),
            ErrorClass::TargetDeleted => (false, 0, RecoveryStrategy::Recreate, 1.0, None),
            ErrorClass::PermissionDenied => (
                false,
                0,
                RecoveryStrategy::Abort,
                1.0,
                Some("missing permission to post in this chat"),
            ),
            ErrorClass::Blocked => (
                false,
                0,
                RecoveryStrategy::Abort,
                1.0,
                Some("recipient blocked the bot or is no longer reachable"),
            ),
            ErrorClass::Network => (true, 3, RecoveryStrategy::Retry, 1.5, None),
            ErrorClass::Server => (true, 3, RecoveryStrategy::Retry, 1.2, None),
            ErrorClass::ContentRejected => (
                true,
                1,
                RecoveryStrategy::Fallback,
                1.0,
                Some("formatting was rejected, sent as plain text"),
            ),
            ErrorClass::Unknown => (true, 2, RecoveryStrategy::Retry, 1.5, None),
        };
        Self {
            class,
            retryable,
            max_retries,
            strategy,
            multiplier,
            degradation_note: note.map(str::to_owned),
        }
    }

    /// Whether the admission queue should retry this failure in place.
    #[must_use]
    pub fn retries_in_queue(&self) -> bool {
        self.retryable && self.strategy == RecoveryStrategy::Retry && self.max_retries > 0
    }
}

const RATE_LIMIT_PATTERNS: &[&str] = &[
    "too many requests",
    "rate limit",
    "rate_limit",
    "flood",
    "retry after",
    "429",
];

// Checked before permission patterns: "Forbidden: bot was blocked by the user".
const BLOCKED_PATTERNS: &[&str] = &[
    "blocked by the user",
    "bot was blocked",
    "user is deactivated",
    "chat not found",
    "bot was kicked",
    "recipient",
    "peer_id_invalid",
];

const STALE_PATTERNS: &[&str] = &[
    "message to edit not found",
    "message can't be edited",
    "message_id_invalid",
    "message not found",
    "expired",
    "stale",
];

const DELETED_PATTERNS: &[&str] = &["message was deleted", "deleted"];

const PERMISSION_PATTERNS: &[&str] = &[
    "not enough rights",
    "have no rights",
    "permission",
    "forbidden",
    "unauthorized",
    "401",
    "403",
];

const CONTENT_PATTERNS: &[&str] = &[
    "can't parse entities",
    "can't parse",
    "can't find end of",
    "unsupported start tag",
    "parse error",
    "invalid markup",
    "entity",
];

const SERVER_PATTERNS: &[&str] = &[
    "internal server error",
    "bad gateway",
    "service unavailable",
    "gateway timeout",
    "500",
    "502",
    "503",
    "504",
];

const NETWORK_PATTERNS: &[&str] = &[
    "timed out",
    "timeout",
    "connection",
    "network",
    "econnreset",
    "econnrefused",
    "broken pipe",
    "dns",
];

/// Map a failure onto the taxonomy. Never fails; anything unrecognised is
/// [`ErrorClass::Unknown`].
#[must_use]
pub fn classify_error(error: &SinkError) -> ErrorClass {
    let msg = error.message.to_lowercase();
    let has = |patterns: &[&str]| {
        patterns.iter().any(|p| {
            if p.bytes().all(|b| b.is_ascii_digit()) {
                mentions_code(&msg, p)
            } else {
                msg.contains(p)
            }
        })
    };

    if error.status == Some(429) || error.retry_after.is_some() || has(RATE_LIMIT_PATTERNS) {
        return ErrorClass::RateLimited;
    }
    if has(BLOCKED_PATTERNS) {
        return ErrorClass::Blocked;
    }
    if has(STALE_PATTERNS) {
        return ErrorClass::StaleTarget;
    }
    if has(DELETED_PATTERNS) {
        return ErrorClass::TargetDeleted;
    }
    if has(PERMISSION_PATTERNS) {
        return ErrorClass::PermissionDenied;
    }
    if has(CONTENT_PATTERNS) {
        return ErrorClass::ContentRejected;
    }
    if has(SERVER_PATTERNS) {
        return ErrorClass::Server;
    }
    if has(NETWORK_PATTERNS) {
        return ErrorClass::Network;
    }

    match error.status {
        Some(401 | 403) => ErrorClass::PermissionDenied,
        Some(404) => ErrorClass::StaleTarget,
        Some(408) => ErrorClass::Network,
        Some(410) => ErrorClass::TargetDeleted,
        Some(status) if (500..600).contains(&status) => ErrorClass::Server,
        _ => ErrorClass::Unknown,
    }
}

/// `code` appears as a standalone number, not inside an id like `14290`.
fn mentions_code(msg: &str, code: &str) -> bool {
    msg.match_indices(code).any(|(at, _)| {
        let before = msg[..at].chars().next_back();
        let after = msg[at + code.len()..].chars().next();
        !before.is_some_and(|c| c.is_ascii_alphanumeric())
            && !after.is_some_and(|c| c.is_ascii_alphanumeric())
    })
}

/// Classifier with the built-in policy table, optionally overridden per class.
#[derive(Debug, Clone, Default)]
pub struct ErrorClassifier {
    config: RecoveryConfig,
}

impl ErrorClassifier {
    #[must_use]
    pub fn new(config: RecoveryConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn classify(&self, error: &SinkError) -> ErrorClassification {
        self.policy_for(classify_error(error))
    }

    /// Effective policy for a class after overrides.
    #[must_use]
    pub fn policy_for(&self, class: ErrorClass) -> ErrorClassification {
        let mut classification = ErrorClassification::default_for(class);
        if let Some(policy) = self.config.policy(class) {
            if let Some(retryable) = policy.retryable {
                classification.retryable = retryable;
            }
            if let Some(max_retries) = policy.max_retries {
                classification.max_retries = max_retries;
            }
            if let Some(strategy) = policy.strategy {
                classification.strategy = strategy;
            }
            if let Some(multiplier) = policy.multiplier {
                classification.multiplier = multiplier;
            }
            if let Some(note) = &policy.degradation_note {
                classification.degradation_note = Some(note.clone());
            }
        }
        classification
    }
}

impl RetryClassifier for ErrorClassifier {
    fn retry_plan(&self, error: &SinkError) -> RetryPlan {
        let classification = self.classify(error);
        if classification.retries_in_queue() {
            RetryPlan {
                max_retries: classification.max_retries,
                multiplier: classification.multiplier,
            }
        } else {
            RetryPlan::none()
        }
    }
}
