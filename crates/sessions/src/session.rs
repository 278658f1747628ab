use std::collections::HashMap;

use {
    ferry_common::{DeliveryTarget, MessageHandle},
    serde::{Deserialize, Serialize},
    serde_json::Value,
    sha2::{Digest, Sha256},
};

/// Lifecycle of a delivery session.
///
/// `initializing -> active <-> paused -> finalizing -> completed`, with
/// `error` and `timeout` reachable from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Initializing,
    Active,
    Paused,
    Finalizing,
    Completed,
    Error,
    Timeout,
}

impl SessionStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Finalizing => "finalizing",
            Self::Completed => "completed",
            Self::Error => "error",
            Self::Timeout => "timeout",
        }
    }

    /// Completed, error and timeout sessions never change again.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error | Self::Timeout)
    }

    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        use SessionStatus::*;
        match (self, next) {
            (from, _) if from.is_terminal() => false,
            (_, Error | Timeout) => true,
            (Initializing, Active | Finalizing) => true,
            (Active, Paused | Finalizing) => true,
            (Paused, Active | Finalizing) => true,
            (Finalizing, Completed) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One ongoing delivery of a streamed reply to one target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub target: DeliveryTarget,
    pub owner: String,
    /// Unix millis.
    pub created_at: u64,
    /// Unix millis.
    pub last_activity: u64,
    pub status: SessionStatus,
    /// Remote message being updated; `None` until the first successful send.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handle: Option<MessageHandle>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

/// Immutable record of one text state of the reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageVersion {
    /// 1-based, gapless within a context.
    pub version: u32,
    pub content: String,
    pub created_at: u64,
    pub byte_len: usize,
    pub word_count: usize,
    /// Whether this text actually reached the remote message.
    pub sent: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handle: Option<MessageHandle>,
    /// Hex SHA-256 of `content`.
    pub checksum: String,
}

impl MessageVersion {
    #[must_use]
    pub fn new(
        version: u32,
        content: String,
        created_at: u64,
        sent: bool,
        handle: Option<MessageHandle>,
    ) -> Self {
        Self {
            version,
            byte_len: content.len(),
            word_count: content.split_whitespace().count(),
            checksum: checksum(&content),
            content,
            created_at,
            sent,
            handle,
        }
    }
}

#[must_use]
pub fn checksum(content: &str) -> String {
    format!("{:x}", Sha256::digest(content.as_bytes()))
}

/// Streaming progress for a session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamingContext {
    pub versions: Vec<MessageVersion>,
    /// Number of the newest version, 0 before the first.
    pub current_version: u32,
    pub total_chunks: u64,
    pub processed_chunks: u64,
    pub error_count: u32,
    pub retry_count: u32,
    /// Unix millis of the last appended version.
    pub last_checkpoint: u64,
    /// Informational key-value data from callers. Never consulted by the
    /// store itself.
    #[serde(default)]
    pub scratch: HashMap<String, Value>,
}

impl StreamingContext {
    #[must_use]
    pub fn latest(&self) -> Option<&MessageVersion> {
        self.versions.last()
    }

    /// Newest version that reached the remote message.
    #[must_use]
    pub fn last_sent(&self) -> Option<&MessageVersion> {
        self.versions.iter().rev().find(|v| v.sent)
    }
}

/// Serializable copy of a session and its context, for collaborators that
/// persist state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session: Session,
    pub context: StreamingContext,
}
