use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::classify::{ErrorClass, RecoveryStrategy};

/// Partial replacement for one class's default policy. Unset fields keep the default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyOverride {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<RecoveryStrategy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub multiplier: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub degradation_note: Option<String>,
}

/// Recovery settings.
///
/// ```toml
/// [recovery.policies.server]
/// strategy = "skip"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    pub policies: HashMap<ErrorClass, PolicyOverride>,
}

impl RecoveryConfig {
    #[must_use]
    pub fn policy(&self, class: ErrorClass) -> Option<&PolicyOverride> {
        self.policies.get(&class)
    }
}
