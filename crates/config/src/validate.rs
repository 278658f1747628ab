//! Configuration validation.
//!
//! Reports syntax errors, unknown or misspelled keys, type errors, and
//! values that parse but cannot work (an empty bucket, a backoff whose base
//! exceeds its cap, a message limit smaller than the truncation marker).

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use {
    ferry_recovery::{ErrorClass, RecoveryStrategy},
    ferry_throttle::RateLimitConfig,
    serde_json::Value,
};

use crate::{
    loader::{Format, format_of, parse_value},
    schema::FerryConfig,
};

/// Below this, most of a message would be spent on the truncation marker.
const MIN_SENSIBLE_MESSAGE_LENGTH: usize = 64;

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Info => "info",
        })
    }
}

/// A single validation finding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    /// One of "syntax", "unknown-field", "type-error", "value", "env", "file".
    pub category: &'static str,
    /// Dotted path, e.g. "admission.capacity".
    pub path: String,
    pub message: String,
}

impl Diagnostic {
    fn new(
        severity: Severity,
        category: &'static str,
        path: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            category,
            path: path.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.path.is_empty() {
            write!(f, "{}[{}]: {}", self.severity, self.category, self.message)
        } else {
            write!(
                f,
                "{}[{}] {}: {}",
                self.severity, self.category, self.path, self.message
            )
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
    pub config_path: Option<PathBuf>,
}

impl ValidationResult {
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }
}

// ── Schema tree ─────────────────────────────────────────────────────────────

/// Expected shape of the config tree.
enum KnownKeys {
    Struct(HashMap<&'static str, KnownKeys>),
    /// Free-form keys, all with the same value shape.
    Map(Box<KnownKeys>),
    /// Keys drawn from a closed set, all with the same value shape.
    Keyed {
        keys: Vec<&'static str>,
        value: Box<KnownKeys>,
    },
    Leaf,
}

fn build_schema_map() -> KnownKeys {
    use KnownKeys::{Keyed, Leaf, Map, Struct};

    let admission = || {
        Struct(HashMap::from([
            ("capacity", Leaf),
            ("refill_rate_per_second", Leaf),
            ("max_queue_depth", Leaf),
            ("base_backoff_ms", Leaf),
            ("max_backoff_ms", Leaf),
            ("monitoring_window_seconds", Leaf),
        ]))
    };

    let policy = Struct(HashMap::from([
        ("retryable", Leaf),
        ("max_retries", Leaf),
        ("strategy", Leaf),
        ("multiplier", Leaf),
        ("degradation_note", Leaf),
    ]));

    Struct(HashMap::from([
        ("admission", admission()),
        ("channels", Map(Box::new(admission()))),
        (
            "streaming",
            Struct(HashMap::from([
                ("min_update_interval_ms", Leaf),
                ("max_message_length", Leaf),
                ("min_initial_chars", Leaf),
                ("truncation_marker", Leaf),
                ("update_priority", Leaf),
                ("final_priority", Leaf),
            ])),
        ),
        (
            "sessions",
            Struct(HashMap::from([
                ("max_session_age_ms", Leaf),
                ("max_inactivity_ms", Leaf),
                ("max_sessions_per_owner", Leaf),
            ])),
        ),
        (
            "recovery",
            Struct(HashMap::from([(
                "policies",
                Keyed {
                    keys: ErrorClass::ALL.iter().map(|c| c.as_str()).collect(),
                    value: Box::new(policy),
                },
            )])),
        ),
    ]))
}

/// Spellings accepted through `#[serde(alias)]` on the config structs,
/// paired with the field they fill.
const FIELD_ALIASES: &[(&str, &str)] = &[
    ("admissionCapacity", "capacity"),
    ("refillRatePerSecond", "refill_rate_per_second"),
    ("maxQueueDepth", "max_queue_depth"),
    ("baseBackoffMs", "base_backoff_ms"),
    ("maxBackoffMs", "max_backoff_ms"),
    ("monitoringWindowSeconds", "monitoring_window_seconds"),
    ("minUpdateIntervalMs", "min_update_interval_ms"),
    ("maxMessageLength", "max_message_length"),
    ("minInitialChars", "min_initial_chars"),
    ("maxSessionAgeMs", "max_session_age_ms"),
    ("maxInactivityMs", "max_inactivity_ms"),
    ("maxSessionsPerOwner", "max_sessions_per_owner"),
];

fn canonical_key(key: &str) -> &str {
    FIELD_ALIASES
        .iter()
        .find(|(alias, _)| *alias == key)
        .map_or(key, |(_, field)| field)
}

// ── Levenshtein distance ────────────────────────────────────────────────────

fn levenshtein(a: &str, b: &str) -> usize {
    let b_len = b.chars().count();
    let mut prev: Vec<usize> = (0..=b_len).collect();
    let mut curr = vec![0; b_len + 1];

    for (i, ca) in a.chars().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.chars().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b_len]
}

/// Closest candidate within `max_distance` edits, if any.
fn suggest<'a>(needle: &str, candidates: &[&'a str], max_distance: usize) -> Option<&'a str> {
    candidates
        .iter()
        .map(|&c| (c, levenshtein(needle, c)))
        .filter(|&(_, d)| d > 0 && d <= max_distance)
        .min_by_key(|&(_, d)| d)
        .map(|(c, _)| c)
}

fn unknown_key(key: &str, path: String, known: &[&str], what: &str) -> Diagnostic {
    let message = match suggest(key, known, 3) {
        Some(s) => format!("unknown {what} (did you mean \"{s}\"?)"),
        None => format!("unknown {what}"),
    };
    Diagnostic::new(Severity::Error, "unknown-field", path, message)
}

// ── Core validation ─────────────────────────────────────────────────────────

/// Validate the config file at `path`, or the discovered one when `None`.
#[must_use]
pub fn validate(path: Option<&Path>) -> ValidationResult {
    let Some(path) = path
        .map(Path::to_path_buf)
        .or_else(crate::loader::find_config_file)
    else {
        return ValidationResult {
            diagnostics: vec![Diagnostic::new(
                Severity::Info,
                "file",
                "",
                "no config file found; using defaults",
            )],
            config_path: None,
        };
    };

    let mut result = match std::fs::read_to_string(&path) {
        Ok(raw) => validate_str(&raw, format_of(&path)),
        Err(e) => ValidationResult {
            diagnostics: vec![Diagnostic::new(
                Severity::Error,
                "file",
                "",
                format!("failed to read {}: {e}", path.display()),
            )],
            config_path: None,
        },
    };
    result.config_path = Some(path);
    result
}

/// Validate raw config text. `${VAR}` placeholders are substituted first;
/// any left unresolved are reported.
#[must_use]
pub fn validate_str(raw: &str, format: Format) -> ValidationResult {
    let mut diagnostics = Vec::new();
    let substituted = crate::env_subst::substitute_env(raw);
    check_unresolved_env(&substituted, &mut diagnostics);

    let value = match parse_value(&substituted, format) {
        Ok(v) => v,
        Err(e) => {
            diagnostics.push(Diagnostic::new(
                Severity::Error,
                "syntax",
                "",
                format!("{format:?} syntax error: {e}"),
            ));
            return ValidationResult {
                diagnostics,
                config_path: None,
            };
        },
    };

    check_unknown_fields(&value, &build_schema_map(), "", &mut diagnostics);

    match serde_json::from_value::<FerryConfig>(value) {
        Ok(config) => check_values(&config, &mut diagnostics),
        Err(e) => diagnostics.push(Diagnostic::new(
            Severity::Error,
            "type-error",
            "",
            format!("type error: {e}"),
        )),
    }

    ValidationResult {
        diagnostics,
        config_path: None,
    }
}

fn check_unresolved_env(text: &str, diagnostics: &mut Vec<Diagnostic>) {
    let mut rest = text;
    while let Some(start) = rest.find("${") {
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            break;
        };
        diagnostics.push(Diagnostic::new(
            Severity::Warning,
            "env",
            "",
            format!("environment variable {} is not set", &after[..end]),
        ));
        rest = &after[end + 1..];
    }
}

fn join(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_owned()
    } else {
        format!("{prefix}.{key}")
    }
}

fn check_unknown_fields(
    value: &Value,
    schema: &KnownKeys,
    prefix: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    let Value::Object(table) = value else {
        // Scalars, and shape mismatches caught by the type check.
        return;
    };
    match schema {
        KnownKeys::Struct(fields) => {
            let known: Vec<&str> = fields.keys().copied().collect();
            for (key, child) in table {
                let path = join(prefix, key);
                match fields.get(canonical_key(key)) {
                    Some(child_schema) => {
                        check_unknown_fields(child, child_schema, &path, diagnostics);
                    },
                    None => {
                        let what = if prefix.is_empty() {
                            "section"
                        } else {
                            "field"
                        };
                        diagnostics.push(unknown_key(key, path, &known, what));
                    },
                }
            }
        },
        KnownKeys::Map(value_schema) => {
            for (key, child) in table {
                check_unknown_fields(child, value_schema, &join(prefix, key), diagnostics);
            }
        },
        KnownKeys::Keyed { keys, value } => {
            for (key, child) in table {
                let path = join(prefix, key);
                if keys.contains(&key.as_str()) {
                    check_unknown_fields(child, value, &path, diagnostics);
                } else {
                    diagnostics.push(unknown_key(key, path, keys, "error class"));
                }
            }
        },
        KnownKeys::Leaf => {},
    }
}

fn check_values(config: &FerryConfig, diagnostics: &mut Vec<Diagnostic>) {
    check_admission(&config.admission, "admission", diagnostics);
    let mut channels: Vec<_> = config.channels.iter().collect();
    channels.sort_by(|a, b| a.0.cmp(b.0));
    for (name, admission) in channels {
        check_admission(admission, &format!("channels.{name}"), diagnostics);
    }

    let streaming = &config.streaming;
    if streaming.max_message_length == 0 {
        diagnostics.push(Diagnostic::new(
            Severity::Error,
            "value",
            "streaming.max_message_length",
            "must be at least 1",
        ));
    } else if streaming.max_message_length < MIN_SENSIBLE_MESSAGE_LENGTH {
        diagnostics.push(Diagnostic::new(
            Severity::Warning,
            "value",
            "streaming.max_message_length",
            format!(
                "{} bytes is very small; messages will be mostly truncation marker",
                streaming.max_message_length
            ),
        ));
    }
    if streaming.max_message_length > 0
        && streaming.truncation_marker.len() >= streaming.max_message_length
    {
        diagnostics.push(Diagnostic::new(
            Severity::Warning,
            "value",
            "streaming.truncation_marker",
            "marker does not fit in max_message_length and will be dropped",
        ));
    }
    if streaming.update_priority > streaming.final_priority {
        diagnostics.push(Diagnostic::new(
            Severity::Warning,
            "value",
            "streaming.final_priority",
            format!(
                "final updates ({}) rank below intermediate updates ({})",
                streaming.final_priority.as_str(),
                streaming.update_priority.as_str()
            ),
        ));
    }

    let sessions = &config.sessions;
    if sessions.max_session_age_ms == 0 {
        diagnostics.push(Diagnostic::new(
            Severity::Error,
            "value",
            "sessions.max_session_age_ms",
            "must be greater than 0",
        ));
    }
    if sessions.max_inactivity_ms > sessions.max_session_age_ms {
        diagnostics.push(Diagnostic::new(
            Severity::Warning,
            "value",
            "sessions.max_inactivity_ms",
            "exceeds max_session_age_ms and will never apply",
        ));
    }
    if sessions.max_sessions_per_owner == 0 {
        diagnostics.push(Diagnostic::new(
            Severity::Info,
            "value",
            "sessions.max_sessions_per_owner",
            "0 means no per-owner limit",
        ));
    }

    let mut policies: Vec<_> = config.recovery.policies.iter().collect();
    policies.sort_by_key(|(class, _)| class.as_str());
    for (class, policy) in policies {
        let path = format!("recovery.policies.{}", class.as_str());
        if let Some(multiplier) = policy.multiplier
            && !(multiplier.is_finite() && multiplier >= 1.0)
        {
            diagnostics.push(Diagnostic::new(
                Severity::Warning,
                "value",
                format!("{path}.multiplier"),
                "below 1.0, retries would get faster instead of slower",
            ));
        }
        if policy.strategy == Some(RecoveryStrategy::Retry)
            && (policy.retryable == Some(false) || policy.max_retries == Some(0))
        {
            diagnostics.push(Diagnostic::new(
                Severity::Warning,
                "value",
                format!("{path}.strategy"),
                "retry strategy without a retry budget never retries",
            ));
        }
    }
}

fn check_admission(cfg: &RateLimitConfig, prefix: &str, diagnostics: &mut Vec<Diagnostic>) {
    let mut error = |field: &str, message: &str| {
        diagnostics.push(Diagnostic::new(
            Severity::Error,
            "value",
            format!("{prefix}.{field}"),
            message,
        ));
    };
    if cfg.capacity == 0 {
        error("capacity", "must be at least 1");
    }
    if !(cfg.refill_rate_per_second.is_finite() && cfg.refill_rate_per_second > 0.0) {
        error("refill_rate_per_second", "must be a positive number");
    }
    if cfg.max_queue_depth == 0 {
        error("max_queue_depth", "must be at least 1");
    }
    if cfg.monitoring_window_seconds == 0 {
        error("monitoring_window_seconds", "must be at least 1");
    }
    if cfg.base_backoff_ms > cfg.max_backoff_ms {
        error("base_backoff_ms", "must not exceed max_backoff_ms");
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn toml(raw: &str) -> ValidationResult {
        validate_str(raw, Format::Toml)
    }

    fn find<'a>(result: &'a ValidationResult, path: &str) -> Option<&'a Diagnostic> {
        result.diagnostics.iter().find(|d| d.path == path)
    }

    #[test]
    fn levenshtein_basics() {
        assert_eq!(levenshtein("capacity", "capacity"), 0);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("abc", ""), 3);
        assert_eq!(levenshtein("capcity", "capacity"), 1);
        assert_eq!(levenshtein("strem", "stream"), 1);
    }

    #[test]
    fn suggest_picks_closest() {
        let candidates = ["streaming", "sessions", "recovery"];
        assert_eq!(suggest("streamng", &candidates, 3), Some("streaming"));
        assert_eq!(suggest("zzzzzzzz", &candidates, 3), None);
    }

    #[test]
    fn empty_config_is_valid() {
        let result = toml("");
        assert!(result.diagnostics.is_empty(), "{:?}", result.diagnostics);
    }

    #[test]
    fn default_config_is_valid() {
        let raw = toml::to_string_pretty(&FerryConfig::default()).unwrap();
        let result = toml(&raw);
        assert!(!result.has_errors(), "{:?}", result.diagnostics);
        assert_eq!(result.count(Severity::Warning), 0);
    }

    #[test]
    fn syntax_error_stops_early() {
        let result = toml("[admission\ncapacity = 1");
        assert_eq!(result.diagnostics.len(), 1);
        assert_eq!(result.diagnostics[0].category, "syntax");
    }

    #[test]
    fn unknown_section_with_suggestion() {
        let result = toml("[streamng]\nmin_update_interval_ms = 5\n");
        let d = find(&result, "streamng").unwrap();
        assert_eq!(d.category, "unknown-field");
        assert!(d.message.contains("streaming"), "{}", d.message);
    }

    #[test]
    fn unknown_nested_field_with_suggestion() {
        let result = toml("[admission]\ncapcity = 5\n");
        let d = find(&result, "admission.capcity").unwrap();
        assert!(d.message.contains("capacity"));
    }

    #[test]
    fn camel_case_aliases_are_known() {
        let result = toml("[admission]\nrefillRatePerSecond = 2.0\n");
        assert!(result.diagnostics.is_empty(), "{:?}", result.diagnostics);
    }

    #[test]
    fn documented_option_names_validate_and_load() {
        let raw = "\
[admission]
admissionCapacity = 5
refillRatePerSecond = 2.0
maxQueueDepth = 10
baseBackoffMs = 100
maxBackoffMs = 2000
monitoringWindowSeconds = 30

[streaming]
minUpdateIntervalMs = 250
maxMessageLength = 1000
minInitialChars = 4

[sessions]
maxSessionAgeMs = 60000
maxInactivityMs = 5000
maxSessionsPerOwner = 2
";
        let result = toml(raw);
        assert!(result.diagnostics.is_empty(), "{:?}", result.diagnostics);

        let config: FerryConfig = ::toml::from_str(raw).unwrap();
        assert_eq!(config.admission.capacity, 5);
        assert_eq!(config.admission.monitoring_window_seconds, 30);
        assert_eq!(config.streaming.min_initial_chars, 4);
        assert_eq!(config.sessions.max_sessions_per_owner, 2);
    }

    #[test]
    fn camel_case_without_an_alias_is_unknown() {
        // serde would silently ignore this key, so it must be reported.
        let result = toml("[streaming]\ntruncationMarker = \"...\"\n");
        let d = find(&result, "streaming.truncationMarker").unwrap();
        assert_eq!(d.category, "unknown-field");
    }

    #[test]
    fn aliases_do_not_leak_across_sections() {
        let result = toml("[admission]\nminUpdateIntervalMs = 5\n");
        assert!(find(&result, "admission.minUpdateIntervalMs").is_some());
    }

    #[test]
    fn channel_entries_are_checked() {
        let result = toml("[channels.slack]\ncapacity = 0\nmax_queue = 3\n");
        assert!(find(&result, "channels.slack.max_queue").is_some());
        let d = find(&result, "channels.slack.capacity").unwrap();
        assert_eq!(d.severity, Severity::Error);
    }

    #[test]
    fn unknown_error_class_is_flagged() {
        let result = toml("[recovery.policies.rate-limitd]\nmax_retries = 1\n");
        let d = find(&result, "recovery.policies.rate-limitd").unwrap();
        assert!(d.message.contains("rate-limited"), "{}", d.message);
    }

    #[test]
    fn zero_capacity_is_an_error() {
        let result = toml("[admission]\ncapacity = 0\n");
        assert!(result.has_errors());
        assert_eq!(
            find(&result, "admission.capacity").unwrap().category,
            "value"
        );
    }

    #[test]
    fn inverted_backoff_is_an_error() {
        let result = toml("[admission]\nbase_backoff_ms = 5000\nmax_backoff_ms = 100\n");
        let d = find(&result, "admission.base_backoff_ms").unwrap();
        assert_eq!(d.severity, Severity::Error);
    }

    #[test]
    fn tiny_message_length_is_a_warning() {
        let result = toml("[streaming]\nmax_message_length = 20\n");
        let d = find(&result, "streaming.max_message_length").unwrap();
        assert_eq!(d.severity, Severity::Warning);
        // The 17-byte default marker still fits.
        assert!(find(&result, "streaming.truncation_marker").is_none());
        assert!(!result.has_errors());
    }

    #[test]
    fn marker_longer_than_the_limit_is_a_warning() {
        let result = toml("[streaming]\nmax_message_length = 10\n");
        let d = find(&result, "streaming.truncation_marker").unwrap();
        assert_eq!(d.severity, Severity::Warning);
        assert!(!result.has_errors());
    }

    #[test]
    fn type_errors_are_reported() {
        let result = toml("[admission]\ncapacity = \"lots\"\n");
        assert!(
            result
                .diagnostics
                .iter()
                .any(|d| d.category == "type-error")
        );
    }

    #[test]
    fn pointless_retry_override_is_a_warning() {
        let result = toml(
            "[recovery.policies.server]\nstrategy = \"retry\"\nmax_retries = 0\nmultiplier = 0.5\n",
        );
        assert!(find(&result, "recovery.policies.server.strategy").is_some());
        assert!(find(&result, "recovery.policies.server.multiplier").is_some());
    }

    #[test]
    fn unresolved_env_is_reported() {
        let result = toml("[streaming]\ntruncation_marker = \"${FERRY_VALIDATE_TEST_UNSET}\"\n");
        let d = result
            .diagnostics
            .iter()
            .find(|d| d.category == "env")
            .unwrap();
        assert!(d.message.contains("FERRY_VALIDATE_TEST_UNSET"));
    }

    #[test]
    fn yaml_and_json_are_validated_too() {
        let yaml = validate_str("admission:\n  capacity: 0\n", Format::Yaml);
        assert!(yaml.has_errors());
        let json = validate_str(r#"{"sessions": {"max_sesions_per_owner": 2}}"#, Format::Json);
        assert!(find(&json, "sessions.max_sesions_per_owner").is_some());
    }

    #[test]
    fn validate_reads_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ferry.toml");
        std::fs::write(&path, "[admission]\ncapacity = 0\n").unwrap();
        let result = validate(Some(&path));
        assert_eq!(result.config_path.as_deref(), Some(path.as_path()));
        assert!(result.has_errors());
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = validate(Some(&dir.path().join("ferry.toml")));
        assert!(result.has_errors());
        assert_eq!(result.diagnostics[0].category, "file");
    }

    /// Every key the default config serializes must be known to the schema map.
    #[test]
    fn schema_drift_guard() {
        let value = serde_json::to_value(FerryConfig::default()).unwrap();
        let mut diagnostics = Vec::new();
        check_unknown_fields(&value, &build_schema_map(), "", &mut diagnostics);
        assert!(diagnostics.is_empty(), "{diagnostics:?}");
    }
}
