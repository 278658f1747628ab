use std::{
    collections::{BTreeMap, HashMap},
    sync::Mutex,
    time::{SystemTime, UNIX_EPOCH},
};

use {
    ferry_common::{DeliveryTarget, MessageHandle},
    serde::{Deserialize, Serialize},
    serde_json::Value,
    tracing::{debug, info},
};

#[cfg(feature = "metrics")]
use ferry_metrics::{counter, gauge, labels, session as session_metrics};

use crate::{
    config::SessionLimits,
    error::{Error, Result},
    session::{MessageVersion, Session, SessionSnapshot, SessionStatus, StreamingContext},
};

/// Current Unix time in milliseconds.
#[must_use]
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[derive(Debug)]
struct Entry {
    session: Session,
    context: StreamingContext,
}

/// Session counts by status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStats {
    pub total: usize,
    pub by_status: BTreeMap<SessionStatus, usize>,
    pub owners: usize,
}

/// In-memory owner of sessions and their streaming contexts.
///
/// Construct one and share it; there is no process-wide instance. All
/// timestamps are Unix milliseconds, and every time-dependent operation has an
/// `_at` form taking `now` explicitly.
#[derive(Debug)]
pub struct SessionStore {
    limits: SessionLimits,
    entries: Mutex<HashMap<String, Entry>>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(SessionLimits::default())
    }
}

/// Why a session left the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EvictReason {
    OwnerLimit,
    Age,
    Inactivity,
    Finished,
    Explicit,
}

impl EvictReason {
    fn as_str(self) -> &'static str {
        match self {
            Self::OwnerLimit => "owner_limit",
            Self::Age => "age",
            Self::Inactivity => "inactivity",
            Self::Finished => "finished",
            Self::Explicit => "explicit",
        }
    }
}

impl SessionStore {
    #[must_use]
    pub fn new(limits: SessionLimits) -> Self {
        Self {
            limits,
            entries: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn limits(&self) -> &SessionLimits {
        &self.limits
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn with_entry<T>(&self, id: &str, f: impl FnOnce(&mut Entry) -> Result<T>) -> Result<T> {
        let mut entries = self.lock();
        let entry = entries.get_mut(id).ok_or_else(|| Error::not_found(id))?;
        f(entry)
    }

    pub fn create_session(
        &self,
        target: DeliveryTarget,
        owner: impl Into<String>,
        metadata: HashMap<String, Value>,
    ) -> Session {
        self.create_session_at(target, owner, metadata, now_ms())
    }

    /// Register a new session in `initializing` state. If the owner is already
    /// at the per-owner limit, their oldest sessions are evicted first.
    pub fn create_session_at(
        &self,
        target: DeliveryTarget,
        owner: impl Into<String>,
        metadata: HashMap<String, Value>,
        now: u64,
    ) -> Session {
        let owner = owner.into();
        let session = Session {
            id: uuid::Uuid::new_v4().to_string(),
            target,
            owner: owner.clone(),
            created_at: now,
            last_activity: now,
            status: SessionStatus::Initializing,
            handle: None,
            metadata,
        };

        let mut entries = self.lock();
        let cap = self.limits.max_sessions_per_owner;
        if cap > 0 {
            let mut owned: Vec<(u64, String)> = entries
                .values()
                .filter(|e| e.session.owner == owner)
                .map(|e| (e.session.created_at, e.session.id.clone()))
                .collect();
            if owned.len() >= cap {
                owned.sort();
                let excess = owned.len() + 1 - cap;
                for (_, id) in owned.into_iter().take(excess) {
                    entries.remove(&id);
                    self.note_eviction(&id, EvictReason::OwnerLimit);
                }
            }
        }

        entries.insert(session.id.clone(), Entry {
            session: session.clone(),
            context: StreamingContext::default(),
        });
        self.publish_active(entries.len());
        drop(entries);

        info!(
            session_id = %session.id,
            chat = %session.target,
            owner = %session.owner,
            "session created"
        );
        #[cfg(feature = "metrics")]
        counter!(session_metrics::CREATED_TOTAL, labels::CHANNEL => session.target.channel.clone())
            .increment(1);
        session
    }

    #[must_use]
    pub fn get_session(&self, id: &str) -> Option<Session> {
        self.lock().get(id).map(|e| e.session.clone())
    }

    #[must_use]
    pub fn get_context(&self, id: &str) -> Option<StreamingContext> {
        self.lock().get(id).map(|e| e.context.clone())
    }

    #[must_use]
    pub fn snapshot(&self, id: &str) -> Option<SessionSnapshot> {
        self.lock().get(id).map(|e| SessionSnapshot {
            session: e.session.clone(),
            context: e.context.clone(),
        })
    }

    /// Sessions belonging to `owner`, oldest first.
    #[must_use]
    pub fn sessions_for_owner(&self, owner: &str) -> Vec<Session> {
        let mut sessions: Vec<Session> = self
            .lock()
            .values()
            .filter(|e| e.session.owner == owner)
            .map(|e| e.session.clone())
            .collect();
        sessions.sort_by_key(|s| s.created_at);
        sessions
    }

    pub fn update_status(&self, id: &str, status: SessionStatus) -> Result<()> {
        self.update_status_at(id, status, now_ms())
    }

    /// Move a session to `status`. Setting the current status again is a no-op.
    pub fn update_status_at(&self, id: &str, status: SessionStatus, now: u64) -> Result<()> {
        self.with_entry(id, |entry| {
            let from = entry.session.status;
            if from == status {
                return Ok(());
            }
            if !from.can_transition_to(status) {
                return Err(Error::invalid_transition(from, status));
            }
            entry.session.status = status;
            entry.session.last_activity = now;
            debug!(session_id = id, from = %from, to = %status, "session status changed");
            Ok(())
        })
    }

    pub fn touch(&self, id: &str) -> Result<()> {
        self.touch_at(id, now_ms())
    }

    pub fn touch_at(&self, id: &str, now: u64) -> Result<()> {
        self.with_entry(id, |entry| {
            entry.session.last_activity = now;
            Ok(())
        })
    }

    /// Record the remote message the session now updates.
    pub fn set_handle(&self, id: &str, handle: Option<MessageHandle>) -> Result<()> {
        self.with_entry(id, |entry| {
            entry.session.handle = handle;
            Ok(())
        })
    }

    pub fn append_version(
        &self,
        id: &str,
        content: impl Into<String>,
        sent: bool,
        handle: Option<MessageHandle>,
    ) -> Result<MessageVersion> {
        self.append_version_at(id, content, sent, handle, now_ms())
    }

    /// Append the next version (`current_version + 1`) to the session's history.
    pub fn append_version_at(
        &self,
        id: &str,
        content: impl Into<String>,
        sent: bool,
        handle: Option<MessageHandle>,
        now: u64,
    ) -> Result<MessageVersion> {
        let content = content.into();
        self.with_entry(id, |entry| {
            let number = entry.context.current_version + 1;
            let version = MessageVersion::new(number, content, now, sent, handle);
            entry.context.versions.push(version.clone());
            entry.context.current_version = number;
            entry.context.last_checkpoint = now;
            entry.session.last_activity = now;
            Ok(version)
        })
    }

    /// A fragment arrived.
    pub fn record_chunk(&self, id: &str) -> Result<()> {
        let now = now_ms();
        self.with_entry(id, |entry| {
            entry.context.total_chunks += 1;
            entry.session.last_activity = now;
            Ok(())
        })
    }

    /// `count` buffered fragments reached the remote message.
    pub fn record_processed(&self, id: &str, count: u64) -> Result<()> {
        self.with_entry(id, |entry| {
            let ctx = &mut entry.context;
            ctx.processed_chunks = (ctx.processed_chunks + count).min(ctx.total_chunks);
            Ok(())
        })
    }

    pub fn record_error(&self, id: &str) -> Result<u32> {
        self.with_entry(id, |entry| {
            entry.context.error_count += 1;
            Ok(entry.context.error_count)
        })
    }

    pub fn record_retry(&self, id: &str) -> Result<u32> {
        self.with_entry(id, |entry| {
            entry.context.retry_count += 1;
            Ok(entry.context.retry_count)
        })
    }

    pub fn set_scratch(&self, id: &str, key: impl Into<String>, value: Value) -> Result<()> {
        self.with_entry(id, |entry| {
            entry.context.scratch.insert(key.into(), value);
            Ok(())
        })
    }

    #[must_use]
    pub fn scratch(&self, id: &str, key: &str) -> Option<Value> {
        self.lock()
            .get(id)
            .and_then(|e| e.context.scratch.get(key).cloned())
    }

    /// Remove a session. Returns whether it existed.
    pub fn evict(&self, id: &str) -> bool {
        let mut entries = self.lock();
        let removed = entries.remove(id).is_some();
        if removed {
            self.note_eviction(id, EvictReason::Explicit);
            self.publish_active(entries.len());
        }
        removed
    }

    /// Remove sessions that are too old, idle for too long, or finished.
    /// Returns how many were removed.
    pub fn sweep(&self, now: u64) -> usize {
        let limits = &self.limits;
        let mut entries = self.lock();
        let expired: Vec<(String, EvictReason)> = entries
            .values()
            .filter_map(|e| {
                let s = &e.session;
                let reason = if s.status.is_terminal() {
                    EvictReason::Finished
                } else if now.saturating_sub(s.created_at) > limits.max_session_age_ms {
                    EvictReason::Age
                } else if now.saturating_sub(s.last_activity) > limits.max_inactivity_ms {
                    EvictReason::Inactivity
                } else {
                    return None;
                };
                Some((s.id.clone(), reason))
            })
            .collect();

        for (id, reason) in &expired {
            entries.remove(id);
            self.note_eviction(id, *reason);
        }
        if !expired.is_empty() {
            self.publish_active(entries.len());
            info!(
                evicted = expired.len(),
                remaining = entries.len(),
                "session sweep"
            );
        }
        expired.len()
    }

    #[must_use]
    pub fn stats(&self) -> SessionStats {
        let entries = self.lock();
        let mut stats = SessionStats {
            total: entries.len(),
            ..Default::default()
        };
        let mut owners: Vec<&str> = Vec::new();
        for entry in entries.values() {
            *stats.by_status.entry(entry.session.status).or_default() += 1;
            if !owners.contains(&entry.session.owner.as_str()) {
                owners.push(&entry.session.owner);
            }
        }
        stats.owners = owners.len();
        stats
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn note_eviction(&self, id: &str, reason: EvictReason) {
        debug!(session_id = id, reason = reason.as_str(), "session evicted");
        #[cfg(feature = "metrics")]
        counter!(session_metrics::EVICTED_TOTAL, labels::REASON => reason.as_str()).increment(1);
    }

    fn publish_active(&self, _count: usize) {
        #[cfg(feature = "metrics")]
        gauge!(session_metrics::ACTIVE).set(_count as f64);
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    const T: u64 = 1_700_000_000_000;

    fn target() -> DeliveryTarget {
        DeliveryTarget::new("telegram", "42")
    }

    fn store_with(limits: SessionLimits) -> SessionStore {
        SessionStore::new(limits)
    }

    #[test]
    fn create_and_lookup() {
        let store = SessionStore::default();
        let mut meta = HashMap::new();
        meta.insert("model".to_string(), Value::from("gpt"));
        let session = store.create_session_at(target(), "alice", meta, T);

        assert_eq!(session.status, SessionStatus::Initializing);
        assert!(session.handle.is_none());
        let found = store.get_session(&session.id).unwrap();
        assert_eq!(found, session);
        let ctx = store.get_context(&session.id).unwrap();
        assert_eq!(ctx.current_version, 0);
        assert!(ctx.versions.is_empty());
        assert!(store.get_session("nope").is_none());
    }

    #[test]
    fn versions_are_gapless_despite_errors() {
        let store = SessionStore::default();
        let id = store.create_session_at(target(), "alice", HashMap::new(), T).id;

        let mut numbers = Vec::new();
        for i in 0..5 {
            if i % 2 == 1 {
                store.record_error(&id).unwrap();
                store.record_retry(&id).unwrap();
            }
            let v = store
                .append_version_at(&id, format!("text {i}"), i % 2 == 0, None, T + i)
                .unwrap();
            numbers.push(v.version);
        }
        assert_eq!(numbers, vec![1, 2, 3, 4, 5]);

        let ctx = store.get_context(&id).unwrap();
        assert_eq!(ctx.current_version, 5);
        assert_eq!(ctx.error_count, 2);
        assert_eq!(ctx.retry_count, 2);
        assert_eq!(ctx.last_checkpoint, T + 4);
    }

    #[test]
    fn unknown_session_errors() {
        let store = SessionStore::default();
        assert!(matches!(
            store.append_version("missing", "x", true, None),
            Err(Error::NotFound { .. })
        ));
        assert!(matches!(
            store.update_status("missing", SessionStatus::Active),
            Err(Error::NotFound { .. })
        ));
    }

    #[test]
    fn status_transitions_are_validated() {
        let store = SessionStore::default();
        let id = store.create_session_at(target(), "alice", HashMap::new(), T).id;

        store.update_status(&id, SessionStatus::Active).unwrap();
        store.update_status(&id, SessionStatus::Paused).unwrap();
        store.update_status(&id, SessionStatus::Active).unwrap();
        // Same status again is accepted.
        store.update_status(&id, SessionStatus::Active).unwrap();
        assert!(matches!(
            store.update_status(&id, SessionStatus::Completed),
            Err(Error::InvalidTransition {
                from: SessionStatus::Active,
                to: SessionStatus::Completed
            })
        ));
        store.update_status(&id, SessionStatus::Finalizing).unwrap();
        store.update_status(&id, SessionStatus::Completed).unwrap();
        assert!(store.update_status(&id, SessionStatus::Active).is_err());
    }

    #[test]
    fn owner_cap_evicts_oldest() {
        let store = store_with(SessionLimits {
            max_sessions_per_owner: 2,
            ..Default::default()
        });
        let first = store.create_session_at(target(), "alice", HashMap::new(), T).id;
        let second = store
            .create_session_at(target(), "alice", HashMap::new(), T + 1)
            .id;
        let bob = store.create_session_at(target(), "bob", HashMap::new(), T + 2).id;
        let third = store
            .create_session_at(target(), "alice", HashMap::new(), T + 3)
            .id;

        assert!(store.get_session(&first).is_none());
        assert!(store.get_session(&second).is_some());
        assert!(store.get_session(&third).is_some());
        assert!(store.get_session(&bob).is_some());
        let owned: Vec<String> = store
            .sessions_for_owner("alice")
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(owned, vec![second, third]);
    }

    #[test]
    fn inactive_session_is_swept() {
        let store = store_with(SessionLimits {
            max_inactivity_ms: 5_000,
            ..Default::default()
        });
        let id = store.create_session_at(target(), "alice", HashMap::new(), T).id;

        assert_eq!(store.sweep(T + 4_000), 0);
        assert_eq!(store.sweep(T + 6_000), 1);
        assert!(store.get_session(&id).is_none());
        assert!(store.get_context(&id).is_none());
    }

    #[test]
    fn activity_postpones_inactivity_sweep() {
        let store = store_with(SessionLimits {
            max_inactivity_ms: 5_000,
            ..Default::default()
        });
        let id = store.create_session_at(target(), "alice", HashMap::new(), T).id;
        store.touch_at(&id, T + 4_000).unwrap();
        assert_eq!(store.sweep(T + 6_000), 0);
        assert_eq!(store.sweep(T + 9_001), 1);
    }

    #[test]
    fn old_and_finished_sessions_are_swept() {
        let store = store_with(SessionLimits {
            max_session_age_ms: 10_000,
            max_inactivity_ms: 60_000,
            max_sessions_per_owner: 0,
        });
        let old = store.create_session_at(target(), "a", HashMap::new(), T).id;
        let done = store.create_session_at(target(), "b", HashMap::new(), T + 9_000).id;
        let live = store.create_session_at(target(), "c", HashMap::new(), T + 9_000).id;
        store.update_status(&done, SessionStatus::Error).unwrap();
        store.touch_at(&old, T + 10_500).unwrap();

        assert_eq!(store.sweep(T + 11_000), 2);
        assert!(store.get_session(&old).is_none());
        assert!(store.get_session(&done).is_none());
        assert!(store.get_session(&live).is_some());
    }

    #[test]
    fn explicit_eviction() {
        let store = SessionStore::default();
        let id = store.create_session_at(target(), "alice", HashMap::new(), T).id;
        assert!(store.evict(&id));
        assert!(!store.evict(&id));
        assert!(store.is_empty());
    }

    #[test]
    fn scratch_is_per_context() {
        let store = SessionStore::default();
        let a = store.create_session_at(target(), "alice", HashMap::new(), T).id;
        let b = store.create_session_at(target(), "alice", HashMap::new(), T).id;
        store.set_scratch(&a, "tool", Value::from("search")).unwrap();
        assert_eq!(store.scratch(&a, "tool"), Some(Value::from("search")));
        assert_eq!(store.scratch(&b, "tool"), None);
    }

    #[test]
    fn processed_never_exceeds_total() {
        let store = SessionStore::default();
        let id = store.create_session_at(target(), "alice", HashMap::new(), T).id;
        store.record_chunk(&id).unwrap();
        store.record_chunk(&id).unwrap();
        store.record_processed(&id, 5).unwrap();
        let ctx = store.get_context(&id).unwrap();
        assert_eq!(ctx.total_chunks, 2);
        assert_eq!(ctx.processed_chunks, 2);
    }

    #[test]
    fn snapshot_and_stats() {
        let store = SessionStore::default();
        let a = store.create_session_at(target(), "alice", HashMap::new(), T).id;
        let b = store.create_session_at(target(), "bob", HashMap::new(), T).id;
        store.update_status(&a, SessionStatus::Active).unwrap();
        store
            .append_version(&a, "hello", true, Some(MessageHandle::new("m1")))
            .unwrap();
        store.set_handle(&a, Some(MessageHandle::new("m1"))).unwrap();

        let snap = store.snapshot(&a).unwrap();
        assert_eq!(snap.session.handle, Some(MessageHandle::new("m1")));
        assert_eq!(snap.context.versions.len(), 1);
        let json = serde_json::to_value(&snap).unwrap();
        assert_eq!(json["session"]["status"], "active");
        assert_eq!(json["context"]["versions"][0]["content"], "hello");

        let stats = store.stats();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.owners, 2);
        assert_eq!(stats.by_status.get(&SessionStatus::Active), Some(&1));
        assert_eq!(stats.by_status.get(&SessionStatus::Initializing), Some(&1));
        assert!(store.get_session(&b).is_some());
    }
}
