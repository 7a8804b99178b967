//! Session state - shared key/value state for one session
//!
//! Agents communicate indirectly by writing values under string keys.
//! Writes are last-writer-wins per key; every write is also appended to a
//! per-key history for audit. Each mutation is a single atomic key write,
//! so concurrent writers need no coordination beyond the store's own lock.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// One committed write to a state key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateWrite {
    /// The written value
    pub value: serde_json::Value,
    /// Agent that performed the write
    pub writer: String,
    /// When the write was committed
    pub timestamp: DateTime<Utc>,
}

#[derive(Default)]
struct StateInner {
    entries: HashMap<String, StateWrite>,
    history: HashMap<String, Vec<StateWrite>>,
}

/// Key/value state for a single session.
///
/// Shared by reference across every agent participating in the session;
/// reads observe the most recently committed write at the time of the read.
pub struct SessionState {
    session_id: String,
    inner: RwLock<StateInner>,
}

impl SessionState {
    /// Create empty state for a session
    #[must_use]
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            inner: RwLock::new(StateInner::default()),
        }
    }

    /// The owning session id
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Latest committed value for a key
    pub async fn get(&self, key: &str) -> Option<serde_json::Value> {
        let inner = self.inner.read().await;
        inner.entries.get(key).map(|w| w.value.clone())
    }

    /// Agent that last wrote a key
    pub async fn last_writer(&self, key: &str) -> Option<String> {
        let inner = self.inner.read().await;
        inner.entries.get(key).map(|w| w.writer.clone())
    }

    /// Write a key. Always succeeds and overwrites; last writer wins.
    pub async fn set(&self, key: &str, value: serde_json::Value, writer: &str) {
        let write = StateWrite {
            value,
            writer: writer.to_string(),
            timestamp: Utc::now(),
        };
        let mut inner = self.inner.write().await;
        inner
            .history
            .entry(key.to_string())
            .or_default()
            .push(write.clone());
        inner.entries.insert(key.to_string(), write);
        debug!(session_id = %self.session_id, key, writer, "State written");
    }

    /// Full write history for a key, oldest first
    pub async fn history(&self, key: &str) -> Vec<StateWrite> {
        let inner = self.inner.read().await;
        inner.history.get(key).cloned().unwrap_or_default()
    }

    /// Point-in-time copy of all latest values.
    ///
    /// Not a consistent snapshot across concurrent writers; each key holds
    /// its latest committed write at the moment the lock was taken.
    pub async fn snapshot(&self) -> HashMap<String, serde_json::Value> {
        let inner = self.inner.read().await;
        inner
            .entries
            .iter()
            .map(|(k, w)| (k.clone(), w.value.clone()))
            .collect()
    }

    /// Number of distinct keys
    pub async fn len(&self) -> usize {
        let inner = self.inner.read().await;
        inner.entries.len()
    }

    /// Whether no keys have been written
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Shared registry of per-session state, created on first use.
#[derive(Default)]
pub struct SessionStore {
    sessions: DashMap<String, Arc<SessionState>>,
}

impl SessionStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the state for a session
    #[must_use]
    pub fn session(&self, session_id: &str) -> Arc<SessionState> {
        self.sessions
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(SessionState::new(session_id)))
            .value()
            .clone()
    }

    /// Get the state for a session if it exists
    #[must_use]
    pub fn get(&self, session_id: &str) -> Option<Arc<SessionState>> {
        self.sessions.get(session_id).map(|s| Arc::clone(s.value()))
    }

    /// Drop a session's state. Returns whether it existed.
    pub fn remove(&self, session_id: &str) -> bool {
        self.sessions.remove(session_id).is_some()
    }

    /// Number of live sessions
    #[must_use]
    pub fn count(&self) -> usize {
        self.sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_last_writer_wins() {
        let state = SessionState::new("s1");
        state.set("k", json!("v1"), "agent_a").await;
        state.set("k", json!("v2"), "agent_b").await;

        assert_eq!(state.get("k").await, Some(json!("v2")));
        assert_eq!(state.last_writer("k").await.as_deref(), Some("agent_b"));

        let history = state.history("k").await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].value, json!("v1"));
        assert_eq!(history[0].writer, "agent_a");
        assert_eq!(history[1].value, json!("v2"));
        assert_eq!(history[1].writer, "agent_b");
    }

    #[tokio::test]
    async fn test_missing_key() {
        let state = SessionState::new("s1");
        assert_eq!(state.get("nope").await, None);
        assert!(state.history("nope").await.is_empty());
        assert!(state.is_empty().await);
    }

    #[tokio::test]
    async fn test_snapshot_holds_latest() {
        let state = SessionState::new("s1");
        state.set("a", json!(1), "w").await;
        state.set("b", json!(2), "w").await;
        state.set("a", json!(3), "w").await;

        let snap = state.snapshot().await;
        assert_eq!(snap.len(), 2);
        assert_eq!(snap["a"], json!(3));
        assert_eq!(snap["b"], json!(2));
    }

    #[tokio::test]
    async fn test_concurrent_writers() {
        let state = Arc::new(SessionState::new("s1"));
        let mut handles = Vec::new();
        for i in 0..8 {
            let state = Arc::clone(&state);
            handles.push(tokio::spawn(async move {
                state.set("k", json!(i), &format!("agent_{i}")).await;
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        // every write is in the history; the entry holds one of them
        assert_eq!(state.history("k").await.len(), 8);
        assert!(state.get("k").await.is_some());
    }

    #[tokio::test]
    async fn test_store_get_or_create() {
        let store = SessionStore::new();
        let a = store.session("s1");
        let b = store.session("s1");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(store.count(), 1);

        assert!(store.remove("s1"));
        assert!(!store.remove("s1"));
        assert!(store.get("s1").is_none());
    }
}
