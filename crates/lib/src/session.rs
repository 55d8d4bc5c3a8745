//! Per-sender session tracking, inbound dedup, and cursor bookkeeping.
//!
//! The runner only reads and writes the active session through [`SessionStore`];
//! dedup and cursor operations are for transport ingestion loops, which may call
//! the store concurrently with the dispatch loop.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("session store: {0}")]
    Backend(String),
}

/// The sender's active session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: String,
    pub updated_at: DateTime<Utc>,
}

/// One action invocation, recorded for operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub action: String,
    pub sender: String,
    /// "ok", "error: ...", or "timeout".
    pub outcome: String,
    pub duration: Duration,
}

/// Session store contract. Implementations must be safe for concurrent use.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn active(&self, sender: &str) -> Result<Option<SessionState>, StoreError>;
    async fn save_active(&self, sender: &str, session_id: &str) -> Result<(), StoreError>;
    async fn clear_active(&self, sender: &str) -> Result<(), StoreError>;

    /// Timestamp of the newest event seen from `sender`, if any.
    async fn last_cursor(&self, sender: &str) -> Result<Option<DateTime<Utc>>, StoreError>;
    async fn save_cursor(&self, sender: &str, ts: DateTime<Utc>) -> Result<(), StoreError>;

    async fn already_processed(&self, event_id: &str) -> Result<bool, StoreError>;
    async fn mark_processed(&self, event_id: &str) -> Result<(), StoreError>;

    /// True if the same text from the same sender was seen within `window`. Records this sighting.
    async fn recent_message_seen(
        &self,
        sender: &str,
        message: &str,
        window: Duration,
    ) -> Result<bool, StoreError>;

    /// Record an action invocation. Stores without an audit log ignore it.
    async fn append_audit(&self, _entry: AuditEntry) -> Result<(), StoreError> {
        Ok(())
    }
}

#[derive(Default)]
struct Inner {
    active: HashMap<String, SessionState>,
    cursors: HashMap<String, DateTime<Utc>>,
    processed: HashSet<String>,
    recent: HashMap<(String, String), DateTime<Utc>>,
    audit: Vec<AuditEntry>,
}

/// In-memory store. Nothing survives a restart.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Audit entries in the order they were appended.
    pub async fn audit_entries(&self) -> Vec<AuditEntry> {
        self.inner.read().await.audit.clone()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn active(&self, sender: &str) -> Result<Option<SessionState>, StoreError> {
        Ok(self.inner.read().await.active.get(sender).cloned())
    }

    async fn save_active(&self, sender: &str, session_id: &str) -> Result<(), StoreError> {
        let state = SessionState {
            session_id: session_id.to_string(),
            updated_at: Utc::now(),
        };
        self.inner
            .write()
            .await
            .active
            .insert(sender.to_string(), state);
        Ok(())
    }

    async fn clear_active(&self, sender: &str) -> Result<(), StoreError> {
        self.inner.write().await.active.remove(sender);
        Ok(())
    }

    async fn last_cursor(&self, sender: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
        Ok(self.inner.read().await.cursors.get(sender).copied())
    }

    async fn save_cursor(&self, sender: &str, ts: DateTime<Utc>) -> Result<(), StoreError> {
        let mut g = self.inner.write().await;
        let cursor = g.cursors.entry(sender.to_string()).or_insert(ts);
        // never move backwards
        if ts > *cursor {
            *cursor = ts;
        }
        Ok(())
    }

    async fn already_processed(&self, event_id: &str) -> Result<bool, StoreError> {
        Ok(self.inner.read().await.processed.contains(event_id))
    }

    async fn mark_processed(&self, event_id: &str) -> Result<(), StoreError> {
        self.inner
            .write()
            .await
            .processed
            .insert(event_id.to_string());
        Ok(())
    }

    async fn recent_message_seen(
        &self,
        sender: &str,
        message: &str,
        window: Duration,
    ) -> Result<bool, StoreError> {
        let now = Utc::now();
        let window = chrono::Duration::from_std(window)
            .map_err(|e| StoreError::Backend(format!("invalid window: {}", e)))?;
        let mut g = self.inner.write().await;
        g.recent
            .retain(|_, last| now.signed_duration_since(*last) <= window);
        let key = (sender.to_string(), message.to_string());
        let seen = g
            .recent
            .get(&key)
            .map(|last| now.signed_duration_since(*last) <= window)
            .unwrap_or(false);
        g.recent.insert(key, now);
        Ok(seen)
    }

    async fn append_audit(&self, entry: AuditEntry) -> Result<(), StoreError> {
        self.inner.write().await.audit.push(entry);
        Ok(())
    }
}
