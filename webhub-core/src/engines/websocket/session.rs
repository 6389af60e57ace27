//! WebSocket sessions (§3): a logical grouping that survives reconnection
//! and carries opaque key-value state, keyed by an opaque session id and
//! fetched-or-created on first use.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::RwLock;

fn now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}

/// A single session's mutable state. Access to `data` is serialized under
/// its own lock so one session's updates never contend with another's.
pub struct Session {
    pub id: String,
    pub user_id: i64,
    pub display_name: String,
    pub created_at_ms: u64,
    pub last_seen_ms: RwLock<u64>,
    pub data: RwLock<HashMap<String, String>>,
}

impl Session {
    fn new(id: String, user_id: i64, display_name: String) -> Self {
        let now = now_ms();
        Self {
            id,
            user_id,
            display_name,
            created_at_ms: now,
            last_seen_ms: RwLock::new(now),
            data: RwLock::new(HashMap::new()),
        }
    }

    pub async fn touch(&self) {
        *self.last_seen_ms.write().await = now_ms();
    }
}

/// The engine-wide session table. Sessions survive reconnection and are
/// only ever removed by explicit deletion.
#[derive(Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the session for `id`, creating it with `user_id`/`display_name`
    /// if this is the first connection to reference it. An existing
    /// session's `last_seen` is refreshed but its `user_id`/`display_name`
    /// are not overwritten by a later reconnection under a different
    /// identity.
    pub async fn get_or_create(&self, id: &str, user_id: i64, display_name: &str) -> Arc<Session> {
        if let Some(session) = self.sessions.read().await.get(id) {
            session.touch().await;
            return session.clone();
        }
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Session::new(id.to_string(), user_id, display_name.to_string())))
            .clone();
        session.touch().await;
        session
    }

    pub async fn delete(&self, id: &str) {
        self.sessions.write().await.remove(id);
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reuse_updates_last_seen_not_identity() {
        let store = SessionStore::new();
        let first = store.get_or_create("s1", 42, "alice").await;
        let before = *first.last_seen_ms.read().await;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let second = store.get_or_create("s1", 99, "mallory").await;
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.user_id, 42);
        assert_eq!(second.display_name, "alice");
        assert!(*second.last_seen_ms.read().await >= before);
    }

    #[tokio::test]
    async fn delete_removes_session() {
        let store = SessionStore::new();
        store.get_or_create("s1", 1, "a").await;
        assert_eq!(store.len().await, 1);
        store.delete("s1").await;
        assert!(store.is_empty().await);
    }
}
