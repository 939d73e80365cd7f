//! 连接注册表
//!
//! 每个 (对局, 用户名) 至多一条活跃连接。新连接替换旧连接时关闭旧连接；
//! 旧连接随后的注销带着自己的连接 ID，不会误删新连接。

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};
use tracing::debug;

use protocol::{ServerMessage, SessionId};

/// 连接 ID
pub type ConnectionId = u64;

/// 一条已注册的连接
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    username: String,
    tx: mpsc::Sender<ServerMessage>,
    closed: Arc<Notify>,
}

impl ConnectionHandle {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// 出站队列
    pub fn sender(&self) -> &mpsc::Sender<ServerMessage> {
        &self.tx
    }

    /// 连接被替换时触发
    pub fn closed(&self) -> Arc<Notify> {
        Arc::clone(&self.closed)
    }

    fn close(&self) {
        // notify_one 会保存许可，读循环稍后再等待也能收到
        self.closed.notify_one();
    }
}

/// 连接注册表
pub struct ConnectionRegistry {
    /// 对局 ID -> 用户名 -> 连接
    sessions: Mutex<HashMap<SessionId, HashMap<String, ConnectionHandle>>>,
    next_id: AtomicU64,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// 注册连接，关闭并替换同一用户在该对局中的旧连接
    pub fn register(
        &self,
        session_id: &str,
        username: &str,
        tx: mpsc::Sender<ServerMessage>,
    ) -> ConnectionHandle {
        let handle = ConnectionHandle {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            username: username.to_string(),
            tx,
            closed: Arc::new(Notify::new()),
        };

        let previous = self
            .sessions
            .lock()
            .entry(session_id.to_string())
            .or_default()
            .insert(username.to_string(), handle.clone());

        if let Some(previous) = previous {
            debug!(session_id, username, old = previous.id, new = handle.id, "connection replaced");
            previous.close();
        }
        handle
    }

    /// 注销连接，仅当 `id` 仍是当前注册的连接时生效
    pub fn unregister(&self, session_id: &str, username: &str, id: ConnectionId) -> bool {
        let mut sessions = self.sessions.lock();
        let Some(connections) = sessions.get_mut(session_id) else {
            return false;
        };
        if connections.get(username).map(ConnectionHandle::id) != Some(id) {
            return false;
        }

        connections.remove(username);
        if connections.is_empty() {
            sessions.remove(session_id);
        }
        true
    }

    pub fn is_connected(&self, session_id: &str, username: &str) -> bool {
        self.sessions
            .lock()
            .get(session_id)
            .is_some_and(|connections| connections.contains_key(username))
    }

    /// 对局内所有连接的副本
    pub fn connections(&self, session_id: &str) -> Vec<ConnectionHandle> {
        self.sessions
            .lock()
            .get(session_id)
            .map(|connections| connections.values().cloned().collect())
            .unwrap_or_default()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn channel() -> (mpsc::Sender<ServerMessage>, mpsc::Receiver<ServerMessage>) {
        mpsc::channel(8)
    }

    #[test]
    fn test_register_and_unregister() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = channel();

        let handle = registry.register("s1", "alice", tx);
        assert!(registry.is_connected("s1", "alice"));
        assert!(!registry.is_connected("s1", "bob"));
        assert!(!registry.is_connected("s2", "alice"));
        assert_eq!(registry.connections("s1").len(), 1);

        assert!(registry.unregister("s1", "alice", handle.id()));
        assert!(!registry.is_connected("s1", "alice"));
        assert!(registry.connections("s1").is_empty());
        assert!(!registry.unregister("s1", "alice", handle.id()));
    }

    #[tokio::test]
    async fn test_replacement_closes_old_connection() {
        let registry = ConnectionRegistry::new();
        let (old_tx, _old_rx) = channel();
        let (new_tx, _new_rx) = channel();

        let old = registry.register("s1", "alice", old_tx);
        let new = registry.register("s1", "alice", new_tx);
        assert_ne!(old.id(), new.id());

        tokio::time::timeout(Duration::from_secs(1), old.closed().notified())
            .await
            .expect("old connection should be closed");

        // 旧连接的清理不影响新连接
        assert!(!registry.unregister("s1", "alice", old.id()));
        assert!(registry.is_connected("s1", "alice"));
        assert_eq!(registry.connections("s1")[0].id(), new.id());
    }

    #[test]
    fn test_sessions_are_isolated() {
        let registry = ConnectionRegistry::new();
        let (tx1, _rx1) = channel();
        let (tx2, _rx2) = channel();
        let (tx3, _rx3) = channel();

        registry.register("s1", "alice", tx1);
        registry.register("s1", "bob", tx2);
        registry.register("s2", "carol", tx3);

        let mut names: Vec<_> = registry
            .connections("s1")
            .iter()
            .map(|c| c.username().to_string())
            .collect();
        names.sort();
        assert_eq!(names, vec!["alice", "bob"]);
        assert_eq!(registry.connections("s2").len(), 1);
    }
}
