/// 数据报会话表
///
/// 每个数据报来源一个会话，以来源地址字符串为键。整张表由一个 `RwLock` 保护：
/// 接收循环查找时共享读锁，插入和删除只在 `HashMap` 操作期间持有写锁。
/// 持锁期间不做任何 I/O。

use crate::stats::ActiveGuard;
use crate::transport::{BoxedConnection, NetAddr};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncWriteExt, WriteHalf};
use tokio::time::Instant;

/// 代表一个数据报来源建立的出站连接
pub struct Session {
    id: u64,
    key: String,
    peer: NetAddr,
    writer: tokio::sync::Mutex<WriteHalf<BoxedConnection>>,
    last_active: Mutex<Instant>,
    _guard: Option<ActiveGuard>,
}

impl Session {
    pub fn new(
        id: u64,
        peer: NetAddr,
        writer: WriteHalf<BoxedConnection>,
        guard: Option<ActiveGuard>,
    ) -> Self {
        Self {
            id,
            key: peer.session_key(),
            peer,
            writer: tokio::sync::Mutex::new(writer),
            last_active: Mutex::new(Instant::now()),
            _guard: guard,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn peer(&self) -> &NetAddr {
        &self.peer
    }

    /// 远端连接的写半部
    pub fn writer(&self) -> &tokio::sync::Mutex<WriteHalf<BoxedConnection>> {
        &self.writer
    }

    /// 记录任一方向的流量
    pub fn touch(&self) {
        *self.last_active.lock() = Instant::now();
    }

    pub fn last_active(&self) -> Instant {
        *self.last_active.lock()
    }

    /// 关闭远端连接的写方向
    pub async fn close(&self) {
        let _ = self.writer.lock().await.shutdown().await;
    }
}

#[derive(Default)]
pub struct SessionTable {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    next_id: AtomicU64,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn get(&self, key: &str) -> Option<Arc<Session>> {
        self.sessions.read().get(key).cloned()
    }

    /// 登记会话；键上已有会话时保留原会话
    ///
    /// 返回最终登记在表中的会话
    pub fn insert(&self, session: Arc<Session>) -> Arc<Session> {
        let mut sessions = self.sessions.write();
        Arc::clone(
            sessions
                .entry(session.key().to_string())
                .or_insert(session),
        )
    }

    /// 删除 `key` 下的会话，仅当它仍是编号为 `id` 的那个
    pub fn remove(&self, key: &str, id: u64) -> Option<Arc<Session>> {
        let mut sessions = self.sessions.write();
        match sessions.get(key) {
            Some(existing) if existing.id() == id => sessions.remove(key),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}
