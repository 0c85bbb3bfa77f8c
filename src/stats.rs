use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

/// Point-in-time view of a relay's counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Total number of accepted stream connections
    pub total_connections: u64,
    /// Currently active stream connections
    pub active_connections: u64,
    /// Total number of datagram sessions created
    pub total_sessions: u64,
    /// Currently registered datagram sessions
    pub active_sessions: u64,
    /// Dial attempts to the remote side that failed
    pub failed_dials: u64,
    /// Bytes copied from the local side to the remote side
    pub bytes_inbound: u64,
    /// Bytes copied from the remote side back to the local side
    pub bytes_outbound: u64,
    /// Writes that moved fewer bytes than were read
    pub short_writes: u64,
    /// Spawned tasks that finished without error
    pub tasks_ok: u64,
    /// Spawned tasks that finished with an error
    pub tasks_failed: u64,
    /// Unix timestamp when the relay started
    pub start_time: u64,
}

#[derive(Debug, Default)]
struct Counters {
    total_connections: AtomicU64,
    active_connections: AtomicU64,
    total_sessions: AtomicU64,
    active_sessions: AtomicU64,
    failed_dials: AtomicU64,
    bytes_inbound: AtomicU64,
    bytes_outbound: AtomicU64,
    short_writes: AtomicU64,
    tasks_ok: AtomicU64,
    tasks_failed: AtomicU64,
}

/// Statistics collector for a single relay
///
/// Cheap to clone; all clones share the same counters. Only used for logging
/// and tests, forwarding decisions never read it.
#[derive(Debug, Clone)]
pub struct RelayStats {
    counters: Arc<Counters>,
    start_time: u64,
}

impl RelayStats {
    pub fn new() -> Self {
        Self {
            counters: Arc::new(Counters::default()),
            start_time: SystemTime::now()
                .duration_since(SystemTime::UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or_default(),
        }
    }

    /// Called when a stream connection is accepted; the guard marks it ended
    pub fn connection_started(&self) -> ActiveGuard {
        self.counters
            .total_connections
            .fetch_add(1, Ordering::Relaxed);
        self.counters
            .active_connections
            .fetch_add(1, Ordering::Relaxed);
        ActiveGuard {
            counter: Arc::clone(&self.counters),
            kind: GuardKind::Connection,
        }
    }

    /// Called when a datagram session is registered; the guard marks it ended
    pub fn session_started(&self) -> ActiveGuard {
        self.counters.total_sessions.fetch_add(1, Ordering::Relaxed);
        self.counters.active_sessions.fetch_add(1, Ordering::Relaxed);
        ActiveGuard {
            counter: Arc::clone(&self.counters),
            kind: GuardKind::Session,
        }
    }

    pub fn dial_failed(&self) {
        self.counters.failed_dials.fetch_add(1, Ordering::Relaxed);
    }

    /// Add bytes copied local -> remote
    pub fn add_bytes_inbound(&self, bytes: u64) {
        self.counters
            .bytes_inbound
            .fetch_add(bytes, Ordering::Relaxed);
    }

    /// Add bytes copied remote -> local
    pub fn add_bytes_outbound(&self, bytes: u64) {
        self.counters
            .bytes_outbound
            .fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn short_write(&self) {
        self.counters.short_writes.fetch_add(1, Ordering::Relaxed);
    }

    /// Record how a spawned task ended
    pub fn task_finished(&self, ok: bool) {
        if ok {
            self.counters.tasks_ok.fetch_add(1, Ordering::Relaxed);
        } else {
            self.counters.tasks_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Get current snapshot of stats
    pub fn snapshot(&self) -> StatsSnapshot {
        let c = &self.counters;
        StatsSnapshot {
            total_connections: c.total_connections.load(Ordering::Relaxed),
            active_connections: c.active_connections.load(Ordering::Relaxed),
            total_sessions: c.total_sessions.load(Ordering::Relaxed),
            active_sessions: c.active_sessions.load(Ordering::Relaxed),
            failed_dials: c.failed_dials.load(Ordering::Relaxed),
            bytes_inbound: c.bytes_inbound.load(Ordering::Relaxed),
            bytes_outbound: c.bytes_outbound.load(Ordering::Relaxed),
            short_writes: c.short_writes.load(Ordering::Relaxed),
            tasks_ok: c.tasks_ok.load(Ordering::Relaxed),
            tasks_failed: c.tasks_failed.load(Ordering::Relaxed),
            start_time: self.start_time,
        }
    }
}

impl Default for RelayStats {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy)]
enum GuardKind {
    Connection,
    Session,
}

/// Decrements the matching "active" counter when dropped
#[derive(Debug)]
pub struct ActiveGuard {
    counter: Arc<Counters>,
    kind: GuardKind,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        let active = match self.kind {
            GuardKind::Connection => &self.counter.active_connections,
            GuardKind::Session => &self.counter.active_sessions,
        };
        active.fetch_sub(1, Ordering::Relaxed);
    }
}
