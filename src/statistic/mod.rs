//! Accounting sink shared by every tunnel task and the monitor surface
//!
//! Totals and per-connection records live behind one lock, so a snapshot
//! always observes a consistent picture. Closed records stay listed until
//! the next reset, which is what the monitoring UI expects.

mod record;

pub use record::{ConnectionRecord, ConnectionStatus};

use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use uuid::Uuid;

/// Process-wide statistics collector.
pub struct StatisticManager {
    inner: RwLock<Inner>,
}

struct Inner {
    started_at: i64,
    total_connections: u64,
    total_bytes_in: u64,
    total_bytes_out: u64,
    connections: HashMap<String, ConnectionRecord>,
}

impl Inner {
    fn new() -> Self {
        Inner {
            started_at: Utc::now().timestamp(),
            total_connections: 0,
            total_bytes_in: 0,
            total_bytes_out: 0,
            connections: HashMap::new(),
        }
    }
}

impl StatisticManager {
    pub fn new() -> Self {
        StatisticManager {
            inner: RwLock::new(Inner::new()),
        }
    }

    /// Generate a unique connection id
    pub fn generate_id(&self) -> String {
        Uuid::new_v4().to_string()
    }

    /// Register a tunnel at start.
    pub fn add(&self, id: &str, host: String, port: u16) {
        let mut guard = self.inner.write();
        guard.total_connections += 1;
        let record = ConnectionRecord::new(id.to_string(), host, port, Utc::now().timestamp());
        guard.connections.insert(id.to_string(), record);
    }

    /// Credit traffic to a tunnel. Unknown ids are ignored; the record may
    /// have been dropped by a reset while the tunnel was still running.
    pub fn update(&self, id: &str, bytes_in: u64, bytes_out: u64) {
        let mut guard = self.inner.write();
        let inner = &mut *guard;
        if let Some(record) = inner.connections.get_mut(id) {
            record.bytes_in += bytes_in;
            record.bytes_out += bytes_out;
            inner.total_bytes_in += bytes_in;
            inner.total_bytes_out += bytes_out;
        }
    }

    /// Mark a tunnel closed; the record stays listed until `reset`.
    pub fn close(&self, id: &str) {
        let mut guard = self.inner.write();
        if let Some(record) = guard.connections.get_mut(id) {
            if record.status == ConnectionStatus::Active {
                record.status = ConnectionStatus::Closed;
                record.end_time = Some(Utc::now().timestamp());
            }
        }
    }

    /// Consistent snapshot of totals plus every known record.
    pub fn snapshot(&self) -> StatsSnapshot {
        let guard = self.inner.read();
        let active = guard
            .connections
            .values()
            .filter(|r| r.status == ConnectionStatus::Active)
            .count() as u64;
        let mut connections: Vec<ConnectionRecord> =
            guard.connections.values().cloned().collect();
        connections.sort_by(|a, b| {
            a.start_time.cmp(&b.start_time).then_with(|| a.id.cmp(&b.id))
        });
        StatsSnapshot {
            stats: TrafficTotals {
                total_connections: guard.total_connections,
                active_connections: active,
                total_bytes_in: guard.total_bytes_in,
                total_bytes_out: guard.total_bytes_out,
                uptime: (Utc::now().timestamp() - guard.started_at).max(0) as u64,
            },
            connections,
        }
    }

    /// Drop all records and zero the totals.
    pub fn reset(&self) {
        *self.inner.write() = Inner::new();
    }
}

impl Default for StatisticManager {
    fn default() -> Self {
        Self::new()
    }
}

/// `GET /api/stats` response body.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub stats: TrafficTotals,
    pub connections: Vec<ConnectionRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrafficTotals {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_bytes_in: u64,
    pub total_bytes_out: u64,
    pub uptime: u64,
}
