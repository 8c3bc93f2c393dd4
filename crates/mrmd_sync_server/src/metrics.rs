//! Process-wide counters surfaced by the control-plane HTTP endpoints.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Instant;

use serde_json::json;

/// Counters shared by the hub, coordinators, and socket handlers.
pub struct Metrics {
    started: Instant,
    connections_total: AtomicU64,
    connections_active: AtomicU64,
    messages_total: AtomicU64,
    bytes_in: AtomicU64,
    bytes_out: AtomicU64,
    saves: AtomicU64,
    loads: AtomicU64,
    errors: AtomicU64,
    last_activity_ms: AtomicI64,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            connections_total: AtomicU64::new(0),
            connections_active: AtomicU64::new(0),
            messages_total: AtomicU64::new(0),
            bytes_in: AtomicU64::new(0),
            bytes_out: AtomicU64::new(0),
            saves: AtomicU64::new(0),
            loads: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            last_activity_ms: AtomicI64::new(chrono::Utc::now().timestamp_millis()),
        }
    }

    pub fn connection_opened(&self) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
        self.connections_active.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    pub fn connection_closed(&self) {
        self.connections_active.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn active_connections(&self) -> usize {
        self.connections_active.load(Ordering::Relaxed) as usize
    }

    pub fn message_received(&self, bytes: usize) {
        self.messages_total.fetch_add(1, Ordering::Relaxed);
        self.bytes_in.fetch_add(bytes as u64, Ordering::Relaxed);
        self.touch();
    }

    pub fn message_sent(&self, bytes: usize) {
        self.bytes_out.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn save_completed(&self) {
        self.saves.fetch_add(1, Ordering::Relaxed);
    }

    pub fn load_completed(&self) {
        self.loads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    fn touch(&self) {
        self.last_activity_ms
            .store(chrono::Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    /// Render the `/metrics` JSON body.
    pub fn to_json(&self) -> serde_json::Value {
        let last_activity = chrono::DateTime::from_timestamp_millis(
            self.last_activity_ms.load(Ordering::Relaxed),
        )
        .unwrap_or_default()
        .to_rfc3339();

        json!({
            "uptime": self.started.elapsed().as_secs(),
            "connections": {
                "total": self.connections_total.load(Ordering::Relaxed),
                "active": self.connections_active.load(Ordering::Relaxed),
            },
            "messages": {
                "total": self.messages_total.load(Ordering::Relaxed),
                "bytesIn": self.bytes_in.load(Ordering::Relaxed),
                "bytesOut": self.bytes_out.load(Ordering::Relaxed),
            },
            "files": {
                "saves": self.saves.load(Ordering::Relaxed),
                "loads": self.loads.load(Ordering::Relaxed),
            },
            "errors": self.errors.load(Ordering::Relaxed),
            "lastActivity": last_activity,
        })
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
