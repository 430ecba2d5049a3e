//! Live per-stage counters.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tributary_types::ack::AckResult;
use tributary_types::message::Batch;
use tributary_types::metric::StageSnapshot;

/// Lock-free counters updated by a stage's tasks and read via [`StageMetrics::snapshot`].
#[derive(Debug, Default)]
pub struct StageMetrics {
    received: AtomicU64,
    parts_received: AtomicU64,
    sent: AtomicU64,
    parts_sent: AtomicU64,
    errors: AtomicU64,
    acked: AtomicU64,
    ack_errors: AtomicU64,
    connection_up: AtomicU64,
    connection_failed: AtomicU64,
    connection_lost: AtomicU64,
    connected: AtomicBool,
}

impl StageMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_received(&self, batch: &Batch) {
        self.received.fetch_add(1, Ordering::Relaxed);
        self.parts_received
            .fetch_add(batch.len() as u64, Ordering::Relaxed);
    }

    pub fn record_sent(&self, parts: usize) {
        self.sent.fetch_add(1, Ordering::Relaxed);
        self.parts_sent.fetch_add(parts as u64, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a resolution by outcome.
    pub fn record_ack(&self, result: &AckResult) {
        if result.is_ok() {
            self.acked.fetch_add(1, Ordering::Relaxed);
        } else {
            self.ack_errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_connection_up(&self) {
        self.connection_up.fetch_add(1, Ordering::Relaxed);
        self.connected.store(true, Ordering::Relaxed);
    }

    pub fn record_connection_failed(&self) {
        self.connection_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connection_lost(&self) {
        self.connection_lost.fetch_add(1, Ordering::Relaxed);
        self.connected.store(false, Ordering::Relaxed);
    }

    pub fn set_disconnected(&self) {
        self.connected.store(false, Ordering::Relaxed);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StageSnapshot {
        StageSnapshot {
            received: self.received.load(Ordering::Relaxed),
            parts_received: self.parts_received.load(Ordering::Relaxed),
            sent: self.sent.load(Ordering::Relaxed),
            parts_sent: self.parts_sent.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            acked: self.acked.load(Ordering::Relaxed),
            ack_errors: self.ack_errors.load(Ordering::Relaxed),
            connection_up: self.connection_up.load(Ordering::Relaxed),
            connection_failed: self.connection_failed.load(Ordering::Relaxed),
            connection_lost: self.connection_lost.load(Ordering::Relaxed),
            connected: self.connected.load(Ordering::Relaxed),
        }
    }
}
