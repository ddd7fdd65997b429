//! Global atomic counters for deployment observability.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event (e.g. at the end of a handler invocation).

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Lightweight atomic counters, no allocations, no locking.
pub struct Metrics {
    events_received: AtomicU64,
    events_ignored: AtomicU64,
    deployments_succeeded: AtomicU64,
    deployments_failed: AtomicU64,
    endpoint_updates: AtomicU64,
    agents_adopted: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            events_received: AtomicU64::new(0),
            events_ignored: AtomicU64::new(0),
            deployments_succeeded: AtomicU64::new(0),
            deployments_failed: AtomicU64::new(0),
            endpoint_updates: AtomicU64::new(0),
            agents_adopted: AtomicU64::new(0),
        }
    }

    pub fn inc_events_received(&self) {
        self.events_received.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "events_received", "counter incremented");
    }

    pub fn inc_events_ignored(&self) {
        self.events_ignored.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "events_ignored", "counter incremented");
    }

    pub fn inc_deployments_succeeded(&self) {
        self.deployments_succeeded.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "deployments_succeeded", "counter incremented");
    }

    pub fn inc_deployments_failed(&self) {
        self.deployments_failed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "deployments_failed", "counter incremented");
    }

    pub fn inc_endpoint_updates(&self) {
        self.endpoint_updates.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "endpoint_updates", "counter incremented");
    }

    pub fn inc_agents_adopted(&self) {
        self.agents_adopted.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "agents_adopted", "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            events_received = self.events_received(),
            events_ignored = self.events_ignored(),
            deployments_succeeded = self.deployments_succeeded(),
            deployments_failed = self.deployments_failed(),
            endpoint_updates = self.endpoint_updates(),
            agents_adopted = self.agents_adopted(),
        );
    }

    pub fn events_received(&self) -> u64 {
        self.events_received.load(Ordering::Relaxed)
    }

    pub fn events_ignored(&self) -> u64 {
        self.events_ignored.load(Ordering::Relaxed)
    }

    pub fn deployments_succeeded(&self) -> u64 {
        self.deployments_succeeded.load(Ordering::Relaxed)
    }

    pub fn deployments_failed(&self) -> u64 {
        self.deployments_failed.load(Ordering::Relaxed)
    }

    pub fn endpoint_updates(&self) -> u64 {
        self.endpoint_updates.load(Ordering::Relaxed)
    }

    pub fn agents_adopted(&self) -> u64 {
        self.agents_adopted.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.events_received.store(0, Ordering::Relaxed);
        self.events_ignored.store(0, Ordering::Relaxed);
        self.deployments_succeeded.store(0, Ordering::Relaxed);
        self.deployments_failed.store(0, Ordering::Relaxed);
        self.endpoint_updates.store(0, Ordering::Relaxed);
        self.agents_adopted.store(0, Ordering::Relaxed);
    }
}
