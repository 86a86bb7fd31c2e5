// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for mirror-sync.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The host process is responsible for choosing the exporter (Prometheus, OTEL, etc.)
//!
//! # Metric Naming Convention
//! - `mirror_sync_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `kind`: content-item, term-field, user, setting, ...
//! - `op` / `operation`: upsert, delete, delete_many
//! - `status`: success, error, skipped

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

use crate::entity::{EntityKind, OpClass};

/// Record a record entering the entity buffer
pub fn record_enqueued(kind: EntityKind, op: OpClass) {
    counter!(
        "mirror_sync_enqueued_total",
        "kind" => kind.as_str(),
        "op" => op.as_str()
    )
    .increment(1);
}

/// Record a mutation dropped by the eligibility filter
pub fn record_rejected(kind: EntityKind) {
    counter!(
        "mirror_sync_rejected_total",
        "kind" => kind.as_str()
    )
    .increment(1);
}

/// Record a document store call made by the replication sink
pub fn record_sink_operation(kind: EntityKind, operation: &'static str, status: &'static str) {
    counter!(
        "mirror_sync_sink_operations_total",
        "kind" => kind.as_str(),
        "operation" => operation,
        "status" => status
    )
    .increment(1);
}

/// Record sink call latency
pub fn record_sink_latency(operation: &'static str, duration: Duration) {
    histogram!(
        "mirror_sync_sink_seconds",
        "operation" => operation
    )
    .record(duration.as_secs_f64());
}

// ═══════════════════════════════════════════════════════════════════════════
// FLUSH CYCLE
// ═══════════════════════════════════════════════════════════════════════════

/// Record flush cycle duration
pub fn record_flush_duration(duration: Duration) {
    histogram!("mirror_sync_flush_seconds").record(duration.as_secs_f64());
}

/// Record how many records one flush cycle attempted
pub fn record_flush_records(count: usize) {
    histogram!("mirror_sync_flush_records").record(count as f64);
}

/// Count a failed tenant context switch
pub fn record_context_switch_failure() {
    counter!("mirror_sync_context_switch_failures_total").increment(1);
}

// ═══════════════════════════════════════════════════════════════════════════
// RECONCILIATION
// ═══════════════════════════════════════════════════════════════════════════

/// Entities a scan found without a confirmed document id
pub fn set_scan_found(kind: EntityKind, count: u64) {
    gauge!(
        "mirror_sync_scan_found",
        "kind" => kind.as_str()
    )
    .set(count as f64);
}

/// Gauge mirror of the persisted untracked counter
pub fn set_untracked(kind: EntityKind, count: u64) {
    gauge!(
        "mirror_sync_untracked",
        "kind" => kind.as_str()
    )
    .set(count as f64);
}

/// Set engine state (for monitoring state machine transitions)
pub fn set_engine_state(state: &str) {
    counter!(
        "mirror_sync_state_transitions_total",
        "state" => state.to_string()
    )
    .increment(1);
}

/// Record startup duration
pub fn record_startup(duration: Duration) {
    histogram!("mirror_sync_startup_seconds").record(duration.as_secs_f64());
}

/// A timing guard that records sink latency on drop
pub struct LatencyTimer {
    operation: &'static str,
    start: Instant,
}

impl LatencyTimer {
    /// Start a new latency timer
    pub fn new(operation: &'static str) -> Self {
        Self {
            operation,
            start: Instant::now(),
        }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        record_sink_latency(self.operation, self.start.elapsed());
    }
}
