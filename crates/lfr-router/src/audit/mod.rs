//! Audit trail - one record per routed request
//!
//! The router hands each record to an [`AuditSink`]. [`AuditLog`] keeps a
//! bounded in-memory window for the gateway; durable storage is left to
//! other sink implementations.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::cache::Fingerprint;
use crate::router::Route;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: String,
    pub route: Route,
    pub fingerprint: Fingerprint,
    pub confidence: f64,
    pub latency_ms: u64,
    pub estimated_cost_usd: f64,
    pub estimated_cost_saved_usd: f64,
    /// Serialized request as the router saw it
    pub request: serde_json::Value,
    /// Serialized routing decision
    pub response: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Receives audit records; must not block the request path for long
pub trait AuditSink: Send + Sync {
    fn record(&self, record: AuditRecord);
}

/// Sink that drops everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl AuditSink for NoopSink {
    fn record(&self, _record: AuditRecord) {}
}

/// Bounded in-memory audit window, oldest rows pruned first
#[derive(Debug)]
pub struct AuditLog {
    rows: RwLock<VecDeque<AuditRecord>>,
    max_rows: usize,
}

impl AuditLog {
    pub fn new(max_rows: usize) -> Self {
        Self {
            rows: RwLock::new(VecDeque::new()),
            max_rows: max_rows.max(1),
        }
    }

    /// Newest first
    pub fn recent(&self, limit: usize) -> Vec<AuditRecord> {
        let rows = self.rows.read();
        rows.iter().rev().take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }

    pub fn summary(&self) -> AuditSummary {
        let rows = self.rows.read();

        if rows.is_empty() {
            return AuditSummary::default();
        }

        let total_requests = rows.len();
        let local_requests = rows.iter().filter(|r| r.route == Route::Local).count();
        let cloud_requests = total_requests - local_requests;

        let mut latencies: Vec<u64> = rows.iter().map(|r| r.latency_ms).collect();
        latencies.sort_unstable();

        AuditSummary {
            total_requests,
            local_requests,
            cloud_requests,
            local_share: local_requests as f64 / total_requests as f64,
            total_cost_usd: rows.iter().map(|r| r.estimated_cost_usd).sum(),
            total_saved_usd: rows.iter().map(|r| r.estimated_cost_saved_usd).sum(),
            avg_latency_ms: latencies.iter().sum::<u64>() as f64 / total_requests as f64,
            p50_latency_ms: latencies[latencies.len() / 2],
            p95_latency_ms: latencies[((latencies.len() * 95) / 100).min(latencies.len() - 1)],
        }
    }

    pub fn clear(&self) {
        self.rows.write().clear();
    }
}

impl AuditSink for AuditLog {
    fn record(&self, record: AuditRecord) {
        let mut rows = self.rows.write();
        while rows.len() >= self.max_rows {
            rows.pop_front();
        }
        rows.push_back(record);
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new(5000)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditSummary {
    pub total_requests: usize,
    pub local_requests: usize,
    pub cloud_requests: usize,
    pub local_share: f64,
    pub total_cost_usd: f64,
    pub total_saved_usd: f64,
    pub avg_latency_ms: f64,
    pub p50_latency_ms: u64,
    pub p95_latency_ms: u64,
}
