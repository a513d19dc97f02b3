//! Health, stats, and performance metrics (spec §6 Operational group)
//!
//! Generalizes the teacher's ad-hoc `get_stats` query (a single aggregate
//! row) into a per-adapter health check plus a rolling window of recent
//! operation latencies, grounded on the same "ok/degraded/down" tri-state
//! the spec's Health contract names.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::engine::MemoryEngine;
use crate::storage::{AdapterStatus, HealthReport};

/// Probes all four adapters and folds them into the composite `HealthReport`
/// (spec §6 "Health contract"); `HealthReport::composite()` already encodes
/// which adapters are required vs. degrade-only.
pub async fn check_health(engine: &MemoryEngine) -> HealthReport {
    let record_store = if engine.record_store.health_check().await.is_ok() {
        AdapterStatus::Ok
    } else {
        AdapterStatus::Down
    };
    let vector_store = if engine.vector_store.health_check().await.is_ok() {
        AdapterStatus::Ok
    } else {
        AdapterStatus::Down
    };
    let graph_store = if engine.graph_store.health_check().await.is_ok() {
        AdapterStatus::Ok
    } else {
        AdapterStatus::Degraded
    };
    let event_bus = if engine.event_bus.health_check().await.is_ok() {
        AdapterStatus::Ok
    } else {
        AdapterStatus::Degraded
    };

    HealthReport {
        record_store,
        vector_store,
        graph_store,
        event_bus,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stats {
    pub total_memories: u64,
    pub total_sessions: u64,
    pub total_operations: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PerformanceMetrics {
    pub sample_count: u64,
    pub avg_latency_ms: f64,
    pub p50_latency_ms: f64,
    pub p99_latency_ms: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlowQuery {
    pub operation: String,
    pub latency_ms: f64,
}

struct Sample {
    operation: String,
    latency_ms: f64,
}

/// Rolling window of the last `CAPACITY` operation latencies, plus running
/// counters for `GetStats`/`GetPrometheusMetrics`.
pub struct MetricsRecorder {
    samples: Mutex<VecDeque<Sample>>,
    total_operations: AtomicU64,
}

const CAPACITY: usize = 512;

impl Default for MetricsRecorder {
    fn default() -> Self {
        MetricsRecorder {
            samples: Mutex::new(VecDeque::with_capacity(CAPACITY)),
            total_operations: AtomicU64::new(0),
        }
    }
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, operation: &str, latency_ms: f64) {
        self.total_operations.fetch_add(1, Ordering::Relaxed);
        let mut samples = self.samples.lock();
        if samples.len() >= CAPACITY {
            samples.pop_front();
        }
        samples.push_back(Sample {
            operation: operation.to_string(),
            latency_ms,
        });
    }

    pub fn total_operations(&self) -> u64 {
        self.total_operations.load(Ordering::Relaxed)
    }

    pub fn performance(&self) -> PerformanceMetrics {
        let samples = self.samples.lock();
        if samples.is_empty() {
            return PerformanceMetrics::default();
        }
        let mut latencies: Vec<f64> = samples.iter().map(|s| s.latency_ms).collect();
        latencies.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        let sum: f64 = latencies.iter().sum();
        let percentile = |p: f64| -> f64 {
            let idx = ((latencies.len() as f64 - 1.0) * p).round() as usize;
            latencies[idx.min(latencies.len() - 1)]
        };

        PerformanceMetrics {
            sample_count: latencies.len() as u64,
            avg_latency_ms: sum / latencies.len() as f64,
            p50_latency_ms: percentile(0.50),
            p99_latency_ms: percentile(0.99),
        }
    }

    pub fn slow_queries(&self, limit: usize) -> Vec<SlowQuery> {
        let mut rows: Vec<SlowQuery> = self
            .samples
            .lock()
            .iter()
            .map(|s| SlowQuery {
                operation: s.operation.clone(),
                latency_ms: s.latency_ms,
            })
            .collect();
        rows.sort_by(|a, b| b.latency_ms.partial_cmp(&a.latency_ms).unwrap_or(std::cmp::Ordering::Equal));
        rows.truncate(limit);
        rows
    }

    /// Plain-text Prometheus exposition format (spec §6 `GetPrometheusMetrics`).
    pub fn to_prometheus(&self) -> String {
        let perf = self.performance();
        format!(
            "# HELP memoria_operations_total Total operations dispatched\n\
             # TYPE memoria_operations_total counter\n\
             memoria_operations_total {}\n\
             # HELP memoria_operation_latency_ms_avg Average operation latency in milliseconds\n\
             # TYPE memoria_operation_latency_ms_avg gauge\n\
             memoria_operation_latency_ms_avg {}\n\
             # HELP memoria_operation_latency_ms_p99 p99 operation latency in milliseconds\n\
             # TYPE memoria_operation_latency_ms_p99 gauge\n\
             memoria_operation_latency_ms_p99 {}\n",
            self.total_operations(),
            perf.avg_latency_ms,
            perf.p99_latency_ms,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[tokio::test]
    async fn healthy_engine_reports_ok() {
        let engine = MemoryEngine::builder(Config::default()).build();
        let report = check_health(&engine).await;
        assert_eq!(report.composite(), AdapterStatus::Ok);
    }

    #[test]
    fn slow_queries_sorted_descending() {
        let recorder = MetricsRecorder::new();
        recorder.record("search_hybrid", 12.0);
        recorder.record("add_memory", 80.0);
        recorder.record("get_memory", 2.0);

        let slow = recorder.slow_queries(2);
        assert_eq!(slow.len(), 2);
        assert_eq!(slow[0].operation, "add_memory");
        assert_eq!(slow[1].operation, "search_hybrid");
    }

    #[test]
    fn prometheus_text_includes_operation_count() {
        let recorder = MetricsRecorder::new();
        recorder.record("get_memory", 1.0);
        recorder.record("get_memory", 3.0);
        assert!(recorder.to_prometheus().contains("memoria_operations_total 2"));
    }
}
