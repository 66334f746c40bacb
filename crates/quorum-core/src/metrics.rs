//! In-process metrics collection
//!
//! Counters and latency accumulators behind cheap locks, reported as a JSON
//! document by `GET /metrics`. The registry is shared by every component;
//! recording must never fail or block a hot path on I/O.

use parking_lot::RwLock;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::time::Instant;

#[derive(Debug, Default, Clone)]
struct LatencySample {
    count: u64,
    total_secs: f64,
}

/// Shared metrics registry
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    counters: RwLock<HashMap<String, u64>>,
    latencies: RwLock<HashMap<String, LatencySample>>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one to a counter
    pub fn increment(&self, name: &str) {
        self.increment_by(name, 1);
    }

    pub fn increment_by(&self, name: &str, value: u64) {
        let mut counters = self.counters.write();
        *counters.entry(name.to_string()).or_insert(0) += value;
    }

    /// Record the latency of an operation started at `start`
    pub fn record_latency(&self, name: &str, start: Instant) {
        let elapsed = start.elapsed().as_secs_f64();
        let mut latencies = self.latencies.write();
        let sample = latencies.entry(name.to_string()).or_default();
        sample.count += 1;
        sample.total_secs += elapsed;
    }

    pub fn counter(&self, name: &str) -> u64 {
        self.counters.read().get(name).copied().unwrap_or(0)
    }

    /// Build the metrics report: latency entries carry request counts and
    /// average latency, counters carry their value, and the cache hit rate
    /// is derived from the cache counters.
    pub fn report(&self) -> Value {
        let mut report = Map::new();

        for (name, sample) in self.latencies.read().iter() {
            if sample.count == 0 {
                continue;
            }
            let avg_ms = sample.total_secs / sample.count as f64 * 1000.0;
            report.insert(
                name.clone(),
                json!({
                    "requests_count": sample.count,
                    "average_latency_ms": avg_ms,
                }),
            );
        }

        let counters = self.counters.read();
        for (name, value) in counters.iter() {
            if *value > 0 {
                report.insert(name.clone(), json!({ "count": value }));
            }
        }

        let hits = counters.get("cache_hits").copied().unwrap_or(0);
        let gets = counters.get("cache_get_requests").copied().unwrap_or(0);
        let hit_rate = if gets > 0 {
            (hits as f64 / gets as f64 * 10_000.0).round() / 100.0
        } else {
            0.0
        };
        report.insert("cache_hit_rate_percent".to_string(), json!(hit_rate));

        Value::Object(report)
    }
}
