//! Metrics and observability (C11): per-endpoint counters, latency
//! histograms with p50/p95/p99 extraction, and LRU-by-`last_activity`
//! eviction when the endpoint table exceeds capacity.
//!
//! The source's quarter-eviction policy is non-deterministic (`spec.md`
//! §9's redesign flag); this replaces it with true LRU. Per-endpoint
//! size averages use a running mean, not the source's `(prev+new)/2`
//! EMA-like formula — see `DESIGN.md`.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::Serialize;

/// Per-endpoint latency and throughput bookkeeping.
#[derive(Debug, Clone)]
struct EndpointStats {
    samples: Vec<u64>,
    max_samples: usize,
    total_requests: u64,
    total_errors: u64,
    avg_request_bytes: f64,
    avg_response_bytes: f64,
    last_activity: Instant,
}

impl EndpointStats {
    fn new(max_samples: usize) -> Self {
        Self {
            samples: Vec::with_capacity(max_samples),
            max_samples,
            total_requests: 0,
            total_errors: 0,
            avg_request_bytes: 0.0,
            avg_response_bytes: 0.0,
            last_activity: Instant::now(),
        }
    }

    fn record(&mut self, duration: Duration, request_bytes: usize, response_bytes: usize, is_error: bool) {
        self.samples.push(duration.as_micros() as u64);
        if self.samples.len() > self.max_samples {
            self.samples.remove(0);
        }
        self.total_requests += 1;
        if is_error {
            self.total_errors += 1;
        }
        // True running mean, not the source's EMA-like `(prev+new)/2`
        // (spec.md §9's last open question).
        let n = self.total_requests as f64;
        self.avg_request_bytes += (request_bytes as f64 - self.avg_request_bytes) / n;
        self.avg_response_bytes += (response_bytes as f64 - self.avg_response_bytes) / n;
        self.last_activity = Instant::now();
    }

    fn percentile(&self, pct: f64) -> Duration {
        if self.samples.is_empty() {
            return Duration::ZERO;
        }
        let mut sorted = self.samples.clone();
        sorted.sort_unstable();
        let rank = ((sorted.len() as f64 - 1.0) * pct).round() as usize;
        Duration::from_micros(sorted[rank.min(sorted.len() - 1)])
    }

    fn snapshot(&self) -> EndpointSnapshot {
        EndpointSnapshot {
            total_requests: self.total_requests,
            total_errors: self.total_errors,
            avg_request_bytes: self.avg_request_bytes,
            avg_response_bytes: self.avg_response_bytes,
            p50_micros: self.percentile(0.50).as_micros() as u64,
            p95_micros: self.percentile(0.95).as_micros() as u64,
            p99_micros: self.percentile(0.99).as_micros() as u64,
        }
    }
}

/// A point-in-time snapshot of one endpoint's metrics.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct EndpointSnapshot {
    /// Requests served since the endpoint was first observed.
    pub total_requests: u64,
    /// Of those, how many completed as errors.
    pub total_errors: u64,
    /// Running mean request size, in bytes.
    pub avg_request_bytes: f64,
    /// Running mean response size, in bytes.
    pub avg_response_bytes: f64,
    /// 50th percentile latency, in microseconds.
    pub p50_micros: u64,
    /// 95th percentile latency, in microseconds.
    pub p95_micros: u64,
    /// 99th percentile latency, in microseconds.
    pub p99_micros: u64,
}

/// A registry of per-endpoint metrics, bounded to `capacity` endpoints.
/// Once full, the least-recently-active endpoint is evicted to admit a
/// new one.
pub struct MetricsRegistry {
    endpoints: RwLock<HashMap<String, EndpointStats>>,
    capacity: usize,
    samples_per_endpoint: usize,
}

impl MetricsRegistry {
    /// Build a registry tracking at most `capacity` distinct endpoints,
    /// each keeping its most recent `samples_per_endpoint` latency
    /// samples for percentile extraction.
    pub fn new(capacity: usize, samples_per_endpoint: usize) -> Self {
        Self {
            endpoints: RwLock::new(HashMap::new()),
            capacity,
            samples_per_endpoint,
        }
    }

    /// Register metric descriptions with whatever `metrics` recorder the
    /// binary installed. Idempotent; safe to call more than once.
    pub fn describe() {
        metrics::describe_counter!("memcortex_requests_total", "Total requests handled, by endpoint");
        metrics::describe_counter!("memcortex_request_errors_total", "Requests that completed as errors, by endpoint");
        metrics::describe_histogram!("memcortex_request_duration_seconds", "Request latency in seconds, by endpoint");
    }

    /// Record one request/response cycle for `endpoint`.
    pub fn record(&self, endpoint: &str, duration: Duration, request_bytes: usize, response_bytes: usize, is_error: bool) {
        metrics::counter!("memcortex_requests_total", "endpoint" => endpoint.to_string()).increment(1);
        if is_error {
            metrics::counter!("memcortex_request_errors_total", "endpoint" => endpoint.to_string()).increment(1);
        }
        metrics::histogram!("memcortex_request_duration_seconds", "endpoint" => endpoint.to_string())
            .record(duration.as_secs_f64());

        {
            let mut endpoints = self.endpoints.write();
            if let Some(stats) = endpoints.get_mut(endpoint) {
                stats.record(duration, request_bytes, response_bytes, is_error);
                return;
            }
        }

        self.evict_if_full();

        let mut endpoints = self.endpoints.write();
        let stats = endpoints
            .entry(endpoint.to_string())
            .or_insert_with(|| EndpointStats::new(self.samples_per_endpoint));
        stats.record(duration, request_bytes, response_bytes, is_error);
    }

    fn evict_if_full(&self) {
        let mut endpoints = self.endpoints.write();
        if endpoints.len() < self.capacity {
            return;
        }
        if let Some(lru_key) = endpoints
            .iter()
            .min_by_key(|(_, stats)| stats.last_activity)
            .map(|(key, _)| key.clone())
        {
            endpoints.remove(&lru_key);
        }
    }

    /// Snapshot a single endpoint's metrics, if it has been observed.
    pub fn snapshot(&self, endpoint: &str) -> Option<EndpointSnapshot> {
        self.endpoints.read().get(endpoint).map(EndpointStats::snapshot)
    }

    /// Snapshot every currently tracked endpoint.
    pub fn snapshot_all(&self) -> HashMap<String, EndpointSnapshot> {
        self.endpoints
            .read()
            .iter()
            .map(|(name, stats)| (name.clone(), stats.snapshot()))
            .collect()
    }

    /// Number of endpoints currently tracked.
    pub fn len(&self) -> usize {
        self.endpoints.read().len()
    }

    /// Whether no endpoint has been observed yet.
    pub fn is_empty(&self) -> bool {
        self.endpoints.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentiles_are_monotonic() {
        let registry = MetricsRegistry::new(10, 100);
        for micros in [10, 20, 30, 40, 50, 100, 200, 500, 900, 1000] {
            registry.record("tools/call", Duration::from_micros(micros), 10, 10, false);
        }
        let snapshot = registry.snapshot("tools/call").unwrap();
        assert!(snapshot.p50_micros <= snapshot.p95_micros);
        assert!(snapshot.p95_micros <= snapshot.p99_micros);
    }

    #[test]
    fn running_mean_is_not_latest_biased() {
        let registry = MetricsRegistry::new(10, 100);
        registry.record("ep", Duration::from_micros(1), 100, 0, false);
        registry.record("ep", Duration::from_micros(1), 200, 0, false);
        registry.record("ep", Duration::from_micros(1), 300, 0, false);
        let snapshot = registry.snapshot("ep").unwrap();
        assert!((snapshot.avg_request_bytes - 200.0).abs() < 1e-9);
    }

    #[test]
    fn eviction_removes_the_least_recently_active_endpoint() {
        let registry = MetricsRegistry::new(2, 10);
        registry.record("a", Duration::from_micros(1), 1, 1, false);
        std::thread::sleep(Duration::from_millis(5));
        registry.record("b", Duration::from_micros(1), 1, 1, false);
        std::thread::sleep(Duration::from_millis(5));
        // "a" is now the least recently active; inserting "c" should evict it.
        registry.record("c", Duration::from_micros(1), 1, 1, false);

        assert_eq!(registry.len(), 2);
        assert!(registry.snapshot("a").is_none());
        assert!(registry.snapshot("b").is_some());
        assert!(registry.snapshot("c").is_some());
    }

    #[test]
    fn error_count_tracks_separately_from_total() {
        let registry = MetricsRegistry::new(10, 10);
        registry.record("ep", Duration::from_micros(1), 1, 1, false);
        registry.record("ep", Duration::from_micros(1), 1, 1, true);
        let snapshot = registry.snapshot("ep").unwrap();
        assert_eq!(snapshot.total_requests, 2);
        assert_eq!(snapshot.total_errors, 1);
    }
}
