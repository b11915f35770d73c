//! Metrics collection utilities.
//!
//! Per-endpoint call counters with min/max/average latency plus a global
//! roll-up. Counters only grow until an explicit [`MetricsCollector::reset`].

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Aggregated metrics across all endpoints.
#[derive(Debug, Clone)]
pub struct GlobalStats {
    pub started_at: DateTime<Utc>,
    pub total_requests: u64,
    pub successes: u64,
    pub failures: u64,
}

impl Default for GlobalStats {
    fn default() -> Self {
        Self {
            started_at: Utc::now(),
            total_requests: 0,
            successes: 0,
            failures: 0,
        }
    }
}

/// Endpoint-scoped metrics snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointStats {
    pub endpoint: String,
    pub total_requests: u64,
    pub successes: u64,
    pub failures: u64,
    pub min_latency: Option<Duration>,
    pub max_latency: Option<Duration>,
    pub average_latency: Option<Duration>,
    pub last_status: Option<u16>,
}

#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub global: GlobalStats,
    pub endpoints: Vec<EndpointStats>,
}

impl MetricsSnapshot {
    pub fn endpoint(&self, endpoint: &str) -> Option<&EndpointStats> {
        self.endpoints.iter().find(|e| e.endpoint == endpoint)
    }
}

#[derive(Debug, Default)]
struct EndpointAccumulator {
    total_requests: u64,
    successes: u64,
    failures: u64,
    total_latency: Duration,
    min_latency: Option<Duration>,
    max_latency: Option<Duration>,
    last_status: Option<u16>,
}

impl EndpointAccumulator {
    fn record(&mut self, success: bool, status: Option<u16>, latency: Duration) {
        self.total_requests += 1;
        if success {
            self.successes += 1;
        } else {
            self.failures += 1;
        }
        if status.is_some() {
            self.last_status = status;
        }
        self.total_latency = self.total_latency.saturating_add(latency);
        self.min_latency = Some(self.min_latency.map_or(latency, |m| m.min(latency)));
        self.max_latency = Some(self.max_latency.map_or(latency, |m| m.max(latency)));
    }

    fn stats(&self, endpoint: &str) -> EndpointStats {
        let average_latency = u32::try_from(self.total_requests)
            .ok()
            .filter(|n| *n > 0)
            .map(|n| self.total_latency / n);
        EndpointStats {
            endpoint: endpoint.to_string(),
            total_requests: self.total_requests,
            successes: self.successes,
            failures: self.failures,
            min_latency: self.min_latency,
            max_latency: self.max_latency,
            average_latency,
            last_status: self.last_status,
        }
    }
}

#[derive(Debug, Default)]
struct MetricsState {
    global: GlobalStats,
    endpoints: HashMap<String, EndpointAccumulator>,
}

/// Thread-safe metrics collector shared by the client and its interceptors.
#[derive(Clone, Debug, Default)]
pub struct MetricsCollector {
    inner: Arc<Mutex<MetricsState>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MetricsState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a completed call. `status` is `None` when no response arrived.
    pub fn record(&self, endpoint: &str, success: bool, status: Option<u16>, latency: Duration) {
        let mut guard = self.lock();
        guard.global.total_requests += 1;
        if success {
            guard.global.successes += 1;
        } else {
            guard.global.failures += 1;
        }
        guard
            .endpoints
            .entry(endpoint.to_string())
            .or_default()
            .record(success, status, latency);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let guard = self.lock();
        let mut endpoints: Vec<EndpointStats> = guard
            .endpoints
            .iter()
            .map(|(endpoint, acc)| acc.stats(endpoint))
            .collect();
        endpoints.sort_by(|a, b| a.endpoint.cmp(&b.endpoint));
        MetricsSnapshot {
            global: guard.global.clone(),
            endpoints,
        }
    }

    pub fn reset(&self) {
        let mut guard = self.lock();
        *guard = MetricsState::default();
        log::info!("metrics reset");
    }
}
