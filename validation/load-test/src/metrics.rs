//! Metrics collection and statistics.
//!
//! A single `MetricsRegistry` is created at startup and shared by every
//! iteration. Counters are atomics; latency distributions are HDR
//! histograms behind short-lived locks, so concurrent recording never loses
//! an update.

use crate::thresholds::ThresholdOutcome;
use hdrhistogram::Histogram;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Total HTTP requests issued.
pub const HTTP_REQS: &str = "http_reqs";
/// HTTP requests that failed at transport level or returned >= 400.
pub const HTTP_REQ_FAILED: &str = "http_req_failed";
/// Latency of every HTTP request.
pub const HTTP_REQ_DURATION: &str = "http_req_duration";
/// Completed driver iterations.
pub const ITERATIONS: &str = "iterations";
/// Arrival-rate iterations skipped because no VU was free.
pub const DROPPED_ITERATIONS: &str = "dropped_iterations";

type SharedHistogram = Arc<Mutex<Histogram<u64>>>;

fn new_histogram() -> Histogram<u64> {
    Histogram::new(3).expect("3 significant figures is a valid histogram precision")
}

/// Concurrent registry of named counters and latency distributions.
pub struct MetricsRegistry {
    counters: RwLock<BTreeMap<String, Arc<AtomicU64>>>,
    trends: RwLock<BTreeMap<String, SharedHistogram>>,
    requests_total: AtomicU64,
    requests_failed: AtomicU64,
    request_duration: Mutex<Histogram<u64>>,
    iterations: AtomicU64,
    dropped_iterations: AtomicU64,
    start_time: Instant,
}

impl MetricsRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            counters: RwLock::new(BTreeMap::new()),
            trends: RwLock::new(BTreeMap::new()),
            requests_total: AtomicU64::new(0),
            requests_failed: AtomicU64::new(0),
            request_duration: Mutex::new(new_histogram()),
            iterations: AtomicU64::new(0),
            dropped_iterations: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    fn counter_handle(&self, name: &str) -> Arc<AtomicU64> {
        if let Some(counter) = self.counters.read().get(name) {
            return counter.clone();
        }
        self.counters
            .write()
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(AtomicU64::new(0)))
            .clone()
    }

    fn trend_handle(&self, name: &str) -> SharedHistogram {
        if let Some(trend) = self.trends.read().get(name) {
            return trend.clone();
        }
        self.trends
            .write()
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(new_histogram())))
            .clone()
    }

    /// Make a counter visible in results even if it never increments.
    pub fn register_counter(&self, name: &str) {
        self.counter_handle(name);
    }

    /// Make a distribution visible in results even if it stays empty.
    pub fn register_trend(&self, name: &str) {
        self.trend_handle(name);
    }

    /// Increment a named counter.
    pub fn add(&self, name: &str, value: u64) {
        self.counter_handle(name).fetch_add(value, Ordering::Relaxed);
    }

    /// Record one sample into a named latency distribution.
    pub fn observe(&self, name: &str, latency: Duration) {
        let micros = latency.as_micros().min(u64::MAX as u128) as u64;
        self.trend_handle(name).lock().record(micros).ok();
    }

    /// Record an HTTP request in the run-wide totals.
    pub fn record_request(&self, latency: Duration, failed: bool) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        if failed {
            self.requests_failed.fetch_add(1, Ordering::Relaxed);
        }
        let micros = latency.as_micros().min(u64::MAX as u128) as u64;
        self.request_duration.lock().record(micros).ok();
    }

    /// Record a completed iteration.
    pub fn record_iteration(&self) {
        self.iterations.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an iteration the runner could not start.
    pub fn record_dropped_iteration(&self) {
        self.dropped_iterations.fetch_add(1, Ordering::Relaxed);
    }

    /// Current value of a counter, including the built-in ones.
    pub fn counter(&self, name: &str) -> Option<u64> {
        match name {
            HTTP_REQS => Some(self.requests_total.load(Ordering::Relaxed)),
            HTTP_REQ_FAILED => Some(self.requests_failed.load(Ordering::Relaxed)),
            ITERATIONS => Some(self.iterations.load(Ordering::Relaxed)),
            DROPPED_ITERATIONS => Some(self.dropped_iterations.load(Ordering::Relaxed)),
            _ => self
                .counters
                .read()
                .get(name)
                .map(|c| c.load(Ordering::Relaxed)),
        }
    }

    /// Apply `f` to a distribution, including `http_req_duration`.
    ///
    /// Histogram values are microseconds.
    pub fn with_distribution<T>(&self, name: &str, f: impl FnOnce(&Histogram<u64>) -> T) -> Option<T> {
        if name == HTTP_REQ_DURATION {
            return Some(f(&self.request_duration.lock()));
        }
        let trend = self.trends.read().get(name).cloned()?;
        let guard = trend.lock();
        Some(f(&guard))
    }

    /// Summary of a named distribution.
    pub fn trend(&self, name: &str) -> Option<LatencySummary> {
        self.with_distribution(name, LatencySummary::from_histogram)
    }

    /// Time since the registry was created.
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Generate final test results.
    pub fn results(&self, labels: RunLabels) -> TestResults {
        let duration_secs = self.elapsed().as_secs_f64();
        let total_requests = self.requests_total.load(Ordering::Relaxed);
        let failed_requests = self.requests_failed.load(Ordering::Relaxed);
        let rps = if duration_secs > 0.0 {
            total_requests as f64 / duration_secs
        } else {
            0.0
        };

        let trends = self
            .trends
            .read()
            .iter()
            .map(|(name, h)| (name.clone(), LatencySummary::from_histogram(&h.lock())))
            .collect();
        let counters = self
            .counters
            .read()
            .iter()
            .map(|(name, c)| (name.clone(), c.load(Ordering::Relaxed)))
            .collect();

        TestResults {
            timestamp: chrono::Utc::now().to_rfc3339(),
            labels,
            duration_secs,
            total_requests,
            failed_requests,
            requests_per_second: rps,
            iterations: self.iterations.load(Ordering::Relaxed),
            dropped_iterations: self.dropped_iterations.load(Ordering::Relaxed),
            http_req_duration: LatencySummary::from_histogram(&self.request_duration.lock()),
            trends,
            counters,
            thresholds: Vec::new(),
        }
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Latency statistics in milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencySummary {
    pub count: u64,
    pub min: f64,
    pub avg: f64,
    pub p50: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
    pub max: f64,
}

impl LatencySummary {
    pub fn from_histogram(h: &Histogram<u64>) -> Self {
        if h.is_empty() {
            return Self::default();
        }
        Self {
            count: h.len(),
            min: h.min() as f64 / 1000.0,
            avg: h.mean() / 1000.0,
            p50: h.value_at_percentile(50.0) as f64 / 1000.0,
            p90: h.value_at_percentile(90.0) as f64 / 1000.0,
            p95: h.value_at_percentile(95.0) as f64 / 1000.0,
            p99: h.value_at_percentile(99.0) as f64 / 1000.0,
            max: h.max() as f64 / 1000.0,
        }
    }
}

/// Identifiers used only for labelling results.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunLabels {
    pub test_name: String,
    pub project_id: u64,
    pub scenario_name: String,
    pub executor: String,
    pub flow: String,
    pub base_url: String,
}

/// Final test results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResults {
    pub timestamp: String,
    pub labels: RunLabels,
    pub duration_secs: f64,
    pub total_requests: u64,
    pub failed_requests: u64,
    pub requests_per_second: f64,
    pub iterations: u64,
    pub dropped_iterations: u64,

    // Latency across every request (ms)
    pub http_req_duration: LatencySummary,

    // Per-step latency and error counters
    pub trends: BTreeMap<String, LatencySummary>,
    pub counters: BTreeMap<String, u64>,

    #[serde(default)]
    pub thresholds: Vec<ThresholdOutcome>,
}

impl TestResults {
    /// Fraction of requests that failed.
    pub fn failure_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.failed_requests as f64 / self.total_requests as f64
        }
    }

    /// Whether every threshold passed.
    pub fn passed(&self) -> bool {
        self.thresholds.iter().all(|t| t.passed)
    }
}
