//! Request telemetry.
//!
//! [`MetricsCollector`] keeps unbounded request counters and a bounded FIFO
//! window of recent response times. Every mutation happens under one write
//! lock so a snapshot never observes counters and window out of step.
//! [`RequestTimer`] records exactly once when dropped, whether or not the
//! timed call succeeded. A timer counts as failed unless it was marked
//! successful, so cancelled requests are never reported as `ok`.
//!
//! With the `prometheus` feature the same events also feed a Prometheus
//! registry exposed in text format.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Capacity of the response-time window
pub const RESPONSE_WINDOW_CAPACITY: usize = 1000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub model_requests: BTreeMap<String, u64>,
    /// Mean of the response-time window in seconds, 0.0 when empty
    pub average_response_time: f64,
}

#[derive(Debug, Default)]
struct MetricsState {
    total_requests: u64,
    model_requests: BTreeMap<String, u64>,
    response_times: VecDeque<f64>,
}

#[derive(Debug)]
pub struct MetricsCollector {
    state: RwLock<MetricsState>,
    capacity: usize,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::with_capacity(RESPONSE_WINDOW_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            state: RwLock::new(MetricsState {
                response_times: VecDeque::with_capacity(capacity),
                ..Default::default()
            }),
            capacity: capacity.max(1),
        }
    }

    /// Count one request for `model_name` and push its latency into the window
    pub fn record(&self, model_name: &str, elapsed: Duration) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);

        state.total_requests += 1;
        *state.model_requests.entry(model_name.to_string()).or_insert(0) += 1;
        state.response_times.push_back(elapsed.as_secs_f64());
        while state.response_times.len() > self.capacity {
            state.response_times.pop_front();
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);

        let average_response_time = if state.response_times.is_empty() {
            0.0
        } else {
            state.response_times.iter().sum::<f64>() / state.response_times.len() as f64
        };

        MetricsSnapshot {
            total_requests: state.total_requests,
            model_requests: state.model_requests.clone(),
            average_response_time,
        }
    }

    /// The current window, oldest sample first
    pub fn response_times(&self) -> Vec<f64> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.response_times.iter().copied().collect()
    }

    pub fn reset(&self) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.total_requests = 0;
        state.model_requests.clear();
        state.response_times.clear();
        info!("Metrics reset");
    }

    /// Start timing a request for `model_name`
    pub fn start_timer(self: &Arc<Self>, model_name: impl Into<String>) -> RequestTimer {
        RequestTimer {
            collector: Arc::clone(self),
            model_name: model_name.into(),
            started: Instant::now(),
            succeeded: false,
        }
    }
}

/// Scope guard that records elapsed time into its collector when dropped
#[derive(Debug)]
pub struct RequestTimer {
    collector: Arc<MetricsCollector>,
    model_name: String,
    started: Instant,
    succeeded: bool,
}

impl RequestTimer {
    /// Tag the request as successful; only affects the reported status
    pub fn mark_succeeded(&mut self) {
        self.succeeded = true;
    }
}

impl Drop for RequestTimer {
    fn drop(&mut self) {
        let elapsed = self.started.elapsed();
        let status = if self.succeeded { "ok" } else { "error" };
        self.collector.record(&self.model_name, elapsed);
        debug!("Request for '{}' finished ({}) in {:?}", self.model_name, status, elapsed);

        #[cfg(feature = "prometheus")]
        observe_request(&self.model_name, status, elapsed.as_secs_f64());
    }
}

#[cfg(feature = "prometheus")]
mod exposition {
    use lazy_static::lazy_static;
    use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Registry, TextEncoder};
    use std::sync::OnceLock;

    lazy_static! {
        static ref REGISTRY: Registry = Registry::new();
    }
    static REQ_COUNTER: OnceLock<IntCounterVec> = OnceLock::new();
    static REQ_DURATION: OnceLock<HistogramVec> = OnceLock::new();

    pub fn init_metrics() {
        let req_counter = REQ_COUNTER.get_or_init(|| {
            IntCounterVec::new(
                prometheus::opts!("classifier_requests_total", "Total prediction requests per model"),
                &["model", "status"],
            )
            .expect("valid counter definition")
        });

        let req_duration = REQ_DURATION.get_or_init(|| {
            HistogramVec::new(
                HistogramOpts::new(
                    "classifier_request_duration_seconds",
                    "Time spent serving prediction requests",
                ),
                &["model"],
            )
            .expect("valid histogram definition")
        });

        REGISTRY.register(Box::new(req_counter.clone())).ok();
        REGISTRY.register(Box::new(req_duration.clone())).ok();
    }

    pub fn observe_request(model: &str, status: &str, seconds: f64) {
        if let Some(counter) = REQ_COUNTER.get() {
            counter.with_label_values(&[model, status]).inc();
        }
        if let Some(histogram) = REQ_DURATION.get() {
            histogram.with_label_values(&[model]).observe(seconds);
        }
    }

    /// Render every registered metric in the Prometheus text format
    pub fn gather_text() -> prometheus::Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = REGISTRY.gather();
        let mut buffer = vec![];
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

#[cfg(feature = "prometheus")]
pub use exposition::{gather_text, init_metrics, observe_request};
