//! Prometheus metrics for the quiz pipeline and its HTTP API
//!
//! This module provides metrics tracking for:
//! - API: request counts and latency per endpoint
//! - Pipeline: ingested images, created image sets, generation outcomes and
//!   cost, allocation hits and misses, unused question supply
//!
//! # Usage
//!
//! Call `init_metrics()` at application startup to register all metrics.
//! If initialization fails, metrics operations become no-ops.

use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_histogram,
    register_histogram_vec, Counter, CounterVec, Encoder, Gauge, Histogram, HistogramVec,
    TextEncoder,
};
use std::sync::OnceLock;

// ============================================================================
// Metrics Storage
// ============================================================================

/// Container for HTTP API metrics
struct ApiMetrics {
    requests: CounterVec,
    duration: HistogramVec,
}

/// Container for pipeline metrics
struct PipelineMetrics {
    images_ingested: CounterVec,
    image_sets_created: CounterVec,
    generation_outcomes: CounterVec,
    generation_cost: Counter,
    generation_duration: Histogram,
    allocations: CounterVec,
    unused_questions: Gauge,
}

static API_METRICS: OnceLock<ApiMetrics> = OnceLock::new();

static PIPELINE_METRICS: OnceLock<PipelineMetrics> = OnceLock::new();

/// Flag to track if initialization was attempted
static METRICS_INIT_ATTEMPTED: OnceLock<bool> = OnceLock::new();

// ============================================================================
// Initialization
// ============================================================================

/// Initialize all Prometheus metrics
///
/// Safe to call more than once; later calls are no-ops. If registration
/// fails, the error is returned and metric operations stay no-ops.
///
/// # Example
///
/// ```ignore
/// if let Err(e) = quizset::metrics::init_metrics() {
///     tracing::warn!(error = %e, "Metrics initialization failed");
/// }
/// ```
pub fn init_metrics() -> Result<(), Box<dyn std::error::Error>> {
    if METRICS_INIT_ATTEMPTED.get().is_some() {
        return Ok(());
    }
    METRICS_INIT_ATTEMPTED.set(true).ok();

    let api = ApiMetrics {
        requests: register_counter_vec!(
            "quizset_api_requests_total",
            "Total API requests by endpoint and status",
            &["endpoint", "status"]
        )?,
        duration: register_histogram_vec!(
            "quizset_api_request_duration_seconds",
            "API request duration in seconds",
            &["endpoint"],
            vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]
        )?,
    };

    let pipeline = PipelineMetrics {
        images_ingested: register_counter_vec!(
            "quizset_images_ingested_total",
            "New images added to the pool per category",
            &["category"]
        )?,
        image_sets_created: register_counter_vec!(
            "quizset_image_sets_created_total",
            "Image sets created by partitioning, by set size",
            &["size"]
        )?,
        generation_outcomes: register_counter_vec!(
            "quizset_generation_sets_total",
            "Image sets processed by question generation, by outcome",
            &["outcome"]
        )?,
        generation_cost: register_counter!(
            "quizset_generation_cost_total",
            "Accumulated question generation cost"
        )?,
        generation_duration: register_histogram!(
            "quizset_generation_batch_duration_seconds",
            "Duration of one question generation batch in seconds",
            vec![1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0]
        )?,
        allocations: register_counter_vec!(
            "quizset_allocations_total",
            "Allocation requests by resolved image count and outcome",
            &["image_count", "outcome"]
        )?,
        unused_questions: register_gauge!(
            "quizset_unused_questions",
            "Question bundles not yet claimed"
        )?,
    };

    API_METRICS
        .set(api)
        .map_err(|_| "API metrics already initialized")?;
    PIPELINE_METRICS
        .set(pipeline)
        .map_err(|_| "Pipeline metrics already initialized")?;

    tracing::info!("Prometheus metrics initialized successfully");
    Ok(())
}

/// Check if metrics have been initialized
pub fn metrics_initialized() -> bool {
    API_METRICS.get().is_some() && PIPELINE_METRICS.get().is_some()
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

/// Record API request
pub fn record_api_request(endpoint: &str, status: u16, duration_secs: f64) {
    let Some(m) = API_METRICS.get() else {
        return;
    };
    let status_str = status.to_string();
    m.requests.with_label_values(&[endpoint, &status_str]).inc();
    m.duration
        .with_label_values(&[endpoint])
        .observe(duration_secs);
}

/// Record new images added to a category's pool
pub fn record_images_ingested(category: &str, count: usize) {
    if count == 0 {
        return;
    }
    if let Some(m) = PIPELINE_METRICS.get() {
        m.images_ingested
            .with_label_values(&[category])
            .inc_by(count as f64);
    }
}

/// Record the sets produced by one partition run
pub fn record_image_sets(sizes: &[usize]) {
    let Some(m) = PIPELINE_METRICS.get() else {
        return;
    };
    for size in sizes {
        m.image_sets_created
            .with_label_values(&[&size.to_string()])
            .inc();
    }
}

/// Record the outcome of one generation batch
pub fn record_generation_batch(generated: usize, failed: usize, cost: f64) {
    let Some(m) = PIPELINE_METRICS.get() else {
        return;
    };
    if generated > 0 {
        m.generation_outcomes
            .with_label_values(&["generated"])
            .inc_by(generated as f64);
    }
    if failed > 0 {
        m.generation_outcomes
            .with_label_values(&["failed"])
            .inc_by(failed as f64);
    }
    if cost > 0.0 {
        m.generation_cost.inc_by(cost);
    }
}

/// Record an allocation attempt
pub fn record_allocation(image_count: usize, claimed: bool) {
    if let Some(m) = PIPELINE_METRICS.get() {
        let outcome = if claimed { "claimed" } else { "not_available" };
        m.allocations
            .with_label_values(&[&image_count.to_string(), outcome])
            .inc();
    }
}

/// Update the unused question gauge
pub fn set_unused_questions(count: usize) {
    if let Some(m) = PIPELINE_METRICS.get() {
        m.unused_questions.set(count as f64);
    }
}

/// Histogram timer guard that records duration on drop
pub struct MetricsTimer {
    timer: Option<prometheus::HistogramTimer>,
}

impl MetricsTimer {
    fn new(timer: prometheus::HistogramTimer) -> Self {
        Self { timer: Some(timer) }
    }

    fn noop() -> Self {
        Self { timer: None }
    }
}

impl Drop for MetricsTimer {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.stop_and_record();
        }
    }
}

/// Start a generation batch timer
pub fn start_generation_timer() -> MetricsTimer {
    match PIPELINE_METRICS.get() {
        Some(m) => MetricsTimer::new(m.generation_duration.start_timer()),
        None => MetricsTimer::noop(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        let first = init_metrics();
        let second = init_metrics();
        assert!(second.is_ok());
        if first.is_ok() {
            assert!(metrics_initialized());
        }
    }

    #[test]
    fn test_recording_and_encoding() {
        let _ = init_metrics();
        record_api_request("/health", 200, 0.001);
        record_allocation(2, true);
        record_generation_batch(3, 1, 0.05);
        set_unused_questions(7);
        {
            let _timer = start_generation_timer();
        }

        let text = encode_metrics().unwrap();
        assert!(text.contains("quizset_allocations_total"));
        assert!(text.contains("quizset_unused_questions"));
    }

    #[test]
    fn test_noop_timer() {
        let timer = MetricsTimer::noop();
        drop(timer);
    }
}
