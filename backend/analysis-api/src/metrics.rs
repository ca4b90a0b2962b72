use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, Encoder, HistogramVec, IntCounterVec,
    TextEncoder,
};

lazy_static! {
    // HTTP Metrics
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "http_requests_total",
        "Total number of HTTP requests",
        &["method", "path", "status"]
    )
    .unwrap();

    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "http_request_duration_seconds",
        "HTTP request duration in seconds",
        &["method", "path"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .unwrap();

    // Database Metrics (MongoDB)
    pub static ref DB_OPERATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "db_operations_total",
        "Total number of database operations",
        &["operation", "collection", "status"]
    )
    .unwrap();

    pub static ref DB_OPERATION_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "db_operation_duration_seconds",
        "Database operation duration in seconds",
        &["operation", "collection"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .unwrap();

    // Feature pipeline
    pub static ref FEATURE_COMPUTATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "feature_computations_total",
        "Total number of feature row computations",
        &["scope", "status"]
    )
    .unwrap();

    pub static ref FEATURE_COMPUTATION_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "feature_computation_duration_seconds",
        "Feature row computation duration in seconds",
        &["scope"],
        vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0, 120.0]
    )
    .unwrap();

    pub static ref LLM_FEATURE_CALLS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "llm_feature_calls_total",
        "Total number of assistant calls by outcome",
        &["kind", "status"]
    )
    .unwrap();
}

/// Renders all metrics in Prometheus text format
pub fn render_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer)
        .map_err(|e| prometheus::Error::Msg(format!("Failed to convert metrics to UTF-8: {}", e)))
}

/// Helper: track database operation with metrics
pub async fn track_db_operation<F, T>(
    operation: &str,
    collection: &str,
    future: F,
) -> Result<T, anyhow::Error>
where
    F: std::future::Future<Output = Result<T, anyhow::Error>>,
{
    let start = std::time::Instant::now();
    let result = future.await;
    let duration = start.elapsed().as_secs_f64();

    let status = if result.is_ok() { "success" } else { "error" };

    DB_OPERATIONS_TOTAL
        .with_label_values(&[operation, collection, status])
        .inc();

    DB_OPERATION_DURATION_SECONDS
        .with_label_values(&[operation, collection])
        .observe(duration);

    result
}

/// Records one attempt or set computation.
pub fn record_feature_computation(scope: &str, succeeded: bool, started: std::time::Instant) {
    let status = if succeeded { "success" } else { "error" };
    FEATURE_COMPUTATIONS_TOTAL
        .with_label_values(&[scope, status])
        .inc();
    FEATURE_COMPUTATION_DURATION_SECONDS
        .with_label_values(&[scope])
        .observe(started.elapsed().as_secs_f64());
}

pub fn record_llm_call(kind: &str, status: &str) {
    LLM_FEATURE_CALLS_TOTAL
        .with_label_values(&[kind, status])
        .inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_registration() {
        let _ = HTTP_REQUESTS_TOTAL
            .with_label_values(&["GET", "/health", "200"])
            .get();
        let _ = FEATURE_COMPUTATIONS_TOTAL
            .with_label_values(&["attempt", "success"])
            .get();
    }

    #[test]
    fn test_render_metrics() {
        record_feature_computation("set", true, std::time::Instant::now());
        record_llm_call("features", "completed");

        let output = render_metrics().unwrap();
        assert!(output.contains("feature_computations_total"));
        assert!(output.contains("llm_feature_calls_total"));
    }

    #[tokio::test]
    async fn track_db_operation_passes_result_through() {
        let value = track_db_operation("find", "unit_test", async { Ok::<_, anyhow::Error>(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);
    }
}
