use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Initialize Prometheus metrics exporter
///
/// Fails if a global recorder is already installed (e.g. a second call in tests).
pub fn init_metrics() -> anyhow::Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus recorder: {}", e))?;

    init_metric_descriptions();

    Ok(handle)
}

/// Initialize metric descriptions (can be called multiple times safely)
fn init_metric_descriptions() {
    describe_counter!(
        "sql_profiler_requests_total",
        "Total number of profiled HTTP requests"
    );
    describe_counter!(
        "sql_profiler_statements_total",
        "Total number of persisted SQL statement records"
    );
    describe_histogram!(
        "sql_profiler_statement_duration_seconds",
        "Duration of profiled SQL statements in seconds"
    );
    describe_counter!(
        "sql_profiler_persist_errors_total",
        "Total number of profiler records that failed to persist"
    );
    describe_gauge!("sql_profiler_info", "Profiler version information");

    gauge!("sql_profiler_info", "version" => env!("CARGO_PKG_VERSION")).set(1.0);
}

/// Record a request entering the profiler
pub fn record_profiled_request(method: &str) {
    counter!("sql_profiler_requests_total", "method" => method.to_string()).increment(1);
}

/// Record a persisted statement and its duration in milliseconds
pub fn record_statement(time_taken_ms: f64) {
    counter!("sql_profiler_statements_total").increment(1);
    histogram!("sql_profiler_statement_duration_seconds").record(time_taken_ms / 1000.0);
}

/// Record a failed write of a `request` or `query` record
pub fn record_persist_error(kind: &str) {
    counter!("sql_profiler_persist_errors_total", "kind" => kind.to_string()).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_metrics() {
        init_metric_descriptions();

        // No recorder installed: calls must be no-ops rather than panics.
        record_profiled_request("POST");
        record_statement(1.5);
        record_persist_error("query");
    }

    #[test]
    fn test_rendered_by_local_recorder() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            record_profiled_request("GET");
            record_statement(2.0);
        });

        let rendered = handle.render();
        assert!(rendered.contains("sql_profiler_requests_total{method=\"GET\"} 1"));
        assert!(rendered.contains("sql_profiler_statements_total 1"));
    }
}
