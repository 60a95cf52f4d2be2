use metrics::{counter, histogram};
use tracing::trace;

// Counters go to the Prometheus recorder installed in main; the trace events
// mirror them for log-only deployments.

pub fn inc_requests(route: &'static str) {
    counter!("tcin_requests_total", "route" => route).increment(1);
    trace!(target = "tcin.metrics", route = route, "requests_total_inc");
}

pub fn stage_elapsed(stage: &'static str, elapsed_ms: u128) {
    histogram!("tcin_stage_elapsed_ms", "stage" => stage).record(elapsed_ms as f64);
    trace!(
        target = "tcin.metrics",
        stage = stage,
        elapsed_ms = elapsed_ms as u64,
        "stage_elapsed"
    );
}

pub fn rows_emitted(source: &'static str, succeeded: usize, failed: usize) {
    counter!("tcin_rows_total", "source" => source, "outcome" => "success")
        .increment(succeeded as u64);
    counter!("tcin_rows_total", "source" => source, "outcome" => "failure")
        .increment(failed as u64);
    trace!(
        target = "tcin.metrics",
        source = source,
        succeeded = succeeded as u64,
        failed = failed as u64,
        "rows_emitted"
    );
}
