use std::sync::OnceLock;
use std::time::Duration;

use anyhow::Result;
use axum::http::StatusCode;
use metrics::{counter, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

const HTTP_REQUESTS_TOTAL: &str = "threadline_api_http_requests_total";
const HTTP_REQUEST_DURATION_SECONDS: &str = "threadline_api_http_request_duration_seconds";
const HTTP_REQUEST_ERRORS_TOTAL: &str = "threadline_api_http_errors_total";
const INBOUND_EVENTS_TOTAL: &str = "threadline_api_inbound_events_total";
const RESOLVE_TOTAL: &str = "threadline_api_resolve_total";
const DISPATCH_TOTAL: &str = "threadline_api_dispatch_total";
const MERGES_TOTAL: &str = "threadline_api_merges_total";

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

pub fn init_metrics() -> Result<()> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    let _ = METRICS_HANDLE.set(handle);
    Ok(())
}

pub fn render_metrics() -> Option<String> {
    METRICS_HANDLE.get().map(PrometheusHandle::render)
}

pub fn register_http_request(method: &str, route: &str, status: StatusCode, elapsed: Duration) {
    let status_code = status.as_u16().to_string();
    let result = if status.is_server_error() {
        "error"
    } else {
        "success"
    };

    counter!(
        HTTP_REQUESTS_TOTAL,
        "method" => method.to_string(),
        "route" => route.to_string(),
        "status" => status_code.clone(),
        "result" => result
    )
    .increment(1);

    histogram!(
        HTTP_REQUEST_DURATION_SECONDS,
        "method" => method.to_string(),
        "route" => route.to_string(),
        "status" => status_code.clone()
    )
    .record(elapsed.as_secs_f64());

    if status.is_server_error() {
        counter!(
            HTTP_REQUEST_ERRORS_TOTAL,
            "method" => method.to_string(),
            "route" => route.to_string(),
            "status" => status_code
        )
        .increment(1);
    }
}

/// `outcome` is one of `stored`, `duplicate`, `ignored`, `busy`, `rejected`.
pub fn register_inbound_event(outcome: &'static str) {
    counter!(INBOUND_EVENTS_TOTAL, "outcome" => outcome).increment(1);
}

pub fn register_resolve(stage: &'static str) {
    counter!(RESOLVE_TOTAL, "stage" => stage).increment(1);
}

pub fn register_dispatch(status: &'static str, deduped: bool) {
    let outcome = if deduped { "deduped" } else { status };
    counter!(DISPATCH_TOTAL, "outcome" => outcome).increment(1);
}

pub fn register_merge(kind: &'static str, already_merged: bool) {
    counter!(
        MERGES_TOTAL,
        "kind" => kind,
        "already_merged" => already_merged.to_string()
    )
    .increment(1);
}
