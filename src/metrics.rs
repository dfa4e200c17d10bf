//! Prometheus metrics for gcsproxy.
//!
//! Installs a global Prometheus recorder using `metrics-exporter-prometheus`,
//! defines metric name constants, provides the HTTP RED middleware and
//! renders the exposition text for the metrics endpoint.

use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::{Mutex, OnceLock};
use std::time::Instant;

// -- Metric name constants ----------------------------------------------------

/// Total HTTP requests (counter). Labels: method, route, status.
pub const HTTP_REQUESTS_TOTAL: &str = "gcsproxy_http_requests_total";

/// HTTP request duration in seconds (histogram). Labels: method, route.
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "gcsproxy_http_request_duration_seconds";

/// Total storage backend calls (counter). Labels: operation, outcome.
pub const BACKEND_OPERATIONS_TOTAL: &str = "gcsproxy_backend_operations_total";

/// Route label attached to responses by the dispatcher.
///
/// Object keys never become label values; the label is one of `health`,
/// `metrics`, `map`, `proxy` or `unmatched`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteLabel(pub &'static str);

// -- Global recorder installation ---------------------------------------------

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();
static INSTALL_LOCK: Mutex<()> = Mutex::new(());

/// Install the global Prometheus metrics recorder and register metric
/// descriptions. Calling it again after a successful install is a no-op.
pub fn init_metrics() -> anyhow::Result<&'static PrometheusHandle> {
    let _guard = INSTALL_LOCK
        .lock()
        .map_err(|_| anyhow::anyhow!("metrics install lock poisoned"))?;
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle);
    }
    let handle = PrometheusBuilder::new().install_recorder()?;
    let handle = PROMETHEUS_HANDLE.get_or_init(|| handle);
    describe_metrics();
    Ok(handle)
}

fn describe_metrics() {
    describe_counter!(HTTP_REQUESTS_TOTAL, "Total HTTP requests");
    describe_histogram!(
        HTTP_REQUEST_DURATION_SECONDS,
        "HTTP request duration in seconds"
    );
    describe_counter!(
        BACKEND_OPERATIONS_TOTAL,
        "Storage backend calls by operation and outcome"
    );
}

/// Count one storage backend call.
///
/// Without an installed recorder this is a no-op.
pub fn record_backend_operation(operation: &'static str, outcome: &'static str) {
    counter!(BACKEND_OPERATIONS_TOTAL, "operation" => operation, "outcome" => outcome)
        .increment(1);
}

// -- Metrics middleware -------------------------------------------------------

/// Axum middleware that records HTTP RED metrics for every request.
///
/// The route label comes from the [`RouteLabel`] extension set by the
/// dispatcher. Scrapes of the metrics endpoint are not recorded.
pub async fn metrics_middleware(
    req: Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> Response {
    let method = req.method().to_string();

    let start = Instant::now();
    let response = next.run(req).await;
    let duration = start.elapsed().as_secs_f64();

    let route = response
        .extensions()
        .get::<RouteLabel>()
        .map_or("unmatched", |label| label.0);
    if route == "metrics" {
        return response;
    }
    let status = response.status().as_u16().to_string();

    counter!(HTTP_REQUESTS_TOTAL, "method" => method.clone(), "route" => route, "status" => status).increment(1);
    histogram!(HTTP_REQUEST_DURATION_SECONDS, "method" => method, "route" => route).record(duration);

    response
}

// -- Metrics endpoint handler -------------------------------------------------

/// Render Prometheus exposition format text.
pub fn render() -> Response {
    match PROMETHEUS_HANDLE.get() {
        Some(handle) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

// -- Tests --------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::routing::get;
    use axum::Router;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_render_after_init() {
        init_metrics().unwrap();
        record_backend_operation("stat", "ok");
        let resp = render();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains(BACKEND_OPERATIONS_TOTAL));
    }

    #[test]
    fn test_init_is_idempotent() {
        let first = init_metrics().unwrap() as *const PrometheusHandle;
        let second = init_metrics().unwrap() as *const PrometheusHandle;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_middleware_passes_response_through() {
        let app = Router::new()
            .route(
                "/x",
                get(|| async {
                    let mut resp = "hi".into_response();
                    resp.extensions_mut().insert(RouteLabel("proxy"));
                    resp
                }),
            )
            .layer(axum::middleware::from_fn(metrics_middleware));
        let resp = app
            .oneshot(Request::builder().uri("/x").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.extensions().get::<RouteLabel>(), Some(&RouteLabel("proxy")));
    }
}
