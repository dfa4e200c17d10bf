//! Axum router construction and request dispatch.
//!
//! The [`app`] function returns a ready-to-serve [`axum::Router`].  Only the
//! health check at `/` is a real axum route; everything else lands in a
//! single fallback that picks the metrics endpoint, the path-mapping
//! endpoint or the proxy endpoint by path prefix, in that order.

use axum::{
    extract::{Extension, State},
    http::{HeaderMap, Method, StatusCode, Uri},
    middleware,
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use crate::config::{normalize_endpoint, Config};
use crate::errors::ProxyError;
use crate::handlers::object::serve_object;
use crate::mapper::{self, BucketSource};
use crate::metrics::{self, metrics_middleware, RouteLabel};
use crate::AppState;

/// Build the axum [`Router`] for the given state.
///
/// The returned router is ready to be passed to `axum::serve`.
pub fn app(state: Arc<AppState>) -> Router {
    let metrics_enabled = state.config.observability.metrics;
    let mounts = Arc::new(Mounts::new(&state.config));

    let router = Router::new()
        // Health check: any method.
        .route("/", any(health_check))
        .fallback(dispatch)
        .with_state(state)
        .layer(Extension(mounts))
        .layer(TraceLayer::new_for_http());

    // metrics_middleware is outermost so it captures the full request
    // lifecycle.
    if metrics_enabled {
        router.layer(middleware::from_fn(metrics_middleware))
    } else {
        router
    }
}

// -- Health check -------------------------------------------------------------

/// `ANY /` -- 200 with an empty body.
async fn health_check() -> Response {
    let mut response = StatusCode::OK.into_response();
    response.extensions_mut().insert(RouteLabel("health"));
    response
}

// -- Route resolution ---------------------------------------------------------

/// Where a request path is served from.
#[derive(Debug, PartialEq, Eq)]
enum Route<'a> {
    Metrics,
    /// Path-mapping endpoint, with the path below its prefix.
    Map(&'a str),
    /// Proxy endpoint, with the path below its prefix.
    Proxy(&'a str),
    Unmatched,
}

/// Normalized endpoint prefixes, computed once per router.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Mounts {
    metrics: Option<String>,
    map: Option<String>,
    proxy: String,
}

impl Mounts {
    fn new(config: &Config) -> Self {
        Self {
            metrics: config
                .observability
                .metrics
                .then(|| config.observability.metrics_path.clone()),
            map: (!config.map.endpoint.is_empty())
                .then(|| normalize_endpoint(&config.map.endpoint)),
            proxy: normalize_endpoint(&config.proxy.endpoint),
        }
    }

    /// Pick the route for a decoded request path.
    ///
    /// The map endpoint is checked before the proxy endpoint so that it
    /// stays reachable when the proxy is mounted at `/`.
    fn resolve<'a>(&self, path: &'a str) -> Route<'a> {
        if self.metrics.as_deref() == Some(path) {
            return Route::Metrics;
        }
        if let Some(rest) = self.map.as_deref().and_then(|map| path.strip_prefix(map)) {
            return Route::Map(rest);
        }
        match path.strip_prefix(self.proxy.as_str()) {
            Some(rest) => Route::Proxy(rest),
            None => Route::Unmatched,
        }
    }
}

// -- Dispatch -----------------------------------------------------------------

async fn dispatch(
    State(state): State<Arc<AppState>>,
    Extension(mounts): Extension<Arc<Mounts>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    let path = mapper::decode_path(uri.path());

    let (label, mut response) = match mounts.resolve(&path) {
        Route::Metrics => ("metrics", metrics::render()),
        Route::Map(rest) => {
            let response =
                serve_storage(&state, &method, &BucketSource::Path, rest, &headers).await;
            ("map", response)
        }
        Route::Proxy(rest) => {
            let source = if state.config.proxy.bucket_on_path {
                BucketSource::Path
            } else {
                BucketSource::Fixed(state.config.bucket_name.clone())
            };
            let response = serve_storage(&state, &method, &source, rest, &headers).await;
            ("proxy", response)
        }
        Route::Unmatched => {
            debug!("No endpoint matches {}", path);
            ("unmatched", (StatusCode::NOT_FOUND, "404 page not found\n").into_response())
        }
    };

    if label == "map" || label == "proxy" {
        log_access(&state, &method, &path, response.status(), &headers);
    }
    response.extensions_mut().insert(RouteLabel(label));
    response
}

/// Serve one storage request on either object endpoint.
async fn serve_storage(
    state: &AppState,
    method: &Method,
    source: &BucketSource,
    rest: &str,
    headers: &HeaderMap,
) -> Response {
    let result = if *method == Method::GET || *method == Method::HEAD {
        match source.resolve(rest) {
            Ok(object) => serve_object(state, method, &object, headers).await,
            Err(e) => Err(e),
        }
    } else {
        Err(ProxyError::MethodNotAllowed)
    };

    result.unwrap_or_else(|e| {
        debug!("{} {} failed: {} ({})", method, rest, e, e.kind());
        e.into_response_for(method)
    })
}

// -- Access log ---------------------------------------------------------------

/// Render the configured request headers as `name=value` pairs, in
/// configuration order. Headers absent from the request are omitted.
fn logged_headers(names: &[String], headers: &HeaderMap) -> String {
    names
        .iter()
        .filter_map(|name| {
            let value = headers.get(name.as_str())?;
            Some(format!("{}={:?}", name, String::from_utf8_lossy(value.as_bytes())))
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn log_access(state: &AppState, method: &Method, path: &str, status: StatusCode, headers: &HeaderMap) {
    let logged = logged_headers(&state.config.proxy.log_headers, headers);
    if logged.is_empty() {
        info!("{} {} {}", method, path, status.as_u16());
    } else {
        info!("{} {} {} {}", method, path, status.as_u16(), logged);
    }
}

// -- Tests --------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryBackend;
    use axum::body::Body;
    use axum::http::{HeaderValue, Request};
    use tower::ServiceExt;

    fn state_with(config: Config) -> Arc<AppState> {
        Arc::new(AppState {
            config,
            storage: Arc::new(MemoryBackend::new()),
        })
    }

    fn default_state() -> Arc<AppState> {
        let mut config = Config::default();
        config.bucket_name = "my-bucket".to_string();
        state_with(config)
    }

    async fn send(state: Arc<AppState>, method: Method, uri: &str) -> Response {
        app(state)
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    async fn body_string(resp: Response) -> String {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_health_check_any_method() {
        for method in [Method::GET, Method::HEAD, Method::POST, Method::DELETE] {
            let resp = send(default_state(), method.clone(), "/").await;
            assert_eq!(resp.status(), StatusCode::OK, "{method}");
            assert_eq!(body_string(resp).await, "");
        }
    }

    #[tokio::test]
    async fn test_method_not_allowed() {
        for method in [Method::POST, Method::PUT, Method::DELETE, Method::PATCH] {
            let resp = send(default_state(), method.clone(), "/musics/music/music1.txt").await;
            assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED, "{method}");
            assert_eq!(body_string(resp).await, "method not allowed\n");
        }
    }

    #[tokio::test]
    async fn test_missing_bucket_is_not_found() {
        let resp = send(default_state(), Method::GET, "/musics/music/music1.txt").await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_string(resp).await, "storage: bucket doesn't exist\n");
    }

    #[tokio::test]
    async fn test_outside_proxy_endpoint_is_not_found() {
        let mut config = Config::default();
        config.bucket_name = "my-bucket".to_string();
        config.proxy.endpoint = "/proxy/".to_string();
        let resp = send(state_with(config), Method::GET, "/other/key").await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert_eq!(resp.extensions().get::<RouteLabel>(), Some(&RouteLabel("unmatched")));
    }

    #[test]
    fn test_resolve_route_priority() {
        let mut config = Config::default();
        config.bucket_name = "b".to_string();
        config.map.endpoint = "map".to_string();
        config.observability.metrics = true;
        let mounts = Mounts::new(&config);

        assert_eq!(mounts.map.as_deref(), Some("/map/"));
        assert_eq!(mounts.resolve("/metrics"), Route::Metrics);
        assert_eq!(mounts.resolve("/map/b/k"), Route::Map("b/k"));
        assert_eq!(mounts.resolve("/mapping/k"), Route::Proxy("mapping/k"));
        assert_eq!(mounts.resolve("/b/k"), Route::Proxy("b/k"));
    }

    #[test]
    fn test_metrics_path_proxied_when_disabled() {
        let mounts = Mounts::new(&default_state().config);
        assert_eq!(mounts.metrics, None);
        assert_eq!(mounts.resolve("/metrics"), Route::Proxy("metrics"));
    }

    #[test]
    fn test_mounts_normalized_once() {
        let mut config = Config::default();
        config.proxy.endpoint = "proxy".to_string();
        let mounts = Mounts::new(&config);
        assert_eq!(mounts.proxy, "/proxy/");
        assert_eq!(mounts.map, None);
        assert_eq!(mounts.resolve("/proxy/b/k"), Route::Proxy("b/k"));
        assert_eq!(mounts.resolve("/proxy"), Route::Unmatched);
    }

    #[test]
    fn test_logged_headers_in_order() {
        let mut headers = HeaderMap::new();
        headers.insert("user-agent", HeaderValue::from_static("curl/8"));
        headers.insert("range", HeaderValue::from_static("bytes=0-1"));
        let names = vec![
            "Range".to_string(),
            "X-Missing".to_string(),
            "User-Agent".to_string(),
        ];
        assert_eq!(
            logged_headers(&names, &headers),
            r#"Range="bytes=0-1" User-Agent="curl/8""#
        );
        assert_eq!(logged_headers(&[], &headers), "");
    }
}
