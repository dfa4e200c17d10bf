//! Object serving: the GET and HEAD responses for a resolved object.

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use std::future::Future;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::errors::ProxyError;
use crate::mapper::ObjectRef;
use crate::metrics;
use crate::range::{self, RangeRequest};
use crate::storage::backend::{ObjectStream, StorageError};
use crate::AppState;

/// Serve `object` for a GET or HEAD request.
///
/// The stat, the body open and the body transfer all share one deadline of
/// `proxy.timeout` from the moment this is called.  Errors before the
/// response head is built surface as [`ProxyError`]; a deadline hit while
/// streaming aborts the body.
pub async fn serve_object(
    state: &AppState,
    method: &Method,
    object: &ObjectRef,
    headers: &HeaderMap,
) -> Result<Response, ProxyError> {
    let timeout = state.config.proxy.timeout;
    let deadline = Instant::now() + timeout;

    let attrs = backend_call(
        "stat",
        deadline,
        timeout,
        state.storage.stat(&object.bucket, &object.key),
    )
    .await?;

    let range = if *method == Method::GET {
        let value = headers.get(header::RANGE).and_then(|v| v.to_str().ok());
        range::evaluate(value, attrs.size)
    } else {
        RangeRequest::NoRange
    };

    if range == RangeRequest::Invalid {
        debug!(
            "Ignoring unsatisfiable range for {}/{} ({} bytes)",
            object.bucket, object.key, attrs.size
        );
    }

    let (status, content_length, content_range, body) = match range {
        RangeRequest::Valid(r) => {
            let stream = backend_call(
                "read_range",
                deadline,
                timeout,
                state
                    .storage
                    .read_range(&object.bucket, &object.key, r.start, r.end),
            )
            .await?;
            (
                StatusCode::PARTIAL_CONTENT,
                r.content_length(),
                Some(r.content_range()),
                Some(stream),
            )
        }
        _ if *method == Method::HEAD => (StatusCode::OK, attrs.size, None, None),
        _ => {
            let stream = backend_call(
                "read",
                deadline,
                timeout,
                state.storage.read(&object.bucket, &object.key),
            )
            .await?;
            (StatusCode::OK, attrs.size, None, Some(stream))
        }
    };

    let mut response = match body {
        Some(stream) => (status, Body::from_stream(with_deadline(stream, deadline))).into_response(),
        None => status.into_response(),
    };

    let hdrs = response.headers_mut();
    hdrs.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    hdrs.insert(header::CONTENT_LENGTH, HeaderValue::from(content_length));
    if let Some(val) = content_range.and_then(|cr| HeaderValue::from_str(&cr).ok()) {
        hdrs.insert(header::CONTENT_RANGE, val);
    }
    if let Some(val) = attrs
        .content_type
        .as_deref()
        .and_then(|ct| HeaderValue::from_str(ct).ok())
    {
        hdrs.insert(header::CONTENT_TYPE, val);
    }

    Ok(response)
}

/// Await one backend call under the request deadline, recording its
/// outcome.
async fn backend_call<T>(
    operation: &'static str,
    deadline: Instant,
    timeout: std::time::Duration,
    call: impl Future<Output = Result<T, StorageError>>,
) -> Result<T, ProxyError> {
    let result = match tokio::time::timeout_at(deadline, call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(ProxyError::Storage(e)),
        Err(_) => Err(ProxyError::Timeout(timeout)),
    };
    match &result {
        Ok(_) => metrics::record_backend_operation(operation, "ok"),
        Err(e) => {
            if !matches!(e, ProxyError::Storage(s) if s.is_not_found()) {
                warn!("Backend {} failed: {}", operation, e);
            }
            metrics::record_backend_operation(operation, e.kind());
        }
    }
    result
}

/// End `stream` with a `TimedOut` error if it is still producing data at
/// `deadline`.
fn with_deadline(stream: ObjectStream, deadline: Instant) -> ObjectStream {
    Box::pin(futures::stream::unfold(
        Some(stream),
        move |state| async move {
            let mut stream = state?;
            match tokio::time::timeout_at(deadline, stream.next()).await {
                Ok(Some(item)) => Some((item, Some(stream))),
                Ok(None) => None,
                Err(_) => {
                    warn!("Deadline reached while streaming object body");
                    Some((
                        Err(std::io::Error::new(
                            std::io::ErrorKind::TimedOut,
                            "object transfer timed out",
                        )),
                        None,
                    ))
                }
            }
        },
    ))
}

// -- Unit tests ---------------------------------------------------------------
