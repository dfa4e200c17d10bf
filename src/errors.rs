//! HTTP-facing error types.
//!
//! Every failure a request can hit is resolved to a [`ProxyError`], which
//! implements [`axum::response::IntoResponse`] so handlers can simply
//! return `Err(..)` and still produce a complete response.

use axum::http::{header, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::storage::backend::StorageError;

/// Body written for requests using a method other than GET or HEAD.
pub const METHOD_NOT_ALLOWED_BODY: &str = "method not allowed\n";

/// Errors a proxied request can end in.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// The request method is not GET or HEAD.
    #[error("method not allowed")]
    MethodNotAllowed,

    /// The path does not carry both a bucket and an object key.
    #[error("invalid object path: {path}")]
    InvalidPath { path: String },

    /// The backend took longer than the configured timeout.
    #[error("storage: request timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The storage backend failed or reported a missing object.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl ProxyError {
    /// Return the HTTP status code for this error.
    ///
    /// Backend failures and timeouts are reported as 404, the same as a
    /// missing object.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ProxyError::InvalidPath { .. } => StatusCode::NOT_FOUND,
            ProxyError::Timeout(_) => StatusCode::NOT_FOUND,
            ProxyError::Storage(_) => StatusCode::NOT_FOUND,
        }
    }

    /// Return a short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ProxyError::MethodNotAllowed => "method_not_allowed",
            ProxyError::InvalidPath { .. } => "invalid_path",
            ProxyError::Timeout(_) => "timeout",
            ProxyError::Storage(e) if e.is_not_found() => "not_found",
            ProxyError::Storage(_) => "backend",
        }
    }

    /// Build the response for a request made with `method`.
    ///
    /// HEAD responses never carry a body.
    pub fn into_response_for(self, method: &Method) -> Response {
        if *method == Method::HEAD {
            return self.status_code().into_response();
        }
        self.into_response()
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = match self {
            ProxyError::MethodNotAllowed => METHOD_NOT_ALLOWED_BODY.to_string(),
            other => format!("{other}\n"),
        };
        (
            status,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            body,
        )
            .into_response()
    }
}
