//! GCS backend tests against a local stand-in for the JSON API.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query};
use axum::http::header::{AUTHORIZATION, CONTENT_RANGE, RANGE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures::TryStreamExt;
use gcsproxy::config::{Config, GcsStorageConfig};
use gcsproxy::storage::backend::{ObjectStore, StorageError};
use gcsproxy::storage::gcs::GcsBackend;
use gcsproxy::AppState;
use serde_json::json;

/// Object served with a 200 even when a range is requested.
const IGNORES_RANGE: &str = "musics/ignores-range.txt";

fn fixture(key: &str) -> Option<(&'static [u8], &'static str)> {
    match key {
        "musics/music/music1.txt" => Some((b"some nice music", "text/plain")),
        "musics/music/music2.txt" => Some((b"some nicer music", "audio/mpeg")),
        IGNORES_RANGE => Some((b"some nicer music", "text/plain")),
        _ => None,
    }
}

fn gcs_error(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(json!({"error": {"code": status.as_u16(), "message": message}})),
    )
        .into_response()
}

async fn fake_object(
    Path((bucket, object)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    if headers.contains_key(AUTHORIZATION) {
        return (StatusCode::BAD_REQUEST, "anonymous client sent credentials").into_response();
    }
    match bucket.as_str() {
        "my-bucket" => {}
        "forbidden-bucket" => {
            return gcs_error(
                StatusCode::FORBIDDEN,
                "anonymous caller does not have storage.objects.get access",
            )
        }
        _ => return gcs_error(StatusCode::NOT_FOUND, "The specified bucket does not exist."),
    }
    let Some((data, content_type)) = fixture(&object) else {
        return gcs_error(
            StatusCode::NOT_FOUND,
            &format!("No such object: {bucket}/{object}"),
        );
    };

    if query.get("alt").map(String::as_str) != Some("media") {
        if query.get("fields").map(String::as_str) != Some("size,contentType") {
            return (StatusCode::BAD_REQUEST, "unexpected metadata fields").into_response();
        }
        return Json(json!({"size": data.len().to_string(), "contentType": content_type}))
            .into_response();
    }

    let range = headers
        .get(RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("bytes="))
        .and_then(|v| v.split_once('-'))
        .and_then(|(s, e)| Some((s.parse::<usize>().ok()?, e.parse::<usize>().ok()?)));
    match range {
        Some((start, end)) if object != IGNORES_RANGE => (
            StatusCode::PARTIAL_CONTENT,
            [(CONTENT_RANGE, format!("bytes {start}-{end}/{}", data.len()))],
            data[start..=end].to_vec(),
        )
            .into_response(),
        _ => data.to_vec().into_response(),
    }
}

/// Start the fake JSON API and return a backend pointed at it.
async fn start_fake_gcs() -> GcsBackend {
    let app = Router::new().route("/storage/v1/b/:bucket/o/:object", get(fake_object));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    GcsBackend::new(&GcsStorageConfig {
        endpoint: format!("http://{addr}"),
        credentials_file: String::new(),
        anonymous: true,
    })
    .unwrap()
}

/// Start the proxy for `bucket` in front of the fake API.
async fn start_proxy(bucket: &str) -> String {
    let mut config = Config::default();
    config.bucket_name = bucket.to_string();
    config.proxy.timeout = Duration::from_secs(5);
    let state = Arc::new(AppState {
        config,
        storage: Arc::new(start_fake_gcs().await),
    });
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, gcsproxy::server::app(state))
            .await
            .unwrap();
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn test_stat_parses_size_and_content_type() {
    let backend = start_fake_gcs().await;
    let attrs = backend
        .stat("my-bucket", "musics/music/music2.txt")
        .await
        .unwrap();
    assert_eq!(attrs.size, 16);
    assert_eq!(attrs.content_type.as_deref(), Some("audio/mpeg"));
}

#[tokio::test]
async fn test_read_and_read_range() {
    let backend = start_fake_gcs().await;

    let full: Vec<bytes::Bytes> = backend
        .read("my-bucket", "musics/music/music1.txt")
        .await
        .unwrap()
        .try_collect()
        .await
        .unwrap();
    assert_eq!(full.concat(), b"some nice music");

    let part: Vec<bytes::Bytes> = backend
        .read_range("my-bucket", "musics/music/music2.txt", 2, 9)
        .await
        .unwrap()
        .try_collect()
        .await
        .unwrap();
    assert_eq!(part.concat(), b"me nicer");
}

#[tokio::test]
async fn test_read_range_rejects_full_response() {
    let backend = start_fake_gcs().await;
    let err = backend
        .read_range("my-bucket", IGNORES_RANGE, 2, 9)
        .await
        .err()
        .unwrap();
    assert!(!err.is_not_found());
    assert_eq!(err.to_string(), "GCS read range: expected 206, got 200 OK");
}

#[tokio::test]
async fn test_not_found_kinds() {
    let backend = start_fake_gcs().await;
    let err = backend
        .stat("my-bucket", "musics/music/some-music.txt")
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::ObjectNotExist));

    let err = backend
        .stat("other-bucket", "musics/music/music1.txt")
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::BucketNotExist));
}

#[tokio::test]
async fn test_proxy_over_gcs() {
    let base = start_proxy("my-bucket").await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("{base}/musics/music/music1.txt"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()["content-length"], "15");
    assert_eq!(resp.headers()["content-type"], "text/plain");
    assert_eq!(resp.text().await.unwrap(), "some nice music");

    let resp = client
        .get(format!("{base}/musics/music/music2.txt"))
        .header("range", "bytes=2-9")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(resp.headers()["content-range"], "bytes 2-9/16");
    assert_eq!(resp.text().await.unwrap(), "me nicer");

    let resp = client
        .get(format!("{base}/musics/music/some-music.txt"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert_eq!(resp.text().await.unwrap(), "storage: object doesn't exist\n");

    let resp = client
        .get(format!("{base}/{IGNORES_RANGE}"))
        .header("range", "bytes=2-9")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert_eq!(
        resp.text().await.unwrap(),
        "GCS read range: expected 206, got 200 OK\n"
    );
}

#[tokio::test]
async fn test_proxy_over_gcs_missing_bucket() {
    let base = start_proxy("other-bucket").await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("{base}/musics/music/music1.txt"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert_eq!(resp.text().await.unwrap(), "storage: bucket doesn't exist\n");

    let resp = client
        .head(format!("{base}/musics/music/music1.txt"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert_eq!(resp.text().await.unwrap(), "");
}

#[tokio::test]
async fn test_proxy_over_gcs_forbidden() {
    let base = start_proxy("forbidden-bucket").await;
    let resp = reqwest::Client::new()
        .get(format!("{base}/musics/music/music1.txt"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert_eq!(
        resp.text().await.unwrap(),
        "GCS stat: anonymous caller does not have storage.objects.get access (code 403)\n"
    );
}
