#![allow(dead_code)]

use axum::{
    body::{to_bytes, Body},
    http::{HeaderMap, Request, StatusCode},
    Router,
};
use bytes::Bytes;
use filedepot_server::config::Config;
use filedepot_server::AppState;
use serde_json::Value;
use tower::ServiceExt;

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl TestResponse {
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap_or(Value::Null)
    }
}

pub fn app(config: Config) -> (Router, AppState) {
    let state = AppState::in_memory(config);
    (filedepot_server::router(state.clone()), state)
}

pub async fn send(app: &Router, request: Request<Body>) -> TestResponse {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    TestResponse {
        status,
        headers,
        body,
    }
}

pub fn json_request(method: &str, uri: &str, user: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(user) = user {
        builder = builder.header("x-user-id", user);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

pub fn empty_request(method: &str, uri: &str, user: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(user) = user {
        builder = builder.header("x-user-id", user);
    }
    builder.body(Body::empty()).unwrap()
}

pub fn block_request(session: &str, block_id: &str, range: Option<&str>, data: Vec<u8>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("PUT")
        .uri(format!("/api/v1/upload/{}/block/{}", session, block_id))
        .header("content-type", "application/octet-stream");
    if let Some(range) = range {
        builder = builder.header("content-range", range);
    }
    builder.body(Body::from(data)).unwrap()
}

/// Open a session over HTTP and return its path
pub async fn start_session(app: &Router, file_name: &str, total: u64) -> String {
    let response = send(
        app,
        json_request(
            "POST",
            "/api/v1/upload/start",
            None,
            serde_json::json!({ "fileName": file_name, "totalBytes": total }),
        ),
    )
    .await;
    assert_eq!(response.status, StatusCode::OK);
    response.json()["sessionPath"].as_str().unwrap().to_string()
}

/// Upload `data` as one block and commit it for `owner`; returns the file id
pub async fn upload_file(app: &Router, owner: &str, file_name: &str, data: &[u8]) -> String {
    let session = start_session(app, file_name, data.len() as u64).await;
    let staged = send(app, block_request(&session, "b0", None, data.to_vec())).await;
    assert_eq!(staged.status, StatusCode::OK);

    let committed = send(
        app,
        json_request(
            "POST",
            &format!("/api/v1/upload/{}/commit", session),
            Some(owner),
            serde_json::json!({ "blockIds": ["b0"] }),
        ),
    )
    .await;
    assert_eq!(committed.status, StatusCode::CREATED);
    committed.json()["id"].as_str().unwrap().to_string()
}
