mod common;

use axum::http::StatusCode;
use common::*;
use filedepot_server::config::{Config, UploadConfig};
use futures::future::join_all;
use serde_json::json;

const MIB: usize = 1024 * 1024;

fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
}

#[tokio::test]
async fn test_three_chunk_upload_round_trips() {
    let (app, _) = app(Config::default());
    let total = 10 * MIB;
    let session = start_session(&app, "a.bin", total as u64).await;

    let chunks = [pattern(4 * MIB, 1), pattern(4 * MIB, 2), pattern(2 * MIB, 3)];
    let mut offset = 0;
    for (i, chunk) in chunks.iter().enumerate() {
        let range = format!("bytes {}-{}/{}", offset, offset + chunk.len() - 1, total);
        let response = send(
            &app,
            block_request(&session, &format!("block-{}", i), Some(&range), chunk.clone()),
        )
        .await;
        assert_eq!(response.status, StatusCode::OK, "{:?}", response.json());
        offset += chunk.len();
        assert_eq!(response.json()["uploadedBytes"], offset as u64);
    }

    let committed = send(
        &app,
        json_request(
            "POST",
            &format!("/api/v1/upload/{}/commit", session),
            Some("alice"),
            json!({ "blockIds": ["block-0", "block-1", "block-2"] }),
        ),
    )
    .await;
    assert_eq!(committed.status, StatusCode::CREATED);
    assert_eq!(committed.json()["fileName"], "a.bin");
    assert_eq!(committed.json()["size"], 10_485_760u64);
    let id = committed.json()["id"].as_str().unwrap().to_string();

    let detail = send(&app, empty_request("GET", &format!("/api/v1/files/{}", id), Some("alice"))).await;
    assert_eq!(detail.status, StatusCode::OK);
    assert_eq!(detail.json()["sizeBytes"], 10_485_760u64);

    let content = send(
        &app,
        empty_request("GET", &format!("/api/v1/files/{}/content", id), Some("alice")),
    )
    .await;
    assert_eq!(content.status, StatusCode::OK);
    assert_eq!(content.body.len(), 10_485_760);
    assert_eq!(content.body.to_vec(), chunks.concat());
}

#[tokio::test]
async fn test_concurrent_chunks_beyond_budget_all_land() {
    let config = Config {
        upload: UploadConfig {
            max_concurrency: 8,
            ..UploadConfig::default()
        },
        ..Config::default()
    };
    let (app, state) = app(config);
    let session = start_session(&app, "parallel.bin", 10 * 1000).await;

    let requests = (0..10).map(|i| {
        let app = app.clone();
        let session = session.clone();
        async move {
            send(&app, block_request(&session, &format!("b{:02}", i), None, vec![i as u8; 1000])).await
        }
    });
    let responses = join_all(requests).await;
    assert!(responses.iter().all(|r| r.status == StatusCode::OK));
    assert_eq!(state.uploads().available_slots(), 8);

    let session_record = state.uploads().session(&session).await.unwrap().unwrap();
    assert_eq!(session_record.uploaded_bytes, 10_000);
}

#[tokio::test]
async fn test_rejected_blocks_change_nothing() {
    let config = Config {
        upload: UploadConfig {
            max_chunk_bytes: 1024,
            ..UploadConfig::default()
        },
        ..Config::default()
    };
    let (app, state) = app(config);
    let session = start_session(&app, "small.bin", 0).await;

    let oversize = send(&app, block_request(&session, "big", None, vec![0; 2000])).await;
    assert_eq!(oversize.status, StatusCode::BAD_REQUEST);
    assert_eq!(oversize.json()["message"], "Block size too large. Maximum 1 KB allowed");

    let mismatch = send(
        &app,
        block_request(&session, "short", Some("bytes 0-99/100"), vec![0; 50]),
    )
    .await;
    assert_eq!(mismatch.status, StatusCode::BAD_REQUEST);
    assert_eq!(
        mismatch.json()["message"],
        "Content-Range length mismatch: expected 100, got 50"
    );

    let garbage = send(&app, block_request(&session, "bad", Some("lines 1-2"), vec![0; 2])).await;
    assert_eq!(garbage.status, StatusCode::BAD_REQUEST);

    let record = state.uploads().session(&session).await.unwrap().unwrap();
    assert_eq!(record.uploaded_bytes, 0);

    let unknown = send(&app, block_request("nope_x.bin", "b0", None, vec![1])).await;
    assert_eq!(unknown.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_commit_skips_unstaged_blocks() {
    let (app, _) = app(Config::default());
    let session = start_session(&app, "partial.txt", 0).await;
    send(&app, block_request(&session, "b1", None, b"world".to_vec())).await;
    send(&app, block_request(&session, "b0", None, b"hello ".to_vec())).await;

    let missing_list = send(
        &app,
        json_request("POST", &format!("/api/v1/upload/{}/commit", session), None, json!({})),
    )
    .await;
    assert_eq!(missing_list.status, StatusCode::BAD_REQUEST);
    assert_eq!(missing_list.json()["message"], "blockIds array required");

    let committed = send(
        &app,
        json_request(
            "POST",
            &format!("/api/v1/upload/{}/commit", session),
            None,
            json!({ "blockIds": ["b0", "never-sent", "b1"] }),
        ),
    )
    .await;
    assert_eq!(committed.status, StatusCode::CREATED);
    let id = committed.json()["id"].as_str().unwrap().to_string();

    let content = send(&app, empty_request("GET", &format!("/api/v1/files/{}/content", id), None)).await;
    assert_eq!(&content.body[..], b"hello world");
}

#[tokio::test]
async fn test_abort_forgets_session() {
    let (app, state) = app(Config::default());
    let session = start_session(&app, "gone.bin", 0).await;
    send(&app, block_request(&session, "b0", None, vec![9; 16])).await;

    let aborted = send(
        &app,
        empty_request("POST", &format!("/api/v1/upload/{}/abort", session), None),
    )
    .await;
    assert_eq!(aborted.status, StatusCode::OK);
    assert_eq!(aborted.json()["aborted"], true);

    assert!(state.uploads().session(&session).await.unwrap().is_none());
    let late = send(&app, block_request(&session, "b1", None, vec![1])).await;
    assert_eq!(late.status, StatusCode::NOT_FOUND);

    let progress = send(
        &app,
        empty_request("GET", &format!("/api/v1/upload/{}/progress", session), None),
    )
    .await;
    assert_eq!(progress.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_progress_stream_ends_on_commit() {
    let (app, _) = app(Config::default());
    let session = start_session(&app, "p.bin", 3).await;
    send(&app, block_request(&session, "b0", None, vec![1, 2, 3])).await;
    send(
        &app,
        json_request(
            "POST",
            &format!("/api/v1/upload/{}/commit", session),
            None,
            json!({ "blockIds": ["b0"] }),
        ),
    )
    .await;

    let progress = send(
        &app,
        empty_request("GET", &format!("/api/v1/upload/{}/progress", session), None),
    )
    .await;
    assert_eq!(progress.status, StatusCode::OK);
    assert_eq!(progress.headers["content-type"], "text/event-stream");

    let text = String::from_utf8(progress.body.to_vec()).unwrap();
    assert!(text.contains(r#"data: {"bytes":3,"committed":true,"totalBytes":3}"#), "{}", text);
}

#[tokio::test]
async fn test_api_key_gates_upload_routes() {
    let config = Config {
        upload: UploadConfig {
            api_key: Some("s3cret".to_string()),
            ..UploadConfig::default()
        },
        ..Config::default()
    };
    let (app, _) = app(config);

    let denied = send(
        &app,
        json_request("POST", "/api/v1/upload/start", None, json!({ "fileName": "a.bin" })),
    )
    .await;
    assert_eq!(denied.status, StatusCode::UNAUTHORIZED);

    let mut request = json_request("POST", "/api/v1/upload/start", None, json!({ "fileName": "a.bin" }));
    request
        .headers_mut()
        .insert("x-api-key", "s3cret".parse().unwrap());
    assert_eq!(send(&app, request).await.status, StatusCode::OK);

    let health = send(&app, empty_request("GET", "/health", None)).await;
    assert_eq!(health.status, StatusCode::OK);
    assert_eq!(health.json()["status"], "healthy");
}
