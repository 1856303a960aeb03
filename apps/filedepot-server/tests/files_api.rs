mod common;

use axum::http::{Request, StatusCode};
use axum::body::Body;
use common::*;
use filedepot_server::config::Config;

fn admin_request(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("x-user-id", "root")
        .header("x-user-role", "ADMIN")
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn test_listing_is_scoped_to_owner() {
    let (app, _) = app(Config::default());
    upload_file(&app, "alice", "a.txt", b"a").await;
    upload_file(&app, "alice", "b.txt", b"b").await;
    upload_file(&app, "bob", "c.txt", b"c").await;

    let anonymous = send(&app, empty_request("GET", "/api/v1/files", None)).await;
    assert_eq!(anonymous.status, StatusCode::UNAUTHORIZED);
    assert_eq!(anonymous.json()["message"], "User ID is required");

    let own = send(&app, empty_request("GET", "/api/v1/files", Some("alice"))).await;
    assert_eq!(own.json().as_array().unwrap().len(), 2);

    // `all` is ignored for non-admins
    let sneaky = send(&app, empty_request("GET", "/api/v1/files?all=true", Some("bob"))).await;
    assert_eq!(sneaky.json().as_array().unwrap().len(), 1);

    let everything = send(&app, admin_request("GET", "/api/v1/files?all=true")).await;
    assert_eq!(everything.json().as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn test_delete_then_gone() {
    let (app, state) = app(Config::default());
    let id = upload_file(&app, "alice", "a.txt", b"payload").await;
    let uri = format!("/api/v1/files/{}", id);

    let detail = send(&app, empty_request("GET", &uri, Some("alice"))).await;
    assert_eq!(detail.json()["downloadUrl"], format!("/api/v1/files/{}/content", id));

    let forbidden = send(&app, empty_request("DELETE", &uri, Some("bob"))).await;
    assert_eq!(forbidden.status, StatusCode::FORBIDDEN);

    let deleted = send(&app, empty_request("DELETE", &uri, Some("alice"))).await;
    assert_eq!(deleted.status, StatusCode::NO_CONTENT);

    let gone = send(&app, empty_request("GET", &uri, Some("alice"))).await;
    assert_eq!(gone.status, StatusCode::GONE);

    let record = state.files().get(&id).await.unwrap().unwrap();
    assert!(record.is_deleted);
    assert!(state.storage().stat(&record.path).await.unwrap().is_none());

    let missing = send(&app, empty_request("GET", "/api/v1/files/unknown", Some("alice"))).await;
    assert_eq!(missing.status, StatusCode::NOT_FOUND);
}
