//! HTTP router behaviour.

use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use rowsync_engine::{AclTable, Role, SyncEngine};
use rowsync_protocol::{Scope, PROTOCOL_VERSION, USER_HEADER, VERSION_HEADER};
use rowsync_server::{ServerConfig, SyncServer};
use rowsync_storage::{InMemoryBackend, InMemoryLockTable};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

fn app() -> Router {
    let engine = SyncEngine::new(
        Arc::new(InMemoryBackend::new()),
        Arc::new(InMemoryLockTable::new()),
    );
    let acl = AclTable::new()
        .with_grant(Scope::User("admin".into()), Role::Administer)
        .with_grant(Scope::Default, Role::Synchronize);
    SyncServer::with_engine(ServerConfig::default(), engine, Arc::new(acl)).router()
}

async fn send(
    app: &Router,
    method: Method,
    uri: &str,
    user: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, axum::http::HeaderMap, Value) {
    let mut request = Request::builder().method(method).uri(uri);
    if let Some(user) = user {
        request = request.header(USER_HEADER, user);
    }
    let request = match body {
        Some(body) => request
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, headers, json)
}

async fn with_table(app: &Router) {
    let (status, _, _) = send(
        app,
        Method::PUT,
        "/tables/people",
        Some("admin"),
        Some(json!({ "columns": [{ "name": "name" }] })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn create_table_and_describe() {
    let app = app();
    with_table(&app).await;

    let (status, headers, body) = send(&app, Method::GET, "/tables/people", Some("bob"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[VERSION_HEADER], PROTOCOL_VERSION);
    assert_eq!(body["tableId"], "people");
    assert_eq!(headers[header::ETAG], body["dataETag"].as_str().unwrap());

    let (status, _, body) = send(&app, Method::GET, "/tables", Some("bob"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn missing_user_is_unauthorized() {
    let app = app();
    let (status, headers, body) = send(&app, Method::GET, "/tables", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(headers[VERSION_HEADER], PROTOCOL_VERSION);
    assert_eq!(body["kind"], "PERMISSION_DENIED");
}

#[tokio::test]
async fn other_protocol_versions_are_rejected() {
    let app = app();
    let request = Request::builder()
        .uri("/tables")
        .header(USER_HEADER, "bob")
        .header(VERSION_HEADER, "0.9")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn write_diff_and_conflict() {
    let app = app();
    with_table(&app).await;

    let (status, _, row) = send(
        &app,
        Method::PUT,
        "/tables/people/rows/r1",
        Some("bob"),
        Some(json!({ "rowId": "r1", "filterScope": { "defaultAccess": "FULL" }, "values": { "name": "Ada" } })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(row["syncState"], "new_row");
    let etag = row["rowETag"].as_str().unwrap().to_string();

    let (status, headers, page) = send(&app, Method::GET, "/tables/people/diff", Some("bob"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["rows"][0]["rowId"], "r1");
    assert_eq!(page["hasMore"], false);
    assert!(page["websafeResumeCursor"].is_string());
    let d1 = headers[header::ETAG].to_str().unwrap().to_string();

    let (status, _, ack) = send(
        &app,
        Method::POST,
        &format!("/tables/people/ack?data_etag={d1}"),
        Some("bob"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["acknowledged"], 1);

    let (status, _, list) = send(
        &app,
        Method::GET,
        "/tables/people/diff/changeSets",
        Some("bob"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list["dataETags"][0], d1);
    assert_eq!(list["sequenceValue"], 1);

    let (status, _, rows) = send(
        &app,
        Method::GET,
        &format!("/tables/people/diff/changeSets/{d1}?active_only=true"),
        Some("bob"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(rows["rows"][0]["syncState"], "synced");

    // stale update
    let (status, _, body) = send(
        &app,
        Method::PUT,
        "/tables/people/rows/r1",
        Some("bob"),
        Some(json!({ "rowId": "r1", "rowETag": "stale", "filterScope": { "defaultAccess": "FULL" }, "values": { "name": "Bea" } })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["kind"], "CONFLICT");
    assert_eq!(body["conflict"]["serverRow"]["rowETag"], etag.as_str());
    assert_eq!(body["conflict"]["serverRow"]["syncState"], "in_conflict");

    let (status, _, row) = send(
        &app,
        Method::POST,
        "/tables/people/rows/r1/resolve",
        Some("bob"),
        Some(json!({ "resolution": "ACCEPT_REMOTE" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(row["syncState"], "synced");

    let (status, _, _) = send(
        &app,
        Method::DELETE,
        &format!("/tables/people/rows/r1?row_etag={etag}"),
        Some("bob"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _, _) = send(&app, Method::GET, "/tables/people/rows/r1", Some("bob"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn rows_sent_without_scope_stay_with_their_creator() {
    let app = app();
    with_table(&app).await;

    let (status, _, row) = send(
        &app,
        Method::PUT,
        "/tables/people/rows/y",
        Some("alice"),
        Some(json!({ "rowId": "y", "values": { "name": "a" } })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(row["filterScope"]["defaultAccess"], "FULL");
    assert_eq!(row["filterScope"]["rowOwner"], "alice");

    let (status, _, read) = send(&app, Method::GET, "/tables/people/rows/y", Some("alice"), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _, updated) = send(
        &app,
        Method::PUT,
        "/tables/people/rows/y",
        Some("alice"),
        Some(json!({ "rowId": "y", "rowETag": read["rowETag"], "values": { "name": "b" } })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["values"]["name"], "b");
    assert_eq!(updated["filterScope"]["rowOwner"], "alice");

    let (status, _, body) = send(
        &app,
        Method::PUT,
        "/tables/people/rows/x",
        Some("alice"),
        Some(json!({ "rowId": "x", "filterScope": { "defaultAccess": "HIDDEN", "rowOwner": "bob" } })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["kind"], "PERMISSION_DENIED");
}

#[tokio::test]
async fn bulk_write_checks_the_table_etag() {
    let app = app();
    with_table(&app).await;
    let (_, headers, _) = send(&app, Method::GET, "/tables/people", Some("bob"), None).await;
    let d0 = headers[header::ETAG].to_str().unwrap().to_string();

    let rows = json!({
        "dataETag": d0,
        "rows": [
            { "rowId": "a", "filterScope": { "defaultAccess": "FULL" } },
            { "rowId": "b", "filterScope": { "defaultAccess": "FULL" }, "values": { "missing": "x" } }
        ]
    });
    let (status, _, body) = send(&app, Method::PUT, "/tables/people/rows", Some("bob"), Some(rows)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "BAD_COLUMN_NAME");

    let rows = json!({
        "dataETag": d0,
        "rows": [{ "rowId": "a", "filterScope": { "defaultAccess": "FULL" } }]
    });
    let (status, _, body) = send(&app, Method::PUT, "/tables/people/rows", Some("bob"), Some(rows.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["rows"][0]["outcome"], "SUCCESS");

    let (status, _, body) = send(&app, Method::PUT, "/tables/people/rows", Some("bob"), Some(rows)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["kind"], "TABLE_DATA_ETAG_MISMATCH");
}

#[tokio::test]
async fn foreign_cursor_is_gone() {
    let app = app();
    with_table(&app).await;
    for id in ["a", "b"] {
        send(
            &app,
            Method::PUT,
            &format!("/tables/people/rows/{id}"),
            Some("bob"),
            Some(json!({ "rowId": id, "filterScope": { "defaultAccess": "FULL" } })),
        )
        .await;
    }

    let (_, _, page) = send(&app, Method::GET, "/tables/people/diff?fetch_limit=1", Some("bob"), None).await;
    assert_eq!(page["hasMore"], true);
    let cursor = page["websafeResumeCursor"].as_str().unwrap().to_string();

    let (status, _, page) = send(
        &app,
        Method::GET,
        &format!("/tables/people/diff?fetch_limit=1&cursor={cursor}"),
        Some("bob"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["rows"][0]["rowId"], "b");

    let (status, _, body) = send(
        &app,
        Method::GET,
        &format!("/tables/people/rows?cursor={cursor}"),
        Some("bob"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::GONE);
    assert_eq!(body["kind"], "INCONSISTENT_STATE");
}

#[tokio::test]
async fn admin_only_operations() {
    let app = app();
    with_table(&app).await;

    let (status, _, _) = send(&app, Method::DELETE, "/tables/people", Some("bob"), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _, _) = send(&app, Method::DELETE, "/tables/people", Some("admin"), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _, body) = send(&app, Method::GET, "/tables/people/diff", Some("bob"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["kind"], "NOT_FOUND");
}
