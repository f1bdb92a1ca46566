use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::Mutex;
use wireci_relay::ci::{CiError, CiService, HttpCiClient, TestMergeRequest};

#[derive(Debug, Clone, PartialEq)]
struct Seen {
    method: Method,
    path: String,
    api_key: Option<String>,
    body: Value,
}

type Log = Arc<Mutex<Vec<Seen>>>;

async fn mock_ci(State(log): State<Log>, method: Method, uri: Uri, headers: HeaderMap, body: Bytes) -> Response {
    let path = uri.path().trim_start_matches("/api").to_string();
    log.lock().await.push(Seen {
        method: method.clone(),
        path: path.clone(),
        api_key: headers
            .get("Api-Key")
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned),
        body: serde_json::from_slice(&body).unwrap_or(Value::Null),
    });
    match (method.as_str(), path.as_str()) {
        ("GET", "/status") => Json(json!({
            "maxCompileJobs": 1,
            "currentCompileJobs": ["main1"],
            "queuedJobs": [{"serverId": "main2"}]
        }))
        .into_response(),
        ("POST", "/build") => Json(json!({"success": true})).into_response(),
        ("POST", "/cancel") => StatusCode::NOT_FOUND.into_response(),
        ("POST", "/restart") => (StatusCode::BAD_GATEWAY, "upstream exploded").into_response(),
        ("GET", "/branch/main1") => Json(json!({"branch": "master"})).into_response(),
        ("POST", "/switch-branch") => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": "branch does not exist"})),
        )
            .into_response(),
        ("GET", "/test-merges/") => Json(json!([
            {"PR": 7, "server": "main1", "requester": "@5", "created_at": "2024-03-01T12:00:00"},
            {"PR": 8}
        ]))
        .into_response(),
        ("GET", "/test-merges/main3") => Json(Value::Null).into_response(),
        ("POST", "/test-merges") => Json(json!({"success": false, "reason": "dup"})).into_response(),
        ("DELETE", "/test-merges") => Json(json!({"success": true})).into_response(),
        _ => StatusCode::IM_A_TEAPOT.into_response(),
    }
}

async fn spawn_ci() -> (HttpCiClient, Log) {
    let log = Log::default();
    let app = Router::new().fallback(mock_ci).with_state(log.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    let client = HttpCiClient::new(&format!("http://{addr}/api"), "outgoing-secret".into()).unwrap();
    (client, log)
}

#[tokio::test]
async fn sends_api_key_and_paths() {
    let (ci, log) = spawn_ci().await;

    let status = ci.status().await.unwrap();
    assert_eq!(status.current_compile_jobs.len(), 1);
    ci.build("main1").await.unwrap();
    assert_eq!(ci.branch("main1").await.unwrap().as_deref(), Some("master"));

    let seen = log.lock().await.clone();
    assert_eq!(seen.len(), 3);
    assert!(seen.iter().all(|s| s.api_key.as_deref() == Some("outgoing-secret")));
    assert_eq!(seen[0].path, "/status");
    assert_eq!(seen[1].path, "/build");
    assert_eq!(seen[1].body, json!({"server": "main1"}));
    assert_eq!(seen[2].path, "/branch/main1");
}

#[tokio::test]
async fn maps_error_statuses() {
    let (ci, _) = spawn_ci().await;

    assert!(matches!(ci.cancel("main1").await, Err(CiError::NotFound)));
    assert_eq!(
        ci.restart("main1").await.unwrap_err().to_string(),
        "Server responded with an error code 502: `upstream exploded`"
    );
    assert_eq!(
        ci.switch_branch("main1", "nope").await.unwrap_err().to_string(),
        "branch does not exist"
    );
}

#[tokio::test]
async fn test_merge_endpoints() {
    let (ci, log) = spawn_ci().await;

    let all = ci.test_merges(None).await.unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].pr, 7);
    assert_eq!(all[0].server.as_deref(), Some("main1"));
    assert!(all[0].created_at.is_some());
    assert_eq!(all[1].server, None);
    assert!(ci.test_merges(Some("main3")).await.unwrap().is_empty());

    let req = TestMergeRequest {
        pr: 7,
        server: "main1".into(),
        requester: Some("@5".into()),
        updater: None,
        commit: None,
    };
    assert!(matches!(
        ci.create_test_merge(&req).await,
        Err(CiError::Unsuccessful(body)) if body.contains("dup")
    ));
    ci.delete_test_merge(&req).await.unwrap();

    let seen = log.lock().await.clone();
    assert_eq!(seen[3].method, Method::DELETE);
    assert_eq!(seen[3].body, json!({"pr": 7, "server": "main1", "requester": "@5"}));
}
