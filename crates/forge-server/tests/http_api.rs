//! HTTP surface tests via in-process `tower::oneshot` requests.

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

use forge::adapters::Adapters;
use forge::engine::Engine;
use forge::parser::fallback::RegexParser;
use forge_server::{AppState, build_app};

fn app() -> (Router, Arc<Engine>) {
    let engine = Arc::new(Engine::new(Adapters::new(Arc::new(RegexParser::new()))));
    (build_app(AppState { engine: Arc::clone(&engine) }), engine)
}

async fn request(app: Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(value) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(value.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

fn upsert_change_set(state: &str, path: &str, content: &str) -> Value {
    let symbol = format!("sym://text/{path}#document");
    json!({
        "state": state,
        "ops": [{
            "target": {"symbol_id": symbol},
            "writes": [symbol],
            "effect": {"kind": "upsert_file", "path": path, "content": content},
        }],
    })
}

#[tokio::test]
async fn health_is_ok() {
    let (app, _) = app();
    let (status, body) = request(app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);
}

#[tokio::test]
async fn states_listing_includes_main() {
    let (app, _) = app();
    let (status, body) = request(app, "GET", "/v1/states", None).await;
    assert_eq!(status, StatusCode::OK);
    let states = body["states"].as_array().unwrap();
    assert_eq!(states.len(), 1);
    assert_eq!(states[0]["name"], "main");
    assert_eq!(states[0]["policy"]["allow_open_conflicts"], true);
}

#[tokio::test]
async fn create_state_and_fetch_snapshot() {
    let (app, _) = app();
    let (status, body) = request(
        app.clone(),
        "POST",
        "/v1/states",
        Some(json!({"name": "ws/alice", "from_state": "main"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["ok"], true);
    assert_eq!(body["state"]["name"], "ws/alice");
    assert_eq!(body["state"]["base_state"], "main");

    let (status, body) = request(app, "GET", "/v1/states/ws%2Falice", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"]["name"], "ws/alice");
    assert!(body["tree"].is_object());
    assert!(body["open_conflicts"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn duplicate_state_is_bad_request() {
    let (app, _) = app();
    let (status, body) = request(
        app,
        "POST",
        "/v1/states",
        Some(json!({"name": "main"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["ok"], false);
    assert!(body["error"].as_str().unwrap().contains("already exists"));
}

#[tokio::test]
async fn missing_parent_is_bad_request() {
    let (app, _) = app();
    let (status, _) = request(
        app,
        "POST",
        "/v1/states",
        Some(json!({"name": "ws/x", "from_state": "ghost"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn change_set_submission_roundtrip() {
    let (app, engine) = app();
    let (status, body) = request(
        app.clone(),
        "POST",
        "/v1/change-sets",
        Some(json!({"change_set": upsert_change_set("main", "a.txt", "hi\n")})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);
    assert_eq!(body["status"], "accepted");
    let change_set_id = body["change_set_id"].as_str().unwrap().to_owned();
    let op_id = body["accepted"][0].as_str().unwrap().to_owned();

    // Raw (unwrapped) submissions are accepted too.
    let (status, body) = request(
        app.clone(),
        "POST",
        "/v1/change-sets",
        Some(upsert_change_set("main", "b.txt", "yo\n")),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "accepted");

    let (status, body) = request(
        app.clone(),
        "GET",
        &format!("/v1/change-sets/{change_set_id}"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "accepted");

    let (status, body) = request(app.clone(), "GET", &format!("/v1/ops/{op_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["effect"]["kind"], "upsert_file");

    let (status, body) = request(app, "GET", "/v1/change-sets?state=main", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["change_sets"].as_array().unwrap().len(), 2);

    assert_eq!(engine.materialize("main").unwrap()["a.txt"], "hi\n");
}

#[tokio::test]
async fn shape_errors_are_bad_request_without_mutation() {
    let (app, engine) = app();
    let (status, body) = request(
        app,
        "POST",
        "/v1/change-sets",
        Some(json!({"state": "main", "ops": []})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["ok"], false);
    assert!(engine.materialize("main").unwrap().is_empty());
}

#[tokio::test]
async fn unknown_resources_are_not_found() {
    let (app, _) = app();
    for uri in [
        "/v1/states/ghost",
        "/v1/ops/op_aaaaaaaaaaaaaaaaaaaa",
        "/v1/change-sets/cs_aaaaaaaaaaaaaaaaaaaa",
        "/v1/conflicts/conf_999",
    ] {
        let (status, body) = request(app.clone(), "GET", uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{uri}");
        assert_eq!(body["ok"], false, "{uri}");
    }
}

#[tokio::test]
async fn ops_endpoint_accepts_all_three_shapes() {
    let (app, _) = app();
    let op = |path: &str| {
        let symbol = format!("sym://text/{path}#document");
        json!({
            "state": "main",
            "target": {"symbol_id": symbol},
            "writes": [symbol],
            "effect": {"kind": "upsert_file", "path": path, "content": "x\n"},
        })
    };

    let (status, body) = request(app.clone(), "POST", "/v1/ops", Some(json!({"op": op("one.txt")}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "accepted");

    let (status, body) = request(
        app.clone(),
        "POST",
        "/v1/ops",
        Some(json!({"ops": [op("two.txt"), op("three.txt")]})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["accepted"].as_array().unwrap().len(), 2);

    let (status, body) = request(app, "POST", "/v1/ops", Some(op("four.txt"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "accepted");
}

#[tokio::test]
async fn promote_and_conflict_flow_over_http() {
    let (app, _) = app();

    // Seed main, fork two workspaces.
    request(
        app.clone(),
        "POST",
        "/v1/change-sets",
        Some(upsert_change_set("main", "a.txt", "hi\n")),
    )
    .await;
    for name in ["ws/alice", "ws/bob"] {
        request(
            app.clone(),
            "POST",
            "/v1/states",
            Some(json!({"name": name, "from_state": "main"})),
        )
        .await;
    }

    let replace = |state: &str, who: &str| {
        json!({
            "state": state,
            "ops": [{
                "target": {"symbol_id": "sym://python/demo.py#def:calc"},
                "writes": ["sym://python/demo.py#def:calc"],
                "effect": {
                    "kind": "python_replace_symbol",
                    "path": "demo.py",
                    "symbol_kind": "def",
                    "symbol_name": "calc",
                    "before_content": "def calc():\n    return 0\n",
                    "after_content": format!("def calc():\n    return '{who}'\n"),
                },
            }],
        })
    };
    request(app.clone(), "POST", "/v1/change-sets", Some(replace("ws/alice", "alice"))).await;
    request(app.clone(), "POST", "/v1/change-sets", Some(replace("ws/bob", "bob"))).await;

    let (status, body) = request(
        app.clone(),
        "POST",
        "/v1/states/ws%2Falice/promote",
        Some(json!({"target_state": "main", "author": "alice"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);

    let (status, body) = request(
        app.clone(),
        "POST",
        "/v1/states/ws%2Fbob/promote",
        Some(json!({"target_state": "main", "author": "bob"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], false);
    let conflict_id = body["conflicts"][0].as_str().unwrap().to_owned();

    let (status, body) = request(
        app.clone(),
        "GET",
        &format!("/v1/conflicts/{conflict_id}"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["type"], "semantic_write_conflict");
    assert_eq!(body["status"], "open");

    let (status, body) = request(app.clone(), "GET", "/v1/states/main/conflicts", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["conflicts"].as_array().unwrap().len(), 1);

    // Resolve with a descending replace.
    let (_, main_snapshot) = request(app.clone(), "GET", "/v1/states/main", None).await;
    let head = main_snapshot["state"]["heads"][0].as_str().unwrap().to_owned();
    let current = main_snapshot["tree"]["demo.py"].as_str().unwrap().to_owned();
    let resolver = json!({
        "state": "main",
        "parents": [head],
        "target": {"symbol_id": "sym://python/demo.py#def:calc"},
        "writes": ["sym://python/demo.py#def:calc"],
        "effect": {
            "kind": "python_replace_symbol",
            "path": "demo.py",
            "symbol_kind": "def",
            "symbol_name": "calc",
            "before_content": current,
            "after_content": "def calc():\n    return 'merged'\n",
        },
    });
    let (status, body) = request(
        app.clone(),
        "POST",
        &format!("/v1/conflicts/{conflict_id}/resolve"),
        Some(json!({"op": resolver})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);
    assert_eq!(body["conflict"]["status"], "resolved");

    let (_, body) = request(app, "GET", "/v1/states/main", None).await;
    assert!(body["tree"]["demo.py"].as_str().unwrap().contains("merged"));
}
