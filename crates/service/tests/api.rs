use std::path::Path;

use axum::body::Body;
use axum::extract::Path as UrlPath;
use axum::http::{Request, StatusCode};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;
use toolsmith_service::config::ServiceConfig;
use toolsmith_service::extensions::ReloadOutcome;
use toolsmith_service::{api, build, Service};

fn config(dir: &TempDir, wiki_api_base: &str) -> ServiceConfig {
    ServiceConfig {
        public_base_url: "http://localhost:5000".into(),
        artifacts_dir: dir.path().join("artifacts"),
        extension_module: dir.path().join("module/routes.wasm"),
        registration_log: dir.path().join("registrations.log"),
        wiki_api_base: wiki_api_base.into(),
        articles_path: dir.path().join("articles.json"),
        ..ServiceConfig::default()
    }
}

async fn service(dir: &TempDir) -> (Router, Service) {
    service_with_wiki(dir, "http://127.0.0.1:9").await
}

async fn service_with_wiki(dir: &TempDir, wiki: &str) -> (Router, Service) {
    let service = build(&config(dir, wiki), None).await.unwrap();
    (api::router(service.state.clone()), service)
}

async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(match body {
            Some(v) => Body::from(v.to_string()),
            None => Body::empty(),
        })
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| json!({ "raw": bytes.len() }))
    };
    (status, value)
}

/// WAT module that prints `reply` whatever it is asked. The reply carries both a
/// `routes` list (for describe) and `status`/`body` (for invoke).
fn write_module(path: &Path, reply: &Value) {
    let reply = reply.to_string();
    let wat = format!(
        r#"(module
  (import "wasi_snapshot_preview1" "fd_write" (func $fd_write (param i32 i32 i32 i32) (result i32)))
  (memory (export "memory") 1)
  (data (i32.const 64) "{escaped}")
  (func (export "_start")
    (i32.store (i32.const 0) (i32.const 64))
    (i32.store (i32.const 4) (i32.const {len}))
    (drop (call $fd_write (i32.const 1) (i32.const 0) (i32.const 1) (i32.const 8)))))"#,
        escaped = reply.replace('\\', "\\\\").replace('"', "\\\""),
        len = reply.len()
    );
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, wat).unwrap();
}

fn route(path: &str, message: &str) -> Value {
    json!({
        "routes": [{
            "name": path.trim_start_matches('/'),
            "method": "GET",
            "path": path,
            "summary": format!("Extension route {path}"),
            "parameters": [{ "name": "name", "in": "query", "type": "string" }]
        }],
        "status": 200,
        "body": { "message": message }
    })
}

#[tokio::test]
async fn discovery_lists_builtins_after_itself() {
    let dir = TempDir::new().unwrap();
    let (app, _service) = service(&dir).await;

    let (status, doc) = call(&app, "GET", "/tools", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(doc["openapi"], "3.0.0");

    let paths: Vec<&String> = doc["paths"].as_object().unwrap().keys().collect();
    assert_eq!(
        paths,
        [
            "http://localhost:5000/tools",
            "http://localhost:5000/power",
            "http://localhost:5000/plot",
            "http://localhost:5000/wiki-summary",
            "http://localhost:5000/relevant-articles",
            "http://localhost:5000/health",
        ]
    );

    let (_, again) = call(&app, "GET", "/tools", None).await;
    assert_eq!(doc.to_string(), again.to_string());
}

#[tokio::test]
async fn power_renders_whole_numbers_as_integers() {
    let dir = TempDir::new().unwrap();
    let (app, _service) = service(&dir).await;

    let (status, body) = call(&app, "GET", "/power?base=2&exponent=10", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.to_string(), r#"{"base":2,"exponent":10,"result":1024}"#);
}

#[tokio::test]
async fn power_without_exponent_is_a_bad_request() {
    let dir = TempDir::new().unwrap();
    let (app, _service) = service(&dir).await;

    let (status, body) = call(&app, "GET", "/power?base=2", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("exponent"));
}

#[tokio::test]
async fn plot_writes_an_artifact_that_is_served() {
    let dir = TempDir::new().unwrap();
    let (app, _service) = service(&dir).await;

    let (status, body) = call(&app, "POST", "/plot", Some(json!({"points": [[0, 0], [1, 1]]}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"url": "http://localhost:5000/points_plot.png"}));

    let request = Request::builder()
        .uri("/points_plot.png")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "image/png");

    let (status, body) = call(&app, "POST", "/plot", Some(json!({"points": []}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "No points provided");
}

#[tokio::test]
async fn unknown_paths_and_wrong_methods_are_error_documents() {
    let dir = TempDir::new().unwrap();
    let (app, _service) = service(&dir).await;

    let (status, body) = call(&app, "GET", "/weather?city=Oslo", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("/weather"));

    let (status, body) = call(&app, "POST", "/power", None).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    assert!(body["error"].as_str().unwrap().contains("GET"));

    let (status, _) = call(&app, "DELETE", "/tools", None).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn malformed_json_body_is_a_bad_request() {
    let dir = TempDir::new().unwrap();
    let (app, _service) = service(&dir).await;

    let request = Request::builder()
        .method("POST")
        .uri("/plot")
        .body(Body::from("{not json"))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

async fn wiki_stub() -> String {
    async fn summary(UrlPath(topic): UrlPath<String>) -> (StatusCode, Json<Value>) {
        match topic.as_str() {
            "Rust (programming language)" => (
                StatusCode::OK,
                Json(json!({"title": topic, "extract": "A systems language."})),
            ),
            "Blank" => (StatusCode::OK, Json(json!({"title": topic}))),
            _ => (StatusCode::SERVICE_UNAVAILABLE, Json(json!({}))),
        }
    }

    let app = Router::new().route("/page/summary/:topic", get(summary));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn wiki_summary_proxies_the_upstream() {
    let dir = TempDir::new().unwrap();
    let base = wiki_stub().await;
    let (app, _service) = service_with_wiki(&dir, &base).await;

    let (status, body) = call(
        &app,
        "GET",
        "/wiki-summary?topic=Rust%20(programming%20language)",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({"topic": "Rust (programming language)", "summary": "A systems language."})
    );

    let (status, body) = call(&app, "GET", "/wiki-summary?topic=Blank", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["summary"], "");

    let (status, body) = call(&app, "GET", "/wiki-summary?topic=Down", None).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"].as_str().unwrap().contains("503"));
}

#[tokio::test]
async fn articles_validate_query_before_searching() {
    let dir = TempDir::new().unwrap();
    let (app, _service) = service(&dir).await;

    let (status, body) = call(&app, "POST", "/relevant-articles", Some(json!({"query": " "}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "No query provided");

    let (status, _) = call(&app, "POST", "/relevant-articles", Some(json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // no embedding service configured
    let (status, _) = call(&app, "POST", "/relevant-articles", Some(json!({"query": "rust"}))).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn extension_routes_follow_the_module() {
    let dir = TempDir::new().unwrap();
    let (app, service) = service(&dir).await;
    let module = service.extensions.module_path().to_path_buf();

    let (_, health) = call(&app, "GET", "/health", None).await;
    assert_eq!(health["extension"]["loaded"], false);
    assert!(health["extension"]["last_error"]
        .as_str()
        .unwrap()
        .contains("not found"));

    write_module(&module, &route("/hello", "Hello, world!"));
    assert!(matches!(
        service.extensions.reload().await.unwrap(),
        ReloadOutcome::Loaded { routes: 1, .. }
    ));
    assert_eq!(
        service.extensions.reload().await.unwrap(),
        ReloadOutcome::Unchanged
    );

    let (status, body) = call(&app, "GET", "/hello?name=world", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"message": "Hello, world!"}));

    let (_, doc) = call(&app, "GET", "/tools", None).await;
    let hello = &doc["paths"]["http://localhost:5000/hello"]["get"];
    assert_eq!(hello["parameters"][0]["name"], "name");

    // a new build replaces the route set in one step
    write_module(&module, &route("/bye", "Goodbye"));
    service.extensions.reload().await.unwrap();
    assert_eq!(call(&app, "GET", "/hello", None).await.0, StatusCode::NOT_FOUND);
    assert_eq!(call(&app, "GET", "/bye", None).await.0, StatusCode::OK);

    // a broken build keeps the previous routes
    std::fs::write(&module, "not a module").unwrap();
    assert!(service.extensions.reload().await.is_err());
    assert_eq!(call(&app, "GET", "/bye", None).await.0, StatusCode::OK);

    let (_, health) = call(&app, "GET", "/health", None).await;
    assert_eq!(health["extension"]["loaded"], true);
    assert_eq!(health["extension"]["routes"], json!(["/bye"]));
    assert!(health["extension"]["last_error"].is_string());
    let ops: Vec<&str> = health["recent_registrations"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|r| r["origin"] == "extension")
        .map(|r| r["op"].as_str().unwrap())
        .collect();
    assert_eq!(ops, ["register", "register", "retire"]);
}

#[tokio::test]
async fn extension_cannot_shadow_a_builtin() {
    let dir = TempDir::new().unwrap();
    let (app, service) = service(&dir).await;

    write_module(service.extensions.module_path(), &route("/power", "shadow"));
    assert!(service.extensions.reload().await.is_err());

    let (status, body) = call(&app, "GET", "/power?base=3&exponent=2", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"], 9);
}

#[tokio::test]
async fn extension_errors_map_to_status_codes() {
    let dir = TempDir::new().unwrap();
    let (app, service) = service(&dir).await;

    let mut reply = route("/strict", "unused");
    reply["status"] = json!(400);
    reply["body"] = json!({"error": "Missing required query parameter 'name'"});
    write_module(service.extensions.module_path(), &reply);
    service.extensions.reload().await.unwrap();

    let (status, body) = call(&app, "GET", "/strict", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Missing required query parameter 'name'");
}

/// A module that describes `routes` but never returns from an invoke.
fn write_spinning_module(path: &Path, routes: &Value) {
    let reply = routes.to_string();
    let wat = format!(
        r#"(module
  (import "wasi_snapshot_preview1" "fd_read" (func $fd_read (param i32 i32 i32 i32) (result i32)))
  (import "wasi_snapshot_preview1" "fd_write" (func $fd_write (param i32 i32 i32 i32) (result i32)))
  (memory (export "memory") 1)
  (data (i32.const 4096) "{escaped}")
  (func (export "_start")
    (i32.store (i32.const 0) (i32.const 1024))
    (i32.store (i32.const 4) (i32.const 256))
    (drop (call $fd_read (i32.const 0) (i32.const 0) (i32.const 1) (i32.const 8)))
    ;; {{"op":"describe"}} has a 'd' at offset 7
    (if (i32.eq (i32.load8_u (i32.const 1031)) (i32.const 100))
      (then
        (i32.store (i32.const 16) (i32.const 4096))
        (i32.store (i32.const 20) (i32.const {len}))
        (drop (call $fd_write (i32.const 1) (i32.const 16) (i32.const 1) (i32.const 24))))
      (else
        (loop br 0)))))"#,
        escaped = reply.replace('\\', "\\\\").replace('"', "\\\""),
        len = reply.len()
    );
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, wat).unwrap();
}

#[tokio::test]
async fn endless_extension_handler_is_stopped() {
    let dir = TempDir::new().unwrap();
    let config = ServiceConfig {
        extension_fuel: 1_000_000,
        ..config(&dir, "http://127.0.0.1:9")
    };
    let service = build(&config, None).await.unwrap();
    let app = api::router(service.state.clone());

    write_spinning_module(service.extensions.module_path(), &route("/spin", "unused"));
    assert!(matches!(
        service.extensions.reload().await.unwrap(),
        ReloadOutcome::Loaded { routes: 1, .. }
    ));

    let (status, body) = call(&app, "GET", "/spin", None).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"].as_str().unwrap().contains("budget"), "{body}");

    // the service keeps answering
    let (status, _) = call(&app, "GET", "/power?base=2&exponent=3", None).await;
    assert_eq!(status, StatusCode::OK);
}
