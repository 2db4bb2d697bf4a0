//! HTTP surface: `GET /tools` plus dispatch of every registered tool.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::{Query, Request, State};
use axum::http::{header, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use tower::ServiceExt;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use toolsmith_core::catalog::{HttpMethod, DISCOVERY_PATH};

use crate::handler::{build_params, ToolError, ToolRequest};
use crate::registry::{Resolution, ToolRegistry};

const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ToolRegistry>,
    pub public_base_url: String,
    pub artifacts_dir: PathBuf,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            DISCOVERY_PATH,
            get(discovery).fallback(discovery_wrong_method),
        )
        .fallback(dispatch)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn discovery(State(state): State<AppState>) -> Json<Value> {
    let catalog = state.registry.catalog().await;
    Json(catalog.to_document(&state.public_base_url))
}

async fn discovery_wrong_method(method: Method) -> Response {
    method_not_allowed(&method, DISCOVERY_PATH, HttpMethod::Get)
}

fn error_response(status: StatusCode, message: String) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

fn method_not_allowed(method: &Method, path: &str, allowed: HttpMethod) -> Response {
    let mut response = error_response(
        StatusCode::METHOD_NOT_ALLOWED,
        format!("Method {method} is not allowed for {path}; use {allowed}"),
    );
    if let Ok(value) = header::HeaderValue::from_str(allowed.as_str()) {
        response.headers_mut().insert(header::ALLOW, value);
    }
    response
}

async fn dispatch(State(state): State<AppState>, request: Request) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let resolution = match method.as_str().parse::<HttpMethod>() {
        Ok(m) => state.registry.resolve(m, &path).await,
        // HEAD, OPTIONS and friends: the path may exist, but not for this method
        Err(_) => match state.registry.resolve(HttpMethod::Get, &path).await {
            Resolution::NotFound => Resolution::NotFound,
            Resolution::Found(entry) => Resolution::MethodNotAllowed {
                allowed: entry.descriptor.method,
            },
            other => other,
        },
    };

    match resolution {
        Resolution::Found(entry) => {
            let query: HashMap<String, String> = Query::try_from_uri(request.uri())
                .map(|Query(q)| q)
                .unwrap_or_default();

            let bytes = match axum::body::to_bytes(request.into_body(), MAX_BODY_BYTES).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    return ToolError::Validation(format!("Failed to read request body: {e}"))
                        .into_response()
                }
            };
            let body = match parse_body(&bytes) {
                Ok(body) => body,
                Err(e) => return e.into_response(),
            };

            let params = match build_params(&entry.descriptor, &query, body.as_ref()) {
                Ok(params) => params,
                Err(e) => return e.into_response(),
            };

            let request = ToolRequest {
                descriptor: entry.descriptor.clone(),
                params,
            };
            match entry.handler.invoke(request).await {
                Ok(value) => (StatusCode::OK, Json(value)).into_response(),
                Err(e) => e.into_response(),
            }
        }
        Resolution::MethodNotAllowed { allowed } => method_not_allowed(&method, &path, allowed),
        Resolution::NotFound => {
            if method == Method::GET && is_artifact_path(&path) {
                if let Ok(response) = ServeDir::new(&state.artifacts_dir).oneshot(request).await {
                    if response.status() != StatusCode::NOT_FOUND {
                        return response.map(Body::new);
                    }
                }
            }
            error_response(StatusCode::NOT_FOUND, format!("No tool is registered at {path}"))
        }
    }
}

/// Artifacts live directly under the artifacts directory.
fn is_artifact_path(path: &str) -> bool {
    let name = path.trim_start_matches('/');
    !name.is_empty() && !name.contains('/') && !name.starts_with('.')
}

fn parse_body(bytes: &Bytes) -> Result<Option<Value>, ToolError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    serde_json::from_slice(bytes)
        .map(Some)
        .map_err(|e| ToolError::Validation(format!("Request body is not valid JSON: {e}")))
}
