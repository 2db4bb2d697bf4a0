//! Tool handler seam and the parameter validation shared by every tool.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Map, Value};
use toolsmith_core::catalog::{Parameter, ToolDescriptor};

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ToolError {
    /// Missing or invalid parameters.
    #[error("{0}")]
    Validation(String),

    /// A third-party data source failed or answered non-success.
    #[error("{0}")]
    Upstream(String),

    #[error("{0}")]
    Internal(String),
}

impl ToolError {
    pub fn status(&self) -> StatusCode {
        match self {
            ToolError::Validation(_) => StatusCode::BAD_REQUEST,
            ToolError::Upstream(_) | ToolError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<anyhow::Error> for ToolError {
    fn from(err: anyhow::Error) -> Self {
        ToolError::Internal(format!("{err:#}"))
    }
}

impl IntoResponse for ToolError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(%status, "tool failed: {self}");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// A validated call: the descriptor it was resolved against and typed parameters.
#[derive(Debug, Clone)]
pub struct ToolRequest {
    pub descriptor: Arc<ToolDescriptor>,
    pub params: Map<String, Value>,
}

impl ToolRequest {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.params.get(name).filter(|v| !v.is_null())
    }

    pub fn f64(&self, name: &str) -> Result<f64, ToolError> {
        self.get(name)
            .and_then(Value::as_f64)
            .ok_or_else(|| ToolError::Validation(format!("Parameter '{name}' must be a number")))
    }

    pub fn str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }
}

#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn invoke(&self, request: ToolRequest) -> Result<Value, ToolError>;
}

/// Merge query string and JSON body into typed parameters per the descriptor.
///
/// Query values arrive as text and are coerced to the declared type; body values must
/// already have it. A required parameter that is absent or `null` is a validation error.
/// Undeclared parameters are passed through untouched.
pub fn build_params(
    descriptor: &ToolDescriptor,
    query: &HashMap<String, String>,
    body: Option<&Value>,
) -> Result<Map<String, Value>, ToolError> {
    let body = match body {
        None | Some(Value::Null) => None,
        Some(Value::Object(map)) => Some(map),
        Some(_) => {
            return Err(ToolError::Validation(
                "Request body must be a JSON object".to_string(),
            ))
        }
    };

    let mut params = Map::new();
    for (k, v) in query {
        params.insert(k.clone(), Value::String(v.clone()));
    }
    if let Some(body) = body {
        for (k, v) in body {
            params.insert(k.clone(), v.clone());
        }
    }

    for param in descriptor.query_params() {
        match query.get(&param.name) {
            Some(raw) => {
                let value = coerce_text(param, raw)?;
                params.insert(param.name.clone(), value);
            }
            None if param.required => {
                return Err(ToolError::Validation(format!(
                    "Missing required query parameter '{}'",
                    param.name
                )))
            }
            None => {}
        }
    }

    for param in descriptor.body_params() {
        match body.and_then(|b| b.get(&param.name)).filter(|v| !v.is_null()) {
            Some(value) => check_type(param, value)?,
            None if param.required => {
                return Err(ToolError::Validation(format!(
                    "Missing required body parameter '{}'",
                    param.name
                )))
            }
            None => {}
        }
    }

    Ok(params)
}

fn invalid(param: &Parameter) -> ToolError {
    ToolError::Validation(format!(
        "Invalid value for parameter '{}': expected {}",
        param.name, param.kind
    ))
}

fn coerce_text(param: &Parameter, raw: &str) -> Result<Value, ToolError> {
    let raw = raw.trim();
    match param.kind.as_str() {
        "number" => raw
            .parse::<f64>()
            .ok()
            .filter(|n| n.is_finite())
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| invalid(param)),
        "integer" => raw
            .parse::<i64>()
            .map(|n| Value::Number(n.into()))
            .map_err(|_| invalid(param)),
        "boolean" => match raw.to_ascii_lowercase().as_str() {
            "true" | "1" => Ok(Value::Bool(true)),
            "false" | "0" => Ok(Value::Bool(false)),
            _ => Err(invalid(param)),
        },
        "array" | "object" => {
            let value: Value = serde_json::from_str(raw).map_err(|_| invalid(param))?;
            check_type(param, &value)?;
            Ok(value)
        }
        _ => Ok(Value::String(raw.to_string())),
    }
}

fn check_type(param: &Parameter, value: &Value) -> Result<(), ToolError> {
    let ok = match param.kind.as_str() {
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        "string" => value.is_string(),
        _ => true,
    };
    if ok {
        Ok(())
    } else {
        Err(invalid(param))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use toolsmith_core::catalog::{default_errors, HttpMethod, ParamLocation};

    fn param(name: &str, location: ParamLocation, kind: &str, required: bool) -> Parameter {
        Parameter {
            name: name.into(),
            location,
            required,
            kind: kind.into(),
            items: None,
            description: None,
        }
    }

    fn descriptor(parameters: Vec<Parameter>) -> ToolDescriptor {
        ToolDescriptor {
            name: "t".into(),
            method: HttpMethod::Get,
            path: "/t".into(),
            summary: "t".into(),
            parameters,
            response_description: "ok".into(),
            response_schema: json!({"type": "object"}),
            errors: default_errors(),
        }
    }

    fn query(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn query_values_are_coerced() {
        let d = descriptor(vec![
            param("base", ParamLocation::Query, "number", true),
            param("n", ParamLocation::Query, "integer", false),
            param("flag", ParamLocation::Query, "boolean", false),
        ]);
        let params = build_params(
            &d,
            &query(&[("base", "2.5"), ("n", "3"), ("flag", "TRUE"), ("extra", "x")]),
            None,
        )
        .unwrap();

        assert_eq!(params["base"], json!(2.5));
        assert_eq!(params["n"], json!(3));
        assert_eq!(params["flag"], json!(true));
        assert_eq!(params["extra"], json!("x"));
    }

    #[test]
    fn missing_required_query_parameter_names_it() {
        let d = descriptor(vec![
            param("base", ParamLocation::Query, "number", true),
            param("exponent", ParamLocation::Query, "number", true),
        ]);
        let err = build_params(&d, &query(&[("base", "2")]), None).unwrap_err();
        assert_eq!(
            err,
            ToolError::Validation("Missing required query parameter 'exponent'".into())
        );
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn non_numeric_query_value_is_invalid() {
        let d = descriptor(vec![param("base", ParamLocation::Query, "number", true)]);
        let err = build_params(&d, &query(&[("base", "two")]), None).unwrap_err();
        assert!(err.to_string().contains("'base'"));
    }

    #[test]
    fn body_types_are_checked() {
        let d = descriptor(vec![param("points", ParamLocation::Body, "array", true)]);

        assert!(build_params(&d, &query(&[]), Some(&json!({"points": [[0, 0]]}))).is_ok());
        assert!(matches!(
            build_params(&d, &query(&[]), Some(&json!({"points": "0,0"}))),
            Err(ToolError::Validation(_))
        ));
        assert_eq!(
            build_params(&d, &query(&[]), Some(&json!({"points": null}))).unwrap_err(),
            ToolError::Validation("Missing required body parameter 'points'".into())
        );
        assert!(build_params(&d, &query(&[]), Some(&json!([1, 2]))).is_err());
    }

    #[test]
    fn upstream_errors_are_server_errors() {
        assert_eq!(
            ToolError::Upstream("HTTP 503".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
