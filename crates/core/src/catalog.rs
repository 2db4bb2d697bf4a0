// crates/core/src/catalog.rs

//! Tool descriptors and the discovery document built from them.
//!
//! The service renders its live registry with [`Catalog::to_document`]; agents rebuild
//! a [`Catalog`] from the fetched document with [`Catalog::from_document`] and check
//! every outgoing call with [`Catalog::authorize`].

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Path of the self-describing discovery endpoint. Always present, never registrable.
pub const DISCOVERY_PATH: &str = "/tools";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub const ALL: [HttpMethod; 5] = [
        HttpMethod::Get,
        HttpMethod::Post,
        HttpMethod::Put,
        HttpMethod::Patch,
        HttpMethod::Delete,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }

    /// OpenAPI operation key.
    pub fn operation_key(self) -> &'static str {
        match self {
            HttpMethod::Get => "get",
            HttpMethod::Post => "post",
            HttpMethod::Put => "put",
            HttpMethod::Patch => "patch",
            HttpMethod::Delete => "delete",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        HttpMethod::ALL
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unsupported HTTP method '{s}'"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamLocation {
    Query,
    Body,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    #[serde(rename = "in")]
    pub location: ParamLocation,
    #[serde(default)]
    pub required: bool,
    /// JSON schema type: string, number, integer, boolean, array, object.
    #[serde(rename = "type", default = "default_param_type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

fn default_param_type() -> String {
    "string".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub status: u16,
    pub description: String,
}

/// Default error statuses every tool declares unless it says otherwise.
pub fn default_errors() -> Vec<ErrorResponse> {
    vec![
        ErrorResponse {
            status: 400,
            description: "Missing or invalid parameters".to_string(),
        },
        ErrorResponse {
            status: 500,
            description: "Internal server error".to_string(),
        },
    ]
}

fn default_response_description() -> String {
    "Successful response".to_string()
}

fn default_response_schema() -> Value {
    json!({ "type": "object" })
}

/// Machine-readable description of one endpoint.
///
/// Published descriptors are shared behind `Arc` and never mutated; redefining an
/// endpoint swaps in a new descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    pub name: String,
    pub method: HttpMethod,
    pub path: String,
    pub summary: String,
    #[serde(default)]
    pub parameters: Vec<Parameter>,
    #[serde(default = "default_response_description")]
    pub response_description: String,
    #[serde(default = "default_response_schema")]
    pub response_schema: Value,
    #[serde(default = "default_errors")]
    pub errors: Vec<ErrorResponse>,
}

impl ToolDescriptor {
    /// Structural checks applied before a descriptor is published.
    pub fn validate(&self) -> Result<(), CatalogError> {
        let invalid = |reason: &str| CatalogError::InvalidDescriptor {
            path: self.path.clone(),
            reason: reason.to_string(),
        };

        if self.name.trim().is_empty() {
            return Err(invalid("name is empty"));
        }
        if !self.path.starts_with('/') || self.path.len() < 2 {
            return Err(invalid("path must start with '/' and name a resource"));
        }
        if self.path.contains(['?', '#', ' ']) {
            return Err(invalid("path must not contain '?', '#' or spaces"));
        }
        for (i, param) in self.parameters.iter().enumerate() {
            if param.name.trim().is_empty() {
                return Err(invalid("parameter name is empty"));
            }
            if self.parameters[..i].iter().any(|p| p.name == param.name) {
                return Err(invalid(&format!("duplicate parameter '{}'", param.name)));
            }
        }
        Ok(())
    }

    pub fn query_params(&self) -> impl Iterator<Item = &Parameter> {
        self.parameters
            .iter()
            .filter(|p| p.location == ParamLocation::Query)
    }

    pub fn body_params(&self) -> impl Iterator<Item = &Parameter> {
        self.parameters
            .iter()
            .filter(|p| p.location == ParamLocation::Body)
    }

    /// The fixed entry describing `GET /tools` itself.
    pub fn discovery() -> Self {
        Self {
            name: "tools".to_string(),
            method: HttpMethod::Get,
            path: DISCOVERY_PATH.to_string(),
            summary: "List all available tools as an OpenAPI document".to_string(),
            parameters: Vec::new(),
            response_description: "OpenAPI document describing every tool".to_string(),
            response_schema: json!({ "type": "object" }),
            errors: Vec::new(),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum CatalogError {
    #[error("invalid descriptor for '{path}': {reason}")]
    InvalidDescriptor { path: String, reason: String },

    #[error("discovery document is malformed: {0}")]
    MalformedDocument(String),

    #[error("path '{0}' declares more than one operation")]
    DuplicatePath(String),
}

/// Why a requested call is not covered by the catalog. Triggers gap-fill, not failure.
#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum AuthorizationGap {
    #[error("no tool is registered at '{path}'")]
    UnknownPath { path: String },

    #[error("'{path}' only accepts {allowed}, not {requested}")]
    MethodMismatch {
        path: String,
        requested: String,
        allowed: HttpMethod,
    },

    #[error("'{origin}' is not the tool service (expected {expected})")]
    ForeignOrigin { origin: String, expected: String },
}

/// Ordered set of tool descriptors, one per path, in registration order.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    origin: Option<String>,
    entries: Vec<Arc<ToolDescriptor>>,
}

impl Catalog {
    /// Build from registered descriptors. Any `/tools` entry is ignored; the discovery
    /// entry is implicit.
    pub fn new(entries: Vec<Arc<ToolDescriptor>>) -> Self {
        Self {
            origin: None,
            entries: entries
                .into_iter()
                .filter(|d| d.path != DISCOVERY_PATH)
                .collect(),
        }
    }

    /// Pin `base_url`'s origin unless the document already named one. A catalog with
    /// bare-path keys would otherwise accept absolute targets on any host.
    pub fn with_default_origin(mut self, base_url: &str) -> Self {
        if self.origin.is_none() {
            self.origin = origin_of(base_url);
        }
        self
    }

    pub fn origin(&self) -> Option<&str> {
        self.origin.as_deref()
    }

    /// Registered tools, excluding the discovery entry.
    pub fn tools(&self) -> impl Iterator<Item = &ToolDescriptor> {
        self.entries.iter().map(|d| d.as_ref())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, path: &str) -> bool {
        path == DISCOVERY_PATH || self.entries.iter().any(|d| d.path == path)
    }

    pub fn get(&self, path: &str) -> Option<&ToolDescriptor> {
        self.entries
            .iter()
            .find(|d| d.path == path)
            .map(|d| d.as_ref())
    }

    /// Render the OpenAPI discovery document. Same catalog, same bytes.
    pub fn to_document(&self, base_url: &str) -> Value {
        let base = base_url.trim_end_matches('/');
        let discovery = ToolDescriptor::discovery();

        let mut paths = Map::new();
        for desc in std::iter::once(&discovery).chain(self.tools()) {
            let mut operations = Map::new();
            operations.insert(desc.method.operation_key().to_string(), render_operation(desc));
            paths.insert(format!("{base}{}", desc.path), Value::Object(operations));
        }

        let mut info = Map::new();
        info.insert("title".into(), json!("Agent Tools API"));
        info.insert("version".into(), json!("1.0.0"));

        let mut doc = Map::new();
        doc.insert("openapi".into(), json!("3.0.0"));
        doc.insert("info".into(), Value::Object(info));
        doc.insert("paths".into(), Value::Object(paths));
        Value::Object(doc)
    }

    /// Rebuild a catalog from a discovery document.
    pub fn from_document(doc: &Value) -> Result<Self, CatalogError> {
        let paths = doc
            .get("paths")
            .and_then(Value::as_object)
            .ok_or_else(|| CatalogError::MalformedDocument("missing 'paths' object".into()))?;

        let mut origin = None;
        let mut entries = Vec::new();

        for (key, operations) in paths {
            let (key_origin, path) = split_target(key);
            if origin.is_none() {
                origin = key_origin;
            }
            if path == DISCOVERY_PATH {
                continue;
            }

            let operations = operations.as_object().ok_or_else(|| {
                CatalogError::MalformedDocument(format!("'{key}' is not an object"))
            })?;

            let mut found = None;
            for (op_key, op) in operations {
                let Ok(method) = op_key.parse::<HttpMethod>() else {
                    continue;
                };
                if found.is_some() {
                    return Err(CatalogError::DuplicatePath(path));
                }
                found = Some(parse_operation(&path, method, op)?);
            }

            let desc = found.ok_or_else(|| {
                CatalogError::MalformedDocument(format!("'{key}' declares no operation"))
            })?;
            entries.push(Arc::new(desc));
        }

        Ok(Self { origin, entries })
    }

    /// Check that `method target` names a catalogued tool. `target` may be a bare path
    /// or an absolute URL; the query string is ignored.
    pub fn authorize(&self, method: &str, target: &str) -> Result<&ToolDescriptor, AuthorizationGap> {
        let (origin, path) = split_target(target);

        if let (Some(origin), Some(expected)) = (origin, self.origin.as_deref()) {
            if origin != expected {
                return Err(AuthorizationGap::ForeignOrigin {
                    origin,
                    expected: expected.to_string(),
                });
            }
        }

        let desc = if path == DISCOVERY_PATH {
            None
        } else {
            self.get(&path)
        };
        let allowed = match desc {
            Some(d) => d.method,
            None if path == DISCOVERY_PATH => HttpMethod::Get,
            None => return Err(AuthorizationGap::UnknownPath { path }),
        };

        match method.parse::<HttpMethod>() {
            Ok(m) if m == allowed => Ok(desc.unwrap_or_else(|| discovery_descriptor())),
            _ => Err(AuthorizationGap::MethodMismatch {
                path,
                requested: method.to_string(),
                allowed,
            }),
        }
    }
}

fn discovery_descriptor() -> &'static ToolDescriptor {
    static DISCOVERY: once_cell::sync::Lazy<ToolDescriptor> =
        once_cell::sync::Lazy::new(ToolDescriptor::discovery);
    &DISCOVERY
}

/// Origin (`scheme://host[:port]`) of an absolute URL.
pub fn origin_of(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()
        .filter(|u| u.has_host())
        .map(|u| u.origin().ascii_serialization())
}

/// Split a target into its origin (if absolute) and normalized path (no query, no
/// trailing slash).
pub fn split_target(target: &str) -> (Option<String>, String) {
    let (origin, path) = match Url::parse(target) {
        Ok(url) if url.has_host() => (
            Some(url.origin().ascii_serialization()),
            url.path().to_string(),
        ),
        _ => {
            let path = target.split(['?', '#']).next().unwrap_or_default();
            (None, path.to_string())
        }
    };

    let mut path = if path.starts_with('/') {
        path
    } else {
        format!("/{path}")
    };
    while path.len() > 1 && path.ends_with('/') {
        path.pop();
    }
    (origin, path)
}

fn schema_of(kind: &str, items: Option<&Value>, description: Option<&str>) -> Value {
    let mut schema = Map::new();
    schema.insert("type".into(), json!(kind));
    if let Some(items) = items {
        schema.insert("items".into(), items.clone());
    }
    if let Some(description) = description {
        schema.insert("description".into(), json!(description));
    }
    Value::Object(schema)
}

fn render_operation(desc: &ToolDescriptor) -> Value {
    let mut op = Map::new();
    op.insert("summary".into(), json!(desc.summary));

    let query: Vec<Value> = desc
        .query_params()
        .map(|p| {
            let mut param = Map::new();
            param.insert("name".into(), json!(p.name));
            param.insert("in".into(), json!("query"));
            param.insert("required".into(), json!(p.required));
            param.insert("schema".into(), schema_of(&p.kind, p.items.as_ref(), None));
            if let Some(description) = &p.description {
                param.insert("description".into(), json!(description));
            }
            Value::Object(param)
        })
        .collect();
    if !query.is_empty() {
        op.insert("parameters".into(), Value::Array(query));
    }

    let body: Vec<&Parameter> = desc.body_params().collect();
    if !body.is_empty() {
        let mut properties = Map::new();
        for p in &body {
            properties.insert(
                p.name.clone(),
                schema_of(&p.kind, p.items.as_ref(), p.description.as_deref()),
            );
        }
        let required: Vec<&str> = body
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
            .collect();

        op.insert(
            "requestBody".into(),
            json!({
                "required": !required.is_empty(),
                "content": {
                    "application/json": {
                        "schema": {
                            "type": "object",
                            "properties": properties,
                            "required": required,
                        }
                    }
                }
            }),
        );
    }

    let mut responses = Map::new();
    responses.insert(
        "200".into(),
        json!({
            "description": desc.response_description,
            "content": { "application/json": { "schema": desc.response_schema } }
        }),
    );
    for err in &desc.errors {
        responses.insert(
            err.status.to_string(),
            json!({
                "description": err.description,
                "content": {
                    "application/json": {
                        "schema": {
                            "type": "object",
                            "properties": { "error": { "type": "string" } }
                        }
                    }
                }
            }),
        );
    }
    op.insert("responses".into(), Value::Object(responses));

    Value::Object(op)
}

fn parse_operation(path: &str, method: HttpMethod, op: &Value) -> Result<ToolDescriptor, CatalogError> {
    let malformed = |what: &str| CatalogError::MalformedDocument(format!("{method} {path}: {what}"));

    let summary = op
        .get("summary")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let mut parameters = Vec::new();
    if let Some(list) = op.get("parameters") {
        let list = list.as_array().ok_or_else(|| malformed("'parameters' is not an array"))?;
        for p in list {
            let name = p
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| malformed("parameter without a name"))?;
            let schema = p.get("schema");
            parameters.push(Parameter {
                name: name.to_string(),
                location: ParamLocation::Query,
                required: p.get("required").and_then(Value::as_bool).unwrap_or(false),
                kind: schema
                    .and_then(|s| s.get("type"))
                    .and_then(Value::as_str)
                    .unwrap_or("string")
                    .to_string(),
                items: schema.and_then(|s| s.get("items")).cloned(),
                description: p
                    .get("description")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            });
        }
    }

    if let Some(schema) = op.pointer("/requestBody/content/application~1json/schema") {
        let required: Vec<&str> = schema
            .get("required")
            .and_then(Value::as_array)
            .map(|r| r.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();
        if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
            for (name, prop) in properties {
                parameters.push(Parameter {
                    name: name.clone(),
                    location: ParamLocation::Body,
                    required: required.contains(&name.as_str()),
                    kind: prop
                        .get("type")
                        .and_then(Value::as_str)
                        .unwrap_or("string")
                        .to_string(),
                    items: prop.get("items").cloned(),
                    description: prop
                        .get("description")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                });
            }
        }
    }

    let mut response_description = default_response_description();
    let mut response_schema = default_response_schema();
    let mut errors = Vec::new();
    if let Some(responses) = op.get("responses").and_then(Value::as_object) {
        for (status, resp) in responses {
            let description = resp
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            if status == "200" {
                response_description = description;
                if let Some(schema) = resp.pointer("/content/application~1json/schema") {
                    response_schema = schema.clone();
                }
            } else if let Ok(status) = status.parse::<u16>() {
                errors.push(ErrorResponse {
                    status,
                    description,
                });
            }
        }
    }

    Ok(ToolDescriptor {
        name: path.trim_start_matches('/').replace('/', "_"),
        method,
        path: path.to_string(),
        summary,
        parameters,
        response_description,
        response_schema,
        errors,
    })
}
