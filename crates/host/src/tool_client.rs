// crates/host/src/tool_client.rs

//! Client side of the tool registry: discovery, invocation and health.

use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::{Map, Value};
use thiserror::Error;

use toolsmith_core::catalog::{Catalog, HttpMethod, DISCOVERY_PATH};

const HEALTH_PATH: &str = "/health";
const RETRY_BASE: Duration = Duration::from_millis(250);

#[derive(Debug, Error, Clone, PartialEq)]
pub enum InvokeError {
    #[error("could not reach {url}: {message}")]
    Transport { url: String, message: String },

    #[error("{url} did not answer within {timeout:?}")]
    Timeout { url: String, timeout: Duration },

    #[error("{url} returned status {status}: {body}")]
    Status { url: String, status: u16, body: String },

    #[error("{url} returned an unreadable document: {message}")]
    Decode { url: String, message: String },
}

impl InvokeError {
    /// Worth another attempt: the request may never have reached the service.
    fn is_transient(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::Timeout { .. })
    }
}

/// A fetched discovery document and the catalog parsed from it.
#[derive(Debug, Clone)]
pub struct Discovery {
    pub document: Value,
    pub catalog: Catalog,
}

impl Discovery {
    /// Parse a discovery document served from `base_url`. Absolute targets must point
    /// at the document's own origin, or at `base_url` when its keys are bare paths.
    pub fn from_document(document: Value, base_url: &str) -> Result<Self> {
        let catalog = Catalog::from_document(&document)?.with_default_origin(base_url);
        Ok(Self { document, catalog })
    }

    /// Document rendered as YAML, keys in service order.
    pub fn to_yaml(&self) -> String {
        serde_yaml::to_string(&self.document)
            .unwrap_or_else(|e| format!("ERROR: cannot render catalog: {e}"))
    }
}

/// One endpoint call as planned by the orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointCall {
    pub method: HttpMethod,
    /// Absolute URL or a path on the tool service.
    pub url: String,
    pub query: Map<String, Value>,
    pub body: Option<Value>,
}

/// Whatever the endpoint answered, error documents included.
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointReply {
    pub status: u16,
    pub body: Value,
}

pub trait ToolTransport {
    fn base_url(&self) -> &str;

    fn discover(&self) -> Result<Discovery>;

    /// Non-2xx answers are replies, not errors.
    fn invoke(&self, call: &EndpointCall) -> Result<EndpointReply, InvokeError>;

    fn health(&self) -> Result<Value, InvokeError>;
}

/// Blocking HTTP transport with a per-call timeout.
pub struct HttpToolClient {
    http: reqwest::blocking::Client,
    base_url: String,
    timeout: Duration,
    retries: u32,
}

impl HttpToolClient {
    pub fn new(base_url: &str, timeout: Duration, retries: u32) -> Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("toolsmith/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
            retries,
        })
    }

    fn resolve(&self, url: &str) -> String {
        if url.starts_with("http://") || url.starts_with("https://") {
            url.to_string()
        } else {
            format!("{}/{}", self.base_url, url.trim_start_matches('/'))
        }
    }

    fn send_error(&self, url: &str, e: reqwest::Error) -> InvokeError {
        if e.is_timeout() {
            InvokeError::Timeout {
                url: url.to_string(),
                timeout: self.timeout,
            }
        } else {
            InvokeError::Transport {
                url: url.to_string(),
                message: e.to_string(),
            }
        }
    }

    fn get_json(&self, path: &str) -> Result<Value, InvokeError> {
        let url = self.resolve(path);
        retry(self.retries, RETRY_BASE, || {
            let resp = self.http.get(&url).send().map_err(|e| self.send_error(&url, e))?;
            let status = resp.status();
            let text = resp.text().map_err(|e| self.send_error(&url, e))?;
            if !status.is_success() {
                return Err(InvokeError::Status {
                    url: url.clone(),
                    status: status.as_u16(),
                    body: text,
                });
            }
            serde_json::from_str(&text).map_err(|e| InvokeError::Decode {
                url: url.clone(),
                message: e.to_string(),
            })
        })
    }

    fn send(&self, call: &EndpointCall, url: &str) -> Result<EndpointReply, InvokeError> {
        let method = reqwest::Method::from_bytes(call.method.as_str().as_bytes())
            .unwrap_or(reqwest::Method::GET);
        let mut request = self.http.request(method, url);

        let query: Vec<(&str, String)> = call
            .query
            .iter()
            .map(|(k, v)| (k.as_str(), query_value(v)))
            .collect();
        if !query.is_empty() {
            request = request.query(&query);
        }
        if let Some(body) = &call.body {
            request = request.json(body);
        }

        let resp = request.send().map_err(|e| self.send_error(url, e))?;
        let status = resp.status().as_u16();
        let text = resp.text().map_err(|e| self.send_error(url, e))?;
        let body = serde_json::from_str(&text).unwrap_or(Value::String(text));
        Ok(EndpointReply { status, body })
    }
}

impl ToolTransport for HttpToolClient {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    fn discover(&self) -> Result<Discovery> {
        let document = self.get_json(DISCOVERY_PATH)?;
        Discovery::from_document(document, &self.base_url).context("tool catalog is malformed")
    }

    fn invoke(&self, call: &EndpointCall) -> Result<EndpointReply, InvokeError> {
        let url = self.resolve(&call.url);
        // only GET is safe to repeat
        let retries = if call.method == HttpMethod::Get {
            self.retries
        } else {
            0
        };
        retry(retries, RETRY_BASE, || self.send(call, &url))
    }

    fn health(&self) -> Result<Value, InvokeError> {
        self.get_json(HEALTH_PATH)
    }
}

/// Query strings carry bare text; strings lose their quotes.
fn query_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Run `op`, retrying transient failures up to `retries` more times with doubling delay.
pub fn retry<T>(
    retries: u32,
    base: Duration,
    mut op: impl FnMut() -> Result<T, InvokeError>,
) -> Result<T, InvokeError> {
    let mut attempt = 0;
    loop {
        match op() {
            Err(e) if e.is_transient() && attempt < retries => {
                let delay = base * 2u32.pow(attempt);
                tracing::warn!("{e}; retrying in {delay:?}");
                std::thread::sleep(delay);
                attempt += 1;
            }
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::cell::Cell;

    fn transport_error() -> InvokeError {
        InvokeError::Transport {
            url: "http://localhost:5000/power".into(),
            message: "connection refused".into(),
        }
    }

    #[test]
    fn retries_transient_failures_then_succeeds() {
        let calls = Cell::new(0);
        let result = retry(3, Duration::ZERO, || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(transport_error())
            } else {
                Ok(42)
            }
        });
        assert_eq!(result, Ok(42));
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn gives_up_after_the_budget() {
        let calls = Cell::new(0);
        let result: Result<(), _> = retry(2, Duration::ZERO, || {
            calls.set(calls.get() + 1);
            Err(transport_error())
        });
        assert!(result.is_err());
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn status_errors_are_not_retried() {
        let calls = Cell::new(0);
        let result: Result<(), _> = retry(5, Duration::ZERO, || {
            calls.set(calls.get() + 1);
            Err(InvokeError::Status {
                url: "u".into(),
                status: 500,
                body: String::new(),
            })
        });
        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn relative_targets_join_the_base_url() {
        let client = HttpToolClient::new("http://localhost:5000/", Duration::from_secs(1), 0).unwrap();
        assert_eq!(client.resolve("/power"), "http://localhost:5000/power");
        assert_eq!(client.resolve("power"), "http://localhost:5000/power");
        assert_eq!(
            client.resolve("http://localhost:5000/plot"),
            "http://localhost:5000/plot"
        );
    }

    #[test]
    fn query_values_are_bare_text() {
        assert_eq!(query_value(&json!("Cat")), "Cat");
        assert_eq!(query_value(&json!(2)), "2");
        assert_eq!(query_value(&json!(true)), "true");
    }

    #[test]
    fn bare_path_discovery_refuses_other_hosts() {
        let doc = json!({
            "openapi": "3.0.0",
            "paths": { "/power": { "get": { "summary": "Raise", "responses": {} } } }
        });
        let discovery = Discovery::from_document(doc, "http://localhost:5000").unwrap();
        assert!(discovery.catalog.authorize("GET", "/power").is_ok());
        assert!(discovery.catalog.authorize("GET", "http://evil.example/power").is_err());
    }

    #[test]
    fn discovery_renders_yaml_in_document_order() {
        let doc = json!({
            "openapi": "3.0.0",
            "info": { "title": "Agent Tools API", "version": "1.0.0" },
            "paths": {
                "http://localhost:5000/power": { "get": { "summary": "Raise", "responses": {} } }
            }
        });
        let discovery = Discovery::from_document(doc, "http://localhost:5000").unwrap();
        assert!(discovery.catalog.contains("/power"));

        let yaml = discovery.to_yaml();
        let openapi = yaml.find("openapi").unwrap();
        let paths = yaml.find("paths").unwrap();
        assert!(openapi < paths);
        assert!(yaml.contains("http://localhost:5000/power"));
    }
}
