//! Request loop, parameter access and host functions for route handlers.

// handlers use whichever subset they need
#![allow(dead_code)]

use std::io::Read;

use serde::Deserialize;
use serde_json::{json, Map, Value};

// ============ Host functions ============

#[cfg(target_arch = "wasm32")]
#[link(wasm_import_module = "host")]
extern "C" {
    /// Writes the response body to `result_ptr` (at most `result_cap` bytes).
    /// Returns the body length or a negative error code.
    #[link_name = "http_get"]
    fn host_http_get(url_ptr: *const u8, url_len: i32, result_ptr: *mut u8, result_cap: i32) -> i32;

    fn current_time_millis() -> i64;
}

#[cfg(not(target_arch = "wasm32"))]
unsafe fn host_http_get(_url_ptr: *const u8, _url_len: i32, _result_ptr: *mut u8, _result_cap: i32) -> i32 {
    -4
}

#[cfg(not(target_arch = "wasm32"))]
unsafe fn current_time_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

const HTTP_BUFFER: usize = 1024 * 1024;

/// GET `url` through the host and return the body as text.
pub fn http_get(url: &str) -> Result<String, RouteError> {
    let mut buf = vec![0u8; HTTP_BUFFER];
    let len = unsafe {
        host_http_get(url.as_ptr(), url.len() as i32, buf.as_mut_ptr(), buf.len() as i32)
    };
    if len < 0 {
        let reason = match len {
            -4 => "request failed",
            -5 => "response body unreadable",
            -6 => "response too large",
            _ => "host error",
        };
        return Err(RouteError::internal(format!("GET {url}: {reason}")));
    }
    buf.truncate(len as usize);
    String::from_utf8(buf).map_err(|_| RouteError::internal(format!("GET {url}: body is not UTF-8")))
}

/// Milliseconds since the Unix epoch, from the host clock.
pub fn now_millis() -> i64 {
    unsafe { current_time_millis() }
}

// ============ Handler types ============

#[derive(Debug, Clone, PartialEq)]
pub struct RouteError {
    pub status: u16,
    pub message: String,
}

impl RouteError {
    /// Bad input; answered with 400.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self {
            status: 400,
            message: message.into(),
        }
    }

    /// Anything else; answered with 500.
    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: 500,
            message: message.into(),
        }
    }
}

pub type RouteResult = Result<Value, RouteError>;

/// Request parameters, query and body merged.
#[derive(Debug, Default)]
pub struct Params(Map<String, Value>);

impl Params {
    pub fn new(values: Map<String, Value>) -> Self {
        Self(values)
    }

    /// A present, non-null parameter.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name).filter(|v| !v.is_null())
    }

    fn required(&self, name: &str) -> Result<&Value, RouteError> {
        self.get(name)
            .ok_or_else(|| RouteError::invalid(format!("Missing required parameter '{name}'")))
    }

    pub fn str(&self, name: &str) -> Result<&str, RouteError> {
        self.required(name)?
            .as_str()
            .ok_or_else(|| expected(name, "string"))
    }

    pub fn str_or<'a>(&'a self, name: &str, default: &'a str) -> &'a str {
        self.get(name).and_then(Value::as_str).unwrap_or(default)
    }

    pub fn f64(&self, name: &str) -> Result<f64, RouteError> {
        match self.required(name)? {
            Value::Number(n) => n.as_f64().ok_or_else(|| expected(name, "number")),
            Value::String(s) => s.trim().parse().map_err(|_| expected(name, "number")),
            _ => Err(expected(name, "number")),
        }
    }

    pub fn i64(&self, name: &str) -> Result<i64, RouteError> {
        match self.required(name)? {
            Value::Number(n) => n.as_i64().ok_or_else(|| expected(name, "integer")),
            Value::String(s) => s.trim().parse().map_err(|_| expected(name, "integer")),
            _ => Err(expected(name, "integer")),
        }
    }

    pub fn bool(&self, name: &str) -> Result<bool, RouteError> {
        match self.required(name)? {
            Value::Bool(b) => Ok(*b),
            Value::String(s) if s.eq_ignore_ascii_case("true") => Ok(true),
            Value::String(s) if s.eq_ignore_ascii_case("false") => Ok(false),
            _ => Err(expected(name, "boolean")),
        }
    }
}

fn expected(name: &str, kind: &str) -> RouteError {
    RouteError::invalid(format!("Invalid value for parameter '{name}': expected {kind}"))
}

/// A descriptor (JSON text) and the function serving it.
pub struct Route {
    pub descriptor: &'static str,
    pub handler: fn(&Params) -> RouteResult,
}

impl Route {
    pub fn new(descriptor: &'static str, handler: fn(&Params) -> RouteResult) -> Self {
        Self {
            descriptor,
            handler,
        }
    }
}

// ============ Request loop ============

#[derive(Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
enum Request {
    Describe,
    Invoke {
        path: String,
        method: String,
        #[serde(default)]
        params: Map<String, Value>,
    },
}

/// Answer the request on stdin.
pub fn serve(routes: Vec<Route>) {
    let mut input = String::new();
    let reply = match std::io::stdin().read_to_string(&mut input) {
        Ok(_) => handle(&routes, &input),
        Err(e) => json!({ "error": format!("failed to read request: {e}") }),
    };
    println!("{reply}");
}

pub fn handle(routes: &[Route], input: &str) -> Value {
    let request: Request = match serde_json::from_str(input) {
        Ok(r) => r,
        Err(e) => return json!({ "error": format!("invalid request: {e}") }),
    };

    let descriptors = match parse_descriptors(routes) {
        Ok(d) => d,
        Err(e) => return json!({ "error": e }),
    };

    match request {
        Request::Describe => json!({ "routes": descriptors }),
        Request::Invoke {
            path,
            method,
            params,
        } => {
            let Some(index) = descriptors.iter().position(|d| d["path"] == path.as_str()) else {
                return reply(404, json!({ "error": format!("No route at {path}") }));
            };
            let allowed = descriptors[index]["method"].as_str().unwrap_or("GET");
            if !allowed.eq_ignore_ascii_case(&method) {
                return reply(
                    405,
                    json!({ "error": format!("{path} only accepts {allowed}") }),
                );
            }
            match (routes[index].handler)(&Params::new(params)) {
                Ok(body) => reply(200, body),
                Err(e) => reply(e.status, json!({ "error": e.message })),
            }
        }
    }
}

fn parse_descriptors(routes: &[Route]) -> Result<Vec<Value>, String> {
    routes
        .iter()
        .map(|r| {
            serde_json::from_str::<Value>(r.descriptor)
                .map_err(|e| format!("malformed descriptor: {e}"))
        })
        .collect()
}

fn reply(status: u16, body: Value) -> Value {
    json!({ "status": status, "body": body })
}

#[cfg(test)]
mod tests {
    use super::*;

    const ECHO: &str = r#"{"name": "echo", "method": "POST", "path": "/echo", "summary": "Echo"}"#;

    fn echo(params: &Params) -> RouteResult {
        Ok(json!({ "text": params.str("text")? }))
    }

    fn routes() -> Vec<Route> {
        vec![Route::new(ECHO, echo)]
    }

    #[test]
    fn describe_lists_descriptors() {
        let out = handle(&routes(), r#"{"op": "describe"}"#);
        assert_eq!(out["routes"][0]["path"], "/echo");
    }

    #[test]
    fn invoke_dispatches_by_path_and_method() {
        let out = handle(
            &routes(),
            r#"{"op": "invoke", "path": "/echo", "method": "POST", "params": {"text": "hi"}}"#,
        );
        assert_eq!(out, json!({"status": 200, "body": {"text": "hi"}}));

        let out = handle(&routes(), r#"{"op": "invoke", "path": "/echo", "method": "GET"}"#);
        assert_eq!(out["status"], 405);

        let out = handle(&routes(), r#"{"op": "invoke", "path": "/nope", "method": "GET"}"#);
        assert_eq!(out["status"], 404);
    }

    #[test]
    fn handler_errors_carry_their_status() {
        let out = handle(&routes(), r#"{"op": "invoke", "path": "/echo", "method": "POST"}"#);
        assert_eq!(out["status"], 400);
        assert_eq!(out["body"]["error"], "Missing required parameter 'text'");
    }

    #[test]
    fn params_coerce_numeric_text() {
        let mut map = Map::new();
        map.insert("x".into(), json!("2.5"));
        map.insert("n".into(), json!(3));
        map.insert("flag".into(), json!("TRUE"));
        map.insert("none".into(), Value::Null);
        let params = Params::new(map);

        assert_eq!(params.f64("x"), Ok(2.5));
        assert_eq!(params.i64("n"), Ok(3));
        assert_eq!(params.bool("flag"), Ok(true));
        assert!(params.f64("none").is_err());
        assert_eq!(params.str_or("none", "fallback"), "fallback");
        assert_eq!(
            params.str("n"),
            Err(RouteError::invalid("Invalid value for parameter 'n': expected string"))
        );
    }

    #[test]
    fn http_get_reports_host_failures() {
        // natively the host function always fails
        let err = http_get("http://example.com").unwrap_err();
        assert_eq!(err.status, 500);
    }
}
