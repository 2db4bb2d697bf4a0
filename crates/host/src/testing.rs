//! Scripted stand-ins for the model, the tool service and the module build.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::path::Path;

use anyhow::{bail, Result};
use serde_json::{json, Map, Value};

use toolsmith_core::ai_client::{AiClient, InputItem, Response, ResponseItem, Tool};
use toolsmith_core::catalog::HttpMethod;

use crate::coder::workspace::{BuildOutput, ExtensionBuilder};
use crate::tool_client::{Discovery, EndpointCall, EndpointReply, InvokeError, ToolTransport};

pub const BASE_URL: &str = "http://localhost:5000";

/// Replays canned model turns and records what it was sent.
#[derive(Default)]
pub struct ScriptedClient {
    turns: RefCell<VecDeque<Response>>,
    seen: RefCell<Vec<(String, Vec<InputItem>)>>,
}

impl ScriptedClient {
    pub fn new(turns: Vec<Response>) -> Self {
        Self {
            turns: RefCell::new(turns.into()),
            seen: RefCell::default(),
        }
    }

    pub fn requests(&self) -> usize {
        self.seen.borrow().len()
    }

    pub fn last_instructions(&self) -> String {
        self.seen
            .borrow()
            .last()
            .map(|(i, _)| i.clone())
            .unwrap_or_default()
    }

    /// Output fed back for the given call id in the latest request.
    pub fn output_for(&self, call_id: &str) -> Option<String> {
        let seen = self.seen.borrow();
        let (_, input) = seen.last()?;
        input.iter().rev().find_map(|item| match item {
            InputItem::FunctionCallOutput { call_id: id, output } if id == call_id => {
                Some(output.clone())
            }
            _ => None,
        })
    }
}

impl AiClient for ScriptedClient {
    fn respond(&self, instructions: &str, input: Vec<InputItem>, _tools: &[Tool]) -> Result<Response> {
        self.seen
            .borrow_mut()
            .push((instructions.to_string(), input));
        match self.turns.borrow_mut().pop_front() {
            Some(turn) => Ok(turn),
            None => bail!("script exhausted"),
        }
    }
}

pub fn call(call_id: &str, name: &str, arguments: Value) -> Response {
    Response {
        items: vec![ResponseItem::FunctionCall {
            call_id: call_id.to_string(),
            name: name.to_string(),
            arguments: arguments.to_string(),
        }],
    }
}

pub fn text(message: &str) -> Response {
    Response {
        items: vec![ResponseItem::Message(message.to_string())],
    }
}

/// In-memory tool service. Every route is a GET answering `{"ok": true}` unless a
/// canned reply is queued.
pub struct FakeService {
    paths: RefCell<Vec<String>>,
    last_error: RefCell<Option<String>>,
    calls: RefCell<Vec<EndpointCall>>,
    replies: RefCell<VecDeque<EndpointReply>>,
    discoveries: Cell<usize>,
}

impl FakeService {
    pub fn new(paths: &[&str]) -> Self {
        Self {
            paths: RefCell::new(paths.iter().map(|p| p.to_string()).collect()),
            last_error: RefCell::default(),
            calls: RefCell::default(),
            replies: RefCell::default(),
            discoveries: Cell::new(0),
        }
    }

    pub fn add(&self, path: &str) {
        self.paths.borrow_mut().push(path.to_string());
    }

    pub fn set_last_error(&self, error: &str) {
        *self.last_error.borrow_mut() = Some(error.to_string());
    }

    pub fn queue_reply(&self, status: u16, body: Value) {
        self.replies
            .borrow_mut()
            .push_back(EndpointReply { status, body });
    }

    pub fn calls(&self) -> Vec<EndpointCall> {
        self.calls.borrow().clone()
    }

    pub fn discoveries(&self) -> usize {
        self.discoveries.get()
    }

    fn document(&self) -> Value {
        let mut paths = Map::new();
        paths.insert(
            format!("{BASE_URL}/tools"),
            json!({ "get": { "summary": "List tools", "responses": {} } }),
        );
        for path in self.paths.borrow().iter() {
            paths.insert(
                format!("{BASE_URL}{path}"),
                json!({ "get": { "summary": format!("Tool at {path}"), "responses": {} } }),
            );
        }
        json!({
            "openapi": "3.0.0",
            "info": { "title": "Agent Tools API", "version": "1.0.0" },
            "paths": paths
        })
    }
}

impl ToolTransport for FakeService {
    fn base_url(&self) -> &str {
        BASE_URL
    }

    fn discover(&self) -> Result<Discovery> {
        self.discoveries.set(self.discoveries.get() + 1);
        Discovery::from_document(self.document(), BASE_URL)
    }

    fn invoke(&self, call: &EndpointCall) -> Result<EndpointReply, InvokeError> {
        self.calls.borrow_mut().push(call.clone());
        if let Some(reply) = self.replies.borrow_mut().pop_front() {
            return Ok(reply);
        }
        let path = call.url.trim_start_matches(BASE_URL);
        if call.method == HttpMethod::Get && self.paths.borrow().iter().any(|p| p == path) {
            Ok(EndpointReply {
                status: 200,
                body: json!({ "ok": true }),
            })
        } else {
            Ok(EndpointReply {
                status: 404,
                body: json!({ "error": format!("No tool is registered at {path}") }),
            })
        }
    }

    fn health(&self) -> Result<Value, InvokeError> {
        Ok(json!({
            "status": "ok",
            "extension": { "last_error": *self.last_error.borrow() }
        }))
    }
}

/// Build step that either fails with a compiler error or publishes paths on the
/// fake service.
pub struct FakeBuilder<'a> {
    service: Option<&'a FakeService>,
    publish: Vec<String>,
    builds: Cell<usize>,
}

impl<'a> FakeBuilder<'a> {
    pub fn publishing(service: &'a FakeService, paths: &[&str]) -> Self {
        Self {
            service: Some(service),
            publish: paths.iter().map(|p| p.to_string()).collect(),
            builds: Cell::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            service: None,
            publish: Vec::new(),
            builds: Cell::new(0),
        }
    }

    pub fn builds(&self) -> usize {
        self.builds.get()
    }
}

impl ExtensionBuilder for FakeBuilder<'_> {
    fn build(&self, _root: &Path) -> Result<BuildOutput> {
        self.builds.set(self.builds.get() + 1);
        match self.service {
            Some(service) => {
                for path in &self.publish {
                    service.add(path);
                }
                Ok(BuildOutput {
                    success: true,
                    log: "Finished release".to_string(),
                })
            }
            None => Ok(BuildOutput {
                success: false,
                log: "error[E0425]: cannot find value `y` in this scope".to_string(),
            }),
        }
    }
}
