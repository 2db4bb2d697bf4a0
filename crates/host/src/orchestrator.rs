// crates/host/src/orchestrator.rs

//! Orchestrator agent: answers requests with the tools the service publishes, and asks
//! the coder for the ones it lacks.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{json, Map, Value};

use toolsmith_core::ai_client::{AiClient, InputItem, ResponseItem, Tool};
use toolsmith_core::catalog::{AuthorizationGap, HttpMethod};

use crate::coder::CreationReport;
use crate::log::{self, Agent};
use crate::tool_client::{Discovery, EndpointCall, ToolTransport};

/// Runs a capability request to completion. The coder is the real implementation.
pub trait ToolCreator {
    fn create_tools(&self, request: &str) -> Result<CreationReport>;
}

/// One endpoint call made during a turn.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub method: HttpMethod,
    pub url: String,
    /// `None` when the call never got an answer.
    pub status: Option<u16>,
}

/// State of one user turn. Dropped when the turn ends.
pub struct AgentTurn {
    input: Vec<InputItem>,
    discovery: Discovery,
    gap_fills: usize,
    invocations: Vec<Invocation>,
}

/// What a finished turn produced.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    pub answer: String,
    pub gap_fills: usize,
    pub invocations: Vec<Invocation>,
}

pub struct Orchestrator<'a, C: AiClient, T: ToolTransport> {
    client: &'a C,
    transport: &'a T,
    creator: &'a dyn ToolCreator,
    max_steps: usize,
    step_delay: Duration,
}

impl<'a, C: AiClient, T: ToolTransport> Orchestrator<'a, C, T> {
    pub fn new(client: &'a C, transport: &'a T, creator: &'a dyn ToolCreator) -> Self {
        Self {
            client,
            transport,
            creator,
            max_steps: 12,
            step_delay: Duration::from_millis(500),
        }
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn with_step_delay(mut self, delay: Duration) -> Self {
        self.step_delay = delay;
        self
    }

    /// Handle one user request. Discovery happens first, every turn.
    pub fn run_turn(&self, request: &str) -> Result<TurnOutcome> {
        let discovery = self
            .transport
            .discover()
            .context("cannot fetch the tool catalog")?;

        let mut turn = AgentTurn {
            input: vec![InputItem::user(request)],
            discovery,
            gap_fills: 0,
            invocations: Vec::new(),
        };
        let tools = orchestrator_tools();

        for step in 0..self.max_steps {
            log::step(Agent::Orchestrator, step + 1, turn.input.len());
            if step > 0 && !self.step_delay.is_zero() {
                std::thread::sleep(self.step_delay);
            }

            // rebuilt every step: the catalog may have changed
            let instructions = build_instructions(self.transport.base_url(), &turn.discovery);
            let response = self
                .client
                .respond(&instructions, turn.input.clone(), &tools)?;

            if response.has_function_calls() {
                for item in &response.items {
                    if let ResponseItem::FunctionCall {
                        call_id,
                        name,
                        arguments,
                    } = item
                    {
                        log::tool_call(Agent::Orchestrator, name, arguments);
                        turn.input
                            .push(InputItem::function_call(call_id, name, arguments));

                        let result = self.handle_tool(&mut turn, name, arguments);
                        log::tool_result(
                            Agent::Orchestrator,
                            name,
                            &result,
                            result.starts_with("ERROR"),
                        );
                        turn.input.push(InputItem::function_output(call_id, result));
                    }
                }
            } else if let Some(text) = response.text() {
                log::response(Agent::Orchestrator, text);
                log::done(Agent::Orchestrator, "Turn completed");
                return Ok(TurnOutcome {
                    answer: text.to_string(),
                    gap_fills: turn.gap_fills,
                    invocations: turn.invocations,
                });
            }
        }

        log::error(Agent::Orchestrator, "Reached max steps without answer");
        anyhow::bail!("Reached max steps without answer")
    }

    fn handle_tool(&self, turn: &mut AgentTurn, name: &str, arguments: &str) -> String {
        match name {
            "get_api_spec" => match self.rediscover(turn) {
                Ok(()) => turn.discovery.to_yaml(),
                Err(e) => format!("ERROR: {e:#}"),
            },
            "call_endpoint" => self.call_endpoint(turn, arguments),
            "create_tools" => self.create_tools(turn, arguments),
            other => format!("ERROR: Unknown tool '{other}'"),
        }
    }

    fn rediscover(&self, turn: &mut AgentTurn) -> Result<()> {
        turn.discovery = self.transport.discover()?;
        Ok(())
    }

    fn call_endpoint(&self, turn: &mut AgentTurn, arguments: &str) -> String {
        #[derive(Deserialize)]
        struct Args {
            method: String,
            url: String,
            #[serde(default)]
            query: Option<Map<String, Value>>,
            #[serde(default)]
            body: Option<Value>,
        }
        let args: Args = match serde_json::from_str(arguments) {
            Ok(a) => a,
            Err(e) => return format!("ERROR: Invalid call_endpoint args: {e}"),
        };

        let method = match turn.discovery.catalog.authorize(&args.method, &args.url) {
            Ok(descriptor) => descriptor.method,
            Err(gap) => return refusal(&gap),
        };

        let call = EndpointCall {
            method,
            url: args.url,
            query: args.query.unwrap_or_default(),
            body: args.body,
        };
        let reply = self.transport.invoke(&call);
        turn.invocations.push(Invocation {
            method,
            url: call.url.clone(),
            status: reply.as_ref().ok().map(|r| r.status),
        });

        let reply = match reply {
            Ok(reply) => reply,
            Err(e) => return format!("ERROR: {e}"),
        };

        if matches!(reply.status, 404 | 405) {
            // the catalog changed after discovery
            return match self.rediscover(turn) {
                Ok(()) => format!(
                    "ERROR: HTTP {} {}\nThe tool catalog changed since it was fetched. Current catalog:\n{}",
                    reply.status,
                    reply.body,
                    turn.discovery.to_yaml()
                ),
                Err(e) => format!(
                    "ERROR: HTTP {} {}\nRe-discovery failed: {e:#}",
                    reply.status, reply.body
                ),
            };
        }

        format!("HTTP {} {}", reply.status, reply.body)
    }

    fn create_tools(&self, turn: &mut AgentTurn, arguments: &str) -> String {
        #[derive(Deserialize)]
        struct Args {
            request: String,
        }
        let args: Args = match serde_json::from_str(arguments) {
            Ok(a) => a,
            Err(e) => {
                return format!(
                    "ERROR: Invalid create_tools args: {e}. Required: {{\"request\": \"...\"}}"
                )
            }
        };

        turn.gap_fills += 1;
        let outcome = self.creator.create_tools(&args.request);

        // whatever happened, plan against what the service serves now
        let refreshed = self.rediscover(turn);

        if let Ok(report) = &outcome {
            if report.committed {
                log::info(format!("Coder committed:\n{}", report.diff));
            }
        }

        match (outcome, refreshed) {
            (Ok(report), Ok(())) => {
                let status = if report.live {
                    "SUCCESS"
                } else {
                    "ERROR: the new routes are not live yet"
                };
                format!(
                    "{status}: {}\nPaths: {}\n\nCurrent catalog:\n{}",
                    report.summary,
                    report.paths.join(", "),
                    turn.discovery.to_yaml()
                )
            }
            (Ok(report), Err(e)) => format!(
                "ERROR: tools created ({}) but the catalog could not be refreshed: {e:#}",
                report.paths.join(", ")
            ),
            (Err(e), _) => format!("ERROR: tool creation failed: {e:#}"),
        }
    }
}

fn refusal(gap: &AuthorizationGap) -> String {
    let hint = match gap {
        AuthorizationGap::MethodMismatch { allowed, .. } => {
            format!("Call it with {allowed}, as the catalog says.")
        }
        _ => "Only endpoints listed by get_api_spec may be called. Use create_tools to add the missing capability, then call it.".to_string(),
    };
    format!("ERROR: refused before sending: {gap}. {hint}")
}

fn build_instructions(base_url: &str, discovery: &Discovery) -> String {
    format!(
        r#"You are a helpful assistant that answers the user's needs by calling HTTP tools, and that can have new tools built by a coding agent.

Rules:
- Before taking any action, check the available tools (get_api_spec).
- Only call endpoints listed in the catalog, on {base_url}. Never call any other URL.
- If the tool you need is missing, call create_tools with a precise description of the endpoint (method, path, parameters, response). Do not ask the user for permission; do it automatically.
- Always check the existing endpoints before creating new ones.
- Report tool errors to the user honestly.

Your currently available endpoints:
{}"#,
        discovery.to_yaml()
    )
}

fn orchestrator_tools() -> Vec<Tool> {
    vec![
        Tool::function(
            "get_api_spec",
            "Fetch the current tool catalog (OpenAPI, as YAML).",
            json!({ "type": "object", "properties": {}, "required": [] }),
        ),
        Tool::function(
            "call_endpoint",
            "Call one endpoint listed in the catalog.",
            json!({
                "type": "object",
                "properties": {
                    "method": { "type": "string", "enum": ["GET", "POST", "PUT", "PATCH", "DELETE"] },
                    "url": { "type": "string", "description": "Full URL from the catalog" },
                    "query": { "type": "object", "description": "Query parameters" },
                    "body": { "type": "object", "description": "JSON body" }
                },
                "required": ["method", "url"]
            }),
        ),
        Tool::function(
            "create_tools",
            "Have the coding agent add a missing endpoint to the tool service.",
            json!({
                "type": "object",
                "properties": {
                    "request": { "type": "string", "description": "What the new endpoint should do" }
                },
                "required": ["request"]
            }),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{call, text, FakeService, ScriptedClient, BASE_URL};
    use std::cell::Cell;

    /// Publishes a fixed path on the fake service when asked.
    struct PublishingCreator<'a> {
        service: &'a FakeService,
        path: &'static str,
        runs: Cell<usize>,
    }

    impl ToolCreator for PublishingCreator<'_> {
        fn create_tools(&self, _request: &str) -> Result<CreationReport> {
            self.runs.set(self.runs.get() + 1);
            self.service.add(self.path);
            Ok(CreationReport {
                committed: true,
                live: true,
                paths: vec![self.path.to_string()],
                summary: format!("Added {}", self.path),
                diff: String::new(),
            })
        }
    }

    fn creator<'a>(service: &'a FakeService, path: &'static str) -> PublishingCreator<'a> {
        PublishingCreator {
            service,
            path,
            runs: Cell::new(0),
        }
    }

    fn orchestrator<'a>(
        client: &'a ScriptedClient,
        service: &'a FakeService,
        creator: &'a dyn ToolCreator,
    ) -> Orchestrator<'a, ScriptedClient, FakeService> {
        Orchestrator::new(client, service, creator).with_step_delay(Duration::ZERO)
    }

    #[test]
    fn missing_tool_is_refused_then_created_then_called() {
        let service = FakeService::new(&["/power"]);
        let creator = creator(&service, "/weather");
        let client = ScriptedClient::new(vec![
            call(
                "c1",
                "call_endpoint",
                json!({"method": "GET", "url": format!("{BASE_URL}/weather"), "query": {"city": "Oslo"}}),
            ),
            call("c2", "create_tools", json!({"request": "GET /weather?city= returning a forecast"})),
            call(
                "c3",
                "call_endpoint",
                json!({"method": "GET", "url": format!("{BASE_URL}/weather"), "query": {"city": "Oslo"}}),
            ),
            text("It is sunny in Oslo."),
        ]);

        let outcome = orchestrator(&client, &service, &creator)
            .run_turn("weather in Oslo?")
            .unwrap();

        assert_eq!(outcome.answer, "It is sunny in Oslo.");
        assert_eq!(outcome.gap_fills, 1);
        assert_eq!(creator.runs.get(), 1);

        // the refused call never reached the service
        let calls = service.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].query["city"], "Oslo");
        assert_eq!(
            outcome.invocations,
            vec![Invocation {
                method: HttpMethod::Get,
                url: format!("{BASE_URL}/weather"),
                status: Some(200),
            }]
        );
    }

    #[test]
    fn refusal_points_at_create_tools() {
        let service = FakeService::new(&["/power"]);
        let creator = creator(&service, "/unused");
        let client = ScriptedClient::new(vec![
            call("c1", "call_endpoint", json!({"method": "GET", "url": "https://api.example.com/power"})),
            call("c2", "call_endpoint", json!({"method": "POST", "url": "/power"})),
            call("c3", "call_endpoint", json!({"method": "GET", "url": "/nope"})),
            text("cannot"),
        ]);

        orchestrator(&client, &service, &creator)
            .run_turn("anything")
            .unwrap();

        assert!(service.calls().is_empty());
        assert!(client.output_for("c1").unwrap().contains("is not the tool service"));
        assert!(client.output_for("c2").unwrap().contains("Call it with GET"));
        assert!(client.output_for("c3").unwrap().contains("create_tools"));
    }

    #[test]
    fn vanished_tool_triggers_rediscovery() {
        let service = FakeService::new(&["/power", "/plot"]);
        let creator = creator(&service, "/unused");
        service.queue_reply(404, json!({"error": "No tool is registered at /plot"}));
        let client = ScriptedClient::new(vec![
            call("c1", "call_endpoint", json!({"method": "GET", "url": "/plot"})),
            text("plot is gone"),
        ]);

        orchestrator(&client, &service, &creator)
            .run_turn("plot")
            .unwrap();

        // once at turn start, once after the 404
        assert_eq!(service.discoveries(), 2);
        let output = client.output_for("c1").unwrap();
        assert!(output.starts_with("ERROR: HTTP 404"));
        assert!(output.contains("Current catalog"));
    }

    #[test]
    fn error_documents_are_passed_back_verbatim() {
        let service = FakeService::new(&["/power"]);
        let creator = creator(&service, "/unused");
        service.queue_reply(400, json!({"error": "Missing required query parameter 'exponent'"}));
        let client = ScriptedClient::new(vec![
            call("c1", "call_endpoint", json!({"method": "GET", "url": "/power", "query": {"base": 2}})),
            text("need an exponent"),
        ]);

        let outcome = orchestrator(&client, &service, &creator)
            .run_turn("2 to the what?")
            .unwrap();
        assert_eq!(
            client.output_for("c1").unwrap(),
            r#"HTTP 400 {"error":"Missing required query parameter 'exponent'"}"#
        );
        assert_eq!(outcome.invocations[0].status, Some(400));
    }

    #[test]
    fn catalog_is_in_the_instructions() {
        let service = FakeService::new(&["/power"]);
        let creator = creator(&service, "/unused");
        let client = ScriptedClient::new(vec![text("hi")]);

        orchestrator(&client, &service, &creator).run_turn("hi").unwrap();
        assert!(client
            .last_instructions()
            .contains("http://localhost:5000/power"));
    }

    #[test]
    fn step_cap_ends_the_turn() {
        let service = FakeService::new(&["/power"]);
        let creator = creator(&service, "/unused");
        let client = ScriptedClient::new(vec![call("c", "get_api_spec", json!({})); 3]);

        let err = orchestrator(&client, &service, &creator)
            .with_max_steps(3)
            .run_turn("loop")
            .unwrap_err();
        assert!(err.to_string().contains("max steps"));
    }
}
