// crates/host/src/coder/mod.rs

//! Coder agent: adds routes to the extension module with additive edits.

mod prompts;
mod tool_defs;
mod tool_handler;
pub mod workspace;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Result};

use toolsmith_core::ai_client::{AiClient, InputItem, ResponseItem};

use crate::log::{self, Agent};
use crate::orchestrator::ToolCreator;
use crate::tool_client::ToolTransport;
use tool_handler::CoderToolHandler;
pub use tool_handler::ReloadWait;
use workspace::{ExtensionBuilder, ExtensionWorkspace};

const MAX_TOOL_OUTPUT: usize = 4000;

/// What a coder run did.
#[derive(Debug, Clone, PartialEq)]
pub struct CreationReport {
    /// The route files were rewritten.
    pub committed: bool,
    /// The service lists the new routes.
    pub live: bool,
    /// New paths, or the already existing paths the request resolved to.
    pub paths: Vec<String>,
    pub summary: String,
    pub diff: String,
}

pub struct Coder<'a, C: AiClient, T: ToolTransport, B: ExtensionBuilder> {
    client: &'a C,
    transport: &'a T,
    builder: &'a B,
    extensions_root: PathBuf,
    max_steps: usize,
    reload: ReloadWait,
    step_delay: Duration,
}

impl<'a, C: AiClient, T: ToolTransport, B: ExtensionBuilder> Coder<'a, C, T, B> {
    pub fn new(
        client: &'a C,
        transport: &'a T,
        builder: &'a B,
        extensions_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            client,
            transport,
            builder,
            extensions_root: extensions_root.into(),
            max_steps: 30,
            reload: ReloadWait {
                timeout: Duration::from_secs(60),
                poll: Duration::from_secs(1),
            },
            step_delay: Duration::from_millis(500),
        }
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn with_reload_wait(mut self, reload: ReloadWait) -> Self {
        self.reload = reload;
        self
    }

    pub fn with_step_delay(mut self, delay: Duration) -> Self {
        self.step_delay = delay;
        self
    }

    /// Run one capability request to a committed route, or to the conclusion that it
    /// already exists.
    pub fn create(&self, request: &str) -> Result<CreationReport> {
        let workspace = ExtensionWorkspace::open(&self.extensions_root)?;
        let original = workspace.load()?;
        log::info(format!(
            "Coder editing {}",
            workspace.root().display()
        ));

        let instructions = prompts::build_coder_prompt(&original.imports, &original.routes);
        let tools = tool_defs::coder_tools();
        let mut handler =
            CoderToolHandler::new(&workspace, self.transport, self.builder, original, self.reload);

        let mut input = vec![InputItem::user(request)];

        for step in 0..self.max_steps {
            log::step(Agent::Coder, step + 1, input.len());
            if step > 0 && !self.step_delay.is_zero() {
                std::thread::sleep(self.step_delay);
            }

            let response = self.client.respond(&instructions, input.clone(), &tools)?;

            if response.has_function_calls() {
                for item in &response.items {
                    if let ResponseItem::FunctionCall {
                        call_id,
                        name,
                        arguments,
                    } = item
                    {
                        log::tool_call(Agent::Coder, name, arguments);
                        input.push(InputItem::function_call(call_id, name, arguments));

                        let result = handler.handle(name, arguments)?;
                        log::tool_result(Agent::Coder, name, &result, result.starts_with("ERROR"));
                        input.push(InputItem::function_output(
                            call_id,
                            clip(&result, MAX_TOOL_OUTPUT),
                        ));
                    }
                }
                continue;
            }

            let Some(text) = response.text() else {
                continue;
            };
            log::response(Agent::Coder, text);

            if let Some(committed) = handler.committed() {
                log::done(Agent::Coder, committed.paths.join(", "));
                return Ok(CreationReport {
                    committed: true,
                    live: committed.live,
                    paths: committed.paths.clone(),
                    summary: text.to_string(),
                    diff: committed.diff.clone(),
                });
            }
            if !handler.existing().is_empty() {
                log::done(Agent::Coder, "route already exists");
                return Ok(CreationReport {
                    committed: false,
                    live: true,
                    paths: handler.existing().to_vec(),
                    summary: text.to_string(),
                    diff: String::new(),
                });
            }

            input.push(InputItem::assistant(text));
            input.push(InputItem::user(
                "Nothing is committed yet. Propose the route with add_route, then call commit.",
            ));
        }

        log::error(Agent::Coder, "Reached max steps");
        if let Some(committed) = handler.committed() {
            return Ok(CreationReport {
                committed: true,
                live: committed.live,
                paths: committed.paths.clone(),
                summary: "Coder ran out of steps after committing".to_string(),
                diff: committed.diff.clone(),
            });
        }
        bail!("Coder reached max steps without committing; route files are unchanged")
    }
}

impl<C: AiClient, T: ToolTransport, B: ExtensionBuilder> ToolCreator for Coder<'_, C, T, B> {
    fn create_tools(&self, request: &str) -> Result<CreationReport> {
        self.create(request)
    }
}

fn clip(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...[truncated]", &s[..idx]),
        None => s.to_string(),
    }
}
