// crates/host/src/coder/tool_handler.rs

//! Tool handlers for the coder.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use anyhow::Result;
use serde::Deserialize;

use toolsmith_core::catalog::ToolDescriptor;
use toolsmith_core::patch::unified_diff;
use toolsmith_core::route_source::{
    check_route_edit, declared_paths, RouteAddition, RouteEdit, RouteSourceError,
};

use super::workspace::{ExtensionBuilder, ExtensionWorkspace, IMPORTS_FILE, ROUTES_FILE};
use crate::tool_client::ToolTransport;

const BUILD_LOG_TAIL: usize = 3000;

/// An edit that passed the additive check but is not written yet.
#[derive(Debug, Clone)]
struct Proposal {
    edit: RouteEdit,
    paths: Vec<String>,
}

/// Outcome of the last `commit`.
#[derive(Debug, Clone)]
pub struct Committed {
    pub paths: Vec<String>,
    pub diff: String,
    /// The service lists every new path.
    pub live: bool,
}

/// How long `commit` waits for the service to pick up a build.
#[derive(Debug, Clone, Copy)]
pub struct ReloadWait {
    pub timeout: Duration,
    pub poll: Duration,
}

/// What the service showed after a commit.
#[derive(Debug, Clone, PartialEq)]
pub struct PostCheck {
    pub missing: Vec<String>,
    pub last_error: Option<String>,
}

pub struct CoderToolHandler<'a, T: ToolTransport, B: ExtensionBuilder> {
    workspace: &'a ExtensionWorkspace,
    transport: &'a T,
    builder: &'a B,
    /// Files as the run found them.
    original: RouteEdit,
    /// What proposals build on: the original, or the last commit that built.
    base: RouteEdit,
    /// Paths from commits that built.
    built_paths: Vec<String>,
    known_paths: HashSet<String>,
    proposal: Option<Proposal>,
    committed: Option<Committed>,
    existing: Vec<String>,
    reload: ReloadWait,
}

impl<'a, T: ToolTransport, B: ExtensionBuilder> CoderToolHandler<'a, T, B> {
    pub fn new(
        workspace: &'a ExtensionWorkspace,
        transport: &'a T,
        builder: &'a B,
        original: RouteEdit,
        reload: ReloadWait,
    ) -> Self {
        let mut handler = Self {
            workspace,
            transport,
            builder,
            base: original.clone(),
            original,
            built_paths: Vec::new(),
            known_paths: HashSet::new(),
            proposal: None,
            committed: None,
            existing: Vec::new(),
            reload,
        };
        if let Err(e) = handler.refresh_catalog() {
            tracing::warn!("coder starts without a catalog: {e:#}");
        }
        handler
    }

    pub fn committed(&self) -> Option<&Committed> {
        self.committed.as_ref()
    }

    /// Paths the model asked for that turned out to exist already.
    pub fn existing(&self) -> &[String] {
        &self.existing
    }

    /// Run one tool call. Only a failed write of the route files is an `Err`; every other
    /// failure is reported to the model as `ERROR: ...`.
    pub fn handle(&mut self, name: &str, arguments: &str) -> Result<String> {
        let result = match name {
            "read_file" => self.handle_read_file(arguments),
            "get_api_spec" => self.handle_get_api_spec(),
            "add_route" => self.handle_add_route(arguments),
            "propose_sources" => self.handle_propose_sources(arguments),
            "diff" => self.handle_diff(arguments),
            "commit" => return self.handle_commit(),
            other => format!("ERROR: Unknown tool '{other}'"),
        };
        Ok(result)
    }

    fn refresh_catalog(&mut self) -> Result<String> {
        let discovery = self.transport.discover()?;
        self.known_paths = discovery
            .catalog
            .tools()
            .map(|d| d.path.clone())
            .collect();
        Ok(discovery.to_yaml())
    }

    fn handle_read_file(&self, arguments: &str) -> String {
        #[derive(Deserialize)]
        struct Args {
            path: String,
        }
        let args: Args = match serde_json::from_str(arguments) {
            Ok(a) => a,
            Err(e) => {
                return format!(
                    "ERROR: Invalid read_file args: {e}. Required: {{\"path\": \"src/routes.rs\"}}"
                )
            }
        };
        self.workspace
            .read_scoped(&args.path)
            .unwrap_or_else(|e| format!("ERROR: {e}"))
    }

    fn handle_get_api_spec(&mut self) -> String {
        self.refresh_catalog()
            .unwrap_or_else(|e| format!("ERROR: cannot fetch the catalog: {e:#}"))
    }

    fn handle_add_route(&mut self, arguments: &str) -> String {
        #[derive(Deserialize)]
        struct Args {
            descriptor: ToolDescriptor,
            handler: String,
            handler_source: String,
            #[serde(default)]
            imports: Vec<String>,
        }
        let args: Args = match serde_json::from_str(arguments) {
            Ok(a) => a,
            Err(e) => return format!("ERROR: Invalid add_route args: {e}"),
        };

        let path = args.descriptor.path.clone();
        if self.known_paths.contains(&path) {
            return self.already_exists(path);
        }

        let addition = RouteAddition {
            descriptor: args.descriptor,
            handler: args.handler,
            handler_source: args.handler_source,
            imports: args.imports,
        };
        // a retry replaces the previous proposal rather than stacking on it
        let edit = match addition.apply(&self.base.routes, &self.base.imports) {
            Ok(edit) => edit,
            Err(RouteSourceError::DuplicatePath(path)) => return self.already_exists(path),
            Err(e) => return format!("ERROR: {e}"),
        };
        self.propose(edit, vec![path])
    }

    fn handle_propose_sources(&mut self, arguments: &str) -> String {
        #[derive(Deserialize)]
        struct Args {
            routes: String,
            imports: Option<String>,
        }
        let args: Args = match serde_json::from_str(arguments) {
            Ok(a) => a,
            Err(e) => return format!("ERROR: Invalid propose_sources args: {e}"),
        };
        let edit = RouteEdit {
            routes: args.routes,
            imports: args
                .imports
                .unwrap_or_else(|| self.base.imports.clone()),
        };

        let before: HashSet<String> = match declared_paths(&self.base.routes) {
            Ok(paths) => paths.into_iter().collect(),
            Err(e) => return format!("ERROR: original route source is unreadable: {e}"),
        };
        let after = match declared_paths(&edit.routes) {
            Ok(paths) => paths,
            Err(e) => return format!("ERROR: {e}"),
        };
        let mut seen = HashSet::new();
        if let Some(dup) = after.iter().find(|p| !seen.insert(p.as_str())) {
            return format!("ERROR: {}", RouteSourceError::DuplicatePath(dup.clone()));
        }

        let added: Vec<String> = after.into_iter().filter(|p| !before.contains(p)).collect();
        if added.is_empty() {
            return "ERROR: the proposal declares no new route".to_string();
        }
        if let Some(path) = added.iter().find(|p| self.known_paths.contains(*p)) {
            return self.already_exists(path.clone());
        }
        self.propose(edit, added)
    }

    /// Accept `edit` as the proposal if it only adds to the current base.
    fn propose(&mut self, edit: RouteEdit, paths: Vec<String>) -> String {
        if let Err(e) = check_route_edit(&self.base, &edit) {
            return format!(
                "ERROR: proposal rejected: {e}\nRegenerate it so every existing line stays unchanged."
            );
        }
        let diff = edit_diff(&self.base, &edit);
        self.proposal = Some(Proposal { edit, paths });
        format!("Proposal accepted (not written yet). Call commit to apply it.\n\n{diff}")
    }

    fn already_exists(&mut self, path: String) -> String {
        let message = format!(
            "ERROR: a route for '{path}' already exists; nothing to add. Reply with a summary naming the existing route."
        );
        if !self.existing.contains(&path) {
            self.existing.push(path);
        }
        message
    }

    fn handle_diff(&self, arguments: &str) -> String {
        #[derive(Deserialize)]
        struct Args {
            source: String,
            destination: String,
        }
        match serde_json::from_str::<Args>(arguments) {
            Ok(args) => {
                let diff = unified_diff(&args.source, &args.destination, "original", "updated");
                if diff.is_empty() {
                    "No differences.".to_string()
                } else {
                    diff
                }
            }
            Err(e) => format!("ERROR: Invalid diff args: {e}"),
        }
    }

    fn handle_commit(&mut self) -> Result<String> {
        let Some(proposal) = self.proposal.clone() else {
            return Ok("ERROR: nothing to commit; call add_route first".to_string());
        };

        // a failed write ends the run
        self.workspace.write(&proposal.edit)?;
        let diff = edit_diff(&self.original, &proposal.edit);
        let mut paths = self.built_paths.clone();
        paths.extend(proposal.paths.iter().cloned());
        let mut committed = Committed {
            paths,
            diff,
            live: false,
        };

        let build = match self.builder.build(self.workspace.root()) {
            Ok(build) => build,
            Err(e) => {
                self.committed = Some(committed);
                return Ok(format!("ERROR: could not run the build: {e:#}"));
            }
        };
        if !build.success {
            self.committed = Some(committed);
            return Ok(format!(
                "ERROR: build failed; the service keeps serving the previous module.\n{}",
                tail(&build.log, BUILD_LOG_TAIL)
            ));
        }

        // later proposals build on what is now on disk, so this commit's routes survive them
        self.base = proposal.edit;
        self.built_paths = committed.paths.clone();
        self.proposal = None;

        let check = post_check(self.transport, &committed.paths, self.reload);
        committed.live = check.missing.is_empty();
        self.committed = Some(committed);

        if check.missing.is_empty() {
            self.known_paths.extend(proposal.paths.iter().cloned());
            return Ok(format!(
                "SUCCESS: committed, built and live: {}",
                proposal.paths.join(", ")
            ));
        }
        Ok(format!(
            "ERROR: committed and built, but the service does not list {} after {:?}. Service reports: {}",
            check.missing.join(", "),
            self.reload.timeout,
            check.last_error.as_deref().unwrap_or("no error"),
        ))
    }
}

/// Poll discovery until every path is listed or the wait runs out, then read the
/// service's last extension error.
pub fn post_check<T: ToolTransport>(transport: &T, paths: &[String], wait: ReloadWait) -> PostCheck {
    let deadline = Instant::now() + wait.timeout;
    let mut missing = paths.to_vec();

    loop {
        match transport.discover() {
            Ok(discovery) => missing.retain(|p| !discovery.catalog.contains(p)),
            Err(e) => tracing::debug!("discovery during post-check failed: {e:#}"),
        }
        if missing.is_empty() || Instant::now() >= deadline {
            break;
        }
        std::thread::sleep(wait.poll);
    }

    let last_error = transport
        .health()
        .ok()
        .and_then(|h| h["extension"]["last_error"].as_str().map(str::to_string));
    PostCheck {
        missing,
        last_error,
    }
}

fn edit_diff(original: &RouteEdit, edit: &RouteEdit) -> String {
    let mut out = unified_diff(
        &original.routes,
        &edit.routes,
        &format!("original/{ROUTES_FILE}"),
        &format!("updated/{ROUTES_FILE}"),
    );
    if original.imports != edit.imports {
        out.push_str(&unified_diff(
            &original.imports,
            &edit.imports,
            &format!("original/{IMPORTS_FILE}"),
            &format!("updated/{IMPORTS_FILE}"),
        ));
    }
    out
}

fn tail(log: &str, max: usize) -> &str {
    if log.len() <= max {
        return log;
    }
    let mut start = log.len() - max;
    while !log.is_char_boundary(start) {
        start += 1;
    }
    &log[start..]
}
