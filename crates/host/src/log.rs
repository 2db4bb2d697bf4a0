// crates/host/src/log.rs

//! Colored agent transcript on stderr, mirrored to `tracing` at debug level.

use std::fmt::Display;

const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";

const RED: &str = "\x1b[31m";
const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const BLUE: &str = "\x1b[34m";
const MAGENTA: &str = "\x1b[35m";
const CYAN: &str = "\x1b[36m";
const WHITE: &str = "\x1b[37m";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Agent {
    Orchestrator,
    Coder,
}

impl Agent {
    fn color(self) -> &'static str {
        match self {
            Agent::Orchestrator => BLUE,
            Agent::Coder => MAGENTA,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Agent::Orchestrator => "Orchestrator",
            Agent::Coder => "Coder",
        }
    }

    fn prefix(self) -> String {
        format!("{}{BOLD}[{}]{RESET}", self.color(), self.name())
    }
}

pub fn step(agent: Agent, step: usize, context_size: usize) {
    tracing::debug!(agent = agent.name(), step, context_size, "step");
    eprintln!(
        "{} {DIM}Step {step}{RESET} {DIM}(ctx: {context_size}){RESET}",
        agent.prefix()
    );
}

pub fn tool_call(agent: Agent, name: &str, args: &str) {
    tracing::debug!(agent = agent.name(), tool = name, args, "tool call");
    eprintln!(
        "{} {CYAN}→ {name}{RESET} {DIM}{}{RESET}",
        agent.prefix(),
        truncate(args, 100)
    );
}

pub fn tool_result(agent: Agent, name: &str, result: &str, is_error: bool) {
    tracing::debug!(agent = agent.name(), tool = name, is_error, result, "tool result");
    let (symbol, color) = if is_error { ("✗", RED) } else { ("✓", GREEN) };
    eprintln!(
        "{} {color}{symbol} {name}{RESET}: {DIM}{}{RESET}",
        agent.prefix(),
        truncate(result, 150)
    );
}

pub fn response(agent: Agent, text: &str) {
    tracing::debug!(agent = agent.name(), text, "response");
    eprintln!("{} {WHITE}← {}{RESET}", agent.prefix(), truncate(text, 200));
}

pub fn done(agent: Agent, message: impl Display) {
    tracing::debug!(agent = agent.name(), "done: {message}");
    eprintln!("{} {GREEN}✓ Done:{RESET} {message}", agent.prefix());
}

pub fn error(agent: Agent, message: impl Display) {
    tracing::debug!(agent = agent.name(), "error: {message}");
    eprintln!("{} {RED}✗ Error:{RESET} {message}", agent.prefix());
}

pub fn info(message: impl Display) {
    tracing::debug!("{message}");
    eprintln!("{DIM}[info]{RESET} {message}");
}

pub fn warn(message: impl Display) {
    tracing::debug!("warn: {message}");
    eprintln!("{YELLOW}[warn]{RESET} {message}");
}

/// Single-line preview, cut on a char boundary.
pub fn truncate(s: &str, max: usize) -> String {
    let clean: String = s
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect();
    let trimmed = clean.trim();
    match trimmed.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo wörld", 5), "héllo...");
        assert_eq!(truncate("  short\n", 10), "short");
        assert_eq!(truncate("a\nb", 10), "a b");
    }
}
