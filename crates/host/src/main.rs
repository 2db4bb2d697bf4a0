mod coder;
mod config;
mod log;
mod orchestrator;
mod tool_client;

#[cfg(test)]
mod testing;

use std::io::{self, BufRead, Write};

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use toolsmith_core::responses_client::ResponsesClient;

use coder::workspace::CargoWasmBuilder;
use coder::{Coder, ReloadWait};
use config::HostConfig;
use orchestrator::Orchestrator;
use tool_client::{HttpToolClient, ToolTransport};

const EXIT: &str = "--exit";

fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let config = HostConfig::from_env()?;
    let orchestrator_client = ResponsesClient::from_env(config.orchestrator_model.as_deref())?;
    let coder_client = ResponsesClient::from_env(config.coder_model.as_deref())?;
    let transport =
        HttpToolClient::new(&config.tools_base_url, config.http_timeout, config.http_retries)?;

    let builder = CargoWasmBuilder;
    let coder = Coder::new(&coder_client, &transport, &builder, config.extensions_root.clone())
        .with_max_steps(config.coder_max_steps)
        .with_reload_wait(ReloadWait {
            timeout: config.reload_wait,
            poll: std::time::Duration::from_secs(1),
        });
    let orchestrator = Orchestrator::new(&orchestrator_client, &transport, &coder)
        .with_max_steps(config.orchestrator_max_steps);

    if let Err(e) = transport.health() {
        log::warn(format!("tool service is not answering yet: {e}"));
    }

    println!("Tool service: {}", config.tools_base_url);
    println!(
        "Models: orchestrator {}, coder {}",
        orchestrator_client.model(),
        coder_client.model()
    );
    println!("Enter your query or type {EXIT} to quit.\n");

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        print!("> ");
        stdout.flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let request = line.trim();

        if request.is_empty() {
            continue;
        }
        if request.eq_ignore_ascii_case(EXIT) {
            break;
        }

        match orchestrator.run_turn(request) {
            Ok(outcome) => {
                for call in &outcome.invocations {
                    let status = call.status.map_or("no answer".to_string(), |s| s.to_string());
                    log::info(format!("{} {} -> {status}", call.method, call.url));
                }
                if outcome.gap_fills > 0 {
                    log::info(format!("{} tool request(s) sent to the coder", outcome.gap_fills));
                }
                println!("\n{}\n", outcome.answer);
            }
            Err(e) => println!("\n[ERROR] {e:#}\n"),
        }
    }

    Ok(())
}
