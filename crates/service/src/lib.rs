//! Tool Registry Service: a self-describing catalog of HTTP tools.

pub mod api;
pub mod config;
pub mod debugger;
pub mod extensions;
pub mod handler;
pub mod registration_log;
pub mod registry;
pub mod tools;

use std::sync::Arc;

use anyhow::{Context, Result};
use toolsmith_core::embedding::{Embedder, HttpEmbedder};

use crate::api::AppState;
use crate::config::ServiceConfig;
use crate::extensions::ExtensionHost;
use crate::registration_log::RegistrationLog;
use crate::registry::ToolRegistry;

/// Everything the HTTP layer and the reload watcher need.
pub struct Service {
    pub state: AppState,
    pub extensions: Arc<ExtensionHost>,
}

/// Build the registry, register builtins and load the extension module if present.
pub async fn build(config: &ServiceConfig, embedder: Option<Arc<dyn Embedder>>) -> Result<Service> {
    let log = RegistrationLog::open(&config.registration_log)?;
    let registry = Arc::new(ToolRegistry::new(Some(log)));
    let extensions = Arc::new(
        ExtensionHost::new(registry.clone(), config.extension_module.clone())
            .with_fuel(config.extension_fuel),
    );

    tools::register_builtins(&registry, &extensions, config, embedder).await?;

    // a missing or broken module is reported by /health; builtins still serve
    if let Err(e) = extensions.reload().await {
        tracing::warn!("starting without extension routes: {e:#}");
    }

    Ok(Service {
        state: AppState {
            registry,
            public_base_url: config.public_base_url.clone(),
            artifacts_dir: config.artifacts_dir.clone(),
        },
        extensions,
    })
}

pub async fn serve(config: ServiceConfig) -> Result<()> {
    if config.debug_mode {
        debugger::wait_for_debugger().await;
    }

    let embedder = match tokio::task::spawn_blocking(HttpEmbedder::from_env).await? {
        Ok(embedder) => Some(Arc::new(embedder) as Arc<dyn Embedder>),
        Err(e) => {
            tracing::warn!("article search disabled: {e:#}");
            None
        }
    };

    let service = build(&config, embedder).await?;
    let _watcher = extensions::watch(service.extensions.clone())?;

    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!("tool registry listening on {addr}");

    axum::serve(listener, api::router(service.state))
        .await
        .context("server error")
}
