//! Builtin tools registered at startup.

pub mod articles;
pub mod health;
pub mod plot;
pub mod power;
pub mod wiki;

use std::sync::Arc;

use anyhow::{Context, Result};
use toolsmith_core::catalog::ToolDescriptor;
use toolsmith_core::embedding::Embedder;

use crate::config::ServiceConfig;
use crate::extensions::ExtensionHost;
use crate::handler::ToolHandler;
use crate::registration_log::Origin;
use crate::registry::{Change, Entry, ToolRegistry};

/// Register every builtin tool in one batch, in catalog order.
pub async fn register_builtins(
    registry: &Arc<ToolRegistry>,
    extensions: &Arc<ExtensionHost>,
    config: &ServiceConfig,
    embedder: Option<Arc<dyn Embedder>>,
) -> Result<u64> {
    let http = reqwest::Client::builder()
        .timeout(config.upstream_timeout)
        .user_agent(concat!("toolsmith/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("failed to build upstream HTTP client")?;

    let store = Arc::new(articles::LazyArticleStore::new(
        config.articles_path.clone(),
        embedder.clone(),
    ));

    let tools: Vec<(ToolDescriptor, Arc<dyn ToolHandler>)> = vec![
        (power::descriptor(), Arc::new(power::PowerTool)),
        (
            plot::descriptor(),
            Arc::new(plot::PlotTool::new(
                config.artifacts_dir.clone(),
                &config.public_base_url,
            )),
        ),
        (
            wiki::descriptor(),
            Arc::new(wiki::WikiSummaryTool::new(http, &config.wiki_api_base)),
        ),
        (
            articles::descriptor(),
            Arc::new(articles::ArticlesTool::new(embedder, store)),
        ),
        (
            health::descriptor(),
            Arc::new(health::HealthTool::new(
                Arc::downgrade(registry),
                Arc::downgrade(extensions),
            )),
        ),
    ];

    let changes = tools
        .into_iter()
        .map(|(descriptor, handler)| Change::Register(Entry::new(descriptor, handler, Origin::Builtin)))
        .collect();

    registry
        .apply(changes)
        .await
        .context("failed to register builtin tools")
}
