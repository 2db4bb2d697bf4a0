//! Routes contributed by the compiled extension module, and hot reload.
//!
//! A load is all-or-nothing: the module is compiled, asked to describe its routes, and
//! the resulting register/supersede/retire batch is applied to the registry in one step.
//! A module that fails any stage leaves the previous routes serving and the failure is
//! kept in [`ExtensionStatus::last_error`].

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::sync::{mpsc, Mutex, RwLock};
use toolsmith_core::catalog::ToolDescriptor;
use toolsmith_core::extension_runner::{ExtensionModule, DEFAULT_FUEL};

use crate::handler::{ToolError, ToolHandler, ToolRequest};
use crate::registration_log::Origin;
use crate::registry::{Change, Entry, ToolRegistry};

const DEBOUNCE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Default, Serialize)]
pub struct ExtensionStatus {
    pub module: String,
    pub loaded: bool,
    pub digest: Option<String>,
    pub loaded_at: Option<DateTime<Utc>>,
    pub routes: Vec<String>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReloadOutcome {
    Loaded { generation: u64, routes: usize },
    Unchanged,
    Missing,
}

/// Serves one extension route by running the module.
pub struct ExtensionHandler {
    module: Arc<ExtensionModule>,
}

#[async_trait]
impl ToolHandler for ExtensionHandler {
    async fn invoke(&self, request: ToolRequest) -> Result<Value, ToolError> {
        let module = self.module.clone();
        let path = request.descriptor.path.clone();
        let method = request.descriptor.method;
        let params = Value::Object(request.params);

        let reply = tokio::task::spawn_blocking(move || module.invoke(&path, method, &params))
            .await
            .map_err(|e| ToolError::Internal(format!("extension task failed: {e}")))??;

        match reply.status {
            200..=299 => Ok(reply.body),
            status => {
                let message = reply
                    .body
                    .get("error")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| reply.body.to_string());
                if (400..500).contains(&status) {
                    Err(ToolError::Validation(message))
                } else {
                    Err(ToolError::Internal(message))
                }
            }
        }
    }
}

pub struct ExtensionHost {
    registry: Arc<ToolRegistry>,
    module_path: PathBuf,
    fuel: u64,
    status: RwLock<ExtensionStatus>,
    reload_lock: Mutex<()>,
}

impl ExtensionHost {
    pub fn new(registry: Arc<ToolRegistry>, module_path: PathBuf) -> Self {
        let status = ExtensionStatus {
            module: module_path.display().to_string(),
            ..ExtensionStatus::default()
        };
        Self {
            registry,
            module_path,
            fuel: DEFAULT_FUEL,
            status: RwLock::new(status),
            reload_lock: Mutex::new(()),
        }
    }

    /// Instruction budget for each call into the module.
    pub fn with_fuel(mut self, fuel: u64) -> Self {
        self.fuel = fuel;
        self
    }

    pub fn module_path(&self) -> &Path {
        &self.module_path
    }

    pub async fn status(&self) -> ExtensionStatus {
        self.status.read().await.clone()
    }

    /// Load the module if it changed since the last successful load. A failure is also
    /// kept as `last_error`; logging it is up to the caller.
    pub async fn reload(&self) -> Result<ReloadOutcome> {
        let _guard = self.reload_lock.lock().await;

        match self.try_reload().await {
            Ok(outcome) => {
                if let ReloadOutcome::Loaded { generation, routes } = &outcome {
                    tracing::info!(generation, routes, module = %self.module_path.display(), "extension loaded");
                }
                Ok(outcome)
            }
            Err(e) => {
                self.status.write().await.last_error = Some(format!("{e:#}"));
                Err(e)
            }
        }
    }

    async fn try_reload(&self) -> Result<ReloadOutcome> {
        let bytes = match tokio::fs::read(&self.module_path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let mut status = self.status.write().await;
                if !status.loaded {
                    status.last_error = Some(format!(
                        "extension module not found at {}",
                        self.module_path.display()
                    ));
                }
                return Ok(ReloadOutcome::Missing);
            }
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("failed to read {}", self.module_path.display())
                })
            }
        };

        let digest = hex::encode(Sha256::digest(&bytes));
        {
            let status = self.status.read().await;
            if status.loaded && status.digest.as_deref() == Some(digest.as_str()) {
                return Ok(ReloadOutcome::Unchanged);
            }
        }

        let path = self.module_path.clone();
        let fuel = self.fuel;
        let (module, routes) = tokio::task::spawn_blocking(move || -> Result<_> {
            let module = ExtensionModule::from_bytes(&bytes, &path)?.with_fuel(fuel);
            let routes = module.describe()?;
            Ok((Arc::new(module), routes))
        })
        .await
        .context("extension load task failed")??;

        let builtin: HashSet<String> = self
            .registry
            .entries_from(Origin::Builtin)
            .await
            .iter()
            .map(|d| d.path.clone())
            .collect();
        validate_routes(&routes, &builtin)?;

        let previous: HashSet<String> = self
            .registry
            .entries_from(Origin::Extension)
            .await
            .iter()
            .map(|d| d.path.clone())
            .collect();

        let changes = plan_changes(routes.clone(), &previous, &module);
        let generation = self
            .registry
            .apply(changes)
            .await
            .context("failed to apply extension routes")?;

        let mut status = self.status.write().await;
        status.loaded = true;
        status.digest = Some(digest);
        status.loaded_at = Some(Utc::now());
        status.routes = routes.iter().map(|d| d.path.clone()).collect();
        status.last_error = None;

        Ok(ReloadOutcome::Loaded {
            generation,
            routes: routes.len(),
        })
    }
}

fn validate_routes(routes: &[ToolDescriptor], builtin: &HashSet<String>) -> Result<()> {
    let mut seen = HashSet::new();
    for route in routes {
        route.validate()?;
        if builtin.contains(&route.path) {
            anyhow::bail!("extension route '{}' collides with a builtin tool", route.path);
        }
        if !seen.insert(route.path.as_str()) {
            anyhow::bail!("extension declares '{}' more than once", route.path);
        }
    }
    Ok(())
}

/// Register new paths, supersede kept ones, retire vanished ones.
fn plan_changes(
    routes: Vec<ToolDescriptor>,
    previous: &HashSet<String>,
    module: &Arc<ExtensionModule>,
) -> Vec<Change> {
    let current: HashSet<String> = routes.iter().map(|d| d.path.clone()).collect();
    let mut changes = Vec::with_capacity(routes.len());

    for descriptor in routes {
        let handler: Arc<dyn ToolHandler> = Arc::new(ExtensionHandler {
            module: module.clone(),
        });
        let existed = previous.contains(&descriptor.path);
        let entry = Entry::new(descriptor, handler, Origin::Extension);
        changes.push(if existed {
            Change::Supersede(entry)
        } else {
            Change::Register(entry)
        });
    }

    let mut retired: Vec<&String> = previous.difference(&current).collect();
    retired.sort();
    changes.extend(retired.into_iter().map(|p| Change::Retire(p.clone())));
    changes
}

/// Watch the module's directory and reload on change. The returned watcher must be kept
/// alive for as long as reloads should happen.
pub fn watch(host: Arc<ExtensionHost>) -> Result<RecommendedWatcher> {
    let dir = host
        .module_path()
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create {}", dir.display()))?;

    let file_name = host.module_path().file_name().map(|n| n.to_os_string());
    let (tx, mut rx) = mpsc::unbounded_channel::<()>();

    let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| match res {
        Ok(event) => {
            let touches_module = event
                .paths
                .iter()
                .any(|p| p.file_name().map(|n| n.to_os_string()) == file_name);
            if touches_module
                && matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_))
            {
                let _ = tx.send(());
            }
        }
        Err(e) => tracing::warn!("extension watcher error: {e}"),
    })
    .context("failed to create extension watcher")?;

    watcher
        .watch(&dir, RecursiveMode::NonRecursive)
        .with_context(|| format!("failed to watch {}", dir.display()))?;

    tokio::spawn(async move {
        while rx.recv().await.is_some() {
            // a build writes the file in several steps; wait for it to settle
            tokio::time::sleep(DEBOUNCE).await;
            while rx.try_recv().is_ok() {}

            if let Err(e) = host.reload().await {
                tracing::warn!(module = %host.module_path().display(), "extension reload failed: {e:#}");
            }
        }
    });

    tracing::info!(dir = %dir.display(), "extension watcher started");
    Ok(watcher)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use toolsmith_core::catalog::{default_errors, HttpMethod};

    fn descriptor(path: &str) -> ToolDescriptor {
        ToolDescriptor {
            name: path.trim_start_matches('/').into(),
            method: HttpMethod::Get,
            path: path.into(),
            summary: "s".into(),
            parameters: vec![],
            response_description: "ok".into(),
            response_schema: json!({"type": "object"}),
            errors: default_errors(),
        }
    }

    #[test]
    fn validate_rejects_builtin_collisions_and_duplicates() {
        let builtin: HashSet<String> = ["/power".to_string()].into_iter().collect();
        assert!(validate_routes(&[descriptor("/hello")], &builtin).is_ok());
        assert!(validate_routes(&[descriptor("/power")], &builtin).is_err());
        assert!(validate_routes(&[descriptor("/a"), descriptor("/a")], &builtin).is_err());
    }
}
