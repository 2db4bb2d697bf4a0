//! The live tool registry: one descriptor + handler per path.
//!
//! Dispatch and discovery both read this map, so the catalog cannot drift from the
//! routes actually served.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;
use toolsmith_core::catalog::{Catalog, HttpMethod, ToolDescriptor, DISCOVERY_PATH};

use crate::handler::ToolHandler;
use crate::registration_log::{Origin, RegistrationLog, RegistrationOp, RegistrationRecord};

const RECENT_CAPACITY: usize = 32;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum RegistryError {
    #[error("a tool is already registered at '{0}'")]
    DuplicatePath(String),

    #[error("no tool is registered at '{0}'")]
    UnknownPath(String),

    #[error("'{0}' is reserved")]
    ReservedPath(String),

    #[error("batch touches '{0}' more than once")]
    ConflictingBatch(String),

    #[error("invalid descriptor: {0}")]
    InvalidDescriptor(String),

    #[error("failed to record registration: {0}")]
    Log(String),
}

#[derive(Clone)]
pub struct Entry {
    pub descriptor: Arc<ToolDescriptor>,
    pub handler: Arc<dyn ToolHandler>,
    pub origin: Origin,
}

impl Entry {
    pub fn new(descriptor: ToolDescriptor, handler: Arc<dyn ToolHandler>, origin: Origin) -> Self {
        Self {
            descriptor: Arc::new(descriptor),
            handler,
            origin,
        }
    }

    pub fn path(&self) -> &str {
        &self.descriptor.path
    }
}

/// One registry mutation, applied as part of a batch.
pub enum Change {
    Register(Entry),
    Supersede(Entry),
    Retire(String),
}

impl Change {
    fn path(&self) -> &str {
        match self {
            Change::Register(e) | Change::Supersede(e) => e.path(),
            Change::Retire(path) => path,
        }
    }
}

pub enum Resolution {
    Found(Entry),
    MethodNotAllowed { allowed: HttpMethod },
    NotFound,
}

#[derive(Default)]
struct State {
    entries: Vec<Entry>,
    generation: u64,
    recent: VecDeque<RegistrationRecord>,
}

impl State {
    fn position(&self, path: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.path() == path)
    }
}

pub struct ToolRegistry {
    state: RwLock<State>,
    log: Option<RegistrationLog>,
}

impl ToolRegistry {
    pub fn new(log: Option<RegistrationLog>) -> Self {
        Self {
            state: RwLock::new(State::default()),
            log,
        }
    }

    pub async fn register(
        &self,
        descriptor: ToolDescriptor,
        handler: Arc<dyn ToolHandler>,
        origin: Origin,
    ) -> Result<u64, RegistryError> {
        self.apply(vec![Change::Register(Entry::new(descriptor, handler, origin))])
            .await
    }

    /// Replace the entry at an existing path with a new descriptor and handler.
    pub async fn supersede(
        &self,
        descriptor: ToolDescriptor,
        handler: Arc<dyn ToolHandler>,
        origin: Origin,
    ) -> Result<u64, RegistryError> {
        self.apply(vec![Change::Supersede(Entry::new(descriptor, handler, origin))])
            .await
    }

    pub async fn retire(&self, path: &str) -> Result<u64, RegistryError> {
        self.apply(vec![Change::Retire(path.to_string())]).await
    }

    /// Validate a whole batch, record it, then apply it under one write lock.
    /// Nothing changes if any part is invalid. Returns the new generation.
    pub async fn apply(&self, changes: Vec<Change>) -> Result<u64, RegistryError> {
        let mut state = self.state.write().await;

        let mut touched: Vec<&str> = Vec::with_capacity(changes.len());
        for change in &changes {
            let path = change.path();
            if touched.contains(&path) {
                return Err(RegistryError::ConflictingBatch(path.to_string()));
            }
            touched.push(path);

            if path == DISCOVERY_PATH {
                return Err(RegistryError::ReservedPath(path.to_string()));
            }
            let exists = state.position(path).is_some();
            match change {
                Change::Register(entry) => {
                    entry
                        .descriptor
                        .validate()
                        .map_err(|e| RegistryError::InvalidDescriptor(e.to_string()))?;
                    if exists {
                        return Err(RegistryError::DuplicatePath(path.to_string()));
                    }
                }
                Change::Supersede(entry) => {
                    entry
                        .descriptor
                        .validate()
                        .map_err(|e| RegistryError::InvalidDescriptor(e.to_string()))?;
                    if !exists {
                        return Err(RegistryError::UnknownPath(path.to_string()));
                    }
                }
                Change::Retire(_) => {
                    if !exists {
                        return Err(RegistryError::UnknownPath(path.to_string()));
                    }
                }
            }
        }

        if changes.is_empty() {
            return Ok(state.generation);
        }

        let generation = state.generation + 1;
        let timestamp = Utc::now();
        let records: Vec<RegistrationRecord> = changes
            .iter()
            .map(|change| {
                let (op, method, origin) = match change {
                    Change::Register(e) => (RegistrationOp::Register, e.descriptor.method, e.origin),
                    Change::Supersede(e) => {
                        (RegistrationOp::Supersede, e.descriptor.method, e.origin)
                    }
                    Change::Retire(path) => {
                        let old = state
                            .position(path)
                            .map(|i| &state.entries[i])
                            .map(|e| (e.descriptor.method, e.origin))
                            .unwrap_or((HttpMethod::Get, Origin::Builtin));
                        (RegistrationOp::Retire, old.0, old.1)
                    }
                };
                RegistrationRecord {
                    timestamp,
                    generation,
                    op,
                    method,
                    path: change.path().to_string(),
                    origin,
                }
            })
            .collect();

        if let Some(log) = &self.log {
            log.append(&records)
                .map_err(|e| RegistryError::Log(format!("{e:#}")))?;
        }

        for change in changes {
            match change {
                Change::Register(entry) => state.entries.push(entry),
                Change::Supersede(entry) => {
                    if let Some(i) = state.position(entry.path()) {
                        state.entries[i] = entry;
                    }
                }
                Change::Retire(path) => {
                    if let Some(i) = state.position(&path) {
                        state.entries.remove(i);
                    }
                }
            }
        }

        for record in records {
            tracing::info!(
                generation,
                op = ?record.op,
                method = %record.method,
                path = %record.path,
                "registry updated"
            );
            if state.recent.len() == RECENT_CAPACITY {
                state.recent.pop_front();
            }
            state.recent.push_back(record);
        }
        state.generation = generation;

        Ok(generation)
    }

    /// Snapshot of the current catalog, in registration order.
    pub async fn catalog(&self) -> Catalog {
        let state = self.state.read().await;
        Catalog::new(state.entries.iter().map(|e| e.descriptor.clone()).collect())
    }

    pub async fn resolve(&self, method: HttpMethod, path: &str) -> Resolution {
        let state = self.state.read().await;
        match state.position(path).map(|i| &state.entries[i]) {
            Some(entry) if entry.descriptor.method == method => Resolution::Found(entry.clone()),
            Some(entry) => Resolution::MethodNotAllowed {
                allowed: entry.descriptor.method,
            },
            None => Resolution::NotFound,
        }
    }

    pub async fn generation(&self) -> u64 {
        self.state.read().await.generation
    }

    /// Current entries from one origin, in registration order.
    pub async fn entries_from(&self, origin: Origin) -> Vec<Arc<ToolDescriptor>> {
        let state = self.state.read().await;
        state
            .entries
            .iter()
            .filter(|e| e.origin == origin)
            .map(|e| e.descriptor.clone())
            .collect()
    }

    /// Most recent registry changes, oldest first.
    pub async fn recent(&self) -> Vec<RegistrationRecord> {
        self.state.read().await.recent.iter().cloned().collect()
    }
}
