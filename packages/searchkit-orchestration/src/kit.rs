//! Capability kit
//!
//! `Host` owns every piece of mutable engine state (task and endpoint
//! registries, the job hub, pipelines submitted during setup). `Kit` is the
//! immutable view handed to extensions and stages: a set of shared handles
//! with no path back to the host.

use crate::database::Database;
use crate::error::{Result, SetupError};
use crate::job::JobHub;
use crate::pipeline::PipelineDefinition;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

/// Task / endpoint handler
pub type Handler = Arc<dyn Fn(Value) -> BoxFuture<'static, Value> + Send + Sync>;

/// Wrap an async closure as a [`Handler`]
pub fn handler<F, Fut>(f: F) -> Handler
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Value> + Send + 'static,
{
    Arc::new(move |value: Value| -> BoxFuture<'static, Value> { Box::pin(f(value)) })
}

/// Duplicate-checked handler map keyed by `(provider, name)`
pub struct HandlerRegistry {
    label: &'static str,
    handlers: DashMap<(String, String), Handler>,
}

impl HandlerRegistry {
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            handlers: DashMap::new(),
        }
    }

    /// Register a handler; an existing key is rejected unless `forced`
    pub fn add(&self, name: &str, provider: &str, handler: Handler, forced: bool) -> Result<()> {
        match self.handlers.entry((provider.to_string(), name.to_string())) {
            Entry::Occupied(mut occupied) => {
                if !forced {
                    return Err(SetupError::duplicate_name(format!(
                        "{} \"{}\" is already registered by \"{}\"",
                        self.label, name, provider
                    ))
                    .line("pick another name or register with forced assignment"));
                }
                warn!("Overriding {} {}/{}", self.label, provider, name);
                occupied.insert(handler);
            }
            Entry::Vacant(vacant) => {
                debug!("Registered {} {}/{}", self.label, provider, name);
                vacant.insert(handler);
            }
        }
        Ok(())
    }

    pub fn get(&self, provider: &str, name: &str) -> Option<Handler> {
        self.handlers
            .get(&(provider.to_string(), name.to_string()))
            .map(|entry| entry.value().clone())
    }

    /// Registered `(provider, name)` keys, sorted
    pub fn keys(&self) -> Vec<(String, String)> {
        let mut keys: Vec<_> = self.handlers.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Owner of the engine's mutable state
pub struct Host {
    tasks: Arc<HandlerRegistry>,
    endpoints: Arc<HandlerRegistry>,
    jobs: Arc<JobHub>,
    database: Option<Arc<dyn Database>>,
    /// `None` once the engine has finished setup
    pending_pipelines: Arc<Mutex<Option<Vec<PipelineDefinition>>>>,
}

impl Host {
    pub fn new(database: Option<Arc<dyn Database>>) -> Self {
        Self {
            tasks: Arc::new(HandlerRegistry::new("task")),
            endpoints: Arc::new(HandlerRegistry::new("endpoint")),
            jobs: Arc::new(JobHub::new()),
            database,
            pending_pipelines: Arc::new(Mutex::new(Some(Vec::new()))),
        }
    }

    /// Immutable view for extension and stage code
    pub fn kit(&self) -> Kit {
        Kit {
            tasks: self.tasks.clone(),
            endpoints: self.endpoints.clone(),
            jobs: self.jobs.clone(),
            database: self.database.clone(),
            pending_pipelines: self.pending_pipelines.clone(),
        }
    }

    pub fn tasks(&self) -> &HandlerRegistry {
        &self.tasks
    }

    pub fn endpoints(&self) -> &HandlerRegistry {
        &self.endpoints
    }

    pub fn job_hub(&self) -> &Arc<JobHub> {
        &self.jobs
    }

    pub fn database(&self) -> Option<&Arc<dyn Database>> {
        self.database.as_ref()
    }

    /// Drain pipelines submitted through kits, in submission order
    pub fn take_pipelines(&self) -> Vec<PipelineDefinition> {
        self.pending_pipelines
            .lock()
            .as_mut()
            .map(std::mem::take)
            .unwrap_or_default()
    }

    /// Stop accepting submissions; anything still queued is dropped
    pub fn close_submissions(&self) {
        if let Some(dropped) = self.pending_pipelines.lock().take() {
            if !dropped.is_empty() {
                warn!("Dropping {} unprocessed pipeline submission(s)", dropped.len());
            }
        }
    }
}

/// Capabilities exposed to extensions and stages
#[derive(Clone)]
pub struct Kit {
    tasks: Arc<HandlerRegistry>,
    endpoints: Arc<HandlerRegistry>,
    jobs: Arc<JobHub>,
    database: Option<Arc<dyn Database>>,
    pending_pipelines: Arc<Mutex<Option<Vec<PipelineDefinition>>>>,
}

impl Kit {
    pub fn add_task(&self, name: &str, provider: &str, handler: Handler, forced: bool) -> Result<()> {
        self.tasks.add(name, provider, handler, forced)
    }

    pub fn add_endpoint(
        &self,
        name: &str,
        provider: &str,
        handler: Handler,
        forced: bool,
    ) -> Result<()> {
        self.endpoints.add(name, provider, handler, forced)
    }

    pub fn job_hub(&self) -> &JobHub {
        &self.jobs
    }

    pub fn database(&self) -> Option<&dyn Database> {
        self.database.as_deref()
    }

    /// Queue a pipeline; the engine sets it up once every extension is loaded.
    ///
    /// Returns `false` and drops the definition once setup has finished.
    pub fn submit_pipeline(&self, definition: PipelineDefinition) -> bool {
        match self.pending_pipelines.lock().as_mut() {
            Some(pending) => {
                debug!("Pipeline \"{}\" submitted", definition.manifest.name);
                pending.push(definition);
                true
            }
            None => {
                warn!(
                    "Pipeline \"{}\" submitted after setup finished; ignoring it",
                    definition.manifest.name
                );
                false
            }
        }
    }
}
