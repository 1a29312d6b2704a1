//! Engine bootstrap
//!
//! `EngineBuilder::setup` runs the whole startup sequence:
//!
//! ```text
//! extensions (validate .. load) -> host pipelines -> extension-submitted pipelines
//! ```
//!
//! Any failure is handed to the `FatalReporter` and returned; nothing is
//! reachable until `setup` succeeds.

use crate::config::EngineConfig;
use crate::contract::ContractVerifier;
use crate::database::Database;
use crate::error::{Result, SetupError};
use crate::extension::{Extension, ExtensionRegistry};
use crate::job::JobHub;
use crate::kit::{Host, Kit};
use crate::manifest::DependencyContext;
use crate::pipeline::{Pipeline, PipelineDefinition};
use crate::telemetry::init_tracing;
use indexmap::IndexMap;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Sink for fatal setup errors
pub trait FatalReporter: Send + Sync {
    fn report(&self, error: &SetupError);
}

/// Logs one `error!` event per diagnostic line
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl FatalReporter for TracingReporter {
    fn report(&self, err: &SetupError) {
        for line in &err.lines {
            error!(kind = err.kind.as_str(), exit_code = err.exit_code(), "{}", line);
        }
    }
}

pub struct EngineBuilder {
    config: EngineConfig,
    database: Option<Arc<dyn Database>>,
    extensions: Vec<Arc<dyn Extension>>,
    pipelines: Vec<PipelineDefinition>,
    reporter: Arc<dyn FatalReporter>,
}

impl EngineBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            database: None,
            extensions: Vec::new(),
            pipelines: Vec::new(),
            reporter: Arc::new(TracingReporter),
        }
    }

    pub fn database(mut self, database: impl Database + 'static) -> Self {
        self.database = Some(Arc::new(database));
        self
    }

    /// Registration order is load order
    pub fn extension(mut self, extension: impl Extension + 'static) -> Self {
        self.extensions.push(Arc::new(extension));
        self
    }

    pub fn pipeline(mut self, definition: PipelineDefinition) -> Self {
        self.pipelines.push(definition);
        self
    }

    pub fn reporter(mut self, reporter: impl FatalReporter + 'static) -> Self {
        self.reporter = Arc::new(reporter);
        self
    }

    pub async fn setup(self) -> Result<Engine> {
        let reporter = self.reporter.clone();
        match self.run().await {
            Ok(engine) => Ok(engine),
            Err(err) => {
                reporter.report(&err);
                Err(err)
            }
        }
    }

    async fn run(self) -> Result<Engine> {
        let EngineBuilder {
            config,
            database,
            extensions,
            pipelines,
            reporter: _,
        } = self;
        if let Some(filter) = config.log_filter.as_deref() {
            if init_tracing(Some(filter)) {
                debug!("Installed tracing subscriber with filter \"{}\"", filter);
            }
        }
        info!(
            "Starting engine (core {}, contract mode {})",
            config.core_version,
            config.contract_mode.as_str()
        );

        let host = Host::new(database.clone());
        let kit = host.kit();

        let mut registry = ExtensionRegistry::new(&config.core_version, config.strict_available);
        for extension in extensions {
            registry.register_arc(extension);
        }
        registry.setup(&kit).await?;

        let ctx = DependencyContext::new(&config.core_version)
            .with_database(database)
            .with_extensions(registry.versions().clone());
        let verifier = ContractVerifier::new(config.contract_mode);

        let mut ready = Vec::with_capacity(pipelines.len());
        for definition in pipelines {
            ready.push(Pipeline::setup(definition, &kit, &ctx, &verifier).await?);
        }

        // Submitted by extensions or by pipeline init hooks
        loop {
            let submitted = host.take_pipelines();
            if submitted.is_empty() {
                break;
            }
            for definition in submitted {
                ready.push(Pipeline::setup(definition, &kit, &ctx, &verifier).await?);
            }
        }
        host.close_submissions();

        info!(
            "Engine ready: {} extension(s), {} pipeline(s), {} endpoint(s)",
            registry.versions().len(),
            ready.len(),
            host.endpoints().len()
        );

        Ok(Engine {
            config,
            host,
            extensions: registry.versions().clone(),
            pipelines: ready,
        })
    }
}

/// A fully set-up engine
pub struct Engine {
    config: EngineConfig,
    host: Host,
    extensions: IndexMap<String, String>,
    pipelines: Vec<Arc<Pipeline>>,
}

impl Engine {
    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn kit(&self) -> Kit {
        self.host.kit()
    }

    pub fn job_hub(&self) -> &Arc<JobHub> {
        self.host.job_hub()
    }

    /// Loaded extensions, `name -> version`
    pub fn extensions(&self) -> &IndexMap<String, String> {
        &self.extensions
    }

    pub fn pipelines(&self) -> &[Arc<Pipeline>] {
        &self.pipelines
    }

    pub fn pipeline(&self, name: &str) -> Option<&Arc<Pipeline>> {
        self.pipelines.iter().find(|p| p.name() == name)
    }

    /// Registered `(provider, name)` endpoint keys
    pub fn endpoints(&self) -> Vec<(String, String)> {
        self.host.endpoints().keys()
    }

    /// `None` when no such endpoint is registered
    pub async fn call_endpoint(&self, provider: &str, name: &str, request: Value) -> Option<Value> {
        let endpoint = self.host.endpoints().get(provider, name)?;
        Some(endpoint(request).await)
    }

    /// `None` when no such task is registered
    pub async fn run_task(&self, provider: &str, name: &str, payload: Value) -> Option<Value> {
        let task = self.host.tasks().get(provider, name)?;
        Some(task(payload).await)
    }
}
