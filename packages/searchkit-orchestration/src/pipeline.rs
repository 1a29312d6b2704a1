//! Pipeline orchestrator
//!
//! A pipeline is `middleware* -> primary -> pipe* -> terminal`, fixed when it
//! is set up. Crawl pipelines run crawler -> indexer, search pipelines run
//! ranker -> interceptor. Setup is all-or-nothing; request execution stops at
//! the first failing stage and reports the trail of stages that ran.

use crate::contract::{Boundary, ContractVerifier};
use crate::error::{ErrorKind, Result, SetupError, StageFailure};
use crate::kit::{handler, Kit};
use crate::manifest::{DependencyContext, Manifest};
use crate::stage::{Stage, StageAdapter, StageKind};
use futures::future::BoxFuture;
use serde_json::{json, Map, Value};
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

/// Composite init hook, run after every stage has been initialized
pub type InitHook = Arc<dyn Fn(Kit) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Pipeline shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineShape {
    Crawl,
    Search,
}

impl PipelineShape {
    pub fn primary_kind(&self) -> StageKind {
        match self {
            PipelineShape::Crawl => StageKind::Crawler,
            PipelineShape::Search => StageKind::Ranker,
        }
    }

    pub fn terminal_kind(&self) -> StageKind {
        match self {
            PipelineShape::Crawl => StageKind::Indexer,
            PipelineShape::Search => StageKind::Interceptor,
        }
    }

    /// Endpoint name prefix
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineShape::Crawl => "crawl",
            PipelineShape::Search => "search",
        }
    }
}

impl fmt::Display for PipelineShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Stages and metadata of a pipeline before setup
pub struct PipelineDefinition {
    pub manifest: Manifest,
    pub shape: PipelineShape,
    query_path: Option<String>,
    middlewares: Vec<Arc<dyn Stage>>,
    primary: Arc<dyn Stage>,
    pipes: Vec<Arc<dyn Stage>>,
    terminal: Arc<dyn Stage>,
    init: Option<InitHook>,
}

impl PipelineDefinition {
    fn new(
        shape: PipelineShape,
        manifest: Manifest,
        primary: Arc<dyn Stage>,
        terminal: Arc<dyn Stage>,
    ) -> Self {
        Self {
            manifest,
            shape,
            query_path: None,
            middlewares: Vec::new(),
            primary,
            pipes: Vec::new(),
            terminal,
            init: None,
        }
    }

    /// crawler -> indexer
    pub fn crawl(
        manifest: Manifest,
        crawler: impl Stage + 'static,
        indexer: impl Stage + 'static,
    ) -> Self {
        Self::new(PipelineShape::Crawl, manifest, Arc::new(crawler), Arc::new(indexer))
    }

    /// ranker -> interceptor
    pub fn search(
        manifest: Manifest,
        ranker: impl Stage + 'static,
        interceptor: impl Stage + 'static,
    ) -> Self {
        Self::new(PipelineShape::Search, manifest, Arc::new(ranker), Arc::new(interceptor))
    }

    pub fn with_middleware(mut self, middleware: impl Stage + 'static) -> Self {
        self.middlewares.push(Arc::new(middleware));
        self
    }

    pub fn with_pipe(mut self, pipe: impl Stage + 'static) -> Self {
        self.pipes.push(Arc::new(pipe));
        self
    }

    /// Endpoint suffix; defaults to the manifest name
    pub fn with_query_path(mut self, path: impl Into<String>) -> Self {
        self.query_path = Some(path.into().trim_start_matches('/').to_string());
        self
    }

    pub fn with_init<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(Kit) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.init = Some(Arc::new(
            move |kit: Kit| -> BoxFuture<'static, anyhow::Result<()>> { Box::pin(hook(kit)) },
        ));
        self
    }

    /// `<crawl|search>/<query_path or name>`
    pub fn endpoint_name(&self) -> String {
        let suffix = self.query_path.as_deref().unwrap_or(&self.manifest.name);
        format!("{}/{}", self.shape, suffix)
    }
}

impl fmt::Debug for PipelineDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineDefinition")
            .field("name", &self.manifest.name)
            .field("shape", &self.shape)
            .field("middlewares", &self.middlewares.len())
            .field("pipes", &self.pipes.len())
            .finish()
    }
}

/// Outcome of one request plus the labels of the stages that completed
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineResult {
    pub ran: Vec<String>,
    pub outcome: std::result::Result<Value, StageFailure>,
}

impl PipelineResult {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn output(&self) -> Option<&Value> {
        self.outcome.as_ref().ok()
    }

    pub fn failure(&self) -> Option<&StageFailure> {
        self.outcome.as_ref().err()
    }

    /// `{success, output, ran}` or `{success: false, message, error?, kind, ran}`
    pub fn to_json(&self) -> Value {
        match &self.outcome {
            Ok(output) => json!({ "success": true, "output": output, "ran": self.ran }),
            Err(failure) => {
                let mut body = Map::new();
                body.insert("success".to_string(), Value::Bool(false));
                body.insert("message".to_string(), Value::String(failure.message.clone()));
                if let Some(error) = &failure.error {
                    body.insert("error".to_string(), error.clone());
                }
                body.insert("kind".to_string(), json!(failure.kind.as_str()));
                body.insert("ran".to_string(), json!(self.ran));
                Value::Object(body)
            }
        }
    }
}

/// A set-up, immutable pipeline
pub struct Pipeline {
    manifest: Manifest,
    shape: PipelineShape,
    endpoint: String,
    middlewares: Vec<StageAdapter>,
    primary: StageAdapter,
    pipes: Vec<StageAdapter>,
    terminal: StageAdapter,
    kit: Kit,
}

impl Pipeline {
    /// Build, initialize, verify and register a pipeline. Every failure is fatal.
    pub async fn setup(
        definition: PipelineDefinition,
        kit: &Kit,
        ctx: &DependencyContext,
        verifier: &ContractVerifier,
    ) -> Result<Arc<Pipeline>> {
        let endpoint = definition.endpoint_name();
        let PipelineDefinition {
            manifest,
            shape,
            query_path: _,
            middlewares,
            primary,
            pipes,
            terminal,
            init,
        } = definition;
        let subject = format!("pipeline \"{}\"", manifest.name);
        info!("Setting up {} ({})", subject, shape);

        // 1. Composite manifest
        let mut issues = manifest.structural_issues();
        if issues.is_empty() {
            issues.extend(manifest.constraint_issues());
        }
        if !issues.is_empty() {
            let lines = issues
                .into_iter()
                .map(|issue| format!("invalid {}: {}", subject, issue))
                .collect();
            return Err(SetupError::with_lines(ErrorKind::ManifestInvalid, lines));
        }

        // 2. Adapters
        let middlewares = middlewares
            .into_iter()
            .map(|stage| StageAdapter::new(StageKind::Middleware, stage))
            .collect::<Result<Vec<_>>>()?;
        let primary = StageAdapter::new(shape.primary_kind(), primary)?;
        let pipes = pipes
            .into_iter()
            .map(|stage| StageAdapter::new(StageKind::Pipe, stage))
            .collect::<Result<Vec<_>>>()?;
        let terminal = StageAdapter::new(shape.terminal_kind(), terminal)?;

        let pipeline = Pipeline {
            manifest,
            shape,
            endpoint,
            middlewares,
            primary,
            pipes,
            terminal,
            kit: kit.clone(),
        };

        // 3. Stage init, chain order
        for adapter in pipeline.stages() {
            adapter.init(kit).await?;
        }

        // 4. Composite init
        if let Some(hook) = init {
            hook(kit.clone()).await.map_err(|e| {
                SetupError::init_failed(format!("{} failed to initialize: {:#}", subject, e))
            })?;
        }

        // 5. Contracts
        let labels: Vec<String> = pipeline.stages().map(|a| a.label()).collect();
        verifier.verify(&pipeline.boundaries(&labels))?;
        for boundary in pipeline.middleware_boundaries(&labels) {
            if !verifier.mode().compatible(boundary.produced, boundary.required) {
                warn!(
                    "{}: output of {} may not satisfy {} (produced {}, required {})",
                    subject, boundary.upstream, boundary.downstream, boundary.produced, boundary.required
                );
            }
        }

        // 6. Dependencies
        for adapter in pipeline.stages() {
            adapter.check_dependence(ctx)?;
        }
        pipeline.manifest.check_dependence(&subject, ctx)?;

        // 7. Endpoint
        let pipeline = Arc::new(pipeline);
        let weak: Weak<Pipeline> = Arc::downgrade(&pipeline);
        kit.add_endpoint(
            &pipeline.endpoint,
            &pipeline.manifest.name,
            handler(move |request| {
                let weak = weak.clone();
                async move {
                    match weak.upgrade() {
                        Some(pipeline) => pipeline.process(request).await.to_json(),
                        None => json!({
                            "success": false,
                            "message": "pipeline has been shut down",
                            "kind": ErrorKind::StageRuntimeFailure.as_str(),
                            "ran": [],
                        }),
                    }
                }
            }),
            false,
        )?;

        info!(
            "Pipeline \"{}\" ready at {} ({} stages)",
            pipeline.manifest.name,
            pipeline.endpoint,
            labels.len()
        );
        Ok(pipeline)
    }

    /// All adapters in chain order
    fn stages(&self) -> impl Iterator<Item = &StageAdapter> {
        self.middlewares
            .iter()
            .chain(std::iter::once(&self.primary))
            .chain(self.pipes.iter())
            .chain(std::iter::once(&self.terminal))
    }

    /// Enforced edges from the primary stage on; `labels` is in `stages()` order
    fn boundaries<'a>(&'a self, labels: &[String]) -> Vec<Boundary<'a>> {
        let offset = self.middlewares.len();
        let chain: Vec<&StageAdapter> = self.stages().skip(offset).collect();

        chain
            .windows(2)
            .enumerate()
            .map(|(i, pair)| {
                Boundary::new(
                    labels[offset + i].clone(),
                    pair[0].output_schema(),
                    labels[offset + i + 1].clone(),
                    pair[1].input_schema(),
                )
            })
            .collect()
    }

    /// Edges that involve middleware output. Mismatches here are only logged.
    fn middleware_boundaries<'a>(&'a self, labels: &[String]) -> Vec<Boundary<'a>> {
        let Some(last) = self.middlewares.last() else {
            return Vec::new();
        };
        let chain: Vec<&StageAdapter> = self.stages().take(self.middlewares.len() + 1).collect();
        let mut boundaries: Vec<Boundary<'a>> = chain
            .windows(2)
            .enumerate()
            .map(|(i, pair)| {
                Boundary::new(
                    labels[i].clone(),
                    pair[0].output_schema(),
                    labels[i + 1].clone(),
                    pair[1].input_schema(),
                )
            })
            .collect();

        // Pipes and the terminal receive the last middleware output as request
        let last_label = &labels[self.middlewares.len() - 1];
        let offset = self.middlewares.len() + 1;
        let receivers = self.pipes.iter().chain(std::iter::once(&self.terminal));
        for (i, adapter) in receivers.enumerate() {
            if let Some(request) = adapter.request_schema() {
                boundaries.push(Boundary::new(
                    last_label.clone(),
                    last.output_schema(),
                    format!("{} (request)", labels[offset + i]),
                    request,
                ));
            }
        }
        boundaries
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn name(&self) -> &str {
        &self.manifest.name
    }

    pub fn shape(&self) -> PipelineShape {
        self.shape
    }

    /// Registered endpoint name
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Run one request through the chain; no retries
    pub async fn process(&self, request: Value) -> PipelineResult {
        let mut ran = Vec::new();

        let mut context = request;
        for middleware in &self.middlewares {
            context = match middleware.process(None, context, &self.kit).await {
                Ok(value) => value,
                Err(failure) => return self.fail(ran, failure),
            };
        }
        ran.push(StageKind::Middleware.as_str().to_string());

        let mut payload = match self.primary.process(None, context.clone(), &self.kit).await {
            Ok(value) => value,
            Err(failure) => return self.fail(ran, failure),
        };
        ran.push(self.primary.kind().as_str().to_string());

        for pipe in &self.pipes {
            payload = match pipe.process(Some(&context), payload, &self.kit).await {
                Ok(value) => value,
                Err(failure) => return self.fail(ran, failure),
            };
        }
        ran.push(StageKind::Pipe.as_str().to_string());

        let output = match self.terminal.process(Some(&context), payload, &self.kit).await {
            Ok(value) => value,
            Err(failure) => return self.fail(ran, failure),
        };
        ran.push(self.terminal.kind().as_str().to_string());

        debug!("{} completed", self.endpoint);
        PipelineResult {
            ran,
            outcome: Ok(output),
        }
    }

    fn fail(&self, ran: Vec<String>, failure: StageFailure) -> PipelineResult {
        warn!(
            "Pipeline \"{}\" failed after {:?}: {}",
            self.manifest.name, ran, failure
        );
        PipelineResult {
            ran,
            outcome: Err(failure),
        }
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.manifest.name)
            .field("endpoint", &self.endpoint)
            .field("stages", &self.stages().map(|a| a.label()).collect::<Vec<_>>())
            .finish()
    }
}
