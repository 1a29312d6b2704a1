use crate::error::{Result, SetupError, StageFailure};
use crate::kit::Kit;
use crate::manifest::{DependencyContext, Manifest};
use crate::schema::SchemaDescriptor;
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Value returned by a stage's `process`
pub type StageResult = std::result::Result<Value, StageFailure>;

/// Stage kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    Middleware,
    Crawler,
    Ranker,
    Pipe,
    Indexer,
    Interceptor,
}

impl StageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::Middleware => "middleware",
            StageKind::Crawler => "crawler",
            StageKind::Ranker => "ranker",
            StageKind::Pipe => "pipe",
            StageKind::Indexer => "indexer",
            StageKind::Interceptor => "interceptor",
        }
    }

    /// Pipes and terminal stages receive the middleware output as request context
    pub fn receives_request(&self) -> bool {
        matches!(
            self,
            StageKind::Pipe | StageKind::Indexer | StageKind::Interceptor
        )
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Stage handler trait (pluggable stages)
#[async_trait]
pub trait Stage: Send + Sync {
    fn manifest(&self) -> &Manifest;

    /// Schema of the request context; only pipes and terminal stages get one
    fn request_schema(&self) -> Option<&SchemaDescriptor> {
        None
    }

    fn input_schema(&self) -> &SchemaDescriptor;

    fn output_schema(&self) -> &SchemaDescriptor;

    /// One-time setup hook
    async fn init(&self, _kit: &Kit) -> anyhow::Result<()> {
        Ok(())
    }

    /// Only ever called with schema-conformant `input` (and `request`, when declared)
    async fn process(&self, request: Option<&Value>, input: Value, kit: &Kit) -> StageResult;
}

type ProcessFn = Arc<dyn Fn(Option<Value>, Value) -> BoxFuture<'static, StageResult> + Send + Sync>;

/// Closure-backed stage for hosts that need no init hook or kit access
pub struct FnStage {
    manifest: Manifest,
    request_schema: Option<SchemaDescriptor>,
    input_schema: SchemaDescriptor,
    output_schema: SchemaDescriptor,
    process: ProcessFn,
}

impl FnStage {
    pub fn new<F, Fut>(
        manifest: Manifest,
        input_schema: SchemaDescriptor,
        output_schema: SchemaDescriptor,
        process: F,
    ) -> Self
    where
        F: Fn(Option<Value>, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = StageResult> + Send + 'static,
    {
        Self {
            manifest,
            request_schema: None,
            input_schema,
            output_schema,
            process: Arc::new(
                move |request: Option<Value>, input: Value| -> BoxFuture<'static, StageResult> {
                    Box::pin(process(request, input))
                },
            ),
        }
    }

    pub fn with_request_schema(mut self, schema: SchemaDescriptor) -> Self {
        self.request_schema = Some(schema);
        self
    }
}

#[async_trait]
impl Stage for FnStage {
    fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    fn request_schema(&self) -> Option<&SchemaDescriptor> {
        self.request_schema.as_ref()
    }

    fn input_schema(&self) -> &SchemaDescriptor {
        &self.input_schema
    }

    fn output_schema(&self) -> &SchemaDescriptor {
        &self.output_schema
    }

    async fn process(&self, request: Option<&Value>, input: Value, _kit: &Kit) -> StageResult {
        (self.process)(request.cloned(), input).await
    }
}

/// Wraps a stage of any kind with manifest validation, dependency checks,
/// a once-only init and input validation.
pub struct StageAdapter {
    kind: StageKind,
    stage: Arc<dyn Stage>,
    initialized: AtomicBool,
}

impl StageAdapter {
    /// Validate the stage definition; failures are fatal `manifest-invalid`
    pub fn new(kind: StageKind, stage: Arc<dyn Stage>) -> Result<Self> {
        let manifest = stage.manifest();
        let mut issues = manifest.structural_issues();
        if issues.is_empty() {
            issues.extend(manifest.constraint_issues());
        }
        if stage.request_schema().is_some() && !kind.receives_request() {
            issues.push(format!(
                "a {} never receives request context but declares a request schema",
                kind
            ));
        }

        if !issues.is_empty() {
            let lines = issues
                .into_iter()
                .map(|issue| format!("invalid {} \"{}\": {}", kind, manifest.name, issue))
                .collect();
            return Err(SetupError::with_lines(
                crate::error::ErrorKind::ManifestInvalid,
                lines,
            ));
        }

        Ok(Self {
            kind,
            stage,
            initialized: AtomicBool::new(false),
        })
    }

    pub fn kind(&self) -> StageKind {
        self.kind
    }

    pub fn manifest(&self) -> &Manifest {
        self.stage.manifest()
    }

    pub fn name(&self) -> &str {
        &self.stage.manifest().name
    }

    /// `kind "name"`, used in diagnostics
    pub fn label(&self) -> String {
        format!("{} \"{}\"", self.kind, self.name())
    }

    pub fn request_schema(&self) -> Option<&SchemaDescriptor> {
        self.stage.request_schema()
    }

    pub fn input_schema(&self) -> &SchemaDescriptor {
        self.stage.input_schema()
    }

    pub fn output_schema(&self) -> &SchemaDescriptor {
        self.stage.output_schema()
    }

    /// Run the stage's init hook; later calls are no-ops
    pub async fn init(&self, kit: &Kit) -> Result<()> {
        if self.initialized.swap(true, Ordering::SeqCst) {
            debug!("{} already initialized", self.label());
            return Ok(());
        }

        self.stage.init(kit).await.map_err(|e| {
            SetupError::init_failed(format!("{} failed to initialize: {:#}", self.label(), e))
        })?;
        info!("Initialized {}", self.label());
        Ok(())
    }

    pub fn check_dependence(&self, ctx: &DependencyContext) -> Result<()> {
        self.manifest().check_dependence(&self.label(), ctx)
    }

    /// Validate, then hand over to user code. Invalid payloads never reach the stage.
    pub async fn process(&self, request: Option<&Value>, input: Value, kit: &Kit) -> StageResult {
        if let Err(violation) = self.input_schema().validate(&input) {
            warn!("{} rejected input: {}", self.label(), violation);
            return Err(StageFailure::input_invalid(format!(
                "{} received invalid input: {}",
                self.label(),
                violation
            )));
        }

        if let Some(schema) = self.request_schema() {
            let checked = match request {
                Some(request) => schema.validate(request).map_err(|v| v.to_string()),
                None => Err("request is missing".to_string()),
            };
            if let Err(reason) = checked {
                warn!("{} rejected request: {}", self.label(), reason);
                return Err(StageFailure::input_invalid(format!(
                    "{} received invalid request: {}",
                    self.label(),
                    reason
                )));
            }
        }

        self.stage.process(request, input, kit).await
    }
}

impl fmt::Debug for StageAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageAdapter")
            .field("kind", &self.kind)
            .field("name", &self.name())
            .finish()
    }
}
