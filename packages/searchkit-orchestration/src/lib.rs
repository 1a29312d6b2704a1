/*
 * Searchkit Orchestration - pluggable crawl/search/index engine core
 *
 * Hosts contribute stages (crawlers, rankers, pipes, indexers,
 * interceptors, middleware) and extensions; the core wires them into
 * pipelines and refuses to start unless every contract holds.
 *
 * Architecture:
 * - Schema Contract Verifier (setup-time structural compatibility)
 * - Stage Adapter + Pipeline Orchestrator (validated, short-circuiting chains)
 * - Extension Registry + Version Resolver (ordered load, dependency checks)
 * - Job Hub (in-memory job records with subscriber notifications)
 */

// Public modules
pub mod config;
pub mod contract;
pub mod database;
pub mod engine;
pub mod error;
pub mod extension;
pub mod job;
pub mod kit;
pub mod manifest;
pub mod pipeline;
pub mod schema;
pub mod stage;
pub mod telemetry;
pub mod version;

// Re-exports
pub use config::{ConfigError, ConfigResult, EngineConfig};
pub use contract::{includes, matches, Boundary, ContractMode, ContractVerifier};
pub use database::{Database, StaticDatabase};
pub use engine::{Engine, EngineBuilder, FatalReporter, TracingReporter};
pub use error::{ErrorKind, Result, SetupError, StageFailure};
pub use extension::{Extension, ExtensionRegistry};
pub use job::{
    JobError, JobEvent, JobHub, JobLog, JobPatch, JobRecord, JobResult, JobStore, JobSubscriber,
    NewJob,
};
pub use kit::{handler, Handler, HandlerRegistry, Host, Kit};
pub use manifest::{DatabaseDependence, DependencyContext, Manifest};
pub use pipeline::{InitHook, Pipeline, PipelineDefinition, PipelineResult, PipelineShape};
pub use schema::{LeafKind, SchemaDescriptor, SchemaViolation};
pub use stage::{FnStage, Stage, StageAdapter, StageKind, StageResult};
pub use telemetry::init_tracing;
pub use version::{Comparator, Constraint, Version, VersionResolver};
