//! Startup failure paths
//!
//! Every setup failure must abort with the right kind before any endpoint
//! becomes reachable.

use async_trait::async_trait;
use parking_lot::Mutex;
use searchkit_orchestration::{
    ContractMode, Engine, EngineConfig, ErrorKind, Extension, FatalReporter, FnStage, Kit,
    Manifest, PipelineDefinition, SchemaDescriptor, SetupError, StaticDatabase,
};
use std::io::Write;
use std::sync::Arc;
use tempfile::NamedTempFile;

#[derive(Clone, Default)]
struct Collect {
    errors: Arc<Mutex<Vec<SetupError>>>,
}

impl FatalReporter for Collect {
    fn report(&self, error: &SetupError) {
        self.errors.lock().push(error.clone());
    }
}

struct Plugin {
    manifest: Manifest,
    available: Result<(), String>,
    inits: Arc<Mutex<Vec<String>>>,
}

impl Plugin {
    fn new(manifest: Manifest, inits: &Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            manifest,
            available: Ok(()),
            inits: inits.clone(),
        }
    }
}

#[async_trait]
impl Extension for Plugin {
    fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    fn available(&self) -> Result<(), String> {
        self.available.clone()
    }

    async fn init(&self, _kit: &Kit) -> anyhow::Result<()> {
        self.inits.lock().push(self.manifest.name.clone());
        Ok(())
    }
}

fn stage(manifest: Manifest, input: SchemaDescriptor, output: SchemaDescriptor) -> FnStage {
    FnStage::new(manifest, input, output, |_, input| async move { Ok(input) })
}

fn query() -> SchemaDescriptor {
    SchemaDescriptor::object([("q", SchemaDescriptor::string())])
}

fn wide_query() -> SchemaDescriptor {
    SchemaDescriptor::object([
        ("q", SchemaDescriptor::string()),
        ("lang", SchemaDescriptor::string()),
    ])
}

async fn expect_failure(builder: searchkit_orchestration::EngineBuilder) -> SetupError {
    let collect = Collect::default();
    match builder.reporter(collect.clone()).setup().await {
        Ok(_) => panic!("setup unexpectedly succeeded"),
        Err(err) => {
            let reported = collect.errors.lock();
            assert_eq!(reported.len(), 1);
            assert_eq!(reported[0].kind, err.kind);
            err
        }
    }
}

#[tokio::test]
async fn test_duplicate_extension_aborts_before_any_init() {
    let inits = Arc::new(Mutex::new(Vec::new()));
    let err = expect_failure(
        Engine::builder(EngineConfig::default())
            .extension(Plugin::new(Manifest::new("foo", "1.0.0"), &inits))
            .extension(Plugin::new(Manifest::new("bar", "1.0.0"), &inits))
            .extension(Plugin::new(Manifest::new("foo", "2.0.0"), &inits)),
    )
    .await;

    assert_eq!(err.kind, ErrorKind::DuplicateName);
    assert_eq!(err.exit_code(), 11);
    assert!(inits.lock().is_empty());
}

#[tokio::test]
async fn test_strict_availability_from_config() {
    let inits = Arc::new(Mutex::new(Vec::new()));
    let mut gpu = Plugin::new(Manifest::new("gpu", "1.0.0"), &inits);
    gpu.available = Err("CUDA runtime not found".to_string());

    let config = EngineConfig {
        strict_available: true,
        ..Default::default()
    };
    let err = expect_failure(Engine::builder(config).extension(gpu)).await;
    assert_eq!(err.kind, ErrorKind::AvailabilityFailed);
    assert!(err.lines[0].contains("CUDA runtime not found"));
}

#[tokio::test]
async fn test_lenient_availability_skips_and_starts() {
    let inits = Arc::new(Mutex::new(Vec::new()));
    let mut gpu = Plugin::new(Manifest::new("gpu", "1.0.0"), &inits);
    gpu.available = Err("CUDA runtime not found".to_string());

    let engine = Engine::builder(EngineConfig::default())
        .extension(gpu)
        .extension(Plugin::new(Manifest::new("cpu", "1.0.0"), &inits))
        .setup()
        .await
        .expect("lenient setup failed");

    assert_eq!(*inits.lock(), vec!["cpu".to_string()]);
    assert!(engine.extensions().get("gpu").is_none());
}

#[tokio::test]
async fn test_contract_mode_from_yaml() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "version: 1\ncontract_mode: match").unwrap();
    let strict = EngineConfig::from_yaml(file.path()).unwrap();
    assert_eq!(strict.contract_mode, ContractMode::Match);

    let build = |config: EngineConfig| {
        Engine::builder(config).pipeline(PipelineDefinition::search(
            Manifest::new("docs", "1.0.0"),
            stage(Manifest::new("rank", "1.0.0"), query(), wide_query()),
            stage(Manifest::new("out", "1.0.0"), query(), query()),
        ))
    };

    // Extra `lang` field: fine under include, rejected under match
    assert!(build(EngineConfig::default()).setup().await.is_ok());
    let err = expect_failure(build(strict)).await;
    assert_eq!(err.kind, ErrorKind::SchemaContractViolation);
    assert!(err.lines.iter().any(|l| l.starts_with("produced:")));
    assert!(err.lines.iter().any(|l| l.starts_with("required:")));
}

#[tokio::test]
async fn test_stage_database_dependence() {
    let indexer = || {
        stage(
            Manifest::new("pg-indexer", "1.0.0").database("postgres", ">=14"),
            query(),
            query(),
        )
    };
    let build = |indexer: FnStage| {
        PipelineDefinition::crawl(
            Manifest::new("web", "1.0.0"),
            stage(Manifest::new("spider", "1.0.0"), query(), query()),
            indexer,
        )
    };

    // No database attached
    let err = expect_failure(
        Engine::builder(EngineConfig::default()).pipeline(build(indexer())),
    )
    .await;
    assert_eq!(err.kind, ErrorKind::DatabaseCapabilityMissing);

    // Unsupported database
    let err = expect_failure(
        Engine::builder(EngineConfig::default())
            .database(StaticDatabase::new("sqlite", "3.45.0"))
            .pipeline(build(indexer())),
    )
    .await;
    assert_eq!(err.kind, ErrorKind::DatabaseCapabilityMissing);

    // Supported database, version too old
    let err = expect_failure(
        Engine::builder(EngineConfig::default())
            .database(StaticDatabase::new("postgres", "13.9"))
            .pipeline(build(indexer())),
    )
    .await;
    assert_eq!(err.kind, ErrorKind::DependencyVersionMismatch);

    let engine = Engine::builder(EngineConfig::default())
        .database(StaticDatabase::new("postgres", "16.1"))
        .pipeline(build(indexer()))
        .setup()
        .await
        .expect("postgres 16 should satisfy >=14");
    assert_eq!(
        engine.endpoints(),
        vec![("web".to_string(), "crawl/web".to_string())]
    );
}

#[tokio::test]
async fn test_stage_extension_dependence() {
    let inits = Arc::new(Mutex::new(Vec::new()));
    let ranker = || {
        stage(
            Manifest::new("semantic", "1.0.0").depends_on("embeddings", ">=2.0.0"),
            query(),
            query(),
        )
    };
    let pipeline = |ranker: FnStage| {
        PipelineDefinition::search(
            Manifest::new("docs", "1.0.0"),
            ranker,
            stage(Manifest::new("out", "1.0.0"), query(), query()),
        )
    };

    let err = expect_failure(Engine::builder(EngineConfig::default()).pipeline(pipeline(ranker())))
        .await;
    assert_eq!(err.kind, ErrorKind::DependencyMissing);

    let err = expect_failure(
        Engine::builder(EngineConfig::default())
            .extension(Plugin::new(Manifest::new("embeddings", "1.4.2"), &inits))
            .pipeline(pipeline(ranker())),
    )
    .await;
    assert_eq!(err.kind, ErrorKind::DependencyVersionMismatch);

    assert!(Engine::builder(EngineConfig::default())
        .extension(Plugin::new(Manifest::new("embeddings", "v2.1"), &inits))
        .pipeline(pipeline(ranker()))
        .setup()
        .await
        .is_ok());
}

#[tokio::test]
async fn test_core_version_override() {
    let config = EngineConfig::default()
        .with_overrides(|key| (key == "SEARCHKIT_CORE_VERSION").then(|| "0.9.0".to_string()))
        .unwrap();
    let inits = Arc::new(Mutex::new(Vec::new()));

    let err = expect_failure(Engine::builder(config).extension(Plugin::new(
        Manifest::new("modern", "1.0.0").core(">=1.0.0"),
        &inits,
    )))
    .await;
    assert_eq!(err.kind, ErrorKind::DependencyVersionMismatch);
    assert!(err.lines[0].contains("0.9.0"));
}

#[tokio::test]
async fn test_malformed_stage_manifest() {
    let err = expect_failure(Engine::builder(EngineConfig::default()).pipeline(
        PipelineDefinition::search(
            Manifest::new("docs", "1.0.0"),
            stage(Manifest::new("rank", "1.0.0").core("newest"), query(), query()),
            stage(Manifest::new("out", "1.0.0"), query(), query()),
        ),
    ))
    .await;
    assert_eq!(err.kind, ErrorKind::ManifestInvalid);
    assert!(err.lines[0].starts_with("invalid ranker \"rank\""));
}
