//! End-to-end crawl and search pipelines driven through the engine
//!
//! Stages here talk to the kit the way host code would: the crawler tracks
//! its work in the job hub, the indexer writes into a database facade that
//! it reaches by downcasting.

use async_trait::async_trait;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use searchkit_orchestration::{
    Database, Engine, EngineConfig, ErrorKind, FnStage, JobLog, JobPatch, Kit, Manifest,
    NewJob, PipelineDefinition, SchemaDescriptor, Stage, StageFailure, StageResult,
};
use serde_json::{json, Value};
use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;

/// In-memory document store exposed as the engine's database
struct MemoryIndex {
    manifest: Manifest,
    docs: Mutex<BTreeMap<String, String>>,
}

impl MemoryIndex {
    fn new() -> Self {
        Self {
            manifest: Manifest::new("memory-index", "2.3.0"),
            docs: Mutex::new(BTreeMap::new()),
        }
    }
}

impl Database for MemoryIndex {
    fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn page_schema() -> SchemaDescriptor {
    SchemaDescriptor::object([(
        "pages",
        SchemaDescriptor::array(SchemaDescriptor::object([
            ("url", SchemaDescriptor::string()),
            ("body", SchemaDescriptor::string()),
        ])),
    )])
}

fn seed_schema() -> SchemaDescriptor {
    SchemaDescriptor::object([("seeds", SchemaDescriptor::array(SchemaDescriptor::string()))])
}

struct SeedCrawler {
    manifest: Manifest,
    input: SchemaDescriptor,
    output: SchemaDescriptor,
}

#[async_trait]
impl Stage for SeedCrawler {
    fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    fn input_schema(&self) -> &SchemaDescriptor {
        &self.input
    }

    fn output_schema(&self) -> &SchemaDescriptor {
        &self.output
    }

    async fn process(&self, _request: Option<&Value>, input: Value, kit: &Kit) -> StageResult {
        let job = kit
            .job_hub()
            .add(NewJob::new("crawl").performer(self.manifest.name.clone()))
            .await;

        let seeds = input["seeds"].as_array().cloned().unwrap_or_default();
        let pages: Vec<Value> = seeds
            .iter()
            .filter_map(Value::as_str)
            .map(|url| json!({ "url": url, "body": format!("content of {}", url) }))
            .collect();

        kit.job_hub()
            .add_logs(&job.id, vec![JobLog::now(format!("fetched {} page(s)", pages.len()))])
            .await
            .map_err(|e| StageFailure::runtime(e.to_string()))?;
        kit.job_hub()
            .update(
                &job.id,
                JobPatch {
                    point: Some("done".to_string()),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| StageFailure::runtime(e.to_string()))?;

        Ok(json!({ "pages": pages }))
    }
}

struct MemoryIndexer {
    manifest: Manifest,
    input: SchemaDescriptor,
    output: SchemaDescriptor,
}

#[async_trait]
impl Stage for MemoryIndexer {
    fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    fn input_schema(&self) -> &SchemaDescriptor {
        &self.input
    }

    fn output_schema(&self) -> &SchemaDescriptor {
        &self.output
    }

    async fn process(&self, _request: Option<&Value>, input: Value, kit: &Kit) -> StageResult {
        let index = kit
            .database()
            .and_then(|db| db.as_any().downcast_ref::<MemoryIndex>())
            .ok_or_else(|| StageFailure::runtime("memory index is not attached"))?;

        let mut docs = index.docs.lock();
        for page in input["pages"].as_array().into_iter().flatten() {
            if let (Some(url), Some(body)) = (page["url"].as_str(), page["body"].as_str()) {
                docs.insert(url.to_string(), body.to_string());
            }
        }
        Ok(json!({ "indexed": docs.len() }))
    }
}

fn crawl_pipeline() -> PipelineDefinition {
    PipelineDefinition::crawl(
        Manifest::new("web", "1.0.0").database("memory-index", ">=2.0"),
        SeedCrawler {
            manifest: Manifest::new("seed-crawler", "1.0.0"),
            input: seed_schema(),
            output: page_schema(),
        },
        MemoryIndexer {
            manifest: Manifest::new("memory-indexer", "1.0.0").database("memory-index", ">=2.0"),
            input: page_schema(),
            output: SchemaDescriptor::object([("indexed", SchemaDescriptor::integer())]),
        },
    )
    .with_pipe(FnStage::new(
        Manifest::new("dedupe", "1.0.0"),
        page_schema(),
        page_schema(),
        |_, input| async move {
            let mut seen = std::collections::HashSet::new();
            let pages: Vec<Value> = input["pages"]
                .as_array()
                .cloned()
                .unwrap_or_default()
                .into_iter()
                .filter(|p| seen.insert(p["url"].to_string()))
                .collect();
            Ok(json!({ "pages": pages }))
        },
    ))
}

fn search_pipeline() -> PipelineDefinition {
    let hits = SchemaDescriptor::object([("hits", SchemaDescriptor::array(SchemaDescriptor::string()))]);
    PipelineDefinition::search(
        Manifest::new("docs", "1.0.0"),
        FnStage::new(
            Manifest::new("prefix-ranker", "1.0.0"),
            SchemaDescriptor::object([("q", SchemaDescriptor::string())]),
            hits.clone(),
            |_, input| async move {
                let q = input["q"].as_str().unwrap_or_default().to_string();
                Ok(json!({ "hits": [format!("https://example.org/{}", q)] }))
            },
        ),
        FnStage::new(Manifest::new("limit", "1.0.0"), hits.clone(), hits, |request, input| async move {
            let limit = request
                .as_ref()
                .and_then(|r| r["limit"].as_u64())
                .unwrap_or(10) as usize;
            let hits: Vec<Value> = input["hits"]
                .as_array()
                .cloned()
                .unwrap_or_default()
                .into_iter()
                .take(limit)
                .collect();
            Ok(json!({ "hits": hits }))
        })
        .with_request_schema(SchemaDescriptor::object([("limit", SchemaDescriptor::integer())])),
    )
    .with_query_path("docs/v1")
    .with_middleware(FnStage::new(
        Manifest::new("defaults", "1.0.0"),
        SchemaDescriptor::object([("q", SchemaDescriptor::string())]),
        SchemaDescriptor::object([
            ("q", SchemaDescriptor::string()),
            ("limit", SchemaDescriptor::integer()),
        ]),
        |_, input| async move {
            let limit = input.get("limit").cloned().unwrap_or(json!(1));
            Ok(json!({ "q": input["q"], "limit": limit }))
        },
    ))
}

async fn engine() -> Engine {
    Engine::builder(EngineConfig::default())
        .database(MemoryIndex::new())
        .pipeline(crawl_pipeline())
        .pipeline(search_pipeline())
        .setup()
        .await
        .expect("engine setup failed")
}

#[tokio::test]
async fn test_crawl_pipeline_indexes_into_database() {
    let engine = engine().await;

    let response = engine
        .call_endpoint(
            "web",
            "crawl/web",
            json!({"seeds": ["https://a.example", "https://b.example", "https://a.example"]}),
        )
        .await
        .expect("endpoint missing");
    assert_eq!(
        response,
        json!({
            "success": true,
            "output": {"indexed": 2},
            "ran": ["middleware", "crawler", "pipe", "indexer"],
        })
    );

    let jobs = engine.job_hub().list().await;
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].performer, "seed-crawler");
    assert_eq!(jobs[0].point, "done");
    assert_eq!(jobs[0].logs[0].text, "fetched 3 page(s)");
}

#[tokio::test]
async fn test_search_pipeline_uses_middleware_request() {
    let engine = engine().await;

    let response = engine
        .call_endpoint("docs", "search/docs/v1", json!({"q": "rust"}))
        .await
        .expect("endpoint missing");
    assert_eq!(
        response,
        json!({
            "success": true,
            "output": {"hits": ["https://example.org/rust"]},
            "ran": ["middleware", "ranker", "pipe", "interceptor"],
        })
    );

    let pipeline = engine.pipeline("docs").expect("pipeline missing");
    let result = pipeline.process(json!({"q": "rust", "limit": 0})).await;
    assert_eq!(result.ran, vec!["middleware", "ranker", "pipe", "interceptor"]);
    assert_eq!(result.output(), Some(&json!({"hits": []})));
}

#[tokio::test]
async fn test_invalid_request_is_reported_per_call() {
    let engine = engine().await;

    let response = engine
        .call_endpoint("web", "crawl/web", json!({"seeds": "not-a-list"}))
        .await
        .expect("endpoint missing");
    assert_eq!(response["success"], false);
    assert_eq!(response["kind"], ErrorKind::StageInputInvalid.as_str());
    assert_eq!(response["ran"], json!(["middleware"]));
    assert!(response["message"]
        .as_str()
        .unwrap()
        .contains("crawler \"seed-crawler\""));

    // The engine keeps serving after a failed request
    let ok = engine
        .call_endpoint("web", "crawl/web", json!({"seeds": []}))
        .await
        .expect("endpoint missing");
    assert_eq!(ok["success"], true);
}

#[tokio::test]
async fn test_concurrent_requests_share_only_the_job_hub() {
    let engine = Arc::new(engine().await);

    let mut handles = Vec::new();
    for i in 0..8 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine
                .call_endpoint(
                    "web",
                    "crawl/web",
                    json!({ "seeds": [format!("https://{}.example", i)] }),
                )
                .await
        }));
    }
    for handle in handles {
        let response = handle.await.unwrap().unwrap();
        assert_eq!(response["success"], true);
    }

    assert_eq!(engine.job_hub().list().await.len(), 8);
}
