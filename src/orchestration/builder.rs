//! Wires checkpoint, schema, sink, runner and pool into a crawl engine.

use crate::checkpoint::{CheckpointError, CheckpointStore};
use crate::config::{ConfigError, CrawlConfig};
use crate::metrics::{CrawlMetrics, MetricsSnapshot};
use crate::models::{JurisdictionId, SchemaRegistry, Shard};
use crate::pool::{PoolReport, ShardFailure, WorkerPool};
use crate::portal::Portal;
use crate::retry::{ExponentialBackoff, RetryPolicy};
use crate::runner::RetryingRunner;
use crate::scheduler::ShardScheduler;
use crate::sink::{RecordSink, SinkError};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("Output error: {0}")]
    Sink(#[from] SinkError),
}

/// End-of-run report.
#[derive(Debug, Clone)]
pub struct CrawlSummary {
    pub planned: usize,
    pub report: PoolReport,
    pub metrics: MetricsSnapshot,
    pub duration_secs: u64,
}

impl CrawlSummary {
    pub fn failures(&self) -> Vec<&ShardFailure> {
        self.report.failures().collect()
    }

    pub fn aborted_workers(&self) -> usize {
        self.report.workers.iter().filter(|w| w.aborted).count()
    }
}

pub struct CrawlEngine {
    jurisdictions: Vec<JurisdictionId>,
    planned: Vec<Shard>,
    scheduler: Arc<ShardScheduler>,
    runner: Arc<RetryingRunner>,
    metrics: Arc<CrawlMetrics>,
    pool: WorkerPool,
}

/// Loads prior output from the data directory and builds an engine ready to run.
#[tracing::instrument(skip(config, portal), fields(data_dir = %config.data_dir.display()))]
pub fn build_engine(config: &CrawlConfig, portal: Arc<dyn Portal>) -> Result<CrawlEngine, EngineError> {
    config.validate()?;

    let checkpoint = Arc::new(CheckpointStore::load(&config.data_dir)?);

    let schema = SchemaRegistry::new(checkpoint.schema().cloned());
    let output_path = config.output_path();
    let sink = Arc::new(RecordSink::open(
        &output_path,
        checkpoint.has_header(&output_path),
        schema.clone(),
    )?);
    tracing::info!(output = %sink.path().display(), "Appending to output");

    let scheduler = Arc::new(ShardScheduler::new(config.letters.clone(), config.mode));
    let jurisdictions = config.jurisdiction_ids();
    let planned = scheduler.plan(&jurisdictions, &checkpoint);
    tracing::info!(
        mode = ?scheduler.mode(),
        jurisdictions = jurisdictions.len(),
        planned = planned.len(),
        "Shards scheduled"
    );

    let policy = RetryPolicy::new(
        config.max_attempts,
        ExponentialBackoff::new(config.backoff_base_ms, config.backoff_max_ms),
    );
    let metrics = Arc::new(CrawlMetrics::new());
    let runner = Arc::new(RetryingRunner::new(
        portal,
        checkpoint,
        schema,
        sink,
        policy,
        config.fetch_details,
        Arc::clone(&metrics),
    ));

    Ok(CrawlEngine {
        jurisdictions,
        planned,
        scheduler,
        runner,
        metrics,
        pool: WorkerPool::new(config.workers),
    })
}

impl CrawlEngine {
    /// Shards this run will attempt, in worker order.
    pub fn planned(&self) -> &[Shard] {
        &self.planned
    }

    pub async fn run(self) -> CrawlSummary {
        let started = Instant::now();
        let report = self
            .pool
            .run(&self.jurisdictions, self.scheduler, self.runner)
            .await;
        let summary = CrawlSummary {
            planned: self.planned.len(),
            report,
            metrics: self.metrics.snapshot(),
            duration_secs: started.elapsed().as_secs(),
        };
        tracing::info!(
            metrics = %summary.metrics,
            failed = summary.failures().len(),
            duration_secs = summary.duration_secs,
            "Crawl finished"
        );
        summary
    }
}

/// Builds and runs a crawl to completion.
pub async fn run_crawl(config: &CrawlConfig, portal: Arc<dyn Portal>) -> Result<CrawlSummary, EngineError> {
    Ok(build_engine(config, portal)?.run().await)
}
