//! Fixed-size pool of workers, each owning a disjoint slice of jurisdictions.

use crate::models::{JurisdictionId, Shard};
use crate::runner::{RetryingRunner, ShardReport};
use crate::scheduler::ShardScheduler;
use std::sync::Arc;
use tokio::task::JoinSet;

/// A shard that did not reach its sentinel this run.
#[derive(Debug, Clone)]
pub struct ShardFailure {
    pub shard: Shard,
    pub error: String,
}

#[derive(Debug, Clone, Default)]
pub struct WorkerReport {
    pub worker: usize,
    pub jurisdictions: Vec<JurisdictionId>,
    pub completed: Vec<ShardReport>,
    pub failed: Vec<ShardFailure>,
    /// Set when a fatal error stopped the worker before its slice was finished.
    pub aborted: bool,
}

#[derive(Debug, Clone, Default)]
pub struct PoolReport {
    pub workers: Vec<WorkerReport>,
}

impl PoolReport {
    pub fn failures(&self) -> impl Iterator<Item = &ShardFailure> {
        self.workers.iter().flat_map(|w| w.failed.iter())
    }

    pub fn completed(&self) -> impl Iterator<Item = &ShardReport> {
        self.workers.iter().flat_map(|w| w.completed.iter())
    }
}

/// Splits `jurisdictions` into at most `workers` contiguous, non-empty chunks whose sizes differ by at most one.
pub fn partition(jurisdictions: &[JurisdictionId], workers: usize) -> Vec<Vec<JurisdictionId>> {
    let workers = workers.max(1).min(jurisdictions.len().max(1));
    let base = jurisdictions.len() / workers;
    let extra = jurisdictions.len() % workers;

    let mut chunks = Vec::with_capacity(workers);
    let mut start = 0;
    for i in 0..workers {
        let len = base + usize::from(i < extra);
        if len == 0 {
            break;
        }
        chunks.push(jurisdictions[start..start + len].to_vec());
        start += len;
    }
    chunks
}

pub struct WorkerPool {
    size: usize,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        Self { size: size.max(1) }
    }

    /// Runs every scheduled shard in `jurisdictions` and waits for all workers to finish.
    pub async fn run(
        &self,
        jurisdictions: &[JurisdictionId],
        scheduler: Arc<ShardScheduler>,
        runner: Arc<RetryingRunner>,
    ) -> PoolReport {
        let mut set = JoinSet::new();
        for (worker, slice) in partition(jurisdictions, self.size).into_iter().enumerate() {
            tracing::info!(
                worker,
                first = %slice[0],
                last = %slice[slice.len() - 1],
                "Starting worker"
            );
            let scheduler = Arc::clone(&scheduler);
            let runner = Arc::clone(&runner);
            set.spawn(run_worker(worker, slice, scheduler, runner));
        }

        let mut report = PoolReport::default();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(worker_report) => report.workers.push(worker_report),
                Err(e) => tracing::error!(error = %e, "Worker task ended abnormally"),
            }
        }
        report.workers.sort_by_key(|w| w.worker);
        report
    }
}

#[tracing::instrument(skip(slice, scheduler, runner))]
async fn run_worker(
    worker: usize,
    slice: Vec<JurisdictionId>,
    scheduler: Arc<ShardScheduler>,
    runner: Arc<RetryingRunner>,
) -> WorkerReport {
    let mut report = WorkerReport {
        worker,
        jurisdictions: slice.clone(),
        ..WorkerReport::default()
    };

    'jurisdictions: for jurisdiction in slice {
        let shards = scheduler.shards_for(jurisdiction, runner.checkpoint());
        if shards.is_empty() {
            tracing::debug!(%jurisdiction, "Nothing to do");
            continue;
        }

        for shard in shards {
            // Own task per shard so a panic costs only this shard.
            let task_runner = Arc::clone(&runner);
            let joined = tokio::spawn(async move { task_runner.run_shard(shard).await }).await;

            let failure = match joined {
                Ok(Ok(shard_report)) => {
                    report.completed.push(shard_report);
                    continue;
                }
                Ok(Err(e)) => {
                    let stop = e.stops_worker();
                    (e.to_string(), stop)
                }
                Err(e) => (format!("shard task panicked: {e}"), false),
            };

            let (error, stop) = failure;
            runner.metrics().failed_shards.inc();
            tracing::error!(%shard, %error, "Shard failed");
            report.failed.push(ShardFailure { shard, error });
            if stop {
                tracing::error!(%shard, "Stopping worker after fatal error");
                report.aborted = true;
                break 'jurisdictions;
            }
        }
    }

    report
}
