use crate::checkpoint::CheckpointStore;
use crate::metrics::CrawlMetrics;
use crate::models::{SchemaMismatch, SchemaRegistry, Shard};
use crate::paginator::{LetterCrawl, LetterEnd, LetterOutcome};
use crate::portal::{Portal, SourceError};
use crate::retry::RetryPolicy;
use crate::sink::{RecordSink, SinkError};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CrawlError {
    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error(transparent)]
    Schema(#[from] SchemaMismatch),

    #[error("Output error: {0}")]
    Sink(#[from] SinkError),

    #[error("Giving up on {shard} after {attempts} attempt(s): {last_error}")]
    PermanentFailure {
        shard: Shard,
        attempts: u32,
        last_error: SourceError,
    },
}

impl CrawlError {
    /// Errors after which the worker must not start any further shard.
    pub fn stops_worker(&self) -> bool {
        matches!(self, CrawlError::Schema(_))
    }
}

/// Result of a shard that was scanned to the end and persisted.
#[derive(Debug, Clone)]
pub struct ShardReport {
    pub shard: Shard,
    pub records_written: usize,
    pub attempts: u32,
    pub end: LetterEnd,
    pub pages_skipped: u64,
}

/// Runs a single shard with session recreation and bounded retries.
pub struct RetryingRunner {
    portal: Arc<dyn Portal>,
    checkpoint: Arc<CheckpointStore>,
    schema: SchemaRegistry,
    sink: Arc<RecordSink>,
    policy: RetryPolicy,
    fetch_details: bool,
    metrics: Arc<CrawlMetrics>,
}

impl RetryingRunner {
    pub fn new(
        portal: Arc<dyn Portal>,
        checkpoint: Arc<CheckpointStore>,
        schema: SchemaRegistry,
        sink: Arc<RecordSink>,
        policy: RetryPolicy,
        fetch_details: bool,
        metrics: Arc<CrawlMetrics>,
    ) -> Self {
        Self {
            portal,
            checkpoint,
            schema,
            sink,
            policy,
            fetch_details,
            metrics,
        }
    }

    pub fn checkpoint(&self) -> &CheckpointStore {
        &self.checkpoint
    }

    pub fn metrics(&self) -> &CrawlMetrics {
        &self.metrics
    }

    /// Crawls `shard` to the end and appends its records plus a sentinel.
    ///
    /// Every attempt starts from the same checkpoint position, since nothing is
    /// written for the shard until a traversal succeeds.
    #[tracing::instrument(skip(self), fields(jurisdiction = %shard.jurisdiction, letter = %shard.letter))]
    pub async fn run_shard(&self, shard: Shard) -> Result<ShardReport, CrawlError> {
        let done_count = self.checkpoint.done_count(shard);
        let mut attempts = 0u32;

        let outcome = loop {
            attempts += 1;
            tracing::info!(attempt = attempts, done_count, "Opening session");
            match self.attempt(shard, done_count).await {
                Ok(outcome) => break outcome,
                Err(CrawlError::Source(err)) if err.is_retryable() => {
                    match self.policy.next_delay(attempts) {
                        Some(delay) => {
                            self.metrics.retries.inc();
                            tracing::warn!(
                                attempt = attempts,
                                max_attempts = self.policy.max_attempts(),
                                error = %err,
                                delay_ms = delay.as_millis() as u64,
                                "Shard attempt failed, retrying with a fresh session"
                            );
                            tokio::time::sleep(delay).await;
                        }
                        None => {
                            return Err(CrawlError::PermanentFailure {
                                shard,
                                attempts,
                                last_error: err,
                            });
                        }
                    }
                }
                Err(CrawlError::Source(err)) => {
                    return Err(CrawlError::PermanentFailure {
                        shard,
                        attempts,
                        last_error: err,
                    });
                }
                Err(other) => return Err(other),
            }
        };

        self.metrics.pages_skipped.add(outcome.pages_skipped);
        self.metrics.rows_skipped.add(outcome.rows_skipped);

        let records_written = outcome.records.len();
        self.sink.append_shard(shard, outcome.records).await?;
        self.metrics.records_written.add(records_written as u64);
        self.metrics.sentinels_written.inc();

        tracing::info!(records_written, end = ?outcome.end, "Shard complete");

        Ok(ShardReport {
            shard,
            records_written,
            attempts,
            end: outcome.end,
            pages_skipped: outcome.pages_skipped,
        })
    }

    /// One session lifetime: open, traverse, close on every path.
    async fn attempt(&self, shard: Shard, done_count: u64) -> Result<LetterOutcome, CrawlError> {
        let mut session = self.portal.open(shard.jurisdiction).await?;
        let result = LetterCrawl {
            shard,
            done_count,
            fetch_details: self.fetch_details,
            schema: &self.schema,
        }
        .run(session.as_mut())
        .await;
        session.close().await;
        result
    }
}
