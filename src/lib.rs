pub mod checkpoint;
pub mod cli;
pub mod config;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod orchestration;
pub mod paginator;
pub mod pool;
pub mod portal;
pub mod retry;
pub mod runner;
pub mod scheduler;
pub mod sink;

// Re-export main types for library usage
pub use checkpoint::{CheckpointError, CheckpointStore};
pub use config::{CrawlConfig, CrawlMode};
pub use models::{HearingRecord, JurisdictionId, LogLine, Schema, SchemaMismatch, SchemaRegistry, Shard};
pub use orchestration::{CrawlSummary, build_engine, run_crawl};
pub use pool::{PoolReport, WorkerPool};
pub use portal::{Portal, PortalSession, SourceError};
pub use runner::{CrawlError, RetryingRunner};
pub use scheduler::ShardScheduler;
pub use sink::RecordSink;
