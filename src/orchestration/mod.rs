//! High-level orchestration for crawl setup and execution.

pub mod builder;
pub mod status;

pub use builder::{CrawlEngine, CrawlSummary, EngineError, build_engine, run_crawl};
pub use status::{StatusReport, status_report};
