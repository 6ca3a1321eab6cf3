use hearing_crawler::cli::{Cli, Commands};
use hearing_crawler::config::ConfigError;
use hearing_crawler::logging::{init_logging, log_dir_for};
use hearing_crawler::orchestration::{EngineError, build_engine, status_report};
use hearing_crawler::portal::SourceError;
use hearing_crawler::portal::http::HttpPortal;
use hearing_crawler::CheckpointError;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MainError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Portal error: {0}")]
    Portal(#[from] SourceError),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("Logging error: {0}")]
    Logging(String),

    #[error("{failed} shard(s) failed, rerun with --mode cleanup to retry them")]
    ShardsFailed { failed: usize },
}

async fn run_crawl_command(command: &Commands) -> Result<(), MainError> {
    let Some((config, portal_args)) = command.to_crawl_config()? else {
        return Ok(());
    };

    let _log_guard = init_logging(log_dir_for(&config.data_dir))
        .map_err(|e| MainError::Logging(e.to_string()))?;

    let portal = HttpPortal::new(&portal_args.base_url, portal_args.user_agent, portal_args.timeout)?;

    println!(
        "Crawling jurisdictions {}..{} with {} worker(s), letters {}",
        config.jurisdictions.start,
        config.jurisdictions.end,
        config.workers,
        config.letters.iter().collect::<String>()
    );

    let engine = build_engine(&config, Arc::new(portal))?;
    println!("{} shard(s) to crawl", engine.planned().len());

    let summary = engine.run().await;
    println!(
        "{} of {} shard(s) finished: {} in {}s, output: {}",
        summary.report.completed().count(),
        summary.planned,
        summary.metrics,
        summary.duration_secs,
        config.output_path().display()
    );

    for failure in summary.failures() {
        eprintln!("  failed: {}: {}", failure.shard, failure.error);
    }
    if summary.aborted_workers() > 0 {
        eprintln!("{} worker(s) stopped early on a schema mismatch", summary.aborted_workers());
    }

    let failed = summary.failures().len();
    if failed > 0 {
        return Err(MainError::ShardsFailed { failed });
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), MainError> {
    let cli = Cli::parse_args();

    match &cli.command {
        Commands::Crawl { .. } => run_crawl_command(&cli.command).await?,
        Commands::Status { data_dir } => {
            let report = status_report(data_dir)?;
            println!("{report}");
        }
    }

    Ok(())
}
