use crate::config::{Config, ConfigError, CrawlConfig, CrawlMode, parse_letters};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Command line for the hearing crawler.
/// Exit codes: 0=success, 2=invalid arguments, 1=crawl or I/O error
#[derive(Parser, Debug)]
#[command(name = "hearing_crawler")]
#[command(about = "Resumable crawler for court hearing listings")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Crawl jurisdictions by surname letter, resuming from earlier output in the data directory.
    Crawl {
        #[arg(
            short,
            long,
            default_value = "./data",
            help = "Directory holding output and logs"
        )]
        data_dir: PathBuf,

        #[arg(
            short,
            long,
            default_value = Config::DEFAULT_OUTPUT_FILE,
            help = "Output file name inside the data directory"
        )]
        output: String,

        #[arg(
            short,
            long,
            value_enum,
            default_value_t = CrawlMode::Skip,
            help = "skip: only untouched shards; cleanup: every shard without a completion marker"
        )]
        mode: CrawlMode,

        #[arg(long, default_value_t = Config::DEFAULT_JURISDICTION_START, help = "First jurisdiction rank")]
        start: u32,

        #[arg(long, default_value_t = Config::DEFAULT_JURISDICTION_END, help = "Jurisdiction rank to stop before")]
        end: u32,

        #[arg(short, long, default_value_t = Config::DEFAULT_WORKERS, help = "Concurrent workers")]
        workers: usize,

        #[arg(
            short,
            long,
            default_value = Config::ALPHABET,
            help = "Surname letters to crawl, e.g. ABC or a,b,c"
        )]
        letters: String,

        #[arg(long, default_value = Config::DEFAULT_BASE_URL, help = "Portal base URL")]
        base_url: String,

        #[arg(
            short,
            long,
            default_value_t = Config::REQUEST_TIMEOUT_SECS,
            help = "Request timeout in seconds"
        )]
        timeout: u64,

        #[arg(
            short,
            long,
            default_value = Config::DEFAULT_USER_AGENT,
            help = "User agent string for requests"
        )]
        user_agent: String,

        #[arg(long, help = "Record listing columns only, without opening detail pages")]
        no_details: bool,

        #[arg(
            long,
            default_value_t = Config::MAX_SHARD_ATTEMPTS,
            help = "Attempts per shard before it is reported failed"
        )]
        max_attempts: u32,

        #[arg(long, default_value_t = Config::RETRY_BACKOFF_BASE_MS, help = "First retry delay in milliseconds")]
        backoff_base_ms: u64,

        #[arg(long, default_value_t = Config::RETRY_BACKOFF_MAX_MS, help = "Retry delay cap in milliseconds")]
        backoff_max_ms: u64,
    },

    /// Summarize what earlier runs collected, per jurisdiction.
    Status {
        #[arg(
            short,
            long,
            default_value = "./data",
            help = "Directory holding output"
        )]
        data_dir: PathBuf,
    },
}

/// Portal connection settings from the `crawl` command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortalArgs {
    pub base_url: String,
    pub timeout: u64,
    pub user_agent: String,
}

impl Cli {
    /// On error, clap prints help and exits with code 2.
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

impl Commands {
    /// Builds and validates the engine settings for a `crawl` invocation.
    pub fn to_crawl_config(&self) -> Result<Option<(CrawlConfig, PortalArgs)>, ConfigError> {
        let Commands::Crawl {
            data_dir,
            output,
            mode,
            start,
            end,
            workers,
            letters,
            base_url,
            timeout,
            user_agent,
            no_details,
            max_attempts,
            backoff_base_ms,
            backoff_max_ms,
        } = self
        else {
            return Ok(None);
        };

        let config = CrawlConfig {
            data_dir: data_dir.clone(),
            output_file: output.clone(),
            mode: *mode,
            jurisdictions: *start..*end,
            workers: *workers,
            letters: parse_letters(letters)?,
            fetch_details: !no_details,
            max_attempts: *max_attempts,
            backoff_base_ms: *backoff_base_ms,
            backoff_max_ms: *backoff_max_ms,
        };
        config.validate()?;

        let portal = PortalArgs {
            base_url: base_url.clone(),
            timeout: *timeout,
            user_agent: user_agent.clone(),
        };
        Ok(Some((config, portal)))
    }
}
