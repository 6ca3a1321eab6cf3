// Global configuration constants - single source of truth

use crate::models::JurisdictionId;
use std::ops::Range;
use std::path::{Path, PathBuf};

pub struct Config;

impl Config {
    // Sharding
    pub const ALPHABET: &'static str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ";
    pub const DEFAULT_WORKERS: usize = 4;
    pub const DEFAULT_JURISDICTION_START: u32 = 39;
    pub const DEFAULT_JURISDICTION_END: u32 = 120;

    // Output
    pub const DEFAULT_OUTPUT_FILE: &'static str = "hearings.jsonl";
    pub const LOG_EXTENSION: &'static str = "jsonl";

    // Retry policy
    pub const MAX_SHARD_ATTEMPTS: u32 = 10;
    pub const RETRY_BACKOFF_BASE_MS: u64 = 1_000;
    pub const RETRY_BACKOFF_MAX_MS: u64 = 120_000;

    // HTTP
    pub const DEFAULT_BASE_URL: &'static str = "http://ewsocis1.courts.state.va.us/CJISWeb/";
    pub const DEFAULT_USER_AGENT: &'static str = "HearingCrawler/0.1";
    pub const REQUEST_TIMEOUT_SECS: u64 = 30;
    pub const CONNECT_TIMEOUT_SECS: u64 = 10;
}

/// Which shards a run picks up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum CrawlMode {
    /// Only shards with no collected rows and no sentinel.
    #[default]
    Skip,
    /// Every shard without a sentinel, resuming partially collected ones.
    Cleanup,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Empty jurisdiction range {start}..{end}")]
    EmptyRange { start: u32, end: u32 },

    #[error("Worker count must be at least 1")]
    NoWorkers,

    #[error("Letter set is empty")]
    NoLetters,

    #[error("Invalid letter '{0}' (expected A-Z)")]
    InvalidLetter(char),

    #[error("Max attempts must be at least 1")]
    NoAttempts,

    #[error("Output file {0:?} must be a plain file name ending in .jsonl")]
    InvalidOutputName(String),
}

#[derive(Debug, Clone)]
pub struct CrawlConfig {
    pub data_dir: PathBuf,
    pub output_file: String,
    pub mode: CrawlMode,
    pub jurisdictions: Range<u32>,
    pub workers: usize,
    pub letters: Vec<char>,
    pub fetch_details: bool,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            output_file: Config::DEFAULT_OUTPUT_FILE.to_string(),
            mode: CrawlMode::default(),
            jurisdictions: Config::DEFAULT_JURISDICTION_START..Config::DEFAULT_JURISDICTION_END,
            workers: Config::DEFAULT_WORKERS,
            letters: Config::ALPHABET.chars().collect(),
            fetch_details: true,
            max_attempts: Config::MAX_SHARD_ATTEMPTS,
            backoff_base_ms: Config::RETRY_BACKOFF_BASE_MS,
            backoff_max_ms: Config::RETRY_BACKOFF_MAX_MS,
        }
    }
}

impl CrawlConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.jurisdictions.is_empty() {
            return Err(ConfigError::EmptyRange {
                start: self.jurisdictions.start,
                end: self.jurisdictions.end,
            });
        }
        if self.workers == 0 {
            return Err(ConfigError::NoWorkers);
        }
        if self.letters.is_empty() {
            return Err(ConfigError::NoLetters);
        }
        if let Some(bad) = self.letters.iter().find(|c| !c.is_ascii_uppercase()) {
            return Err(ConfigError::InvalidLetter(*bad));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::NoAttempts);
        }
        // Later runs only read `*.jsonl` directly inside the data directory.
        let output = Path::new(&self.output_file);
        let plain_name = output.file_name().is_some_and(|name| name == output.as_os_str());
        let extension = output.extension().and_then(|e| e.to_str());
        if !plain_name || extension != Some(Config::LOG_EXTENSION) {
            return Err(ConfigError::InvalidOutputName(self.output_file.clone()));
        }
        Ok(())
    }

    pub fn output_path(&self) -> PathBuf {
        self.data_dir.join(&self.output_file)
    }

    pub fn jurisdiction_ids(&self) -> Vec<JurisdictionId> {
        self.jurisdictions.clone().map(JurisdictionId).collect()
    }
}

/// Parses a letter set such as "ABC" or "a,b,c", upper-casing and de-duplicating in order.
pub fn parse_letters(raw: &str) -> Result<Vec<char>, ConfigError> {
    let mut letters = Vec::new();
    for c in raw.chars().filter(|c| !c.is_whitespace() && *c != ',') {
        let upper = c.to_ascii_uppercase();
        if !upper.is_ascii_uppercase() {
            return Err(ConfigError::InvalidLetter(c));
        }
        if !letters.contains(&upper) {
            letters.push(upper);
        }
    }
    if letters.is_empty() {
        return Err(ConfigError::NoLetters);
    }
    Ok(letters)
}
