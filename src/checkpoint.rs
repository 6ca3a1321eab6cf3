//! Resume position derived from earlier output logs.
//!
//! Loaded once before any worker starts and shared read-only afterwards.

use crate::config::Config;
use crate::models::{JurisdictionId, LogLine, Schema, Shard};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("IO error reading {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed line {line} in {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error(
        "Column schema of {} does not match earlier output: unexpected {unexpected:?}, missing {missing:?}",
        path.display()
    )]
    SchemaConflict {
        path: PathBuf,
        unexpected: Vec<String>,
        missing: Vec<String>,
    },
}

/// What earlier runs collected for one shard.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShardProgress {
    pub records: u64,
    pub complete: bool,
}

/// Per-jurisdiction rollup for status reporting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JurisdictionProgress {
    pub name: Option<String>,
    pub records: u64,
    pub complete_letters: usize,
    pub partial_letters: usize,
}

#[derive(Debug, Default)]
pub struct CheckpointStore {
    schema: Option<Schema>,
    progress: HashMap<Shard, ShardProgress>,
    names: HashMap<JurisdictionId, String>,
    files_with_header: HashSet<PathBuf>,
    files: Vec<PathBuf>,
}

impl CheckpointStore {
    /// Store for a first run with no prior output.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Loads every `*.jsonl` log in `data_dir`. A missing directory means a first run.
    #[tracing::instrument(skip(data_dir), fields(data_dir = %data_dir.as_ref().display()))]
    pub fn load<P: AsRef<Path>>(data_dir: P) -> Result<Self, CheckpointError> {
        let dir = data_dir.as_ref();
        let mut store = Self::empty();
        if !dir.exists() {
            tracing::info!("No prior output, starting fresh");
            return Ok(store);
        }

        let entries = std::fs::read_dir(dir).map_err(|source| CheckpointError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file())
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some(Config::LOG_EXTENSION))
            .collect();
        files.sort();

        for path in files {
            store.load_file(&path)?;
            store.files.push(path);
        }

        tracing::info!(
            files = store.files.len(),
            shards = store.progress.len(),
            complete = store.progress.values().filter(|p| p.complete).count(),
            "Checkpoint loaded"
        );
        Ok(store)
    }

    fn load_file(&mut self, path: &Path) -> Result<(), CheckpointError> {
        let file = File::open(path).map_err(|source| CheckpointError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let lines: Vec<String> = BufReader::new(file)
            .lines()
            .collect::<Result<_, _>>()
            .map_err(|source| CheckpointError::Io {
                path: path.to_path_buf(),
                source,
            })?;

        let last = lines.iter().rposition(|l| !l.trim().is_empty());
        for (i, line) in lines.iter().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let parsed: LogLine = match serde_json::from_str(line) {
                Ok(parsed) => parsed,
                // A process killed mid-append leaves a torn final line; the shard it belonged
                // to never got its sentinel, so it is simply picked up again.
                Err(e) if Some(i) == last => {
                    tracing::warn!(path = %path.display(), line = i + 1, error = %e, "Ignoring torn final line");
                    continue;
                }
                Err(source) => {
                    return Err(CheckpointError::Parse {
                        path: path.to_path_buf(),
                        line: i + 1,
                        source,
                    });
                }
            };
            self.apply(path, parsed)?;
        }
        Ok(())
    }

    fn apply(&mut self, path: &Path, line: LogLine) -> Result<(), CheckpointError> {
        match line {
            LogLine::Header { columns } => {
                let found = Schema::from_columns(&columns);
                match &self.schema {
                    Some(expected) => {
                        let (unexpected, missing) = expected.diff(found.detail_keys());
                        if !unexpected.is_empty() || !missing.is_empty() {
                            return Err(CheckpointError::SchemaConflict {
                                path: path.to_path_buf(),
                                unexpected,
                                missing,
                            });
                        }
                    }
                    None => self.schema = Some(found),
                }
                self.files_with_header.insert(path.to_path_buf());
            }
            LogLine::Hearing(record) => {
                if let Some(letter) = record.letter() {
                    self.progress
                        .entry(Shard::new(record.jurisdiction, letter))
                        .or_default()
                        .records += 1;
                }
                self.names
                    .entry(record.jurisdiction)
                    .or_insert(record.jurisdiction_name);
            }
            LogLine::Sentinel(sentinel) => {
                self.progress.entry(sentinel.shard()).or_default().complete = true;
            }
        }
        Ok(())
    }

    /// Rows already collected for the shard (sentinels excluded).
    pub fn done_count(&self, shard: Shard) -> u64 {
        self.progress.get(&shard).map_or(0, |p| p.records)
    }

    /// True once a sentinel for the shard exists.
    pub fn is_shard_complete(&self, shard: Shard) -> bool {
        self.progress.get(&shard).is_some_and(|p| p.complete)
    }

    pub fn progress(&self, shard: Shard) -> ShardProgress {
        self.progress.get(&shard).copied().unwrap_or_default()
    }

    /// Reference column schema, if any earlier output carried a header.
    pub fn schema(&self) -> Option<&Schema> {
        self.schema.as_ref()
    }

    pub fn has_header(&self, path: &Path) -> bool {
        self.files_with_header.contains(path)
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    /// Rollup of every jurisdiction seen in the logs, ordered by id.
    pub fn jurisdictions(&self) -> BTreeMap<JurisdictionId, JurisdictionProgress> {
        let mut out: BTreeMap<JurisdictionId, JurisdictionProgress> = BTreeMap::new();
        for (shard, progress) in &self.progress {
            let entry = out.entry(shard.jurisdiction).or_default();
            entry.records += progress.records;
            if progress.complete {
                entry.complete_letters += 1;
            } else if progress.records > 0 {
                entry.partial_letters += 1;
            }
        }
        for (id, entry) in out.iter_mut() {
            entry.name = self.names.get(id).cloned();
        }
        out
    }
}
