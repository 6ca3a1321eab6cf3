//! `status` command: per-jurisdiction progress from the output logs.

use crate::checkpoint::{CheckpointError, CheckpointStore};
use crate::config::Config;
use crate::models::JurisdictionId;
use serde::Serialize;
use std::fmt;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusRow {
    pub jurisdiction: JurisdictionId,
    pub name: Option<String>,
    pub records: u64,
    pub complete: usize,
    pub partial: usize,
    pub untouched: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StatusReport {
    pub files: usize,
    pub rows: Vec<StatusRow>,
}

impl StatusReport {
    pub fn total_records(&self) -> u64 {
        self.rows.iter().map(|r| r.records).sum()
    }
}

pub fn status_report<P: AsRef<Path>>(data_dir: P) -> Result<StatusReport, CheckpointError> {
    let checkpoint = CheckpointStore::load(data_dir)?;
    let letters = Config::ALPHABET.len();

    let rows = checkpoint
        .jurisdictions()
        .into_iter()
        .map(|(jurisdiction, progress)| StatusRow {
            jurisdiction,
            name: progress.name,
            records: progress.records,
            complete: progress.complete_letters,
            partial: progress.partial_letters,
            untouched: letters.saturating_sub(progress.complete_letters + progress.partial_letters),
        })
        .collect();

    Ok(StatusReport {
        files: checkpoint.files().len(),
        rows,
    })
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:>5}  {:<32} {:>8} {:>8} {:>8} {:>9}",
            "id", "jurisdiction", "complete", "partial", "untouched", "records"
        )?;
        for row in &self.rows {
            writeln!(
                f,
                "{:>5}  {:<32} {:>8} {:>8} {:>8} {:>9}",
                row.jurisdiction.to_string(),
                row.name.as_deref().unwrap_or("-"),
                row.complete,
                row.partial,
                row.untouched,
                row.records
            )?;
        }
        write!(
            f,
            "{} jurisdictions, {} records across {} file(s)",
            self.rows.len(),
            self.total_records(),
            self.files
        )
    }
}
