use crate::checkpoint::CheckpointStore;
use crate::config::CrawlMode;
use crate::models::{JurisdictionId, Shard};

/// Decides which (jurisdiction, letter) shards a run should crawl.
#[derive(Debug, Clone)]
pub struct ShardScheduler {
    letters: Vec<char>,
    mode: CrawlMode,
}

impl ShardScheduler {
    pub fn new(letters: Vec<char>, mode: CrawlMode) -> Self {
        Self { letters, mode }
    }

    pub fn mode(&self) -> CrawlMode {
        self.mode
    }

    pub fn should_run(&self, shard: Shard, checkpoint: &CheckpointStore) -> bool {
        match self.mode {
            CrawlMode::Skip => {
                checkpoint.done_count(shard) == 0 && !checkpoint.is_shard_complete(shard)
            }
            CrawlMode::Cleanup => !checkpoint.is_shard_complete(shard),
        }
    }

    /// Shards still to run for one jurisdiction, in letter order.
    pub fn shards_for(&self, jurisdiction: JurisdictionId, checkpoint: &CheckpointStore) -> Vec<Shard> {
        self.letters
            .iter()
            .map(|&letter| Shard::new(jurisdiction, letter))
            .filter(|&shard| {
                let run = self.should_run(shard, checkpoint);
                if !run {
                    tracing::debug!(%shard, progress = ?checkpoint.progress(shard), "Skipping shard");
                }
                run
            })
            .collect()
    }

    /// Every shard to run across `jurisdictions`.
    pub fn plan(&self, jurisdictions: &[JurisdictionId], checkpoint: &CheckpointStore) -> Vec<Shard> {
        jurisdictions
            .iter()
            .flat_map(|&j| self.shards_for(j, checkpoint))
            .collect()
    }
}
