use crate::models::{HearingRecord, LogLine, SchemaRegistry, SentinelRecord, Shard};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Writer task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// File operations a shard group append needs.
trait GroupFile: Write {
    fn set_len(&mut self, len: u64) -> std::io::Result<()>;
    fn sync_data(&mut self) -> std::io::Result<()>;
}

impl GroupFile for File {
    fn set_len(&mut self, len: u64) -> std::io::Result<()> {
        File::set_len(self, len)
    }

    fn sync_data(&mut self) -> std::io::Result<()> {
        File::sync_data(self)
    }
}

struct SinkInner<F = File> {
    file: F,
    /// Length of the file up to the end of the last synced group.
    committed: u64,
    /// Set while bytes past `committed` may be on disk.
    dirty: bool,
    header_written: bool,
}

impl<F: GroupFile> SinkInner<F> {
    fn new(file: F, committed: u64, header_written: bool) -> Self {
        Self {
            file,
            committed,
            dirty: false,
            header_written,
        }
    }

    /// Serializes the whole group first, then writes it with one `write_all` and syncs.
    /// A failed write is cut back to the last committed length.
    fn append_group(
        &mut self,
        schema: &SchemaRegistry,
        shard: Shard,
        records: Vec<HearingRecord>,
    ) -> Result<usize, SinkError> {
        self.rollback()?;

        let write_header = !records.is_empty() && !self.header_written;
        let mut group = Vec::new();
        let mut lines = 0usize;

        if write_header {
            let columns = schema.current().map(|s| s.columns()).unwrap_or_default();
            write_line(&mut group, &LogLine::Header { columns })?;
            lines += 1;
        }
        for record in records {
            write_line(&mut group, &LogLine::Hearing(record))?;
            lines += 1;
        }
        write_line(&mut group, &LogLine::Sentinel(SentinelRecord::new(shard)))?;
        lines += 1;

        self.dirty = true;
        let written = self
            .file
            .write_all(&group)
            .and_then(|()| self.file.flush())
            .and_then(|()| self.file.sync_data());
        if let Err(e) = written {
            if let Err(rollback) = self.rollback() {
                tracing::error!(%shard, error = %rollback, "Could not cut back a partial shard group");
            }
            return Err(e.into());
        }

        self.dirty = false;
        self.committed += group.len() as u64;
        if write_header {
            self.header_written = true;
        }
        Ok(lines)
    }

    fn rollback(&mut self) -> std::io::Result<()> {
        if self.dirty {
            self.file.set_len(self.committed)?;
            self.file.sync_data()?;
            self.dirty = false;
        }
        Ok(())
    }
}

/// Append-only JSONL writer shared by all workers.
///
/// One shard's lines (its hearings followed by its sentinel) are written
/// under a single lock and synced before the lock is released, so groups
/// from different shards never interleave. Disk work runs on the blocking pool.
pub struct RecordSink {
    path: PathBuf,
    schema: SchemaRegistry,
    inner: Arc<Mutex<SinkInner>>,
}

impl RecordSink {
    /// Opens `path` for appending. `header_present` says whether an earlier run already wrote a header there.
    pub fn open<P: AsRef<Path>>(
        path: P,
        header_present: bool,
        schema: SchemaRegistry,
    ) -> Result<Self, SinkError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if let Some(dropped) = truncate_torn_tail(&path)? {
            tracing::warn!(path = %path.display(), bytes = dropped, "Dropped torn final line from earlier run");
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let committed = file.metadata()?.len();
        Ok(Self {
            path,
            schema,
            inner: Arc::new(Mutex::new(SinkInner::new(file, committed, header_present))),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends a fully scanned shard: its records, then its sentinel. Returns the number of lines written.
    pub async fn append_shard(&self, shard: Shard, records: Vec<HearingRecord>) -> Result<usize, SinkError> {
        let inner = Arc::clone(&self.inner);
        let schema = self.schema.clone();
        tokio::task::spawn_blocking(move || inner.lock().append_group(&schema, shard, records)).await?
    }
}

/// Cuts a partial last line left by an interrupted run so new lines start clean.
/// Returns the number of bytes removed, if any.
fn truncate_torn_tail(path: &Path) -> std::io::Result<Option<u64>> {
    const CHUNK: u64 = 8 * 1024;

    let mut file = match OpenOptions::new().read(true).write(true).open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(None);
    }

    let mut last = [0u8; 1];
    file.seek(SeekFrom::Start(len - 1))?;
    file.read_exact(&mut last)?;
    if last[0] == b'\n' {
        return Ok(None);
    }

    let mut end = len;
    let mut keep = 0u64;
    let mut buf = vec![0u8; CHUNK as usize];
    while end > 0 {
        let start = end.saturating_sub(CHUNK);
        let chunk = &mut buf[..(end - start) as usize];
        file.seek(SeekFrom::Start(start))?;
        file.read_exact(chunk)?;
        if let Some(pos) = chunk.iter().rposition(|&b| b == b'\n') {
            keep = start + pos as u64 + 1;
            break;
        }
        end = start;
    }

    file.set_len(keep)?;
    file.sync_data()?;
    Ok(Some(len - keep))
}

fn write_line<W: Write>(writer: &mut W, line: &LogLine) -> Result<(), SinkError> {
    serde_json::to_writer(&mut *writer, line)?;
    writer.write_all(b"\n")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::CheckpointStore;
    use crate::models::{JurisdictionId, RawDetail, Schema};
    use tempfile::TempDir;

    fn record(schema: &SchemaRegistry, shard: Shard, index: u64, defendant: &str) -> HearingRecord {
        let mut raw = RawDetail::new();
        raw.insert("Race".to_string(), "W".to_string());
        HearingRecord {
            index,
            jurisdiction: shard.jurisdiction,
            jurisdiction_name: "Floyd".to_string(),
            case_number: format!("CR{index}"),
            defendant: defendant.to_string(),
            charge: "X".to_string(),
            hearing_date: "D".to_string(),
            status: "S".to_string(),
            details: schema.conform(shard, raw).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_header_written_once_then_reloaded() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hearings.jsonl");
        let schema = SchemaRegistry::new(Some(Schema::from_detail_keys(["Race"])));
        let shard = Shard::new(JurisdictionId(3), 'F');

        let sink = RecordSink::open(&path, false, schema.clone()).unwrap();
        let written = sink
            .append_shard(shard, vec![record(&schema, shard, 0, "FOX"), record(&schema, shard, 1, "FRY")])
            .await
            .unwrap();
        assert_eq!(written, 4);
        let other = Shard::new(JurisdictionId(3), 'G');
        assert_eq!(sink.append_shard(other, vec![record(&schema, other, 0, "GRAY")]).await.unwrap(), 2);
        drop(sink);

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().filter(|l| l.contains(r#""kind":"header""#)).count(), 1);

        let store = CheckpointStore::load(dir.path()).unwrap();
        assert!(store.has_header(&path));
        assert_eq!(store.done_count(shard), 2);
        assert!(store.is_shard_complete(shard));
        assert!(store.is_shard_complete(other));
        assert_eq!(store.schema().unwrap().detail_keys().len(), 1);

        // Second run appends without another header.
        let sink = RecordSink::open(&path, store.has_header(&path), schema.clone()).unwrap();
        let third = Shard::new(JurisdictionId(4), 'H');
        assert_eq!(sink.append_shard(third, vec![record(&schema, third, 0, "HILL")]).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_torn_tail_truncated_on_open() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hearings.jsonl");
        let complete = r#"{"kind":"sentinel","index":-1,"jurisdiction":1,"letter":"A"}"#;
        std::fs::write(&path, format!("{complete}\n{{\"kind\":\"hear")).unwrap();

        let sink = RecordSink::open(&path, false, SchemaRegistry::new(None)).unwrap();
        sink.append_shard(Shard::new(JurisdictionId(1), 'B'), Vec::new()).await.unwrap();
        drop(sink);

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
        assert!(contents.starts_with(complete));
        let store = CheckpointStore::load(dir.path()).unwrap();
        assert!(store.is_shard_complete(Shard::new(JurisdictionId(1), 'B')));
    }

    #[tokio::test]
    async fn test_empty_shard_writes_only_sentinel() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hearings.jsonl");
        let sink = RecordSink::open(&path, false, SchemaRegistry::new(None)).unwrap();
        assert_eq!(sink.append_shard(Shard::new(JurisdictionId(1), 'X'), Vec::new()).await.unwrap(), 1);

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            contents.trim(),
            r#"{"kind":"sentinel","index":-1,"jurisdiction":1,"letter":"X"}"#
        );
    }

    /// Accepts `budget` bytes, then fails every write.
    struct FlakyFile {
        data: Vec<u8>,
        budget: usize,
    }

    impl Write for FlakyFile {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if self.budget == 0 {
                return Err(std::io::Error::other("disk full"));
            }
            let n = buf.len().min(self.budget);
            self.data.extend_from_slice(&buf[..n]);
            self.budget -= n;
            Ok(n)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl GroupFile for FlakyFile {
        fn set_len(&mut self, len: u64) -> std::io::Result<()> {
            self.data.truncate(len as usize);
            Ok(())
        }

        fn sync_data(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_failed_group_cut_back_to_last_sync() {
        let schema = SchemaRegistry::new(Some(Schema::from_detail_keys(["Race"])));
        let first = Shard::new(JurisdictionId(2), 'A');
        let second = Shard::new(JurisdictionId(2), 'B');
        let mut inner = SinkInner::new(FlakyFile { data: Vec::new(), budget: usize::MAX }, 0, false);

        inner.append_group(&schema, first, vec![record(&schema, first, 0, "ABEL")]).unwrap();
        let synced = inner.file.data.clone();
        assert_eq!(inner.committed, synced.len() as u64);

        // Half a hearing line reaches the file before the write fails.
        inner.file.budget = 40;
        let err = inner
            .append_group(&schema, second, vec![record(&schema, second, 0, "BAKER")])
            .unwrap_err();
        assert!(matches!(err, SinkError::Io(_)));
        assert_eq!(inner.file.data, synced);
        assert!(!inner.dirty);

        inner.file.budget = usize::MAX;
        inner.append_group(&schema, second, vec![record(&schema, second, 0, "BAKER")]).unwrap();
        let text = String::from_utf8(inner.file.data.clone()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 5);
        assert_eq!(lines.iter().filter(|l| l.contains(r#""kind":"header""#)).count(), 1);
        assert!(lines.iter().all(|l| serde_json::from_str::<serde_json::Value>(l).is_ok()));
        assert!(lines[4].contains(r#""letter":"B""#));
    }
}
