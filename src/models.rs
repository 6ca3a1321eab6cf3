use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

/// Ordinal written on sentinel lines in place of a row index.
pub const SENTINEL_INDEX: i64 = -1;

/// Columns every hearing carries, in output order, ahead of the detail columns.
pub const BASE_COLUMNS: [&str; 5] = ["case_number", "defendant", "charge", "hearing_date", "status"];

/// Rank of a jurisdiction in the portal's selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JurisdictionId(pub u32);

impl fmt::Display for JurisdictionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One unit of crawl work: every defendant in one jurisdiction whose surname starts with `letter`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Shard {
    pub jurisdiction: JurisdictionId,
    pub letter: char,
}

impl Shard {
    pub fn new(jurisdiction: JurisdictionId, letter: char) -> Self {
        Self {
            jurisdiction,
            letter: letter.to_ascii_uppercase(),
        }
    }
}

impl fmt::Display for Shard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "jurisdiction {} letter {}", self.jurisdiction, self.letter)
    }
}

/// Upper-cased first character of a defendant name, which is how rows are bucketed into shards.
pub fn leading_letter(name: &str) -> Option<char> {
    name.trim_start().chars().next().map(|c| c.to_ascii_uppercase())
}

/// Opaque pointer back into the portal for drilling into a row (a detail URL, a fixture index, ...).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowHandle(pub String);

/// One row of the portal's result list, in display order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingRow {
    pub case_number: String,
    pub defendant: String,
    pub charge: String,
    pub hearing_date: String,
    pub status: String,
    pub handle: RowHandle,
}

impl ListingRow {
    /// Key used to tell whether a page actually changed after a page turn.
    pub fn identity_key(&self) -> &str {
        &self.case_number
    }

    pub fn leading_letter(&self) -> Option<char> {
        leading_letter(&self.defendant)
    }
}

/// Detail fields as they come off the drill-down view, before schema validation.
pub type RawDetail = BTreeMap<String, String>;

/// Detail fields whose key set has been checked against the reference schema.
///
/// The only way to build one outside deserialization is [`SchemaRegistry::conform`],
/// so a record holding `DetailFields` is known to match the run's schema.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DetailFields(BTreeMap<String, String>);

impl DetailFields {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A single hearing as written to the output log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HearingRecord {
    /// Position of the row within its shard's traversal, counting rows from earlier runs.
    pub index: u64,
    pub jurisdiction: JurisdictionId,
    pub jurisdiction_name: String,
    pub case_number: String,
    pub defendant: String,
    pub charge: String,
    pub hearing_date: String,
    pub status: String,
    pub details: DetailFields,
}

impl HearingRecord {
    pub fn from_listing(
        index: u64,
        jurisdiction: JurisdictionId,
        jurisdiction_name: &str,
        row: ListingRow,
        details: DetailFields,
    ) -> Self {
        Self {
            index,
            jurisdiction,
            jurisdiction_name: jurisdiction_name.to_string(),
            case_number: row.case_number,
            defendant: row.defendant,
            charge: row.charge,
            hearing_date: row.hearing_date,
            status: row.status,
            details,
        }
    }

    pub fn letter(&self) -> Option<char> {
        leading_letter(&self.defendant)
    }
}

/// Marker meaning "this shard was scanned to the end".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentinelRecord {
    pub index: i64,
    pub jurisdiction: JurisdictionId,
    pub letter: char,
}

impl SentinelRecord {
    pub fn new(shard: Shard) -> Self {
        Self {
            index: SENTINEL_INDEX,
            jurisdiction: shard.jurisdiction,
            letter: shard.letter,
        }
    }

    pub fn shard(&self) -> Shard {
        Shard::new(self.jurisdiction, self.letter)
    }
}

/// One line of the JSONL output log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LogLine {
    Header { columns: Vec<String> },
    Hearing(HearingRecord),
    Sentinel(SentinelRecord),
}

/// The full set of expected columns: the fixed base columns plus the detail keys.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Schema {
    detail_keys: BTreeSet<String>,
}

impl Schema {
    pub fn from_detail_keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            detail_keys: keys.into_iter().map(Into::into).collect(),
        }
    }

    /// Rebuilds a schema from a header line, ignoring the base columns.
    pub fn from_columns(columns: &[String]) -> Self {
        Self::from_detail_keys(
            columns
                .iter()
                .filter(|c| !BASE_COLUMNS.contains(&c.as_str()))
                .cloned(),
        )
    }

    pub fn columns(&self) -> Vec<String> {
        BASE_COLUMNS
            .iter()
            .map(|c| c.to_string())
            .chain(self.detail_keys.iter().cloned())
            .collect()
    }

    pub fn detail_keys(&self) -> &BTreeSet<String> {
        &self.detail_keys
    }

    /// Symmetric difference against `keys`: (present in `keys` only, present in schema only).
    pub fn diff<'a, I>(&self, keys: I) -> (Vec<String>, Vec<String>)
    where
        I: IntoIterator<Item = &'a String>,
    {
        let found: BTreeSet<&String> = keys.into_iter().collect();
        let unexpected = found
            .iter()
            .filter(|k| !self.detail_keys.contains(k.as_str()))
            .map(|k| k.to_string())
            .collect();
        let missing = self
            .detail_keys
            .iter()
            .filter(|k| !found.contains(k))
            .cloned()
            .collect();
        (unexpected, missing)
    }
}

/// Raised when scraped detail fields do not line up with the reference schema.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("schema mismatch for {shard}: unexpected fields {unexpected:?}, missing fields {missing:?}")]
pub struct SchemaMismatch {
    pub shard: Shard,
    pub unexpected: Vec<String>,
    pub missing: Vec<String>,
}

/// Set-once reference schema shared by every worker in a run.
///
/// Seeded from the checkpoint when prior output exists; otherwise the first
/// conformed row fixes it.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    inner: Arc<RwLock<Option<Arc<Schema>>>>,
}

impl SchemaRegistry {
    pub fn new(initial: Option<Schema>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(initial.map(Arc::new))),
        }
    }

    pub fn current(&self) -> Option<Arc<Schema>> {
        self.inner.read().clone()
    }

    /// Validates `raw` and wraps it as [`DetailFields`].
    pub fn conform(&self, shard: Shard, raw: RawDetail) -> Result<DetailFields, SchemaMismatch> {
        let schema = match self.current() {
            Some(schema) => schema,
            None => self.adopt(shard, &raw),
        };

        let (unexpected, missing) = schema.diff(raw.keys());
        if unexpected.is_empty() && missing.is_empty() {
            Ok(DetailFields(raw))
        } else {
            Err(SchemaMismatch {
                shard,
                unexpected,
                missing,
            })
        }
    }

    fn adopt(&self, shard: Shard, raw: &RawDetail) -> Arc<Schema> {
        let mut guard = self.inner.write();
        // Another worker may have adopted one while this call waited.
        if let Some(schema) = guard.as_ref() {
            return Arc::clone(schema);
        }
        let adopted = Arc::new(Schema::from_detail_keys(raw.keys().cloned()));
        tracing::info!(
            %shard,
            columns = adopted.detail_keys().len(),
            "Adopted reference schema from first scraped row"
        );
        *guard = Some(Arc::clone(&adopted));
        adopted
    }
}
