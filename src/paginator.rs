//! Walks one letter's pages in a portal session, resuming past rows an earlier run already collected.
//!
//! The traversal is a small state machine:
//! `Searching -> Reading -> Advancing -> Reading ... -> Done`.
//! A letter ends when the list runs into the next letter, when the portal
//! has no further page, or when a page turn leaves the first row unchanged.

use crate::models::{HearingRecord, RawDetail, SchemaRegistry, Shard};
use crate::portal::{self, PageTurn, PortalSession};
use crate::runner::CrawlError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CrawlPhase {
    Searching,
    Reading,
    Advancing,
    Done,
}

/// Why a letter's traversal stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LetterEnd {
    /// A row for the following letter appeared.
    LetterBoundary,
    /// The portal reported no further page.
    LastPage,
    /// A page turn left the first row unchanged, so the list is exhausted.
    PageRepeated,
    /// The search landed on an empty page.
    EmptyPage,
}

/// Inputs for one letter traversal.
pub struct LetterCrawl<'a> {
    pub shard: Shard,
    /// Rows already collected for this shard by earlier runs.
    pub done_count: u64,
    pub fetch_details: bool,
    pub schema: &'a SchemaRegistry,
}

#[derive(Debug)]
pub struct LetterOutcome {
    pub records: Vec<HearingRecord>,
    pub end: LetterEnd,
    pub pages_skipped: u64,
    /// Rows passed over by resume-skip, whole pages included.
    pub rows_skipped: u64,
}

impl LetterCrawl<'_> {
    /// Runs the traversal to completion. Records are only returned, never written, so a failure
    /// part way through leaves nothing behind for this shard.
    pub async fn run(&self, session: &mut dyn PortalSession) -> Result<LetterOutcome, CrawlError> {
        let shard = self.shard;
        let mut phase = CrawlPhase::Searching;
        let mut first_row_key: Option<String> = None;
        let mut rows_skipped: u64 = 0;
        let mut pages_skipped: u64 = 0;
        let mut records: Vec<HearingRecord> = Vec::new();
        let mut end = LetterEnd::LastPage;

        while phase != CrawlPhase::Done {
            phase = match phase {
                CrawlPhase::Searching => {
                    session.search_letter(shard.letter).await?;
                    CrawlPhase::Reading
                }
                CrawlPhase::Reading => {
                    let page = session.read_page().await?;
                    let Some(first) = page.first() else {
                        end = LetterEnd::EmptyPage;
                        phase = CrawlPhase::Done;
                        continue;
                    };
                    if first_row_key.as_deref() == Some(first.identity_key()) {
                        end = LetterEnd::PageRepeated;
                        phase = CrawlPhase::Done;
                        continue;
                    }
                    first_row_key = Some(first.identity_key().to_string());

                    let remaining_to_skip = self.done_count.saturating_sub(rows_skipped);
                    let page_len = page.len() as u64;
                    if remaining_to_skip >= page_len {
                        rows_skipped += page_len;
                        pages_skipped += 1;
                        tracing::debug!(%shard, rows_skipped, "Page already collected, skipping");
                        phase = CrawlPhase::Advancing;
                        continue;
                    }
                    rows_skipped += remaining_to_skip;

                    let mut crossed = false;
                    for row in page.into_iter().skip(remaining_to_skip as usize) {
                        if row.leading_letter() != Some(shard.letter) {
                            tracing::debug!(%shard, next = %row.defendant, "Reached next letter");
                            crossed = true;
                            break;
                        }
                        let raw = if self.fetch_details {
                            portal::read_detail(session, &row).await?
                        } else {
                            RawDetail::new()
                        };
                        let details = self.schema.conform(shard, raw)?;
                        let index = self.done_count + records.len() as u64;
                        records.push(HearingRecord::from_listing(
                            index,
                            shard.jurisdiction,
                            session.jurisdiction_name(),
                            row,
                            details,
                        ));
                    }

                    if crossed {
                        end = LetterEnd::LetterBoundary;
                        CrawlPhase::Done
                    } else {
                        CrawlPhase::Advancing
                    }
                }
                CrawlPhase::Advancing => match session.advance_page().await? {
                    PageTurn::Advanced => CrawlPhase::Reading,
                    PageTurn::LastPage => {
                        end = LetterEnd::LastPage;
                        CrawlPhase::Done
                    }
                },
                CrawlPhase::Done => CrawlPhase::Done,
            };
        }

        if rows_skipped < self.done_count {
            tracing::warn!(
                %shard,
                collected = self.done_count,
                served = rows_skipped,
                "Checkpoint holds more rows than the portal served; remote data may have shrunk"
            );
        }

        Ok(LetterOutcome {
            records,
            end,
            pages_skipped,
            rows_skipped,
        })
    }
}
