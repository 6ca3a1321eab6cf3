//! Capability interface over the remote case-lookup portal.
//!
//! The crawl engine only ever talks to a [`Portal`] / [`PortalSession`] pair;
//! [`http::HttpPortal`] drives the real site and [`memory::MemoryPortal`]
//! serves scripted listings for dry runs and tests.

pub mod http;
pub mod memory;

use crate::models::{JurisdictionId, ListingRow, RawDetail};
use async_trait::async_trait;

/// Errors raised while driving a portal session.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SourceError {
    #[error("Navigation failed: {0}")]
    Navigation(String),

    #[error("Request timeout")]
    Timeout,

    #[error("Unexpected page layout: {0}")]
    Layout(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("No jurisdiction at rank {0}")]
    UnknownJurisdiction(JurisdictionId),

    #[error("Invalid portal configuration: {0}")]
    Config(String),
}

impl SourceError {
    /// Transient failures are worth a fresh session; the rest will fail the same way again.
    pub fn is_retryable(&self) -> bool {
        match self {
            SourceError::Navigation(_)
            | SourceError::Timeout
            | SourceError::Layout(_)
            | SourceError::Http(_) => true,
            SourceError::UnknownJurisdiction(_) | SourceError::Config(_) => false,
        }
    }
}

/// Outcome of asking for the next page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageTurn {
    Advanced,
    LastPage,
}

/// Opens browsing sessions scoped to one jurisdiction.
#[async_trait]
pub trait Portal: Send + Sync {
    async fn open(&self, jurisdiction: JurisdictionId) -> Result<Box<dyn PortalSession>, SourceError>;
}

/// One live browsing session. Callers must `close` it on every exit path.
#[async_trait]
pub trait PortalSession: Send {
    /// Display name of the jurisdiction selected when the session was opened.
    fn jurisdiction_name(&self) -> &str;

    /// Positions the list view at the first page of surnames starting with `letter`.
    async fn search_letter(&mut self, letter: char) -> Result<(), SourceError>;

    /// Rows on the current list page, in display order.
    async fn read_page(&mut self) -> Result<Vec<ListingRow>, SourceError>;

    async fn advance_page(&mut self) -> Result<PageTurn, SourceError>;

    async fn enter_detail(&mut self, row: &ListingRow) -> Result<(), SourceError>;

    async fn read_detail_fields(&mut self) -> Result<RawDetail, SourceError>;

    async fn return_to_list(&mut self) -> Result<(), SourceError>;

    async fn close(&mut self);
}

/// Drills into `row` and always navigates back to the list view, even when extraction fails.
pub async fn read_detail(
    session: &mut dyn PortalSession,
    row: &ListingRow,
) -> Result<RawDetail, SourceError> {
    session.enter_detail(row).await?;
    let extracted = session.read_detail_fields().await;
    let restored = session.return_to_list().await;
    match (extracted, restored) {
        (Ok(fields), Ok(())) => Ok(fields),
        (Err(e), restored) => {
            if let Err(back) = restored {
                tracing::warn!(error = %back, "Could not return to list view after failed detail read");
            }
            Err(e)
        }
        (Ok(_), Err(back)) => Err(back),
    }
}
