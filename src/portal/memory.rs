//! In-memory portal backed by scripted listings, with fault injection.

use super::{PageTurn, Portal, PortalSession, SourceError};
use crate::models::{JurisdictionId, ListingRow, RawDetail, RowHandle, leading_letter};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A scripted row plus the fields its detail view would show.
#[derive(Debug, Clone)]
pub struct MemoryRow {
    pub case_number: String,
    pub defendant: String,
    pub charge: String,
    pub hearing_date: String,
    pub status: String,
    pub detail: RawDetail,
}

impl MemoryRow {
    pub fn new(case_number: impl Into<String>, defendant: impl Into<String>) -> Self {
        Self {
            case_number: case_number.into(),
            defendant: defendant.into(),
            charge: "LARCENY".to_string(),
            hearing_date: "01/04/2021".to_string(),
            status: "Active".to_string(),
            detail: RawDetail::new(),
        }
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.detail.insert(key.into(), value.into());
        self
    }

    fn listing(&self, position: usize) -> ListingRow {
        ListingRow {
            case_number: self.case_number.clone(),
            defendant: self.defendant.clone(),
            charge: self.charge.clone(),
            hearing_date: self.hearing_date.clone(),
            status: self.status.clone(),
            handle: RowHandle(position.to_string()),
        }
    }
}

struct MemoryJurisdiction {
    name: String,
    rows: Vec<MemoryRow>,
}

#[derive(Default)]
struct Faults {
    page_reads: HashSet<usize>,
    detail_reads: HashSet<usize>,
    always: bool,
}

/// Fault plan and counters shared by the portal and every session it opens.
#[derive(Default)]
struct Shared {
    faults: Mutex<Faults>,
    page_reads: AtomicUsize,
    detail_reads: AtomicUsize,
    opened: AtomicUsize,
    closed: AtomicUsize,
}

/// Portal whose listings live in memory. Rows must be given in the portal's display order.
#[derive(Clone)]
pub struct MemoryPortal {
    page_size: usize,
    sticky_last_page: bool,
    jurisdictions: HashMap<JurisdictionId, Arc<MemoryJurisdiction>>,
    shared: Arc<Shared>,
}

impl MemoryPortal {
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size: page_size.max(1),
            sticky_last_page: false,
            jurisdictions: HashMap::new(),
            shared: Arc::new(Shared::default()),
        }
    }

    pub fn with_jurisdiction(
        mut self,
        id: JurisdictionId,
        name: impl Into<String>,
        rows: Vec<MemoryRow>,
    ) -> Self {
        self.jurisdictions.insert(
            id,
            Arc::new(MemoryJurisdiction {
                name: name.into(),
                rows,
            }),
        );
        self
    }

    /// On the last page, "next" reports success but leaves the page unchanged.
    pub fn with_sticky_last_page(mut self) -> Self {
        self.sticky_last_page = true;
        self
    }

    /// Fails the given page reads (1-based, counted across all sessions) with a navigation error.
    pub fn fail_page_reads(&self, calls: impl IntoIterator<Item = usize>) {
        self.shared.faults.lock().page_reads.extend(calls);
    }

    /// Fails the given detail reads (1-based, counted across all sessions).
    pub fn fail_detail_reads(&self, calls: impl IntoIterator<Item = usize>) {
        self.shared.faults.lock().detail_reads.extend(calls);
    }

    /// Every page read times out.
    pub fn fail_always(&self) {
        self.shared.faults.lock().always = true;
    }

    pub fn sessions_opened(&self) -> usize {
        self.shared.opened.load(Ordering::SeqCst)
    }

    pub fn sessions_closed(&self) -> usize {
        self.shared.closed.load(Ordering::SeqCst)
    }

    pub fn page_reads(&self) -> usize {
        self.shared.page_reads.load(Ordering::SeqCst)
    }

    pub fn detail_reads(&self) -> usize {
        self.shared.detail_reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Portal for MemoryPortal {
    async fn open(&self, jurisdiction: JurisdictionId) -> Result<Box<dyn PortalSession>, SourceError> {
        let data = self
            .jurisdictions
            .get(&jurisdiction)
            .cloned()
            .ok_or(SourceError::UnknownJurisdiction(jurisdiction))?;
        self.shared.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemorySession {
            data,
            shared: Arc::clone(&self.shared),
            page_size: self.page_size,
            sticky_last_page: self.sticky_last_page,
            page_start: None,
            in_detail: None,
            closed: false,
        }))
    }
}

struct MemorySession {
    data: Arc<MemoryJurisdiction>,
    shared: Arc<Shared>,
    page_size: usize,
    sticky_last_page: bool,
    page_start: Option<usize>,
    in_detail: Option<usize>,
    closed: bool,
}

impl MemorySession {
    fn ensure_list_view(&self) -> Result<usize, SourceError> {
        if self.in_detail.is_some() {
            return Err(SourceError::Layout("detail view is open".to_string()));
        }
        self.page_start
            .ok_or_else(|| SourceError::Navigation("no search issued".to_string()))
    }
}

#[async_trait]
impl PortalSession for MemorySession {
    fn jurisdiction_name(&self) -> &str {
        &self.data.name
    }

    async fn search_letter(&mut self, letter: char) -> Result<(), SourceError> {
        let rows = &self.data.rows;
        let start = rows
            .iter()
            .position(|r| leading_letter(&r.defendant).is_some_and(|c| c >= letter))
            .unwrap_or(rows.len());
        self.page_start = Some(start);
        self.in_detail = None;
        Ok(())
    }

    async fn read_page(&mut self) -> Result<Vec<ListingRow>, SourceError> {
        let call = self.shared.page_reads.fetch_add(1, Ordering::SeqCst) + 1;
        {
            let faults = self.shared.faults.lock();
            if faults.always {
                return Err(SourceError::Timeout);
            }
            if faults.page_reads.contains(&call) {
                return Err(SourceError::Navigation(format!("injected failure on page read {call}")));
            }
        }
        let start = self.ensure_list_view()?;
        let rows = &self.data.rows;
        let end = (start + self.page_size).min(rows.len());
        Ok(rows[start.min(end)..end]
            .iter()
            .enumerate()
            .map(|(offset, row)| row.listing(start + offset))
            .collect())
    }

    async fn advance_page(&mut self) -> Result<PageTurn, SourceError> {
        let start = self.ensure_list_view()?;
        let next = start + self.page_size;
        if next < self.data.rows.len() {
            self.page_start = Some(next);
            Ok(PageTurn::Advanced)
        } else if self.sticky_last_page {
            Ok(PageTurn::Advanced)
        } else {
            Ok(PageTurn::LastPage)
        }
    }

    async fn enter_detail(&mut self, row: &ListingRow) -> Result<(), SourceError> {
        self.ensure_list_view()?;
        let position: usize = row
            .handle
            .0
            .parse()
            .map_err(|_| SourceError::Layout(format!("bad row handle {:?}", row.handle.0)))?;
        if position >= self.data.rows.len() {
            return Err(SourceError::Layout(format!("row handle {position} out of range")));
        }
        self.in_detail = Some(position);
        Ok(())
    }

    async fn read_detail_fields(&mut self) -> Result<RawDetail, SourceError> {
        let call = self.shared.detail_reads.fetch_add(1, Ordering::SeqCst) + 1;
        if self.shared.faults.lock().detail_reads.contains(&call) {
            return Err(SourceError::Layout(format!("injected failure on detail read {call}")));
        }
        let position = self
            .in_detail
            .ok_or_else(|| SourceError::Navigation("detail view is not open".to_string()))?;
        Ok(self.data.rows[position].detail.clone())
    }

    async fn return_to_list(&mut self) -> Result<(), SourceError> {
        self.in_detail = None;
        Ok(())
    }

    async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.shared.closed.fetch_add(1, Ordering::SeqCst);
        }
    }
}
