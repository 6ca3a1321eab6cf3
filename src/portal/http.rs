//! Binding for the circuit court case-information site.
//!
//! The site is a plain form-driven HTML app: pick a court from a selector,
//! search by surname, page through a results table, open a row for its
//! detail tables. Each session keeps its own cookie jar.

use super::{PageTurn, Portal, PortalSession, SourceError};
use crate::config::Config;
use crate::models::{JurisdictionId, ListingRow, RawDetail, RowHandle};
use async_trait::async_trait;
use reqwest::Method;
use scraper::{ElementRef, Html, Selector};
use std::time::Duration;
use tokio::time::timeout;
use url::Url;

const LANDING_PAGE: &str = "circuit.jsp";
const SURNAME_FIELD: &str = "lastName";
const NEXT_CONTROL_ID: &str = "nextButton";

// Result pages carry layout rows above and below the hearings.
const LIST_HEADER_ROWS: usize = 6;
const LIST_FOOTER_ROWS: usize = 2;

// Detail view: case details, final disposition, and the defendant block.
const CASE_TABLE: usize = 4;
const DISPOSITION_TABLE: usize = 8;
const DISPOSITION_CELLS: usize = 6;
const DEFENDANT_TABLE: usize = 9;
const DEFENDANT_CELLS: usize = 23;

const EXCLUDED_DETAIL_KEYS: [&str; 5] = [
    "",
    "AKA",
    "AKA2",
    "Restriction Effective Date",
    "Restriction End Date",
];

/// A fetched page and the URL it was served from, for resolving relative links.
#[derive(Debug, Clone)]
struct Page {
    url: Url,
    html: String,
}

/// A form ready to submit.
#[derive(Debug, Clone, PartialEq)]
struct FormSubmission {
    action: Url,
    method: Method,
    fields: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq)]
enum NextControl {
    Link(Url),
    Form(FormSubmission),
}

pub struct HttpPortal {
    base_url: Url,
    user_agent: String,
    timeout: Duration,
}

impl HttpPortal {
    pub fn new(base_url: &str, user_agent: String, timeout_secs: u64) -> Result<Self, SourceError> {
        let mut base_url =
            Url::parse(base_url).map_err(|e| SourceError::Config(format!("{base_url}: {e}")))?;
        // Relative joins drop the last path segment unless it ends with a slash.
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Ok(Self {
            base_url,
            user_agent,
            timeout: Duration::from_secs(timeout_secs),
        })
    }

    fn build_client(&self) -> Result<reqwest::Client, SourceError> {
        reqwest::Client::builder()
            .user_agent(&self.user_agent)
            .timeout(self.timeout)
            .connect_timeout(Duration::from_secs(Config::CONNECT_TIMEOUT_SECS))
            .cookie_store(true)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| SourceError::Config(format!("failed to build HTTP client: {e}")))
    }
}

#[async_trait]
impl Portal for HttpPortal {
    #[tracing::instrument(skip(self), fields(base = %self.base_url))]
    async fn open(&self, jurisdiction: JurisdictionId) -> Result<Box<dyn PortalSession>, SourceError> {
        let client = self.build_client()?;
        let landing_url = self
            .base_url
            .join(LANDING_PAGE)
            .map_err(|e| SourceError::Config(e.to_string()))?;

        let mut session = HttpSession {
            client,
            timeout: self.timeout,
            search_page: None,
            list_page: None,
            detail_page: None,
            jurisdiction_name: String::new(),
        };

        let landing = session.fetch(Method::GET, landing_url, &[]).await?;
        let (form, name) = jurisdiction_form(&landing, jurisdiction)?;
        let search_page = session.submit(form).await?;

        tracing::debug!(%jurisdiction, name = %name, "Jurisdiction selected");
        session.jurisdiction_name = name;
        session.search_page = Some(search_page);
        Ok(Box::new(session))
    }
}

struct HttpSession {
    client: reqwest::Client,
    timeout: Duration,
    search_page: Option<Page>,
    list_page: Option<Page>,
    detail_page: Option<Page>,
    jurisdiction_name: String,
}

impl HttpSession {
    async fn fetch(&self, method: Method, url: Url, form: &[(String, String)]) -> Result<Page, SourceError> {
        let request = if method == Method::POST {
            self.client.post(url.clone()).form(form)
        } else if form.is_empty() {
            self.client.get(url.clone())
        } else {
            self.client.get(url.clone()).query(form)
        };

        let response = timeout(self.timeout, request.send())
            .await
            .map_err(|_| SourceError::Timeout)?
            .map_err(classify_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Http(format!("{status} from {url}")));
        }
        let final_url = response.url().clone();

        let html = timeout(self.timeout, response.text())
            .await
            .map_err(|_| SourceError::Timeout)?
            .map_err(classify_error)?;

        Ok(Page { url: final_url, html })
    }

    async fn submit(&self, form: FormSubmission) -> Result<Page, SourceError> {
        self.fetch(form.method, form.action, &form.fields).await
    }

    fn list(&self) -> Result<&Page, SourceError> {
        if self.detail_page.is_some() {
            return Err(SourceError::Layout("detail view is open".to_string()));
        }
        self.list_page
            .as_ref()
            .ok_or_else(|| SourceError::Navigation("no search issued".to_string()))
    }
}

#[async_trait]
impl PortalSession for HttpSession {
    fn jurisdiction_name(&self) -> &str {
        &self.jurisdiction_name
    }

    async fn search_letter(&mut self, letter: char) -> Result<(), SourceError> {
        let search_page = self
            .search_page
            .as_ref()
            .ok_or_else(|| SourceError::Navigation("session has no search page".to_string()))?;
        let form = search_form(search_page, letter)?;
        let list = self.submit(form).await?;
        self.list_page = Some(list);
        self.detail_page = None;
        Ok(())
    }

    async fn read_page(&mut self) -> Result<Vec<ListingRow>, SourceError> {
        parse_listing(self.list()?)
    }

    async fn advance_page(&mut self) -> Result<PageTurn, SourceError> {
        let next = match next_control(self.list()?)? {
            Some(next) => next,
            None => return Ok(PageTurn::LastPage),
        };
        let page = match next {
            NextControl::Link(url) => self.fetch(Method::GET, url, &[]).await?,
            NextControl::Form(form) => self.submit(form).await?,
        };
        self.list_page = Some(page);
        Ok(PageTurn::Advanced)
    }

    async fn enter_detail(&mut self, row: &ListingRow) -> Result<(), SourceError> {
        self.list()?;
        let url = Url::parse(&row.handle.0).map_err(|_| {
            SourceError::Layout(format!("row {} has no detail link", row.case_number))
        })?;
        let page = self.fetch(Method::GET, url, &[]).await?;
        self.detail_page = Some(page);
        Ok(())
    }

    async fn read_detail_fields(&mut self) -> Result<RawDetail, SourceError> {
        let page = self
            .detail_page
            .as_ref()
            .ok_or_else(|| SourceError::Navigation("detail view is not open".to_string()))?;
        parse_detail(page)
    }

    async fn return_to_list(&mut self) -> Result<(), SourceError> {
        // The list page is kept client side, so going back is just dropping the detail view.
        self.detail_page = None;
        Ok(())
    }

    async fn close(&mut self) {
        self.detail_page = None;
        self.list_page = None;
        self.search_page = None;
        tracing::debug!(jurisdiction = %self.jurisdiction_name, "Session closed");
    }
}

fn classify_error(error: reqwest::Error) -> SourceError {
    if error.is_timeout() {
        SourceError::Timeout
    } else if error.is_builder() {
        SourceError::Config(error.to_string())
    } else {
        SourceError::Http(error.to_string())
    }
}

fn selector(css: &str) -> Result<Selector, SourceError> {
    Selector::parse(css).map_err(|e| SourceError::Config(format!("bad selector {css}: {e}")))
}

/// Visible text of an element with runs of whitespace collapsed.
fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

fn resolve(page: &Page, href: &str) -> Result<Url, SourceError> {
    page.url
        .join(href.trim())
        .map_err(|e| SourceError::Layout(format!("bad link {href:?}: {e}")))
}

/// Builds a submission for `form`: its hidden inputs and named submit button, plus `extra`.
fn form_submission(
    page: &Page,
    form: ElementRef<'_>,
    extra: Vec<(String, String)>,
) -> Result<FormSubmission, SourceError> {
    let action = match form.value().attr("action") {
        Some(action) if !action.trim().is_empty() => resolve(page, action)?,
        _ => page.url.clone(),
    };
    let method = match form.value().attr("method") {
        Some(m) if m.eq_ignore_ascii_case("post") => Method::POST,
        _ => Method::GET,
    };

    let hidden = selector("input[type=hidden][name]")?;
    let submit = selector("input[type=submit][name]")?;
    let mut fields: Vec<(String, String)> = form
        .select(&hidden)
        .chain(form.select(&submit).take(1))
        .filter_map(|input| {
            let name = input.value().attr("name")?;
            Some((name.to_string(), input.value().attr("value").unwrap_or("").to_string()))
        })
        .filter(|(name, _)| !extra.iter().any(|(k, _)| k == name))
        .collect();
    fields.extend(extra);

    Ok(FormSubmission {
        action,
        method,
        fields,
    })
}

/// Picks the court option at `rank` on the landing page. Returns the submission and the court's name.
fn jurisdiction_form(page: &Page, rank: JurisdictionId) -> Result<(FormSubmission, String), SourceError> {
    let doc = Html::parse_document(&page.html);
    let form_sel = selector("form")?;
    let select_sel = selector("select[name]")?;
    let option_sel = selector("option")?;

    let form = doc
        .select(&form_sel)
        .find(|f| f.select(&select_sel).next().is_some())
        .ok_or_else(|| SourceError::Layout("no court selector on landing page".to_string()))?;
    let select = form
        .select(&select_sel)
        .next()
        .ok_or_else(|| SourceError::Layout("no court selector on landing page".to_string()))?;
    let select_name = select.value().attr("name").unwrap_or_default().to_string();

    let option = select
        .select(&option_sel)
        .nth(rank.0 as usize)
        .ok_or(SourceError::UnknownJurisdiction(rank))?;
    let name = element_text(option);
    let value = option
        .value()
        .attr("value")
        .map(str::to_string)
        .unwrap_or_else(|| name.clone());

    let submission = form_submission(page, form, vec![(select_name, value)])?;
    Ok((submission, name))
}

fn search_form(page: &Page, letter: char) -> Result<FormSubmission, SourceError> {
    let doc = Html::parse_document(&page.html);
    let form_sel = selector("form")?;
    let surname_sel = selector(&format!("input[name={SURNAME_FIELD}]"))?;

    let form = doc
        .select(&form_sel)
        .find(|f| f.select(&surname_sel).next().is_some())
        .ok_or_else(|| SourceError::Layout("no surname search form".to_string()))?;

    form_submission(page, form, vec![(SURNAME_FIELD.to_string(), letter.to_string())])
}

fn parse_listing(page: &Page) -> Result<Vec<ListingRow>, SourceError> {
    let doc = Html::parse_document(&page.html);
    let row_sel = selector("tr")?;
    let cell_sel = selector("td")?;
    let link_sel = selector("a[href]")?;

    let rows: Vec<ElementRef<'_>> = doc.select(&row_sel).collect();
    if rows.len() < LIST_HEADER_ROWS {
        return Err(SourceError::Layout(format!(
            "expected a results table, found {} rows",
            rows.len()
        )));
    }
    let end = rows.len().saturating_sub(LIST_FOOTER_ROWS).max(LIST_HEADER_ROWS);

    rows[LIST_HEADER_ROWS..end]
        .iter()
        .map(|row| {
            let cells: Vec<String> = row.select(&cell_sel).map(element_text).collect();
            if cells.len() < 5 {
                return Err(SourceError::Layout(format!(
                    "result row has {} cells, expected 5",
                    cells.len()
                )));
            }
            let handle = match row.select(&link_sel).next().and_then(|a| a.value().attr("href")) {
                Some(href) => resolve(page, href)?.to_string(),
                None => String::new(),
            };
            let mut cells = cells.into_iter();
            let mut next = || cells.next().unwrap_or_default();
            Ok(ListingRow {
                case_number: next(),
                defendant: next(),
                charge: next(),
                hearing_date: next(),
                status: next(),
                handle: RowHandle(handle),
            })
        })
        .collect()
}

fn next_control(page: &Page) -> Result<Option<NextControl>, SourceError> {
    let doc = Html::parse_document(&page.html);
    let next_sel = selector(&format!("#{NEXT_CONTROL_ID}"))?;
    let form_sel = selector("form")?;

    let Some(control) = doc.select(&next_sel).next() else {
        return Ok(None);
    };
    if control.value().attr("disabled").is_some() {
        return Ok(None);
    }
    if let Some(href) = control.value().attr("href") {
        return Ok(Some(NextControl::Link(resolve(page, href)?)));
    }

    let form = doc
        .select(&form_sel)
        .find(|f| f.select(&next_sel).next().is_some())
        .ok_or_else(|| SourceError::Layout("next control outside any form".to_string()))?;
    let extra = match control.value().attr("name") {
        Some(name) => vec![(
            name.to_string(),
            control.value().attr("value").unwrap_or("").to_string(),
        )],
        None => Vec::new(),
    };
    Ok(Some(NextControl::Form(form_submission(page, form, extra)?)))
}

/// Splits a `Key: Value` detail cell on its first colon.
fn split_detail_cell(text: &str) -> (String, String) {
    match text.split_once(':') {
        Some((key, value)) => (key.trim().to_string(), value.trim().to_string()),
        None => (text.trim().to_string(), String::new()),
    }
}

fn parse_detail(page: &Page) -> Result<RawDetail, SourceError> {
    let doc = Html::parse_document(&page.html);
    let table_sel = selector("tbody")?;
    let cell_sel = selector("td")?;

    let tables: Vec<ElementRef<'_>> = doc.select(&table_sel).collect();
    if tables.len() <= DEFENDANT_TABLE {
        return Err(SourceError::Layout(format!(
            "detail view has {} tables, expected at least {}",
            tables.len(),
            DEFENDANT_TABLE + 1
        )));
    }
    let cells = |table: usize| -> Vec<String> {
        tables[table].select(&cell_sel).map(element_text).collect()
    };

    let case_cells = cells(CASE_TABLE);
    let case_cells = case_cells
        .get(1..case_cells.len().saturating_sub(1))
        .unwrap_or_default();
    let disposition = cells(DISPOSITION_TABLE);
    let defendant = cells(DEFENDANT_TABLE);

    Ok(case_cells
        .iter()
        .chain(disposition.iter().take(DISPOSITION_CELLS))
        .chain(defendant.iter().take(DEFENDANT_CELLS))
        .map(|text| split_detail_cell(text))
        .filter(|(key, _)| !EXCLUDED_DETAIL_KEYS.contains(&key.as_str()))
        .collect())
}
