//! PubMed discovery and record fetching.
//!
//! Discovery pages through the PubMed web search for one query and collects
//! the PMIDs listed on each results page. Records are fetched one at a time in
//! MEDLINE text form and handed to [`crate::medline::parse_record`].

use crate::config::{pause, Config, PacingConfig};
use crate::error::{PubtrackError, Result};
use crate::medline::parse_record;
use crate::models::{CrawlQuery, DocumentRecord, Researcher};
use async_trait::async_trait;
use scraper::{Html, Selector};
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// User agent string for requests
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

/// One results page of a search.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchPage {
    /// PMIDs on this page, in page order
    pub pmids: Vec<String>,
    /// Whether the page offers a "next page" control
    pub has_next: bool,
}

/// Paginated search interface.
#[async_trait]
pub trait SearchSource: Send + Sync {
    async fn search_page(&self, query: &CrawlQuery) -> Result<SearchPage>;
}

/// Full-record interface, returning raw MEDLINE text.
#[async_trait]
pub trait RecordSource: Send + Sync {
    async fn fetch_record(&self, pmid: &str) -> Result<String>;
}

/// HTTP client for the PubMed website.
pub struct PubMedClient {
    client: reqwest::Client,
    base_url: String,
    max_retries: u32,
}

impl PubMedClient {
    /// Create a new PubMedClient from the runtime configuration
    pub fn new(config: &Config) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.request_timeout());

        if let Some(proxy_url) = config.proxy.as_deref() {
            let proxy = reqwest::Proxy::all(proxy_url).map_err(|e| {
                PubtrackError::Config(format!("Invalid proxy URL '{}': {}", proxy_url, e))
            })?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| PubtrackError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.pubmed_url.trim_end_matches('/').to_string(),
            max_retries: config.max_retries,
        })
    }

    /// GET with exponential backoff on 429
    async fn get_text(&self, url: &Url) -> Result<String> {
        let mut backoff = Duration::from_millis(500);
        let mut attempt = 0;

        loop {
            let response = self
                .client
                .get(url.as_str())
                .header("Accept", "text/html,text/plain;q=0.9,*/*;q=0.8")
                .header("Accept-Language", "en-US,en;q=0.9")
                .send()
                .await?;

            let status = response.status();
            if status.is_success() {
                return response.text().await.map_err(PubtrackError::Network);
            }

            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                if attempt < self.max_retries {
                    warn!(
                        url = %url,
                        attempt = attempt + 1,
                        wait_ms = backoff.as_millis() as u64,
                        "Rate limited, backing off"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                    attempt += 1;
                    continue;
                }
                return Err(PubtrackError::RateLimited(60));
            }

            return Err(PubtrackError::Api {
                code: status.as_u16() as i32,
                message: format!("PubMed error: {}", status),
            });
        }
    }
}

#[async_trait]
impl SearchSource for PubMedClient {
    async fn search_page(&self, query: &CrawlQuery) -> Result<SearchPage> {
        let url = build_search_url(&self.base_url, query)?;
        debug!(kind = %query.kind, page = query.page, url = %url, "Fetching search page");
        let html = self.get_text(&url).await?;
        parse_search_page(&html)
    }
}

#[async_trait]
impl RecordSource for PubMedClient {
    async fn fetch_record(&self, pmid: &str) -> Result<String> {
        let url = build_record_url(&self.base_url, pmid)?;
        debug!(pmid = pmid, "Fetching record");
        self.get_text(&url).await
    }
}

/// `https://pubmed.ncbi.nlm.nih.gov/?term=...&page=N`
fn build_search_url(base_url: &str, query: &CrawlQuery) -> Result<Url> {
    let mut url = Url::parse(&format!("{}/", base_url))
        .map_err(|e| PubtrackError::Config(format!("Invalid base URL: {}", e)))?;

    url.query_pairs_mut()
        .append_pair("term", &query.term)
        .append_pair("page", &query.page.to_string());

    Ok(url)
}

/// `https://pubmed.ncbi.nlm.nih.gov/<pmid>/?format=pubmed`
fn build_record_url(base_url: &str, pmid: &str) -> Result<Url> {
    let pmid = pmid.trim();
    if pmid.is_empty() || !pmid.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(PubtrackError::Validation(format!("Invalid PMID '{}'", pmid)));
    }

    let mut url = Url::parse(&format!("{}/{}/", base_url, pmid))
        .map_err(|e| PubtrackError::Config(format!("Invalid base URL: {}", e)))?;
    url.query_pairs_mut().append_pair("format", "pubmed");
    Ok(url)
}

/// Extract PMIDs and the "next page" control from a results page.
pub fn parse_search_page(html: &str) -> Result<SearchPage> {
    let document = Html::parse_document(html);

    let pmid_selector =
        Selector::parse("span.docsum-pmid").map_err(|e| PubtrackError::Parse(e.to_string()))?;
    let next_selector = Selector::parse("button.load-button.next-page")
        .map_err(|e| PubtrackError::Parse(e.to_string()))?;

    let pmids = document
        .select(&pmid_selector)
        .map(|span| span.text().collect::<String>().trim().to_string())
        .filter(|pmid| !pmid.is_empty())
        .collect();

    let has_next = document.select(&next_selector).next().is_some();

    Ok(SearchPage { pmids, has_next })
}

/// Page through one query and return the PMIDs in discovery order.
///
/// Stops on an empty page, on a page without a next-page control, or on a
/// page that only repeats PMIDs already seen for this query.
pub async fn discover_identifiers<S: SearchSource + ?Sized>(
    source: &S,
    first: CrawlQuery,
    pacing: &PacingConfig,
) -> Result<Vec<String>> {
    let mut found = Vec::new();
    let mut seen = HashSet::new();
    let mut query = first;

    loop {
        let page = source.search_page(&query).await?;

        if page.pmids.is_empty() {
            debug!(kind = %query.kind, page = query.page, "Empty page, end of results");
            break;
        }

        let fresh = page
            .pmids
            .iter()
            .filter(|pmid| !seen.contains(pmid.as_str()))
            .count();
        if fresh == 0 {
            warn!(kind = %query.kind, page = query.page, "Page repeats earlier results, stopping");
            break;
        }

        seen.extend(page.pmids.iter().cloned());
        found.extend(page.pmids);

        if !page.has_next {
            break;
        }

        query = query.next_page();
        pause(pacing.inter_request_delay()).await;
    }

    info!(term = %query.term, kind = %query.kind, count = found.len(), "Discovery complete");
    Ok(found)
}

/// Fetch one record and parse it.
///
/// Transport failures propagate; a garbled body yields a mostly-empty record.
pub async fn fetch_document<R: RecordSource + ?Sized>(
    source: &R,
    researcher: &Researcher,
    pmid: &str,
) -> Result<DocumentRecord> {
    let text = source.fetch_record(pmid).await?;
    Ok(parse_record(&text, &researcher.name, &researcher.orcid, pmid))
}
