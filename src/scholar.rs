//! Citation count probing against Google Scholar.
//!
//! A probe walks the same steps a person would: open the landing page, find
//! the search box, type the DOI one key at a time, submit, read the results,
//! then look for a "Cited by N" link. Keystroke and reading delays come from
//! [`PacingConfig`].
//!
//! The session is owned by one [`CitationProber`] and released when the prober
//! is dropped, on every exit path.

use crate::config::{pause, Config, PacingConfig};
use crate::cookies::{session_jar, Cookie};
use crate::error::{OptionExt, PubtrackError, Result};
use crate::models::bare_doi;
use async_trait::async_trait;
use regex::Regex;
use scraper::{Html, Selector};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// User agent string for requests
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

/// Name of the search box on the landing page
const QUERY_INPUT: &str = "q";

/// Result of probing one DOI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// A "Cited by N" marker was found
    Cited(u64),
    /// Results loaded but carried no citation marker
    NoCitations,
    /// Timeout or interaction error; says nothing about the real count
    SoftFailure(String),
}

impl ProbeOutcome {
    /// Observed count, `None` for a soft failure.
    pub fn count(&self) -> Option<u64> {
        match self {
            ProbeOutcome::Cited(n) => Some(*n),
            ProbeOutcome::NoCitations => Some(0),
            ProbeOutcome::SoftFailure(_) => None,
        }
    }
}

/// An interactive session with the citation service.
#[async_trait]
pub trait CitationSession: Send {
    /// Load the landing page and locate the query input.
    async fn open_landing(&mut self) -> Result<()>;

    /// Empty the query input.
    fn clear_query(&mut self);

    /// Type one character into the query input.
    fn type_char(&mut self, ch: char);

    /// Submit the typed query and load the results page.
    async fn submit(&mut self) -> Result<()>;

    /// Text of every link on the current results page, in page order.
    fn result_texts(&self) -> Vec<String>;
}

/// Drives one session through the probe protocol.
pub struct CitationProber<S: CitationSession> {
    session: S,
    pacing: PacingConfig,
    timeout: Duration,
    cite_regex: Regex,
}

impl<S: CitationSession> CitationProber<S> {
    pub fn new(session: S, pacing: PacingConfig, timeout: Duration) -> Result<Self> {
        // English and Chinese result pages
        let cite_regex = Regex::new(r"(?i)(?:cited by|被引用)\s*(\d[\d,.]*)")
            .map_err(|e| PubtrackError::Parse(e.to_string()))?;

        Ok(Self {
            session,
            pacing,
            timeout,
            cite_regex,
        })
    }

    /// Probe the citation count of one DOI (bare or resolver-link form).
    pub async fn probe(&mut self, doi: &str) -> ProbeOutcome {
        let doi = bare_doi(doi).to_string();
        if doi.is_empty() {
            return ProbeOutcome::SoftFailure("empty DOI".to_string());
        }

        let timeout = self.timeout;
        let texts = match tokio::time::timeout(timeout, self.interact(&doi)).await {
            Ok(Ok(texts)) => texts,
            Ok(Err(e)) => {
                warn!(doi = %doi, error = %e, "Citation probe failed");
                return ProbeOutcome::SoftFailure(e.to_string());
            }
            Err(_) => {
                warn!(doi = %doi, timeout_ms = timeout.as_millis() as u64, "Citation probe timed out");
                return ProbeOutcome::SoftFailure(
                    PubtrackError::Timeout(format!("probe for {}", doi)).to_string(),
                );
            }
        };

        match parse_cited_by(&self.cite_regex, &texts) {
            Some(count) => {
                debug!(doi = %doi, count = count, "Citation count found");
                ProbeOutcome::Cited(count)
            }
            None => {
                info!(doi = %doi, "No citations found");
                ProbeOutcome::NoCitations
            }
        }
    }

    async fn interact(&mut self, doi: &str) -> Result<Vec<String>> {
        self.session.open_landing().await?;

        self.session.clear_query();
        for ch in doi.chars() {
            self.session.type_char(ch);
            pause(self.pacing.typing_delay()).await;
        }

        self.session.submit().await?;

        // reading time
        pause(self.pacing.dwell_time()).await;

        Ok(self.session.result_texts())
    }
}

/// First "Cited by N" count among the given element texts.
fn parse_cited_by(regex: &Regex, texts: &[String]) -> Option<u64> {
    texts.iter().find_map(|text| {
        let caps = regex.captures(text)?;
        let digits: String = caps.get(1)?.as_str().chars().filter(|c| c.is_ascii_digit()).collect();
        digits.parse().ok()
    })
}

/// HTTP-backed session against Google Scholar.
pub struct ScholarSession {
    client: reqwest::Client,
    base_url: Url,
    form_action: Option<Url>,
    query: String,
    results_html: String,
}

impl ScholarSession {
    /// Open a session. Cookies matching the service host seed the session's cookie jar.
    pub fn open(config: &Config, cookies: &[Cookie]) -> Result<Self> {
        let base_url = Url::parse(config.scholar_url.trim_end_matches('/'))
            .map_err(|e| PubtrackError::Config(format!("Invalid scholar URL: {}", e)))?;

        let host = base_url.host_str().ok_or_parse("scholar URL has no host")?;
        let (jar, seeded) = session_jar(cookies, &base_url);
        if seeded == 0 {
            warn!(host = host, "No cookies loaded for citation session. Run 'pubtrack cookies import' to add browser cookies.");
        } else {
            debug!(host = host, count = seeded, "Seeded session cookies");
        }

        // Imported cookies and any set during the session share one jar
        let mut builder = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.probe_timeout())
            .cookie_provider(Arc::new(jar));

        if let Some(proxy_url) = config.proxy.as_deref() {
            let proxy = reqwest::Proxy::all(proxy_url).map_err(|e| {
                PubtrackError::Config(format!("Invalid proxy URL '{}': {}", proxy_url, e))
            })?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| PubtrackError::Config(format!("Failed to build HTTP client: {}", e)))?;

        info!(url = %base_url, "Citation session opened");

        Ok(Self {
            client,
            base_url,
            form_action: None,
            query: String::new(),
            results_html: String::new(),
        })
    }

    async fn fetch(&self, url: &Url) -> Result<String> {
        let request = self
            .client
            .get(url.as_str())
            .header("Accept", "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8")
            .header("Accept-Language", "en-US,en;q=0.9")
            .header("Cache-Control", "no-cache")
            .header("Sec-Fetch-Dest", "document")
            .header("Sec-Fetch-Mode", "navigate")
            .header("Upgrade-Insecure-Requests", "1");

        let response = request.send().await?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(PubtrackError::RateLimited(60));
        }
        if !status.is_success() {
            return Err(PubtrackError::Api {
                code: status.as_u16() as i32,
                message: format!("HTTP error: {}", status),
            });
        }

        let html = response.text().await?;
        if is_captcha(&html) {
            return Err(PubtrackError::Captcha);
        }
        Ok(html)
    }
}

#[async_trait]
impl CitationSession for ScholarSession {
    async fn open_landing(&mut self) -> Result<()> {
        let landing = self.base_url.clone();
        let html = self.fetch(&landing).await?;
        self.form_action = Some(locate_query_form(&html, &landing)?);
        self.results_html.clear();
        Ok(())
    }

    fn clear_query(&mut self) {
        self.query.clear();
    }

    fn type_char(&mut self, ch: char) {
        self.query.push(ch);
    }

    async fn submit(&mut self) -> Result<()> {
        let mut url = self
            .form_action
            .clone()
            .ok_or_else(|| PubtrackError::Session("submit before landing page".to_string()))?;

        url.query_pairs_mut()
            .append_pair(QUERY_INPUT, &self.query)
            .append_pair("hl", "en");

        debug!(url = %url, "Submitting citation query");
        self.results_html = self.fetch(&url).await?;
        Ok(())
    }

    fn result_texts(&self) -> Vec<String> {
        link_texts(&self.results_html)
    }
}

impl Drop for ScholarSession {
    fn drop(&mut self) {
        self.form_action = None;
        self.results_html.clear();
        debug!("Citation session released");
    }
}

fn is_captcha(html: &str) -> bool {
    html.contains("Solving the above CAPTCHA")
        || html.contains("unusual traffic")
        || html.contains("gs_captcha")
}

/// Find the form holding the query input and resolve its action URL.
fn locate_query_form(html: &str, base: &Url) -> Result<Url> {
    let document = Html::parse_document(html);
    let form_selector = Selector::parse("form").map_err(|e| PubtrackError::Parse(e.to_string()))?;
    let input_selector = Selector::parse(&format!("input[name=\"{}\"]", QUERY_INPUT))
        .map_err(|e| PubtrackError::Parse(e.to_string()))?;

    let form = document
        .select(&form_selector)
        .find(|form| form.select(&input_selector).next().is_some())
        .ok_or_else(|| PubtrackError::Session("query input not found on landing page".to_string()))?;

    let action = form.value().attr("action").unwrap_or("/scholar");
    base.join(action)
        .map_err(|e| PubtrackError::Session(format!("Invalid form action '{}': {}", action, e)))
}

fn link_texts(html: &str) -> Vec<String> {
    if html.is_empty() {
        return Vec::new();
    }
    let document = Html::parse_document(html);
    let Ok(link_selector) = Selector::parse("a") else {
        return Vec::new();
    };
    document
        .select(&link_selector)
        .map(|a| a.text().collect::<String>().trim().to_string())
        .filter(|text| !text.is_empty())
        .collect()
}
