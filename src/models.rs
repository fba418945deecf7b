//! Core data types shared by the crawler, the merge engine and the stores.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Prefix of the canonical DOI resolver link
pub const DOI_RESOLVER: &str = "https://doi.org/";

/// Roster entry. Only the two crawl timestamps are written back by pubtrack.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Researcher {
    #[serde(default)]
    pub name: String,
    /// Stable researcher identifier (ORCID)
    #[serde(default)]
    pub orcid: String,
    #[serde(default)]
    pub department: String,
    /// Affiliation used for the name+affiliation search
    #[serde(default)]
    pub university: String,
    /// Last publication crawl, `YYYY-MM-DD` or empty
    #[serde(default)]
    pub last_pubmed_search: Option<String>,
    /// Last citation refresh, `YYYY-MM-DD` or empty
    #[serde(default)]
    pub last_scholar_citation_search: Option<String>,
}

/// One author of a document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Author {
    pub name: String,
    pub orcid: String,
    pub affiliation: String,
}

impl fmt::Display for Author {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.orcid.is_empty() {
            write!(f, "{} [{}]", self.name, self.affiliation)
        } else {
            write!(f, "{} (ORCID: {}) [{}]", self.name, self.orcid, self.affiliation)
        }
    }
}

/// Join authors into the persisted display string.
pub fn format_authors(authors: &[Author]) -> String {
    authors
        .iter()
        .map(|a| a.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// A publication as stored in a researcher's publication set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentRecord {
    pub researcher_name: String,
    pub researcher_orcid: String,
    pub title: String,
    pub journal: String,
    /// Bare DOI, may be empty
    pub doi: String,
    pub publication_date: Option<NaiveDate>,
    /// Authors display string (`"Name (ORCID: x) [affiliation]; ..."`)
    pub authors: String,
    pub citations: u64,
    /// PubMed accession the record was fetched with
    pub pmid: String,
}

impl DocumentRecord {
    /// DOI in resolver-link form, or empty when there is no DOI.
    pub fn doi_link(&self) -> String {
        if self.doi.is_empty() {
            String::new()
        } else {
            format!("{}{}", DOI_RESOLVER, self.doi)
        }
    }
}

/// Strip the resolver prefix (and whitespace) from a DOI or DOI link.
pub fn bare_doi(doi: &str) -> &str {
    let doi = doi.trim();
    doi.strip_prefix(DOI_RESOLVER)
        .or_else(|| doi.strip_prefix("http://doi.org/"))
        .or_else(|| doi.strip_prefix("doi:"))
        .unwrap_or(doi)
        .trim()
}

/// Which search form a discovery query uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryKind {
    ByIdentifier,
    ByNameAffiliation,
}

impl fmt::Display for QueryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryKind::ByIdentifier => write!(f, "identifier"),
            QueryKind::ByNameAffiliation => write!(f, "name+affiliation"),
        }
    }
}

/// One page request against the search interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlQuery {
    /// Full search term, already in query syntax
    pub term: String,
    pub kind: QueryKind,
    /// 1-based page cursor
    pub page: u32,
}

impl CrawlQuery {
    pub fn by_identifier(orcid: &str) -> Self {
        Self {
            term: format!("({}[Author - Identifier])", orcid.trim()),
            kind: QueryKind::ByIdentifier,
            page: 1,
        }
    }

    pub fn by_name_affiliation(name: &str, affiliation: &str) -> Self {
        Self {
            term: format!(
                "({}[Author]) AND ({}[Affiliation])",
                name.trim(),
                affiliation.trim()
            ),
            kind: QueryKind::ByNameAffiliation,
            page: 1,
        }
    }

    /// The same query one page further.
    pub fn next_page(&self) -> Self {
        Self {
            page: self.page + 1,
            ..self.clone()
        }
    }
}
