//! Publication crawl and citation refresh runs.
//!
//! Both runs iterate the roster, gate each researcher on its own timestamp,
//! and never let one researcher's failure stop the rest, including a failed
//! roster write. The roster is written back after every researcher whose
//! timestamp advanced.

use crate::config::{pause, Config, PacingConfig};
use crate::error::Result;
use crate::merge::{improved_count, merge_publications, sort_by_citations, union_identifiers};
use crate::models::{CrawlQuery, DocumentRecord, Researcher};
use crate::pubmed::{discover_identifiers, fetch_document, RecordSource, SearchSource};
use crate::scholar::{CitationProber, CitationSession, ProbeOutcome};
use crate::staleness::{format_date, is_due};
use crate::store::{PublicationStore, RosterStore};
use chrono::NaiveDate;
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::fmt;
use tracing::{debug, error, info, warn};

/// Counters for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Researchers whose timestamp advanced
    pub processed: usize,
    /// Researchers not due, or with nothing to do
    pub skipped: usize,
    /// Researchers left for the next run after an error
    pub failed: usize,
    /// Documents written (crawl) or probed (citations)
    pub documents: usize,
    /// Stored counts raised by a probe
    pub improved: usize,
    /// Failed fetches or soft probe failures
    pub document_failures: usize,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} processed, {} skipped, {} failed; {} documents, {} improved, {} document failures",
            self.processed,
            self.skipped,
            self.failed,
            self.documents,
            self.improved,
            self.document_failures
        )
    }
}

/// Researchers to visit: one entry per identifier, optionally gated.
fn select_due<'a>(
    roster: &'a [Researcher],
    last: impl Fn(&Researcher) -> Option<&str>,
    today: NaiveDate,
    window_days: i64,
    force: bool,
    summary: &mut RunSummary,
) -> Vec<&'a Researcher> {
    let mut seen = HashSet::new();
    let mut due = Vec::new();

    for researcher in roster {
        let orcid = researcher.orcid.trim();
        if orcid.is_empty() {
            warn!(name = %researcher.name, "Roster entry without identifier, skipping");
            summary.skipped += 1;
            continue;
        }
        if !seen.insert(orcid.to_string()) {
            warn!(researcher = %orcid, "Duplicate roster entry, skipping");
            summary.skipped += 1;
            continue;
        }
        if !force && !is_due(last(researcher), today, window_days) {
            debug!(researcher = %orcid, "Not due");
            summary.skipped += 1;
            continue;
        }
        due.push(researcher);
    }

    due
}

/// Apply `update` to the researcher's roster entries and write the roster.
///
/// A failed write restores the entries and returns `false`; the researcher is
/// then picked up again on the next run.
fn commit_stamp(
    roster_store: &dyn RosterStore,
    roster: &mut [Researcher],
    orcid: &str,
    update: impl Fn(&mut Researcher),
) -> bool {
    let previous: Vec<(usize, Researcher)> = roster
        .iter()
        .enumerate()
        .filter(|(_, r)| r.orcid.trim() == orcid)
        .map(|(i, r)| (i, r.clone()))
        .collect();
    for (i, _) in &previous {
        update(&mut roster[*i]);
    }

    match roster_store.save(roster) {
        Ok(()) => true,
        Err(e) => {
            error!(researcher = %orcid, error = %e, "Roster write failed, retrying next run");
            for (i, entry) in previous {
                roster[i] = entry;
            }
            false
        }
    }
}

/// What one researcher's crawl produced.
#[derive(Debug, PartialEq, Eq)]
enum CrawlReport {
    /// Set persisted with this many records
    Saved { records: usize, fetch_failures: usize },
    /// Identifiers were found but no record could be fetched
    NothingFetched { fetch_failures: usize },
}

async fn crawl_researcher<S, R>(
    researcher: &Researcher,
    search: &S,
    records: &R,
    store: &dyn PublicationStore,
    pacing: &PacingConfig,
) -> Result<CrawlReport>
where
    S: SearchSource + ?Sized,
    R: RecordSource + ?Sized,
{
    let orcid = researcher.orcid.trim();

    let by_identifier = discover_identifiers(search, CrawlQuery::by_identifier(orcid), pacing).await?;

    let by_name = if researcher.name.trim().is_empty() || researcher.university.trim().is_empty() {
        debug!(researcher = %orcid, "No name or affiliation, skipping name search");
        Vec::new()
    } else {
        pause(pacing.inter_request_delay()).await;
        let query = CrawlQuery::by_name_affiliation(&researcher.name, &researcher.university);
        discover_identifiers(search, query, pacing).await?
    };

    let pmids = union_identifiers(&[by_identifier.as_slice(), by_name.as_slice()]);
    info!(
        researcher = %orcid,
        by_identifier = by_identifier.len(),
        by_name = by_name.len(),
        unique = pmids.len(),
        "Discovered publications"
    );

    let mut fetched: Vec<DocumentRecord> = Vec::with_capacity(pmids.len());
    let mut fetch_failures = 0;
    for pmid in &pmids {
        pause(pacing.inter_request_delay()).await;
        match fetch_document(records, researcher, pmid).await {
            Ok(record) => fetched.push(record),
            Err(e) => {
                warn!(researcher = %orcid, pmid = %pmid, error = %e, "Fetch failed, skipping document");
                fetch_failures += 1;
            }
        }
    }

    if !pmids.is_empty() && fetched.is_empty() {
        return Ok(CrawlReport::NothingFetched { fetch_failures });
    }

    let previous = store.get(orcid)?;
    let (merged, stats) = merge_publications(fetched, previous.as_deref());
    store.put(orcid, &merged)?;

    info!(
        researcher = %orcid,
        saved = merged.len(),
        duplicates = stats.duplicates,
        dropped = stats.unaddressable,
        "Publication set saved"
    );

    Ok(CrawlReport::Saved {
        records: merged.len(),
        fetch_failures,
    })
}

/// Discover, fetch and merge publications for every due researcher.
///
/// Up to `config.publication_workers` researchers are crawled at once. A
/// researcher's publication timestamp advances only when its set was saved.
pub async fn run_publication_crawl<S, R>(
    roster_store: &dyn RosterStore,
    publications: &dyn PublicationStore,
    search: &S,
    records: &R,
    config: &Config,
    today: NaiveDate,
    force: bool,
) -> Result<RunSummary>
where
    S: SearchSource + ?Sized,
    R: RecordSource + ?Sized,
{
    let mut roster = roster_store.load()?;
    let mut summary = RunSummary::default();

    let due: Vec<Researcher> = select_due(
        &roster,
        |r| r.last_pubmed_search.as_deref(),
        today,
        config.staleness_days,
        force,
        &mut summary,
    )
    .into_iter()
    .cloned()
    .collect();

    info!(due = due.len(), workers = config.publication_workers, "Starting publication crawl");

    let pacing = &config.pacing;
    let mut outcomes = stream::iter(due)
        .map(|researcher| async move {
            let report = crawl_researcher(&researcher, search, records, publications, pacing).await;
            (researcher, report)
        })
        .buffer_unordered(config.publication_workers.max(1));

    let today_str = format_date(today);
    while let Some((researcher, report)) = outcomes.next().await {
        let orcid = researcher.orcid.trim();
        match report {
            Ok(CrawlReport::Saved {
                records: saved,
                fetch_failures,
            }) => {
                summary.documents += saved;
                summary.document_failures += fetch_failures;
                let stamped = commit_stamp(roster_store, &mut roster, orcid, |r| {
                    r.last_pubmed_search = Some(today_str.clone())
                });
                if stamped {
                    summary.processed += 1;
                } else {
                    summary.failed += 1;
                }
            }
            Ok(CrawlReport::NothingFetched { fetch_failures }) => {
                warn!(
                    researcher = %orcid,
                    failures = fetch_failures,
                    "Every fetch failed, keeping previous set and retrying next run"
                );
                summary.failed += 1;
                summary.document_failures += fetch_failures;
            }
            Err(e) if e.is_transport() => {
                warn!(researcher = %orcid, error = %e, "Search unavailable, retrying next run");
                summary.failed += 1;
            }
            Err(e) => {
                error!(researcher = %orcid, error = %e, "Publication crawl failed");
                summary.failed += 1;
            }
        }
    }

    info!(summary = %summary, "Publication crawl finished");
    Ok(summary)
}

/// Position of the record carrying `doi`, compared case-insensitively.
fn position_of(records: &[DocumentRecord], doi: &str) -> Option<usize> {
    records
        .iter()
        .position(|r| r.doi.trim().eq_ignore_ascii_case(doi))
}

/// Probe every DOI of one researcher's set. Returns whether anything was probed.
async fn refresh_researcher<S: CitationSession>(
    orcid: &str,
    mut records: Vec<DocumentRecord>,
    store: &dyn PublicationStore,
    prober: &mut CitationProber<S>,
    summary: &mut RunSummary,
) -> Result<bool> {
    let mut seen = HashSet::new();
    let dois: Vec<String> = records
        .iter()
        .map(|r| r.doi.trim().to_string())
        .filter(|doi| !doi.is_empty())
        .filter(|doi| seen.insert(doi.to_lowercase()))
        .collect();

    if dois.is_empty() {
        info!(researcher = %orcid, "No DOIs to probe");
        return Ok(false);
    }

    for doi in &dois {
        let outcome = prober.probe(doi).await;
        summary.documents += 1;
        if let ProbeOutcome::SoftFailure(reason) = &outcome {
            debug!(researcher = %orcid, doi = %doi, reason = %reason, "Probe gave no answer");
            summary.document_failures += 1;
        }

        let Some(index) = position_of(&records, doi) else {
            continue;
        };
        if let Some(count) = improved_count(records[index].citations, outcome.count()) {
            info!(
                researcher = %orcid,
                doi = %doi,
                old = records[index].citations,
                new = count,
                "Citation count improved"
            );
            records[index].citations = count;
            sort_by_citations(&mut records);
            store.put(orcid, &records)?;
            summary.improved += 1;
        }
    }

    Ok(true)
}

/// Refresh citation counts for every due researcher over one session.
///
/// Counts are only ever raised. A researcher's citation timestamp advances
/// only if at least one of its documents was probed.
pub async fn run_citation_refresh<S: CitationSession>(
    roster_store: &dyn RosterStore,
    publications: &dyn PublicationStore,
    prober: &mut CitationProber<S>,
    config: &Config,
    today: NaiveDate,
    force: bool,
) -> Result<RunSummary> {
    let mut roster = roster_store.load()?;
    let mut summary = RunSummary::default();

    let due: Vec<Researcher> = select_due(
        &roster,
        |r| r.last_scholar_citation_search.as_deref(),
        today,
        config.staleness_days,
        force,
        &mut summary,
    )
    .into_iter()
    .cloned()
    .collect();

    info!(due = due.len(), "Starting citation refresh");

    let today_str = format_date(today);
    for researcher in &due {
        let orcid = researcher.orcid.trim();

        let records = match publications.get(orcid) {
            Ok(Some(records)) if !records.is_empty() => records,
            Ok(_) => {
                info!(researcher = %orcid, "No stored publications, skipping");
                summary.skipped += 1;
                continue;
            }
            Err(e) => {
                error!(researcher = %orcid, error = %e, "Cannot read publication set");
                summary.failed += 1;
                continue;
            }
        };

        match refresh_researcher(orcid, records, publications, prober, &mut summary).await {
            Ok(true) => {
                let stamped = commit_stamp(roster_store, &mut roster, orcid, |r| {
                    r.last_scholar_citation_search = Some(today_str.clone())
                });
                if stamped {
                    summary.processed += 1;
                } else {
                    summary.failed += 1;
                }
            }
            Ok(false) => summary.skipped += 1,
            Err(e) => {
                error!(researcher = %orcid, error = %e, "Citation refresh failed");
                summary.failed += 1;
            }
        }
    }

    info!(summary = %summary, "Citation refresh finished");
    Ok(summary)
}
