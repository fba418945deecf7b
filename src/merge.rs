//! Deduplication and merge of a researcher's publication set.
//!
//! Fetched records are keyed by DOI when they have one and by normalized title
//! otherwise. Citation counts carried over from the previously stored set are
//! never lowered, and the final set is ordered by citation count, descending.

use crate::models::DocumentRecord;
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

/// Identity of a record within one researcher's set.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MergeKey {
    Doi(String),
    Title(String),
}

impl MergeKey {
    /// `None` when the record has neither a DOI nor a title.
    pub fn of(record: &DocumentRecord) -> Option<Self> {
        let doi = doi_key(&record.doi);
        if !doi.is_empty() {
            return Some(MergeKey::Doi(doi));
        }
        let title = normalize_title(&record.title);
        if !title.is_empty() {
            return Some(MergeKey::Title(title));
        }
        None
    }
}

/// DOIs compare case-insensitively.
fn doi_key(doi: &str) -> String {
    doi.trim().to_lowercase()
}

/// Trim, lower-case and collapse whitespace runs; punctuation is kept.
pub fn normalize_title(title: &str) -> String {
    title
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Union discovery sequences, keeping first-seen order.
pub fn union_identifiers(sequences: &[&[String]]) -> Vec<String> {
    let mut seen = HashSet::new();
    sequences
        .iter()
        .flat_map(|seq| seq.iter())
        .map(|id| id.trim())
        .filter(|id| !id.is_empty())
        .filter(|id| seen.insert(id.to_string()))
        .map(String::from)
        .collect()
}

/// Counters reported by [`dedup_records`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DedupStats {
    pub kept: usize,
    pub duplicates: usize,
    pub unaddressable: usize,
}

/// First record under each key wins; later ones are dropped whole.
/// Records without DOI and title are dropped.
pub fn dedup_records(records: Vec<DocumentRecord>) -> (Vec<DocumentRecord>, DedupStats) {
    let mut seen = HashSet::new();
    let mut stats = DedupStats::default();
    let mut kept = Vec::with_capacity(records.len());

    for record in records {
        let Some(key) = MergeKey::of(&record) else {
            warn!(pmid = %record.pmid, "Dropping record with neither DOI nor title");
            stats.unaddressable += 1;
            continue;
        };

        if seen.insert(key.clone()) {
            kept.push(record);
        } else {
            debug!(pmid = %record.pmid, key = ?key, "Duplicate record discarded");
            stats.duplicates += 1;
        }
    }

    stats.kept = kept.len();
    (kept, stats)
}

/// Raise each record's count to the highest count previously stored for the
/// same DOI. Records without a DOI keep their own count.
pub fn carry_citations(records: &mut [DocumentRecord], previous: &[DocumentRecord]) {
    let mut history: HashMap<String, u64> = HashMap::new();
    for old in previous {
        let key = doi_key(&old.doi);
        if key.is_empty() {
            continue;
        }
        let entry = history.entry(key).or_insert(0);
        *entry = (*entry).max(old.citations);
    }

    for record in records.iter_mut() {
        let key = doi_key(&record.doi);
        if key.is_empty() {
            continue;
        }
        if let Some(&old) = history.get(&key) {
            record.citations = record.citations.max(old);
        }
    }
}

/// Stable sort by citation count, descending.
pub fn sort_by_citations(records: &mut [DocumentRecord]) {
    records.sort_by(|a, b| b.citations.cmp(&a.citations));
}

/// Build the set to persist from freshly fetched records and the prior set.
pub fn merge_publications(
    fetched: Vec<DocumentRecord>,
    previous: Option<&[DocumentRecord]>,
) -> (Vec<DocumentRecord>, DedupStats) {
    let (mut records, stats) = dedup_records(fetched);
    if let Some(previous) = previous {
        carry_citations(&mut records, previous);
    }
    sort_by_citations(&mut records);
    (records, stats)
}

/// The new count to store after a probe, if it improves on the stored one.
pub fn improved_count(stored: u64, probed: Option<u64>) -> Option<u64> {
    probed.filter(|&count| count > stored)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(pmid: &str, doi: &str, title: &str, citations: u64) -> DocumentRecord {
        DocumentRecord {
            pmid: pmid.to_string(),
            doi: doi.to_string(),
            title: title.to_string(),
            citations,
            ..Default::default()
        }
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_union_identifiers() {
        let by_id = strings(&["10.1/a", "10.1/b"]);
        let by_name = strings(&["10.1/b", "10.1/c"]);
        assert_eq!(
            union_identifiers(&[by_id.as_slice(), by_name.as_slice()]),
            strings(&["10.1/a", "10.1/b", "10.1/c"])
        );
    }

    #[test]
    fn test_title_fallback_dedup() {
        let (kept, stats) = dedup_records(vec![
            record("1", "", "Foo Bar", 0),
            record("2", "", "  foo   bar ", 0),
            record("3", "", "Foo: Bar", 0),
        ]);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].pmid, "1");
        assert_eq!(kept[1].pmid, "3");
        assert_eq!(stats.duplicates, 1);
    }

    #[test]
    fn test_doi_dedup_first_wins() {
        let (kept, stats) = dedup_records(vec![
            record("1", "10.1/A", "First", 0),
            record("2", "10.1/a", "Second", 7),
        ]);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].title, "First");
        assert_eq!(kept[0].citations, 0);
        assert_eq!(stats.duplicates, 1);
    }

    #[test]
    fn test_doi_and_title_keys_do_not_collide() {
        let (kept, _) = dedup_records(vec![
            record("1", "10.1/a", "Same title", 0),
            record("2", "", "Same title", 0),
        ]);
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn test_unaddressable_dropped() {
        let (kept, stats) = dedup_records(vec![record("1", "", "   ", 0), record("2", "", "T", 0)]);
        assert_eq!(kept.len(), 1);
        assert_eq!(stats.unaddressable, 1);
        assert_eq!(stats.kept, 1);
    }

    #[test]
    fn test_carry_citations_never_lowers() {
        let previous = vec![
            record("1", "10.1/a", "A", 12),
            record("2", "10.1/b", "B", 3),
            record("3", "", "C", 40),
        ];
        let mut fresh = vec![
            record("1", "10.1/A", "A", 0),
            record("2", "10.1/b", "B", 5),
            record("3", "", "C", 0),
        ];
        carry_citations(&mut fresh, &previous);
        assert_eq!(fresh[0].citations, 12);
        assert_eq!(fresh[1].citations, 5);
        // no DOI, no history match
        assert_eq!(fresh[2].citations, 0);
    }

    #[test]
    fn test_sort_is_stable_descending() {
        let mut records = vec![
            record("a", "10.1/a", "A", 5),
            record("b", "10.1/b", "B", 10),
            record("c", "10.1/c", "C", 10),
            record("d", "10.1/d", "D", 0),
        ];
        sort_by_citations(&mut records);
        let order: Vec<_> = records.iter().map(|r| r.pmid.as_str()).collect();
        assert_eq!(order, vec!["b", "c", "a", "d"]);
    }

    #[test]
    fn test_merge_is_idempotent() {
        let fetched = vec![
            record("1", "10.1/a", "A", 0),
            record("2", "", "B", 0),
            record("3", "10.1/c", "C", 0),
        ];
        let (first, _) = merge_publications(fetched.clone(), None);

        let mut stored = first.clone();
        stored[0].citations = 9;
        sort_by_citations(&mut stored);

        let (second, _) = merge_publications(fetched.clone(), Some(&stored));
        let (third, _) = merge_publications(fetched, Some(&second));
        assert_eq!(second, third);
        assert_eq!(second[0].citations, 9);
    }

    #[test]
    fn test_merge_empty() {
        let (merged, stats) = merge_publications(Vec::new(), Some(&[record("1", "10.1/a", "A", 3)]));
        assert!(merged.is_empty());
        assert_eq!(stats, DedupStats::default());
    }

    #[test]
    fn test_improved_count() {
        assert_eq!(improved_count(5, Some(8)), Some(8));
        assert_eq!(improved_count(5, Some(5)), None);
        assert_eq!(improved_count(5, Some(2)), None);
        assert_eq!(improved_count(5, None), None);
        assert_eq!(improved_count(0, Some(0)), None);
    }
}
