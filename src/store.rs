//! Persistence for publication sets and the researcher roster.
//!
//! Both are read and written whole: read everything, compute the new state,
//! replace everything. The CSV backends write to a temporary file and rename
//! it over the target so readers never see a half-written file.

use crate::error::{PubtrackError, Result};
use crate::models::{bare_doi, DocumentRecord, Researcher};
use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

/// Column order of a persisted publication set
pub const PUBLICATION_COLUMNS: &[&str] = &[
    "researcher_name",
    "researcher_orcid",
    "title",
    "journal",
    "doi",
    "publication_date",
    "pmid",
    "citations",
    "authors",
];

/// Column order of the roster
pub const ROSTER_COLUMNS: &[&str] = &[
    "name",
    "orcid",
    "department",
    "university",
    "last_pubmed_search",
    "last_scholar_citation_search",
];

/// Key-value store of publication sets, keyed by researcher identifier.
pub trait PublicationStore: Send + Sync {
    /// The stored set, or `None` if the researcher has never been persisted.
    fn get(&self, orcid: &str) -> Result<Option<Vec<DocumentRecord>>>;

    /// Replace the researcher's set.
    fn put(&self, orcid: &str, records: &[DocumentRecord]) -> Result<()>;
}

/// Whole-roster persistence.
pub trait RosterStore: Send + Sync {
    fn load(&self) -> Result<Vec<Researcher>>;
    fn save(&self, researchers: &[Researcher]) -> Result<()>;
}

/// One CSV row of a publication set
#[derive(Debug, Serialize, Deserialize)]
struct PublicationRow {
    #[serde(default)]
    researcher_name: String,
    #[serde(default)]
    researcher_orcid: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    journal: String,
    /// Resolver-link form
    #[serde(default)]
    doi: String,
    #[serde(default)]
    publication_date: String,
    #[serde(default)]
    pmid: String,
    #[serde(default, deserialize_with = "lenient_count")]
    citations: u64,
    #[serde(default)]
    authors: String,
}

impl From<&DocumentRecord> for PublicationRow {
    fn from(record: &DocumentRecord) -> Self {
        Self {
            researcher_name: record.researcher_name.clone(),
            researcher_orcid: record.researcher_orcid.clone(),
            title: record.title.clone(),
            journal: record.journal.clone(),
            doi: record.doi_link(),
            publication_date: record
                .publication_date
                .map(|d| d.format("%Y-%m-%d").to_string())
                .unwrap_or_default(),
            pmid: record.pmid.clone(),
            citations: record.citations,
            authors: record.authors.clone(),
        }
    }
}

impl From<PublicationRow> for DocumentRecord {
    fn from(row: PublicationRow) -> Self {
        Self {
            researcher_name: row.researcher_name,
            researcher_orcid: row.researcher_orcid,
            title: row.title,
            journal: row.journal,
            doi: bare_doi(&row.doi).to_string(),
            publication_date: parse_stored_date(&row.publication_date),
            authors: row.authors,
            citations: row.citations,
            pmid: row.pmid,
        }
    }
}

/// `"2021-09-04"` or `"2021-09-04 00:00:00"`
fn parse_stored_date(value: &str) -> Option<NaiveDate> {
    let date = value.trim().get(..10)?;
    NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()
}

/// Citation cells may be empty or float-formatted (`"12.0"`).
fn lenient_count<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<u64, D::Error> {
    let raw = String::deserialize(deserializer)?;
    Ok(parse_count(&raw))
}

fn parse_count(raw: &str) -> u64 {
    let raw = raw.trim();
    if raw.is_empty() {
        return 0;
    }
    if let Ok(count) = raw.parse::<u64>() {
        return count;
    }
    match raw.parse::<f64>() {
        Ok(value) if value.is_finite() && value >= 0.0 => value as u64,
        _ => {
            warn!(value = raw, "Unreadable citation count, using 0");
            0
        }
    }
}

/// Replace `path` with whatever `write` produces, via a temporary sibling file.
fn replace_file<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(&mut csv::Writer<std::fs::File>) -> Result<()>,
{
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| PubtrackError::Validation(format!("Invalid path {:?}", path)))?;
    let tmp_path = dir.join(format!(".{}.tmp", file_name));

    {
        let mut wtr = csv::WriterBuilder::new()
            .has_headers(false)
            .from_path(&tmp_path)?;
        write(&mut wtr)?;
        wtr.flush()?;
    }

    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Publication sets as `<dir>/<orcid>.csv`.
pub struct CsvPublicationStore {
    dir: PathBuf,
}

impl CsvPublicationStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, orcid: &str) -> Result<PathBuf> {
        let orcid = orcid.trim();
        let valid = !orcid.is_empty()
            && !orcid.starts_with('.')
            && orcid
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !valid {
            return Err(PubtrackError::Validation(format!(
                "Researcher identifier '{}' cannot name a file",
                orcid
            )));
        }
        Ok(self.dir.join(format!("{}.csv", orcid)))
    }
}

impl PublicationStore for CsvPublicationStore {
    fn get(&self, orcid: &str) -> Result<Option<Vec<DocumentRecord>>> {
        let path = self.path_for(orcid)?;
        if !path.exists() {
            return Ok(None);
        }

        let mut rdr = csv::ReaderBuilder::new().flexible(true).from_path(&path)?;
        let mut records = Vec::new();
        for row in rdr.deserialize::<PublicationRow>() {
            records.push(DocumentRecord::from(row?));
        }

        debug!(orcid = orcid, count = records.len(), "Loaded publication set");
        Ok(Some(records))
    }

    fn put(&self, orcid: &str, records: &[DocumentRecord]) -> Result<()> {
        let path = self.path_for(orcid)?;
        let rows: Vec<PublicationRow> = records.iter().map(PublicationRow::from).collect();
        replace_file(&path, |wtr| {
            wtr.write_record(PUBLICATION_COLUMNS)?;
            for row in &rows {
                wtr.serialize(row)?;
            }
            Ok(())
        })?;
        debug!(orcid = orcid, count = rows.len(), path = %path.display(), "Saved publication set");
        Ok(())
    }
}

/// The roster file as read: every column, every cell.
struct RosterTable {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl RosterTable {
    fn read(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self {
                headers: ROSTER_COLUMNS.iter().map(|c| c.to_string()).collect(),
                rows: Vec::new(),
            });
        }

        let mut rdr = csv::ReaderBuilder::new().flexible(true).from_path(path)?;
        let headers = rdr.headers()?.iter().map(String::from).collect();
        let mut rows = Vec::new();
        for record in rdr.records() {
            rows.push(record?.iter().map(String::from).collect());
        }
        Ok(Self { headers, rows })
    }

    /// Index of `name`, appending the column if the file lacks it.
    fn column(&mut self, name: &str) -> usize {
        if let Some(index) = self.headers.iter().position(|h| h.trim() == name) {
            return index;
        }
        self.headers.push(name.to_string());
        self.headers.len() - 1
    }

    /// Write the two timestamp columns back; other cells keep their file values.
    /// Researchers missing from the file are appended as new rows.
    fn apply(&mut self, researchers: &[Researcher]) {
        let name = self.column("name");
        let orcid = self.column("orcid");
        let department = self.column("department");
        let university = self.column("university");
        let last_pubmed = self.column("last_pubmed_search");
        let last_citations = self.column("last_scholar_citation_search");

        let width = self.headers.len();
        for row in &mut self.rows {
            row.resize(width, String::new());
        }

        for (i, researcher) in researchers.iter().enumerate() {
            let id = researcher.orcid.trim();
            let same_id = |row: &Vec<String>| row[orcid].trim() == id;

            let found = if self.rows.get(i).is_some_and(|row| same_id(row)) {
                Some(i)
            } else {
                self.rows.iter().position(same_id)
            };

            let index = match found {
                Some(index) => index,
                None => {
                    let mut row = vec![String::new(); width];
                    row[name] = researcher.name.clone();
                    row[orcid] = researcher.orcid.clone();
                    row[department] = researcher.department.clone();
                    row[university] = researcher.university.clone();
                    self.rows.push(row);
                    self.rows.len() - 1
                }
            };

            let row = &mut self.rows[index];
            row[last_pubmed] = researcher.last_pubmed_search.clone().unwrap_or_default();
            row[last_citations] = researcher
                .last_scholar_citation_search
                .clone()
                .unwrap_or_default();
        }
    }
}

/// Roster as a single CSV file.
///
/// Saving rewrites only the timestamp columns; any other column in the file
/// is carried through untouched.
pub struct CsvRosterStore {
    path: PathBuf,
}

impl CsvRosterStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl RosterStore for CsvRosterStore {
    fn load(&self) -> Result<Vec<Researcher>> {
        if !self.path.exists() {
            warn!(path = %self.path.display(), "Roster file not found, nothing to do");
            return Ok(Vec::new());
        }

        let mut rdr = csv::ReaderBuilder::new().flexible(true).from_path(&self.path)?;
        let mut researchers = Vec::new();
        for row in rdr.deserialize::<Researcher>() {
            researchers.push(row?);
        }
        Ok(researchers)
    }

    fn save(&self, researchers: &[Researcher]) -> Result<()> {
        let mut table = RosterTable::read(&self.path)?;
        table.apply(researchers);
        replace_file(&self.path, |wtr| {
            wtr.write_record(&table.headers)?;
            for row in &table.rows {
                wtr.write_record(row)?;
            }
            Ok(())
        })
    }
}

fn poisoned() -> PubtrackError {
    PubtrackError::Io(std::io::Error::other("store lock poisoned"))
}

/// In-memory publication store.
#[derive(Default)]
pub struct InMemoryPublicationStore {
    sets: Mutex<HashMap<String, Vec<DocumentRecord>>>,
    puts: Mutex<Vec<String>>,
}

impl InMemoryPublicationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Identifiers passed to `put`, in call order.
    pub fn put_log(&self) -> Vec<String> {
        self.puts.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

impl PublicationStore for InMemoryPublicationStore {
    fn get(&self, orcid: &str) -> Result<Option<Vec<DocumentRecord>>> {
        Ok(self.sets.lock().map_err(|_| poisoned())?.get(orcid).cloned())
    }

    fn put(&self, orcid: &str, records: &[DocumentRecord]) -> Result<()> {
        self.sets
            .lock()
            .map_err(|_| poisoned())?
            .insert(orcid.to_string(), records.to_vec());
        self.puts.lock().map_err(|_| poisoned())?.push(orcid.to_string());
        Ok(())
    }
}

/// In-memory roster.
#[derive(Default)]
pub struct InMemoryRosterStore {
    researchers: Mutex<Vec<Researcher>>,
}

impl InMemoryRosterStore {
    pub fn new(researchers: Vec<Researcher>) -> Self {
        Self {
            researchers: Mutex::new(researchers),
        }
    }
}

impl RosterStore for InMemoryRosterStore {
    fn load(&self) -> Result<Vec<Researcher>> {
        Ok(self.researchers.lock().map_err(|_| poisoned())?.clone())
    }

    fn save(&self, researchers: &[Researcher]) -> Result<()> {
        *self.researchers.lock().map_err(|_| poisoned())? = researchers.to_vec();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample(title: &str, doi: &str, citations: u64) -> DocumentRecord {
        DocumentRecord {
            researcher_name: "Jane Smith".to_string(),
            researcher_orcid: "0000-0001-2345-6789".to_string(),
            title: title.to_string(),
            journal: "Nat Commun".to_string(),
            doi: doi.to_string(),
            publication_date: NaiveDate::from_ymd_opt(2021, 9, 4),
            authors: "Smith, Jane [Example University]; Doe, John []".to_string(),
            citations,
            pmid: "33334444".to_string(),
        }
    }

    #[test]
    fn test_publication_store_roundtrip() -> Result<()> {
        let dir = TempDir::new()?;
        let store = CsvPublicationStore::new(dir.path().join("publications"));
        let orcid = "0000-0001-2345-6789";

        assert!(store.get(orcid)?.is_none());

        let records = vec![sample("A, with comma", "10.1038/abc", 12), sample("B", "", 0)];
        store.put(orcid, &records)?;

        let content = std::fs::read_to_string(dir.path().join("publications").join(format!("{}.csv", orcid)))?;
        assert!(content.starts_with(&PUBLICATION_COLUMNS.join(",")));
        assert!(content.contains("https://doi.org/10.1038/abc"));

        let loaded = store.get(orcid)?.unwrap_or_default();
        assert_eq!(loaded, records);
        Ok(())
    }

    #[test]
    fn test_empty_set_is_header_only() -> Result<()> {
        let dir = TempDir::new()?;
        let store = CsvPublicationStore::new(dir.path());
        store.put("R1", &[sample("A", "10.1/a", 1)])?;
        store.put("R1", &[])?;

        let content = std::fs::read_to_string(dir.path().join("R1.csv"))?;
        assert_eq!(content.trim(), PUBLICATION_COLUMNS.join(","));
        assert_eq!(store.get("R1")?, Some(Vec::new()));
        Ok(())
    }

    #[test]
    fn test_reads_legacy_files() -> Result<()> {
        let dir = TempDir::new()?;
        std::fs::write(
            dir.path().join("R1.csv"),
            "researcher_name,researcher_orcid,title,journal,doi,publication_date,pmid,citations,authors\n\
             Jane,R1,Old paper,J,https://doi.org/10.1/x,2020-01-02 00:00:00,111,7.0,Smith\n\
             Jane,R1,No count,J,,,222,,Smith\n",
        )?;
        let store = CsvPublicationStore::new(dir.path());
        let loaded = store.get("R1")?.unwrap_or_default();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].doi, "10.1/x");
        assert_eq!(loaded[0].citations, 7);
        assert_eq!(loaded[0].publication_date, NaiveDate::from_ymd_opt(2020, 1, 2));
        assert_eq!(loaded[1].citations, 0);
        assert!(loaded[1].publication_date.is_none());
        Ok(())
    }

    #[test]
    fn test_rejects_path_like_identifiers() {
        let store = CsvPublicationStore::new("/tmp/unused");
        assert!(store.get("../etc/passwd").is_err());
        assert!(store.put("", &[]).is_err());
    }

    #[test]
    fn test_roster_roundtrip_and_missing_column() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("researchers.csv");
        std::fs::write(
            &path,
            "name,orcid,department,university,last_pubmed_search\n\
             Jane Smith,R1,Biology,Example University,2024-05-01\n\
             John Doe,R2,Chemistry,Example University,\n",
        )?;

        let store = CsvRosterStore::new(&path);
        let mut roster = store.load()?;
        assert_eq!(roster.len(), 2);
        assert_eq!(roster[0].last_pubmed_search.as_deref(), Some("2024-05-01"));
        assert!(roster[1].last_pubmed_search.is_none());
        assert!(roster[0].last_scholar_citation_search.is_none());

        roster[1].last_scholar_citation_search = Some("2024-06-30".to_string());
        store.save(&roster)?;
        assert_eq!(store.load()?, roster);

        let content = std::fs::read_to_string(&path)?;
        assert!(content.starts_with(&ROSTER_COLUMNS.join(",")));
        Ok(())
    }

    #[test]
    fn test_roster_save_keeps_unknown_columns() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("researchers.csv");
        std::fs::write(
            &path,
            "name,orcid,email,department,university,last_pubmed_search\n\
             Jane Smith,R1,jane@x.org,Biology,Example University,\n\
             John Doe,R2,john@x.org,Chemistry,Example University,2024-01-01\n",
        )?;

        let store = CsvRosterStore::new(&path);
        let mut roster = store.load()?;
        roster[0].last_pubmed_search = Some("2024-06-30".to_string());
        roster[0].department = "Renamed".to_string();
        roster[1].last_scholar_citation_search = Some("2024-06-29".to_string());
        store.save(&roster)?;

        let content = std::fs::read_to_string(&path)?;
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(
            lines[0],
            "name,orcid,email,department,university,last_pubmed_search,last_scholar_citation_search"
        );
        assert_eq!(lines[1], "Jane Smith,R1,jane@x.org,Biology,Example University,2024-06-30,");
        assert_eq!(lines[2], "John Doe,R2,john@x.org,Chemistry,Example University,2024-01-01,2024-06-29");

        let reloaded = store.load()?;
        assert_eq!(reloaded[0].department, "Biology");
        assert_eq!(reloaded[1].last_scholar_citation_search.as_deref(), Some("2024-06-29"));
        Ok(())
    }

    #[test]
    fn test_roster_save_creates_file() -> Result<()> {
        let dir = TempDir::new()?;
        let store = CsvRosterStore::new(dir.path().join("new").join("researchers.csv"));
        let mut jane = Researcher {
            name: "Jane Smith".to_string(),
            orcid: "R1".to_string(),
            ..Default::default()
        };
        jane.last_pubmed_search = Some("2024-06-30".to_string());

        store.save(std::slice::from_ref(&jane))?;
        assert_eq!(store.load()?, vec![jane]);
        Ok(())
    }

    #[test]
    fn test_missing_roster_is_empty() -> Result<()> {
        let dir = TempDir::new()?;
        let store = CsvRosterStore::new(dir.path().join("nope.csv"));
        assert!(store.load()?.is_empty());
        Ok(())
    }

    #[test]
    fn test_parse_count() {
        assert_eq!(parse_count(""), 0);
        assert_eq!(parse_count("15"), 15);
        assert_eq!(parse_count("15.0"), 15);
        assert_eq!(parse_count("-3"), 0);
        assert_eq!(parse_count("many"), 0);
    }

    #[test]
    fn test_in_memory_store() -> Result<()> {
        let store = InMemoryPublicationStore::new();
        assert!(store.get("R1")?.is_none());
        store.put("R1", &[])?;
        assert_eq!(store.get("R1")?, Some(Vec::new()));
        assert_eq!(store.put_log(), vec!["R1".to_string()]);
        Ok(())
    }
}
