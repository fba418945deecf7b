//! Parser for the MEDLINE tagged-text record format served by PubMed
//! (`?format=pubmed`).
//!
//! Every line is `TAG - value` with the tag left-aligned in four columns;
//! lines indented by six spaces continue the previous field. The parser is
//! total: any input, including an empty string, yields a record whose missing
//! fields are empty.

use crate::models::{format_authors, Author, DocumentRecord};
use chrono::NaiveDate;

/// Continuation lines are indented by this many spaces
const CONTINUATION_INDENT: &str = "      ";

/// A single logical field after continuation lines have been folded in.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Field {
    tag: String,
    value: String,
}

/// Parse one raw record into a [`DocumentRecord`].
///
/// `researcher_name`, `researcher_orcid` and `pmid` come from the caller;
/// everything else is extracted from `text`.
pub fn parse_record(
    text: &str,
    researcher_name: &str,
    researcher_orcid: &str,
    pmid: &str,
) -> DocumentRecord {
    let fields = fold_fields(text);

    DocumentRecord {
        researcher_name: researcher_name.to_string(),
        researcher_orcid: researcher_orcid.to_string(),
        title: first_value(&fields, "TI").unwrap_or_default(),
        journal: first_value(&fields, "TA").unwrap_or_default(),
        doi: extract_doi(&fields).unwrap_or_default(),
        publication_date: extract_publication_date(&fields),
        authors: format_authors(&collect_authors(&fields)),
        citations: 0,
        pmid: pmid.to_string(),
    }
}

/// Split raw text into tagged fields, joining continuation lines with a space.
fn fold_fields(text: &str) -> Vec<Field> {
    let mut fields: Vec<Field> = Vec::new();

    for line in text.lines() {
        if line.starts_with(CONTINUATION_INDENT) {
            if let Some(last) = fields.last_mut() {
                let more = line.trim();
                if !more.is_empty() {
                    if !last.value.is_empty() {
                        last.value.push(' ');
                    }
                    last.value.push_str(more);
                }
            }
            continue;
        }

        if let Some(field) = split_tag_line(line) {
            fields.push(field);
        }
    }

    fields
}

/// `"FAU - Smith, Jane"` -> `Field { tag: "FAU", value: "Smith, Jane" }`
fn split_tag_line(line: &str) -> Option<Field> {
    let tag = line.get(..4)?.trim_end();
    let rest = line.get(4..)?;
    let value = rest.strip_prefix('-')?;

    if tag.is_empty() || !tag.chars().all(|c| c.is_ascii_uppercase()) {
        return None;
    }

    Some(Field {
        tag: tag.to_string(),
        value: value.trim().to_string(),
    })
}

fn first_value(fields: &[Field], tag: &str) -> Option<String> {
    fields
        .iter()
        .find(|f| f.tag == tag && !f.value.is_empty())
        .map(|f| f.value.clone())
}

/// Author blocks: `FAU` opens an author, `AUID` and `AD` lines attach to the
/// pending one. The pending author is flushed on the next `FAU` and at the end.
fn collect_authors(fields: &[Field]) -> Vec<Author> {
    let (mut authors, pending) = fields.iter().fold(
        (Vec::new(), None::<Author>),
        |(mut authors, pending), field| match (field.tag.as_str(), pending) {
            ("FAU", pending) => {
                authors.extend(pending);
                let next = Author {
                    name: field.value.clone(),
                    ..Default::default()
                };
                (authors, Some(next))
            }
            ("AUID", Some(mut current)) => {
                if let Some(orcid) = field.value.strip_prefix("ORCID:") {
                    current.orcid = orcid.trim().to_string();
                }
                (authors, Some(current))
            }
            ("AD", Some(mut current)) => {
                if !current.affiliation.is_empty() {
                    current.affiliation.push(' ');
                }
                current.affiliation.push_str(&field.value);
                (authors, Some(current))
            }
            (_, pending) => (authors, pending),
        },
    );
    authors.extend(pending);
    authors
}

/// DOI from `LID - 10.xxx [doi]`, falling back to `AID - 10.xxx [doi]`.
fn extract_doi(fields: &[Field]) -> Option<String> {
    ["LID", "AID"].iter().find_map(|tag| {
        fields
            .iter()
            .filter(|f| f.tag == *tag)
            .find_map(|f| doi_from_value(&f.value))
    })
}

fn doi_from_value(value: &str) -> Option<String> {
    let (token, marker) = value.split_once(char::is_whitespace)?;
    if marker.trim() != "[doi]" || !token.starts_with("10.") {
        return None;
    }
    Some(token.to_string())
}

/// Prefer the `[pmc-release]` history date, then `[pubmed]`.
fn extract_publication_date(fields: &[Field]) -> Option<NaiveDate> {
    ["[pmc-release]", "[pubmed]"].iter().find_map(|status| {
        fields
            .iter()
            .filter(|f| f.tag == "PHST")
            .find_map(|f| history_date(&f.value, status))
    })
}

/// `"2021/03/04 00:00 [pubmed]"` -> 2021-03-04 when the status matches.
fn history_date(value: &str, status: &str) -> Option<NaiveDate> {
    let mut parts = value.split_whitespace();
    let date = parts.next()?;
    let _time = parts.next()?;
    if parts.next()? != status {
        return None;
    }
    NaiveDate::parse_from_str(date, "%Y/%m/%d").ok()
}
