//! # pubtrack
//!
//! Researcher publication and citation tracker.
//!
//! ## Modules
//!
//! - [`pubmed`] - PubMed discovery (by identifier, by name+affiliation) and record fetching
//! - [`medline`] - MEDLINE tagged-text record parser
//! - [`merge`] - Deduplication and merge of publication sets
//! - [`staleness`] - 30-day re-crawl gate
//! - [`scholar`] - Google Scholar citation probing
//! - [`pipeline`] - Publication crawl and citation refresh runs
//! - [`store`] - CSV and in-memory persistence
//! - [`cookies`] - Cookie persistence
//! - [`config`] - Runtime configuration
//! - [`error`] - Custom error types
//!
//! ## Usage
//!
//! ```rust,no_run
//! use pubtrack::{config::Config, pipeline, pubmed::PubMedClient, store};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load(None)?;
//!     let client = PubMedClient::new(&config)?;
//!     let roster = store::CsvRosterStore::new(config.roster_path());
//!     let publications = store::CsvPublicationStore::new(config.publications_dir());
//!     let today = chrono::Local::now().date_naive();
//!
//!     let summary = pipeline::run_publication_crawl(
//!         &roster, &publications, &client, &client, &config, today, false,
//!     )
//!     .await?;
//!     println!("{}", summary);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod cookies;
pub mod error;
pub mod medline;
pub mod merge;
pub mod models;
pub mod pipeline;
pub mod pubmed;
pub mod scholar;
pub mod staleness;
pub mod store;

pub use error::{PubtrackError, Result};
