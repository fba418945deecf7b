//! Runtime configuration.
//!
//! Every field has a default, so a missing config file or a partial JSON
//! document both work. Pacing delays live in [`PacingConfig`] and are passed
//! explicitly into the discovery crawler and the citation prober.

use crate::error::{PubtrackError, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Default PubMed web URL
pub const DEFAULT_PUBMED_URL: &str = "https://pubmed.ncbi.nlm.nih.gov";

/// Default Google Scholar URL
pub const DEFAULT_SCHOLAR_URL: &str = "https://scholar.google.com";

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root of the roster and publication files
    pub data_dir: PathBuf,
    /// Days after which a crawl or citation refresh is due again
    pub staleness_days: i64,
    /// PubMed base URL (mirrors allowed)
    pub pubmed_url: String,
    /// Citation service base URL
    pub scholar_url: String,
    /// Proxy URL (e.g., "http://127.0.0.1:7890")
    pub proxy: Option<String>,
    /// Per-request transport timeout for PubMed
    pub request_timeout_secs: u64,
    /// Bound on one whole citation probe
    pub probe_timeout_secs: u64,
    /// Retries on HTTP 429 before giving up
    pub max_retries: u32,
    /// Researchers crawled concurrently (each on its own researcher file)
    pub publication_workers: usize,
    /// Cookie file seeding the citation session
    pub cookie_file: Option<PathBuf>,
    /// Human-paced interaction delays
    pub pacing: PacingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            staleness_days: 30,
            pubmed_url: DEFAULT_PUBMED_URL.to_string(),
            scholar_url: DEFAULT_SCHOLAR_URL.to_string(),
            proxy: None,
            request_timeout_secs: 30,
            probe_timeout_secs: 60,
            max_retries: 3,
            publication_workers: 1,
            cookie_file: None,
            pacing: PacingConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a JSON file, or defaults when `path` is `None`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path).map_err(|e| {
                    PubtrackError::Config(format!("Cannot read {}: {}", path.display(), e))
                })?;
                let config: Config = serde_json::from_str(&content)?;
                info!(path = %path.display(), "Loaded configuration");
                config
            }
            None => {
                debug!("No config file given, using defaults");
                Config::default()
            }
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.staleness_days < 0 {
            return Err(PubtrackError::Config(
                "staleness_days must not be negative".to_string(),
            ));
        }
        if self.publication_workers == 0 {
            return Err(PubtrackError::Config(
                "publication_workers must be at least 1".to_string(),
            ));
        }
        self.pacing.validate()
    }

    pub fn roster_path(&self) -> PathBuf {
        self.data_dir.join("researchers.csv")
    }

    pub fn publications_dir(&self) -> PathBuf {
        self.data_dir.join("publications")
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

/// Interaction pacing.
///
/// Typing and dwell delays are drawn uniformly from `[min, max]` for every
/// keystroke and every results page.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PacingConfig {
    pub inter_request_delay_ms: u64,
    pub min_typing_delay_ms: u64,
    pub max_typing_delay_ms: u64,
    pub min_dwell_time_ms: u64,
    pub max_dwell_time_ms: u64,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            inter_request_delay_ms: 1000,
            min_typing_delay_ms: 100,
            max_typing_delay_ms: 300,
            min_dwell_time_ms: 5000,
            max_dwell_time_ms: 10000,
        }
    }
}

impl PacingConfig {
    /// No delays at all.
    pub fn immediate() -> Self {
        Self {
            inter_request_delay_ms: 0,
            min_typing_delay_ms: 0,
            max_typing_delay_ms: 0,
            min_dwell_time_ms: 0,
            max_dwell_time_ms: 0,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.min_typing_delay_ms > self.max_typing_delay_ms {
            return Err(PubtrackError::Config(format!(
                "min_typing_delay_ms ({}) exceeds max_typing_delay_ms ({})",
                self.min_typing_delay_ms, self.max_typing_delay_ms
            )));
        }
        if self.min_dwell_time_ms > self.max_dwell_time_ms {
            return Err(PubtrackError::Config(format!(
                "min_dwell_time_ms ({}) exceeds max_dwell_time_ms ({})",
                self.min_dwell_time_ms, self.max_dwell_time_ms
            )));
        }
        Ok(())
    }

    pub fn inter_request_delay(&self) -> Duration {
        Duration::from_millis(self.inter_request_delay_ms)
    }

    pub fn typing_delay(&self) -> Duration {
        random_between(self.min_typing_delay_ms, self.max_typing_delay_ms)
    }

    pub fn dwell_time(&self) -> Duration {
        random_between(self.min_dwell_time_ms, self.max_dwell_time_ms)
    }
}

fn random_between(min_ms: u64, max_ms: u64) -> Duration {
    if max_ms <= min_ms {
        return Duration::from_millis(min_ms);
    }
    Duration::from_millis(rand::thread_rng().gen_range(min_ms..=max_ms))
}

/// Sleep unless the delay is zero.
pub async fn pause(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}
