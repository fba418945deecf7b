//! Cookie persistence for the citation session.
//!
//! Cookies exported from a real browser session get the citation service to
//! serve results instead of a CAPTCHA wall. They are loaded once per session.

use crate::error::{PubtrackError, Result};
use reqwest::cookie::Jar;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, info, warn};
use url::Url;

/// Default cookie file path: `~/.pubtrack_cookies.json`
fn default_cookie_path() -> Result<PathBuf> {
    dirs::home_dir()
        .map(|p| p.join(".pubtrack_cookies.json"))
        .ok_or_else(|| PubtrackError::Config("Cannot determine home directory".to_string()))
}

/// Cookie entry in browser-export format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub http_only: bool,
    #[serde(default)]
    pub expires: Option<f64>,
}

impl Cookie {
    /// Whether the cookie applies to `host` (domain suffix match).
    pub fn matches_host(&self, host: &str) -> bool {
        let domain = self.domain.trim_start_matches('.');
        !domain.is_empty() && (host == domain || host.ends_with(&format!(".{}", domain)))
    }

    /// `Set-Cookie` form, as accepted by a cookie jar.
    pub fn to_set_cookie(&self) -> String {
        let path = if self.path.is_empty() { "/" } else { self.path.as_str() };
        let mut line = format!(
            "{}={}; Domain={}; Path={}",
            self.name,
            self.value,
            self.domain.trim_start_matches('.'),
            path
        );
        if self.secure {
            line.push_str("; Secure");
        }
        if self.http_only {
            line.push_str("; HttpOnly");
        }
        line
    }
}

/// Cookie jar seeded with the cookies that apply to `url`'s host.
///
/// Returns the jar and how many cookies went into it.
pub fn session_jar(cookies: &[Cookie], url: &Url) -> (Jar, usize) {
    let jar = Jar::default();
    let host = url.host_str().unwrap_or_default();
    let mut seeded = 0;
    for cookie in cookies.iter().filter(|c| c.matches_host(host)) {
        jar.add_cookie_str(&cookie.to_set_cookie(), url);
        seeded += 1;
    }
    (jar, seeded)
}

/// Cookie manager for loading and saving cookies
pub struct CookieManager {
    path: PathBuf,
}

impl CookieManager {
    /// Create a new CookieManager with default path
    pub fn new() -> Result<Self> {
        Ok(Self {
            path: default_cookie_path()?,
        })
    }

    /// Create a new CookieManager with custom path
    pub fn with_path(path: PathBuf) -> Self {
        Self { path }
    }

    /// Configured path, or the default one
    pub fn from_option(path: Option<PathBuf>) -> Result<Self> {
        match path {
            Some(path) => Ok(Self::with_path(path)),
            None => Self::new(),
        }
    }

    /// Get the cookie file path
    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Load cookies from file
    ///
    /// Returns empty vec if file doesn't exist or is invalid
    pub fn load(&self) -> Vec<Cookie> {
        if !self.path.exists() {
            debug!("Cookie file not found: {:?}", self.path);
            return Vec::new();
        }

        match std::fs::read_to_string(&self.path) {
            Ok(content) => match serde_json::from_str::<Vec<Cookie>>(&content) {
                Ok(cookies) => {
                    info!("Loaded {} cookies from {:?}", cookies.len(), self.path);
                    cookies
                }
                Err(e) => {
                    warn!("Failed to parse cookies: {}", e);
                    Vec::new()
                }
            },
            Err(e) => {
                warn!("Failed to read cookie file: {}", e);
                Vec::new()
            }
        }
    }

    /// Save cookies to file
    pub fn save(&self, cookies: &[Cookie]) -> Result<()> {
        let content = serde_json::to_string_pretty(cookies)?;
        std::fs::write(&self.path, content)?;
        info!("Saved {} cookies to {:?}", cookies.len(), self.path);
        Ok(())
    }

    /// Parse a JSON array of cookies and save it
    pub fn import(&self, json: &str) -> Result<usize> {
        let cookies: Vec<Cookie> = serde_json::from_str(json.trim())?;
        self.save(&cookies)?;
        Ok(cookies.len())
    }

    /// Clear stored cookies
    pub fn clear(&self) -> Result<()> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
            info!("Cleared cookies at {:?}", self.path);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn cookie(name: &str, domain: &str) -> Cookie {
        Cookie {
            name: name.to_string(),
            value: "v".to_string(),
            domain: domain.to_string(),
            path: "/".to_string(),
            secure: true,
            http_only: false,
            expires: None,
        }
    }

    #[test]
    fn test_load_missing_file() {
        let manager = CookieManager::with_path(PathBuf::from("/nonexistent/path"));
        assert!(manager.load().is_empty());
    }

    #[test]
    fn test_save_and_load() -> Result<()> {
        let temp = NamedTempFile::new()?;
        let manager = CookieManager::with_path(temp.path().to_path_buf());

        manager.save(&[cookie("NID", ".google.com")])?;
        let loaded = manager.load();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].name, "NID");

        manager.clear()?;
        assert!(manager.load().is_empty());
        Ok(())
    }

    #[test]
    fn test_import_rejects_garbage() -> Result<()> {
        let temp = NamedTempFile::new()?;
        let manager = CookieManager::with_path(temp.path().to_path_buf());
        assert!(manager.import("not json").is_err());
        let count = manager.import(r#"[{"name":"GSP","value":"x","domain":"scholar.google.com"}]"#)?;
        assert_eq!(count, 1);
        Ok(())
    }

    #[test]
    fn test_session_jar_filters_by_host() -> Result<()> {
        use reqwest::cookie::CookieStore;

        let cookies = vec![
            cookie("NID", ".google.com"),
            cookie("GSP", "scholar.google.com"),
            cookie("other", "example.org"),
        ];
        let url = Url::parse("https://scholar.google.com/")
            .map_err(|e| PubtrackError::Config(e.to_string()))?;

        let (jar, seeded) = session_jar(&cookies, &url);
        assert_eq!(seeded, 2);

        let header = jar.cookies(&url).expect("jar has cookies for host");
        let header = header.to_str().expect("ascii header");
        assert!(header.contains("NID=v"));
        assert!(header.contains("GSP=v"));
        assert!(!header.contains("other=v"));

        let elsewhere = Url::parse("https://notgoogle.com/")
            .map_err(|e| PubtrackError::Config(e.to_string()))?;
        assert_eq!(session_jar(&cookies, &elsewhere).1, 0);
        Ok(())
    }

    #[test]
    fn test_set_cookie_form() {
        let mut c = cookie("NID", ".google.com");
        c.path = String::new();
        assert_eq!(c.to_set_cookie(), "NID=v; Domain=google.com; Path=/; Secure");
    }
}
