//! Site list loading and validation.
//!
//! The site list is a JSON array of records, one per target site:
//!
//! ```json
//! [
//!   {
//!     "alias": "quotes",
//!     "start_url": "https://quotes.toscrape.com/",
//!     "login_url": "https://quotes.toscrape.com/login",
//!     "allowed_domains": ["quotes.toscrape.com"],
//!     "output_path": "output/quotes",
//!     "chunked_size": 50,
//!     "next_url_func": "quotes",
//!     "extract_func": "quotes",
//!     "speed_override": { "delay_min": 2.0, "delay_max": 4.5, "retry_times": 3 }
//!   }
//! ]
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::error::CrawlError;
use crate::models::{PacingOverrides, RenderedPage};
use crate::retry::RetryPolicy;
use crate::stealth::PacingConfig;

/// Default site list file name, looked up in the working directory.
pub const DEFAULT_SITE_LIST: &str = "websites_input.json";

/// Substring of the landing URL that means "sent back to the login form".
pub const DEFAULT_LOGIN_MARKER: &str = "login";

#[derive(Debug, Deserialize)]
struct SiteRecord {
    alias: String,
    start_url: String,
    #[serde(default)]
    allowed_domains: Vec<String>,
    #[serde(default)]
    output_path: Option<String>,
    #[serde(default, alias = "chunk_size")]
    chunked_size: usize,
    #[serde(default)]
    next_url_func: Option<String>,
    #[serde(default, alias = "parse_items_func")]
    extract_func: Option<String>,
    #[serde(default)]
    login_url: Option<String>,
    #[serde(default)]
    login_marker: Option<String>,
    #[serde(default)]
    speed_override: PacingOverrides,
}

/// Pacing, retry and timeout settings for one site.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SitePacing {
    pub pacing: PacingConfig,
    pub retry: RetryPolicy,
    /// Per-fetch timeout; `None` leaves the transport default.
    pub fetch_timeout: Option<Duration>,
}

impl SitePacing {
    /// Apply a `speed_override` map on top of the defaults.
    ///
    /// Recognised keys (case-insensitive): `delay_min`, `delay_max`,
    /// `download_delay`, `retry_times`, `retry_http_codes`,
    /// `download_timeout`. Unknown keys are logged and ignored.
    pub fn from_overrides(alias: &str, overrides: &PacingOverrides) -> Result<Self, CrawlError> {
        let lookup = |key: &str| {
            overrides
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(key))
                .map(|(_, v)| v)
        };
        let seconds = |key: &str| -> Result<Option<Duration>, CrawlError> {
            match lookup(key) {
                None => Ok(None),
                Some(v) => v
                    .as_f64()
                    .filter(|s| s.is_finite() && *s >= 0.0)
                    .map(|s| Some(Duration::from_secs_f64(s)))
                    .ok_or_else(|| {
                        CrawlError::Config(format!(
                            "'{alias}': speed_override.{key} must be a non-negative number of seconds, got {v}"
                        ))
                    }),
            }
        };

        const KNOWN: [&str; 6] = [
            "delay_min",
            "delay_max",
            "download_delay",
            "retry_times",
            "retry_http_codes",
            "download_timeout",
        ];
        for key in overrides.keys() {
            if !KNOWN.iter().any(|k| k.eq_ignore_ascii_case(key)) {
                tracing::warn!(%alias, setting = %key, "Ignoring unknown speed_override setting");
            }
        }

        let mut site = Self::default();
        let defaults = site.pacing;

        let (mut min, mut max) = match seconds("download_delay")? {
            Some(d) => (d.mul_f64(0.5), d.mul_f64(1.5)),
            None => (defaults.delay_min, defaults.delay_max),
        };
        if let Some(d) = seconds("delay_min")? {
            min = d;
        }
        if let Some(d) = seconds("delay_max")? {
            max = d;
        }
        site.pacing = PacingConfig::new(min, max);

        if let Some(v) = lookup("retry_times") {
            let n = v.as_u64().and_then(|n| u32::try_from(n).ok()).ok_or_else(|| {
                CrawlError::Config(format!(
                    "'{alias}': speed_override.retry_times must be a non-negative integer, got {v}"
                ))
            })?;
            site.retry.max_retries = n;
        }

        if let Some(v) = lookup("retry_http_codes") {
            let codes = v
                .as_array()
                .and_then(|arr| {
                    arr.iter()
                        .map(|c| c.as_u64().and_then(|c| u16::try_from(c).ok()))
                        .collect::<Option<Vec<u16>>>()
                })
                .ok_or_else(|| {
                    CrawlError::Config(format!(
                        "'{alias}': speed_override.retry_http_codes must be an array of status codes, got {v}"
                    ))
                })?;
            site.retry.retryable_statuses = codes;
        }

        site.fetch_timeout = seconds("download_timeout")?;

        for (key, value) in overrides {
            tracing::info!(%alias, setting = %key, %value, "Speed setting overridden");
        }

        Ok(site)
    }
}

/// Resolved configuration of one target site. Not modified once a run starts.
#[derive(Debug, Clone, PartialEq)]
pub struct SiteConfig {
    pub alias: String,
    pub start_url: String,
    /// Hosts pagination may lead to; empty means unrestricted.
    pub allowed_domains: Vec<String>,
    /// Output base path, without the `.json` suffix.
    pub output_path: PathBuf,
    /// Items per output file; `0` writes one file at the end.
    pub chunk_size: usize,
    /// Registry name of the pagination strategy.
    pub next_url_func: Option<String>,
    /// Registry name of the extraction strategy.
    pub extract_func: Option<String>,
    pub login_url: Option<String>,
    pub login_marker: String,
    pub pacing: SitePacing,
}

impl SiteConfig {
    pub fn new(alias: impl Into<String>, start_url: impl Into<String>) -> Self {
        let alias = alias.into();
        Self {
            output_path: PathBuf::from(&alias),
            alias,
            start_url: start_url.into(),
            allowed_domains: Vec::new(),
            chunk_size: 0,
            next_url_func: None,
            extract_func: None,
            login_url: None,
            login_marker: DEFAULT_LOGIN_MARKER.to_string(),
            pacing: SitePacing::default(),
        }
    }

    pub fn with_output_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_path = path.into();
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_allowed_domains<I, S>(mut self, domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_domains = domains.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_pacing(mut self, pacing: SitePacing) -> Self {
        self.pacing = pacing;
        self
    }

    /// True when the page landed on the login surface instead of content.
    pub fn session_expired(&self, page: &RenderedPage) -> bool {
        !self.login_marker.is_empty()
            && page
                .final_url
                .to_lowercase()
                .contains(&self.login_marker.to_lowercase())
    }

    /// Whether pagination may follow `url`: its host is an allowed domain
    /// or a subdomain of one.
    pub fn is_allowed(&self, url: &str) -> bool {
        if self.allowed_domains.is_empty() {
            return true;
        }
        let Some(host) = Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_ascii_lowercase))
        else {
            return false;
        };
        self.allowed_domains.iter().any(|domain| {
            let domain = domain.trim_start_matches('.').to_ascii_lowercase();
            host == domain || host.ends_with(&format!(".{domain}"))
        })
    }

    fn from_record(record: SiteRecord) -> Result<Self, CrawlError> {
        validate_alias(&record.alias)?;

        let url = Url::parse(&record.start_url).map_err(|e| {
            CrawlError::Config(format!(
                "'{}': invalid start_url '{}': {e}",
                record.alias, record.start_url
            ))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(CrawlError::Config(format!(
                "'{}': start_url must be http or https, got '{}'",
                record.alias, record.start_url
            )));
        }

        let pacing = SitePacing::from_overrides(&record.alias, &record.speed_override)?;
        let output_path = record
            .output_path
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| record.alias.clone());

        Ok(Self {
            output_path: PathBuf::from(output_path),
            start_url: record.start_url,
            allowed_domains: record.allowed_domains,
            chunk_size: record.chunked_size,
            next_url_func: record.next_url_func,
            extract_func: record.extract_func,
            login_url: record.login_url,
            login_marker: record
                .login_marker
                .unwrap_or_else(|| DEFAULT_LOGIN_MARKER.to_string()),
            pacing,
            alias: record.alias,
        })
    }
}

/// Aliases name files on disk, so they are restricted to `[A-Za-z0-9_]`.
pub fn validate_alias(alias: &str) -> Result<(), CrawlError> {
    if alias.is_empty() {
        return Err(CrawlError::Config("alias must not be empty".into()));
    }
    if !alias.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(CrawlError::Config(format!(
            "invalid alias '{alias}': only letters, digits and underscores are allowed"
        )));
    }
    Ok(())
}

/// All configured sites, in file order.
#[derive(Debug, Clone, Default)]
pub struct SiteList {
    sites: Vec<SiteConfig>,
}

impl SiteList {
    pub fn load(path: &Path) -> Result<Self, CrawlError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            CrawlError::Config(format!(
                "cannot read site list {}: {e}",
                path.display()
            ))
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, CrawlError> {
        let value: serde_json::Value = serde_json::from_str(raw)
            .map_err(|e| CrawlError::Config(format!("site list is not valid JSON: {e}")))?;
        if !value.is_array() {
            return Err(CrawlError::Config(
                "site list must contain a JSON array of sites".into(),
            ));
        }
        let records: Vec<SiteRecord> = serde_json::from_value(value)
            .map_err(|e| CrawlError::Config(format!("malformed site record: {e}")))?;

        let mut sites: Vec<SiteConfig> = Vec::with_capacity(records.len());
        for record in records {
            let site = SiteConfig::from_record(record)?;
            if sites.iter().any(|s| s.alias == site.alias) {
                return Err(CrawlError::Config(format!(
                    "duplicate alias '{}' in site list",
                    site.alias
                )));
            }
            sites.push(site);
        }
        Ok(Self { sites })
    }

    pub fn get(&self, alias: &str) -> Result<&SiteConfig, CrawlError> {
        self.sites.iter().find(|s| s.alias == alias).ok_or_else(|| {
            CrawlError::Config(format!(
                "unknown alias '{alias}'; available: [{}]",
                self.aliases().join(", ")
            ))
        })
    }

    pub fn aliases(&self) -> Vec<&str> {
        self.sites.iter().map(|s| s.alias.as_str()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SiteConfig> {
        self.sites.iter()
    }

    pub fn len(&self) -> usize {
        self.sites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"[
        {
            "alias": "quotes",
            "start_url": "https://quotes.toscrape.com/",
            "allowed_domains": ["quotes.toscrape.com"],
            "output_path": "output/quotes",
            "chunked_size": 4,
            "next_url_func": "quotes",
            "login_url": "https://quotes.toscrape.com/login",
            "speed_override": {"DOWNLOAD_DELAY": 2, "retry_times": 2}
        },
        {
            "alias": "books",
            "start_url": "https://books.toscrape.com/catalogue/page-1.html",
            "chunk_size": 10
        }
    ]"#;

    #[test]
    fn parses_site_list() {
        let list = SiteList::from_json(SAMPLE).unwrap();
        assert_eq!(list.aliases(), vec!["quotes", "books"]);

        let quotes = list.get("quotes").unwrap();
        assert_eq!(quotes.output_path, PathBuf::from("output/quotes"));
        assert_eq!(quotes.chunk_size, 4);
        assert_eq!(quotes.next_url_func.as_deref(), Some("quotes"));
        assert_eq!(quotes.login_marker, "login");
        assert_eq!(quotes.pacing.pacing.delay_min, Duration::from_secs(1));
        assert_eq!(quotes.pacing.pacing.delay_max, Duration::from_secs(3));
        assert_eq!(quotes.pacing.retry.max_retries, 2);

        let books = list.get("books").unwrap();
        assert_eq!(books.output_path, PathBuf::from("books"));
        assert_eq!(books.chunk_size, 10);
        assert!(books.allowed_domains.is_empty());
        assert_eq!(books.pacing, SitePacing::default());
    }

    #[test]
    fn unknown_alias_lists_available() {
        let list = SiteList::from_json(SAMPLE).unwrap();
        let err = list.get("nope").unwrap_err().to_string();
        assert!(err.contains("nope"));
        assert!(err.contains("quotes, books"));
    }

    #[test]
    fn rejects_non_array() {
        let err = SiteList::from_json(r#"{"alias": "x"}"#).unwrap_err();
        assert!(matches!(err, CrawlError::Config(_)));
    }

    #[test]
    fn rejects_bad_alias_and_duplicates() {
        let bad = r#"[{"alias": "../etc", "start_url": "https://a.com/"}]"#;
        assert!(SiteList::from_json(bad).is_err());

        let dup = r#"[
            {"alias": "a", "start_url": "https://a.com/"},
            {"alias": "a", "start_url": "https://b.com/"}
        ]"#;
        let err = SiteList::from_json(dup).unwrap_err().to_string();
        assert!(err.contains("duplicate"));
    }

    #[test]
    fn rejects_bad_start_url() {
        let relative = r#"[{"alias": "a", "start_url": "/page/1"}]"#;
        assert!(SiteList::from_json(relative).is_err());
        let ftp = r#"[{"alias": "a", "start_url": "ftp://a.com/"}]"#;
        assert!(SiteList::from_json(ftp).is_err());
    }

    #[test]
    fn load_missing_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = SiteList::load(&dir.path().join("websites_input.json")).unwrap_err();
        assert!(matches!(err, CrawlError::Config(_)));
    }

    #[test]
    fn explicit_delay_bounds_override_download_delay() {
        let overrides: PacingOverrides = serde_json::from_str(
            r#"{"download_delay": 4, "delay_max": 10, "download_timeout": 45,
                "retry_http_codes": [503, 429], "concurrent_requests": 1}"#,
        )
        .unwrap();
        let pacing = SitePacing::from_overrides("x", &overrides).unwrap();
        assert_eq!(pacing.pacing.delay_min, Duration::from_secs(2));
        assert_eq!(pacing.pacing.delay_max, Duration::from_secs(10));
        assert_eq!(pacing.fetch_timeout, Some(Duration::from_secs(45)));
        assert_eq!(pacing.retry.retryable_statuses, vec![503, 429]);
        assert_eq!(pacing.retry.max_retries, 5);
    }

    #[test]
    fn invalid_override_values_are_config_errors() {
        for raw in [
            r#"{"delay_min": "fast"}"#,
            r#"{"delay_max": -1}"#,
            r#"{"retry_times": 1.5}"#,
            r#"{"retry_http_codes": [500, "x"]}"#,
        ] {
            let overrides: PacingOverrides = serde_json::from_str(raw).unwrap();
            assert!(
                matches!(
                    SitePacing::from_overrides("x", &overrides),
                    Err(CrawlError::Config(_))
                ),
                "{raw} should be rejected"
            );
        }
    }

    #[test]
    fn session_expired_checks_landing_url() {
        let site = SiteConfig::new("quotes", "https://quotes.toscrape.com/");
        let ok = RenderedPage::new("https://quotes.toscrape.com/page/2/", "");
        let bounced = RenderedPage::new("https://quotes.toscrape.com/page/2/", "")
            .redirected_to("https://quotes.toscrape.com/Login?next=/page/2/");
        assert!(!site.session_expired(&ok));
        assert!(site.session_expired(&bounced));
    }

    #[test]
    fn allowed_domains_include_subdomains() {
        let site = SiteConfig::new("q", "https://quotes.toscrape.com/")
            .with_allowed_domains(["toscrape.com"]);
        assert!(site.is_allowed("https://toscrape.com/x"));
        assert!(site.is_allowed("https://quotes.toscrape.com/page/2/"));
        assert!(!site.is_allowed("https://nottoscrape.com/"));
        assert!(!site.is_allowed("https://evil.com/?q=toscrape.com"));
        assert!(!site.is_allowed("not a url"));

        let open = SiteConfig::new("q", "https://quotes.toscrape.com/");
        assert!(open.is_allowed("https://anywhere.example/"));
    }
}
