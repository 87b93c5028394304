//! Captured session cookies.
//!
//! The cookie file is produced by an interactive login outside of trawl
//! (a browser export in the usual `name`/`value`/`domain`/`path`/flags
//! shape). The engine only reads it and attaches the cookies to requests.

use std::path::Path;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use url::Url;

/// One browser cookie. Fields the engine does not use are passed through.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cookie {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default = "default_path")]
    pub path: String,
    /// Unix seconds; `-1` or absent for session cookies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_only: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secure: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub same_site: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn default_path() -> String {
    "/".to_string()
}

impl Cookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            domain: domain.into(),
            path: default_path(),
            expires: None,
            http_only: None,
            secure: None,
            same_site: None,
            extra: serde_json::Map::new(),
        }
    }

    /// Whether `expires` lies before `now` (Unix seconds). Session cookies
    /// (`expires` absent, `-1` or `0`) never count as expired.
    pub fn is_expired_at(&self, now: f64) -> bool {
        matches!(self.expires, Some(expires) if expires > 0.0 && expires < now)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now().timestamp_millis() as f64 / 1000.0)
    }

    /// Whether this cookie would be sent to `url` (domain and path match).
    pub fn matches(&self, url: &Url) -> bool {
        let Some(host) = url.host_str() else {
            return false;
        };
        if self.secure == Some(true) && url.scheme() != "https" {
            return false;
        }
        let domain = self.domain.trim_start_matches('.').to_ascii_lowercase();
        let host = host.to_ascii_lowercase();
        let domain_ok = domain.is_empty()
            || host == domain
            || (host.ends_with(&domain) && host[..host.len() - domain.len()].ends_with('.'));
        domain_ok && url.path().starts_with(self.path.as_str())
    }
}

/// Ordered cookie records for one alias.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CookieSet {
    cookies: Vec<Cookie>,
}

impl CookieSet {
    pub fn new(cookies: Vec<Cookie>) -> Self {
        Self { cookies }
    }

    /// Conventional cookie file name for an alias.
    pub fn file_name(alias: &str) -> String {
        format!("{alias}_cookies.json")
    }

    /// Load the cookie file, degrading to an empty set.
    ///
    /// A missing or unreadable file means the crawl proceeds unauthenticated;
    /// the session-expiry check will stop it if the site insists on a login.
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            tracing::warn!(
                path = %path.display(),
                "No cookie file found, proceeding without authentication"
            );
            return Self::default();
        }

        let parsed = std::fs::read_to_string(path)
            .map_err(|e| e.to_string())
            .and_then(|raw| serde_json::from_str::<Vec<Cookie>>(&raw).map_err(|e| e.to_string()));

        match parsed {
            Ok(cookies) => {
                tracing::info!(path = %path.display(), count = cookies.len(), "Loaded cookies");
                let expired: Vec<&str> = cookies
                    .iter()
                    .filter(|c| c.is_expired())
                    .map(|c| c.name.as_str())
                    .collect();
                if !expired.is_empty() {
                    tracing::warn!(
                        path = %path.display(),
                        cookies = %expired.join(", "),
                        "Expired cookies will not be sent, the session may need refreshing"
                    );
                }
                Self { cookies }
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Could not load cookies");
                Self::default()
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Cookie> {
        self.cookies.iter()
    }

    pub fn len(&self) -> usize {
        self.cookies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    /// `Cookie:` header value for a request to `url`, if any unexpired
    /// cookie applies.
    pub fn header_for(&self, url: &str) -> Option<String> {
        let url = Url::parse(url).ok()?;
        let pairs: Vec<String> = self
            .cookies
            .iter()
            .filter(|c| !c.is_expired() && c.matches(&url))
            .map(|c| format!("{}={}", c.name, c.value))
            .collect();
        if pairs.is_empty() {
            None
        } else {
            Some(pairs.join("; "))
        }
    }
}
