use std::collections::{BTreeMap, HashSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One extracted record: an ordered field name → value mapping.
///
/// The engine never looks inside an item; it only buffers and writes it.
pub type Item = serde_json::Map<String, serde_json::Value>;

/// A page returned by the transport after rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedPage {
    /// The URL the engine asked for.
    pub requested_url: String,
    /// The URL the transport ended on after redirects.
    pub final_url: String,
    pub status: u16,
    pub html: String,
}

impl RenderedPage {
    pub fn new(url: impl Into<String>, html: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            final_url: url.clone(),
            requested_url: url,
            status: 200,
            html: html.into(),
        }
    }

    pub fn redirected_to(mut self, final_url: impl Into<String>) -> Self {
        self.final_url = final_url.into();
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }
}

/// The user agent and header set presented for a single fetch.
///
/// Built fresh per request and dropped once the fetch returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestIdentity {
    pub user_agent: String,
    /// Header name → value, in the order a browser would send them.
    pub headers: Vec<(String, String)>,
}

impl RequestIdentity {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Pages whose extraction has completed, keyed by exact URL string.
///
/// No normalization: `https://a/x` and `https://a/x/` are different pages.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VisitedSet {
    urls: HashSet<String>,
}

impl VisitedSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, url: &str) -> bool {
        self.urls.contains(url)
    }

    /// Returns `true` if the URL was not present before.
    pub fn insert(&mut self, url: impl Into<String>) -> bool {
        self.urls.insert(url.into())
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }

    /// URLs in lexical order, for stable checkpoint files.
    pub fn sorted(&self) -> Vec<&str> {
        let mut urls: Vec<&str> = self.urls.iter().map(String::as_str).collect();
        urls.sort_unstable();
        urls
    }
}

impl<S: Into<String>> FromIterator<S> for VisitedSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            urls: iter.into_iter().map(Into::into).collect(),
        }
    }
}

/// Why a crawl run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    /// Pagination ran out (or looped back / left the allowed domains).
    Completed,
    /// A fetched page showed the session is no longer authenticated.
    SessionExpired,
    /// A fetch failed permanently or exhausted its retries.
    FetchFailed,
    /// An external stop signal ended the run between pages.
    Cancelled,
}

impl TerminationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminationReason::Completed => "completed",
            TerminationReason::SessionExpired => "session_expired",
            TerminationReason::FetchFailed => "fetch_failed",
            TerminationReason::Cancelled => "cancelled",
        }
    }

    /// Completed and cancelled runs are not failures from the caller's view.
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            TerminationReason::Completed | TerminationReason::Cancelled
        )
    }
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Counters owned by one engine run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrawlRunState {
    /// Fetch attempts issued, retries included.
    pub requests: u64,
    /// Items handed to the chunk writer.
    pub items: u64,
    pub pages_extracted: u64,
    /// Pages fetched only to read their pagination link.
    pub pages_skipped: u64,
}

/// Outcome of one engine run.
#[derive(Debug, Clone, Serialize)]
pub struct CrawlSummary {
    /// Fresh per run, for correlating logs with output.
    pub run_id: Uuid,
    pub alias: String,
    pub requests: u64,
    pub items: u64,
    pub pages_extracted: u64,
    pub pages_skipped: u64,
    pub chunks_written: u64,
    pub termination: TerminationReason,
    /// Failure detail for non-`Completed` endings.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl CrawlSummary {
    pub(crate) fn from_state(
        run_id: Uuid,
        alias: &str,
        state: &CrawlRunState,
        chunks_written: u64,
        termination: TerminationReason,
        detail: Option<String>,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            run_id,
            alias: alias.to_string(),
            requests: state.requests,
            items: state.items,
            pages_extracted: state.pages_extracted,
            pages_skipped: state.pages_skipped,
            chunks_written,
            termination,
            detail,
            started_at,
            finished_at: Utc::now(),
        }
    }
}

/// Raw `speed_override` map from the site list, setting name → value.
pub type PacingOverrides = BTreeMap<String, serde_json::Value>;
