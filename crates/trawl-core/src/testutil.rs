//! Test utilities: mock implementations of the core traits.
//!
//! Handwritten mocks for dependency injection in unit tests.
//! All mocks use `Arc<Mutex<_>>` for interior mutability, so a clone handed
//! to the engine shares its call log with the one the test asserts on.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;

use crate::checkpoint::CheckpointStore;
use crate::cookies::CookieSet;
use crate::engine::{CrawlEvent, CrawlReporter};
use crate::error::CrawlError;
use crate::models::{Item, RenderedPage, RequestIdentity, VisitedSet};
use crate::registry::SiteStrategy;
use crate::traits::{Fetcher, ItemExtractor, PaginationResolver};

// ---------------------------------------------------------------------------
// MockFetcher
// ---------------------------------------------------------------------------

/// Mock fetcher serving a fixed page per URL.
///
/// Scripted failures queued with [`MockFetcher::fail_once`] are returned
/// before the page; unknown URLs answer 404.
#[derive(Clone, Default)]
pub struct MockFetcher {
    pages: Arc<Mutex<HashMap<String, RenderedPage>>>,
    failures: Arc<Mutex<HashMap<String, VecDeque<CrawlError>>>>,
    calls: Arc<Mutex<Vec<String>>>,
    identities: Arc<Mutex<Vec<RequestIdentity>>>,
    cookie_counts: Arc<Mutex<Vec<usize>>>,
    latency: Duration,
}

impl MockFetcher {
    pub fn pages<I, S>(urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let fetcher = Self::default();
        {
            let mut pages = fetcher.pages.lock().unwrap();
            for url in urls {
                let url = url.into();
                let html = format!("<html><body><h1>{url}</h1></body></html>");
                pages.insert(url.clone(), RenderedPage::new(url, html));
            }
        }
        fetcher
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Make `url` land on `final_url` instead of itself.
    pub fn redirect(&self, url: &str, final_url: &str) {
        let mut pages = self.pages.lock().unwrap();
        let page = pages
            .remove(url)
            .unwrap_or_else(|| RenderedPage::new(url, "<html></html>"));
        pages.insert(url.to_string(), page.redirected_to(final_url));
    }

    pub fn fail_once(&self, url: &str, error: CrawlError) {
        self.failures
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .push_back(error);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn identities(&self) -> Vec<RequestIdentity> {
        self.identities.lock().unwrap().clone()
    }

    pub fn cookie_counts(&self) -> Vec<usize> {
        self.cookie_counts.lock().unwrap().clone()
    }
}

impl Fetcher for MockFetcher {
    async fn fetch(
        &self,
        url: &str,
        cookies: &CookieSet,
        identity: &RequestIdentity,
    ) -> Result<RenderedPage, CrawlError> {
        self.calls.lock().unwrap().push(url.to_string());
        self.identities.lock().unwrap().push(identity.clone());
        self.cookie_counts.lock().unwrap().push(cookies.len());

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let scripted = self
            .failures
            .lock()
            .unwrap()
            .get_mut(url)
            .and_then(VecDeque::pop_front);
        if let Some(err) = scripted {
            return Err(err);
        }

        self.pages
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| CrawlError::HttpStatus {
                status: 404,
                url: url.to_string(),
            })
    }
}

// ---------------------------------------------------------------------------
// MockExtractor
// ---------------------------------------------------------------------------

/// Mock extractor yielding `per_page` items tagged with the page URL.
#[derive(Clone, Default)]
pub struct MockExtractor {
    per_page: usize,
    calls: Arc<Mutex<Vec<String>>>,
}

impl MockExtractor {
    pub fn per_page(per_page: usize) -> Self {
        Self {
            per_page,
            calls: Arc::default(),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl ItemExtractor for MockExtractor {
    fn extract_items(&self, page: &RenderedPage) -> Vec<Item> {
        self.calls.lock().unwrap().push(page.requested_url.clone());
        (0..self.per_page)
            .map(|n| {
                let mut item = Item::new();
                item.insert("url".into(), json!(page.requested_url));
                item.insert("n".into(), json!(n));
                item
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// MockPaginator
// ---------------------------------------------------------------------------

/// Mock paginator following a fixed URL → next URL table.
#[derive(Clone, Default)]
pub struct MockPaginator {
    links: HashMap<String, String>,
}

impl MockPaginator {
    /// Link each URL to the one after it; the last has no next page.
    pub fn chain<I, S>(urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let urls: Vec<String> = urls.into_iter().map(Into::into).collect();
        let links = urls
            .windows(2)
            .map(|pair| (pair[0].clone(), pair[1].clone()))
            .collect();
        Self { links }
    }

    pub fn link(mut self, from: &str, to: &str) -> Self {
        self.links.insert(from.to_string(), to.to_string());
        self
    }
}

impl PaginationResolver for MockPaginator {
    fn next_url(&self, page: &RenderedPage) -> Option<String> {
        self.links.get(&page.requested_url).cloned()
    }
}

pub fn strategy(extractor: &MockExtractor, paginator: &MockPaginator) -> SiteStrategy {
    SiteStrategy {
        extractor: Arc::new(extractor.clone()),
        paginator: Arc::new(paginator.clone()),
    }
}

// ---------------------------------------------------------------------------
// MemoryCheckpointStore
// ---------------------------------------------------------------------------

/// In-memory checkpoint store with a save counter and switchable failures.
#[derive(Clone, Default)]
pub struct MemoryCheckpointStore {
    sets: Arc<Mutex<HashMap<String, VisitedSet>>>,
    saves: Arc<AtomicUsize>,
    fail: Arc<AtomicBool>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_visited<I, S>(alias: &str, urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let store = Self::default();
        store
            .sets
            .lock()
            .unwrap()
            .insert(alias.to_string(), urls.into_iter().collect());
        store
    }

    pub fn fail_saves(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn visited(&self, alias: &str) -> VisitedSet {
        self.sets
            .lock()
            .unwrap()
            .get(alias)
            .cloned()
            .unwrap_or_default()
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    async fn load(&self, alias: &str) -> VisitedSet {
        self.visited(alias)
    }

    async fn save(&self, alias: &str, visited: &VisitedSet) -> Result<(), CrawlError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(CrawlError::WriteFailed {
                path: format!("memory://{alias}"),
                message: "disk full".into(),
            });
        }
        self.saves.fetch_add(1, Ordering::SeqCst);
        self.sets
            .lock()
            .unwrap()
            .insert(alias.to_string(), visited.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MockReporter
// ---------------------------------------------------------------------------

/// Reporter recording the variant name of every event, in order.
#[derive(Clone, Default)]
pub struct MockReporter {
    labels: Arc<Mutex<Vec<String>>>,
}

impl MockReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn labels(&self) -> Vec<String> {
        self.labels.lock().unwrap().clone()
    }
}

impl CrawlReporter for MockReporter {
    fn report(&self, event: CrawlEvent<'_>) {
        let label = match event {
            CrawlEvent::RunStarted { .. } => "RunStarted",
            CrawlEvent::Fetching { .. } => "Fetching",
            CrawlEvent::FetchRetry { .. } => "FetchRetry",
            CrawlEvent::PageExtracted { .. } => "PageExtracted",
            CrawlEvent::PageSkipped { .. } => "PageSkipped",
            CrawlEvent::FollowingNext { .. } => "FollowingNext",
            CrawlEvent::PaginationEnded { .. } => "PaginationEnded",
            CrawlEvent::SessionExpired { .. } => "SessionExpired",
            CrawlEvent::RunFinished { .. } => "RunFinished",
        };
        self.labels.lock().unwrap().push(label.to_string());
    }
}
