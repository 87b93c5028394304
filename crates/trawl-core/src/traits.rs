use std::future::Future;

use crate::cookies::CookieSet;
use crate::error::CrawlError;
use crate::models::{Item, RenderedPage, RequestIdentity};

/// Fetches and renders one page with the session cookies and request identity.
pub trait Fetcher: Send + Sync + Clone {
    fn fetch(
        &self,
        url: &str,
        cookies: &CookieSet,
        identity: &RequestIdentity,
    ) -> impl Future<Output = Result<RenderedPage, CrawlError>> + Send;
}

/// Turns a rendered page into zero or more records.
///
/// Must not depend on anything but the page: the engine may call it once per
/// page and never twice for the same URL across runs.
pub trait ItemExtractor: Send + Sync {
    fn extract_items(&self, page: &RenderedPage) -> Vec<Item>;
}

/// Finds the absolute URL of the page after this one.
///
/// Must be deterministic for a given page. `None` ends the crawl.
pub trait PaginationResolver: Send + Sync {
    fn next_url(&self, page: &RenderedPage) -> Option<String>;
}

impl<F> ItemExtractor for F
where
    F: Fn(&RenderedPage) -> Vec<Item> + Send + Sync,
{
    fn extract_items(&self, page: &RenderedPage) -> Vec<Item> {
        self(page)
    }
}

impl<F> PaginationResolver for F
where
    F: Fn(&RenderedPage) -> Option<String> + Send + Sync,
{
    fn next_url(&self, page: &RenderedPage) -> Option<String> {
        self(page)
    }
}

/// Extractor for sites with no registered strategy: every page yields nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullExtractor;

impl ItemExtractor for NullExtractor {
    fn extract_items(&self, _page: &RenderedPage) -> Vec<Item> {
        Vec::new()
    }
}

/// Paginator for sites with no registered strategy: only the start page is visited.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPagination;

impl PaginationResolver for NoPagination {
    fn next_url(&self, _page: &RenderedPage) -> Option<String> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closures_satisfy_strategy_traits() {
        let extractor = |page: &RenderedPage| {
            let mut item = Item::new();
            item.insert("url".into(), serde_json::json!(page.final_url));
            vec![item]
        };
        let paginator = |page: &RenderedPage| Some(format!("{}next", page.final_url));

        let page = RenderedPage::new("https://example.com/", "<html></html>");
        assert_eq!(extractor.extract_items(&page).len(), 1);
        assert_eq!(
            paginator.next_url(&page).as_deref(),
            Some("https://example.com/next")
        );
    }

    #[test]
    fn null_strategies_are_inert() {
        let page = RenderedPage::new("https://example.com/", "<html></html>");
        assert!(NullExtractor.extract_items(&page).is_empty());
        assert!(NoPagination.next_url(&page).is_none());
    }
}
