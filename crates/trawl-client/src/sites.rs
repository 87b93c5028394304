//! Built-in site strategies.
//!
//! Sites whose layout is known ship an extractor and paginator here; any
//! other site can use the generic [`LinkSelectorPaginator`] under the name
//! `next_link` together with an extractor registered by the embedding code.

use scraper::{ElementRef, Html, Selector};
use serde_json::{Value, json};
use trawl_core::error::CrawlError;
use trawl_core::models::{Item, RenderedPage};
use trawl_core::registry::SiteRegistry;
use trawl_core::traits::{ItemExtractor, PaginationResolver};
use url::Url;

/// Registry name of the generic "next link" paginator.
pub const NEXT_LINK: &str = "next_link";
/// Registry name of the quotes.toscrape.com strategies.
pub const QUOTES: &str = "quotes";

/// Register every built-in strategy.
pub fn register_builtin(registry: &mut SiteRegistry) -> Result<(), CrawlError> {
    registry
        .register_extractor(QUOTES, QuotesExtractor::new()?)
        .register_paginator(QUOTES, LinkSelectorPaginator::new("li.next a")?)
        .register_paginator(NEXT_LINK, LinkSelectorPaginator::new("a[rel=next], li.next a")?);
    Ok(())
}

fn selector(css: &str) -> Result<Selector, CrawlError> {
    Selector::parse(css).map_err(|e| CrawlError::Config(format!("Invalid CSS selector '{css}': {e}")))
}

fn text_of(element: ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_string()
}

/// Follows the `href` of the first element matching a CSS selector,
/// resolved against the page's final URL.
#[derive(Debug, Clone)]
pub struct LinkSelectorPaginator {
    link: Selector,
}

impl LinkSelectorPaginator {
    pub fn new(css: &str) -> Result<Self, CrawlError> {
        Ok(Self {
            link: selector(css)?,
        })
    }
}

impl PaginationResolver for LinkSelectorPaginator {
    fn next_url(&self, page: &RenderedPage) -> Option<String> {
        let document = Html::parse_document(&page.html);
        let href = document
            .select(&self.link)
            .find_map(|a| a.value().attr("href"))?
            .trim()
            .to_string();
        if href.is_empty() {
            return None;
        }

        match Url::parse(&page.final_url).and_then(|base| base.join(&href)) {
            Ok(next) => Some(next.to_string()),
            Err(e) => {
                tracing::warn!(url = %page.final_url, %href, error = %e, "Unresolvable next link");
                None
            }
        }
    }
}

/// quotes.toscrape.com: one item per `div.quote`.
#[derive(Debug, Clone)]
pub struct QuotesExtractor {
    quote: Selector,
    text: Selector,
    author: Selector,
    tag: Selector,
}

impl QuotesExtractor {
    pub fn new() -> Result<Self, CrawlError> {
        Ok(Self {
            quote: selector("div.quote")?,
            text: selector("span.text")?,
            author: selector("span small")?,
            tag: selector("div.tags a.tag")?,
        })
    }
}

impl ItemExtractor for QuotesExtractor {
    fn extract_items(&self, page: &RenderedPage) -> Vec<Item> {
        let document = Html::parse_document(&page.html);
        let items: Vec<Item> = document
            .select(&self.quote)
            .map(|quote| {
                let first = |sel: &Selector| {
                    quote
                        .select(sel)
                        .next()
                        .map_or(Value::Null, |el| Value::String(text_of(el)))
                };
                let tags: Vec<String> = quote.select(&self.tag).map(text_of).collect();

                let mut item = Item::new();
                item.insert("text".into(), first(&self.text));
                item.insert("author".into(), first(&self.author));
                item.insert("tags".into(), json!(tags));
                item.insert("url".into(), json!(page.final_url));
                item
            })
            .collect();

        tracing::info!(url = %page.final_url, quotes = items.len(), "Found quotes on page");
        items
    }
}
