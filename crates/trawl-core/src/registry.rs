use std::collections::HashMap;
use std::sync::Arc;

use crate::config::SiteConfig;
use crate::traits::{ItemExtractor, NoPagination, NullExtractor, PaginationResolver};

/// The extractor/paginator pair used for one site.
#[derive(Clone)]
pub struct SiteStrategy {
    pub extractor: Arc<dyn ItemExtractor>,
    pub paginator: Arc<dyn PaginationResolver>,
}

/// Named strategies, registered at startup and looked up per site.
///
/// A site names its strategies with `extract_func` / `next_url_func`; when a
/// name is absent the strategy registered under the site's alias is used.
#[derive(Default, Clone)]
pub struct SiteRegistry {
    extractors: HashMap<String, Arc<dyn ItemExtractor>>,
    paginators: HashMap<String, Arc<dyn PaginationResolver>>,
}

impl SiteRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_extractor(
        &mut self,
        name: impl Into<String>,
        extractor: impl ItemExtractor + 'static,
    ) -> &mut Self {
        self.extractors.insert(name.into(), Arc::new(extractor));
        self
    }

    pub fn register_paginator(
        &mut self,
        name: impl Into<String>,
        paginator: impl PaginationResolver + 'static,
    ) -> &mut Self {
        self.paginators.insert(name.into(), Arc::new(paginator));
        self
    }

    pub fn has_extractor(&self, name: &str) -> bool {
        self.extractors.contains_key(name)
    }

    pub fn has_paginator(&self, name: &str) -> bool {
        self.paginators.contains_key(name)
    }

    /// Resolve the pair for `site`, falling back to inert strategies.
    ///
    /// Without a paginator only the start page is crawled; without an
    /// extractor pages are visited but yield no items. Both are logged.
    pub fn resolve(&self, site: &SiteConfig) -> SiteStrategy {
        let extractor_name = site.extract_func.as_deref().unwrap_or(&site.alias);
        let paginator_name = site.next_url_func.as_deref().unwrap_or(&site.alias);

        let extractor = match self.extractors.get(extractor_name) {
            Some(e) => {
                tracing::info!(alias = %site.alias, strategy = %extractor_name, "Loaded extractor");
                Arc::clone(e)
            }
            None => {
                tracing::warn!(
                    alias = %site.alias,
                    strategy = %extractor_name,
                    "No extractor registered, pages will yield no items"
                );
                Arc::new(NullExtractor)
            }
        };

        let paginator = match self.paginators.get(paginator_name) {
            Some(p) => {
                tracing::info!(alias = %site.alias, strategy = %paginator_name, "Loaded paginator");
                Arc::clone(p)
            }
            None => {
                tracing::warn!(
                    alias = %site.alias,
                    strategy = %paginator_name,
                    "No paginator registered, pagination will not be followed"
                );
                Arc::new(NoPagination)
            }
        };

        SiteStrategy {
            extractor,
            paginator,
        }
    }
}
