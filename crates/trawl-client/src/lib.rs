//! Transports and built-in site strategies for trawl.
//!
//! [`ReqwestFetcher`] is always available; [`BrowserFetcher`] needs the
//! `browser` feature and a local Chromium.

#[cfg(feature = "browser")]
pub mod browser_fetcher;
pub mod fetcher;
pub mod sites;

#[cfg(feature = "browser")]
pub use browser_fetcher::BrowserFetcher;
pub use fetcher::ReqwestFetcher;
pub use sites::{LinkSelectorPaginator, QuotesExtractor, register_builtin};
