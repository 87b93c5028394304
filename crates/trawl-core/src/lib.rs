//! Core of the trawl crawler: the resumable pagination engine and the
//! stores and policies it is built from.
//!
//! Transports live in `trawl-client`; this crate only sees them through
//! [`Fetcher`].

pub mod checkpoint;
pub mod chunk;
pub mod config;
pub mod cookies;
pub mod engine;
pub mod error;
pub mod models;
pub mod registry;
pub mod retry;
pub mod stealth;
pub mod traits;

#[cfg(test)]
pub(crate) mod testutil;

pub use checkpoint::{CheckpointStore, FileCheckpointStore};
pub use chunk::ChunkWriter;
pub use config::{SiteConfig, SiteList, SitePacing};
pub use cookies::{Cookie, CookieSet};
pub use engine::{CrawlEngine, CrawlEvent, CrawlReporter, TracingCrawlReporter};
pub use error::CrawlError;
pub use models::{CrawlSummary, Item, RenderedPage, RequestIdentity, TerminationReason, VisitedSet};
pub use registry::{SiteRegistry, SiteStrategy};
pub use retry::RetryPolicy;
pub use stealth::{AntiDetectionPolicy, PacingConfig, StealthTarget};
pub use traits::{Fetcher, ItemExtractor, PaginationResolver};
