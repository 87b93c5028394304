//! Request shaping that makes the crawl look like one person browsing.
//!
//! Three concerns live here, identical for every site:
//!
//! - **Identity rotation**: each fetch gets a user agent drawn from a fixed
//!   pool plus the header set a browser sends on a top-level navigation.
//! - **Pacing**: a uniform random pause before every pagination follow-up.
//!   Only the range is configurable per site.
//! - **Fingerprint masking**: a script registered on every rendered page
//!   before any site script runs, hiding the usual automation tells.
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use trawl_core::stealth::{AntiDetectionPolicy, PacingConfig};
//!
//! let policy = AntiDetectionPolicy::new(PacingConfig::new(
//!     Duration::from_millis(1500),
//!     Duration::from_millis(3000),
//! ));
//! let identity = policy.next_identity();
//! assert!(identity.header("Sec-Fetch-Mode").is_some());
//! let delay = policy.next_delay();
//! assert!(delay >= Duration::from_millis(1500));
//! ```

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use rand::seq::IndexedRandom;

use crate::error::CrawlError;
use crate::models::RequestIdentity;

/// Real desktop browser user agents, rotated per request.
pub const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.6099.129 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.6045.159 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.6099.129 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.2 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.6099.129 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.6045.124 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.6099.71 Safari/537.36",
];

const ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,image/apng,*/*;q=0.8,application/signed-exchange;v=b3;q=0.7";

/// Languages reported by the masked `navigator.languages`.
pub const MASKED_LANGUAGES: [&str; 2] = ["en-US", "en"];

/// Vendor/renderer returned for `UNMASKED_VENDOR_WEBGL` (37445) and
/// `UNMASKED_RENDERER_WEBGL` (37446).
pub const MASKED_GPU_VENDOR: &str = "Intel Inc.";
pub const MASKED_GPU_RENDERER: &str = "Intel Iris OpenGL Engine";

/// Script evaluated in every new document before page scripts run.
pub fn fingerprint_mask_script() -> String {
    let languages = MASKED_LANGUAGES
        .iter()
        .map(|lang| format!("'{lang}'"))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        r#"(() => {{
    Object.defineProperty(navigator, 'webdriver', {{ get: () => undefined }});
    Object.defineProperty(navigator, 'plugins', {{ get: () => [1, 2, 3, 4, 5] }});
    Object.defineProperty(navigator, 'languages', {{ get: () => [{languages}] }});
    window.chrome = {{ runtime: {{}} }};
    const originalQuery = window.navigator.permissions.query;
    window.navigator.permissions.query = (parameters) => (
        parameters.name === 'notifications'
            ? Promise.resolve({{ state: Notification.permission }})
            : originalQuery(parameters)
    );
    const getParameter = WebGLRenderingContext.prototype.getParameter;
    WebGLRenderingContext.prototype.getParameter = function (parameter) {{
        if (parameter === 37445) {{
            return '{MASKED_GPU_VENDOR}';
        }}
        if (parameter === 37446) {{
            return '{MASKED_GPU_RENDERER}';
        }}
        return getParameter.apply(this, arguments);
    }};
}})();"#
    )
}

/// A rendered page that accepts scripts to run before its own.
///
/// Implemented by the browser transport; tests use a recording mock.
pub trait StealthTarget: Send + Sync {
    fn add_init_script(&self, source: &str) -> impl Future<Output = Result<(), CrawlError>> + Send;
}

/// Range of the random pause before each pagination follow-up.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PacingConfig {
    pub delay_min: Duration,
    pub delay_max: Duration,
}

impl PacingConfig {
    /// Range `[min, max]`; the bounds are swapped if given in reverse.
    pub fn new(delay_min: Duration, delay_max: Duration) -> Self {
        if delay_min <= delay_max {
            Self { delay_min, delay_max }
        } else {
            Self {
                delay_min: delay_max,
                delay_max: delay_min,
            }
        }
    }

    /// No pause at all. Used by tests and local fixtures.
    pub fn none() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }
}

impl Default for PacingConfig {
    /// 1.5 to 3.0 seconds between pages.
    fn default() -> Self {
        Self {
            delay_min: Duration::from_millis(1500),
            delay_max: Duration::from_millis(3000),
        }
    }
}

/// Identity rotation, pacing, and the fingerprint-mask hook.
#[derive(Debug, Clone, Default)]
pub struct AntiDetectionPolicy {
    pacing: PacingConfig,
}

impl AntiDetectionPolicy {
    pub fn new(pacing: PacingConfig) -> Self {
        Self { pacing }
    }

    pub fn pacing(&self) -> PacingConfig {
        self.pacing
    }

    /// A fresh user agent and navigation header set for one request.
    pub fn next_identity(&self) -> RequestIdentity {
        let mut rng = rand::rng();
        let user_agent = USER_AGENTS.choose(&mut rng).copied().unwrap_or(USER_AGENTS[0]);
        let quality: f64 = rng.random_range(0.8..=1.0);

        let headers = [
            ("Accept", ACCEPT.to_string()),
            ("Accept-Language", format!("en-US,en;q={quality:.1}")),
            ("Accept-Encoding", "gzip, deflate, br".to_string()),
            ("DNT", "1".to_string()),
            ("Connection", "keep-alive".to_string()),
            ("Upgrade-Insecure-Requests", "1".to_string()),
            ("Sec-Fetch-Dest", "document".to_string()),
            ("Sec-Fetch-Mode", "navigate".to_string()),
            ("Sec-Fetch-Site", "none".to_string()),
            ("Sec-Fetch-User", "?1".to_string()),
            ("Cache-Control", "max-age=0".to_string()),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        tracing::debug!(%user_agent, "Rotated request identity");

        RequestIdentity {
            user_agent: user_agent.to_string(),
            headers,
        }
    }

    /// Uniform random pause in the configured range.
    pub fn next_delay(&self) -> Duration {
        let PacingConfig { delay_min, delay_max } = self.pacing;
        if delay_max <= delay_min {
            return delay_min;
        }
        let secs = rand::rng().random_range(delay_min.as_secs_f64()..=delay_max.as_secs_f64());
        Duration::from_secs_f64(secs)
    }

    /// Register the fingerprint mask on a freshly opened page.
    ///
    /// Never fails: a page that could not be masked is still fetched.
    pub async fn init_page<T: StealthTarget>(&self, page: &T) {
        match page.add_init_script(&fingerprint_mask_script()).await {
            Ok(()) => tracing::debug!("Fingerprint mask registered"),
            Err(e) => tracing::warn!(error = %e, "Could not register fingerprint mask"),
        }
    }
}
