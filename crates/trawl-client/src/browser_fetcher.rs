use std::fmt::Display;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chromiumoxide::cdp::browser_protocol::emulation::SetUserAgentOverrideParams;
use chromiumoxide::cdp::browser_protocol::network::{
    CookieParam, EventResponseReceived, Headers, ResourceType, SetCookiesParams,
    SetExtraHttpHeadersParams,
};
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::cdp::browser_protocol::page::FrameId;
use chromiumoxide::listeners::EventStream;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use trawl_core::cookies::CookieSet;
use trawl_core::error::CrawlError;
use trawl_core::models::{RenderedPage, RequestIdentity};
use trawl_core::stealth::{AntiDetectionPolicy, StealthTarget};
use trawl_core::traits::Fetcher;

/// How long to wait for the document response event once navigation is done.
const STATUS_GRACE: Duration = Duration::from_secs(2);

/// Headless-browser fetcher using Chromium via the Chrome DevTools Protocol.
///
/// Unlike [`super::ReqwestFetcher`], this runs page scripts before returning
/// the HTML. Every fetch opens a fresh tab, masks the usual automation
/// fingerprints before any site script runs, applies the request identity
/// and session cookies, then navigates.
///
/// A single Chromium process is shared across all clones of this struct.
///
/// # Example
///
/// ```rust,no_run
/// use trawl_client::BrowserFetcher;
/// use trawl_core::cookies::CookieSet;
/// use trawl_core::stealth::AntiDetectionPolicy;
/// use trawl_core::traits::Fetcher;
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let fetcher = BrowserFetcher::new().await?;
/// let identity = AntiDetectionPolicy::default().next_identity();
/// let page = fetcher
///     .fetch("https://quotes.toscrape.com/", &CookieSet::default(), &identity)
///     .await?;
/// println!("{} bytes from {}", page.html.len(), page.final_url);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct BrowserFetcher {
    browser: Arc<Browser>,
    timeout: Duration,
    stealth: AntiDetectionPolicy,
}

impl BrowserFetcher {
    /// Launches a headless Chromium browser with a **30 s** navigation timeout.
    ///
    /// Requires a Chromium / Chrome binary reachable via `$PATH` (or the
    /// default locations checked by `chromiumoxide`).
    pub async fn new() -> Result<Self, CrawlError> {
        Self::launch(Duration::from_secs(30), true).await
    }

    /// Launches Chromium with a custom navigation timeout, optionally with a
    /// visible window.
    pub async fn launch(timeout: Duration, headless: bool) -> Result<Self, CrawlError> {
        let mut builder = BrowserConfig::builder();
        builder = builder.no_sandbox().disable_default_args();

        // Snap-packaged Chromium exposes a wrapper that rejects standard
        // Chrome CLI flags, so prefer the real binary when one is found.
        if let Some(bin) = Self::find_chrome_binary() {
            tracing::info!("Using Chrome binary: {}", bin.display());
            builder = builder.chrome_executable(bin);
        }

        if headless {
            builder = builder.arg("--headless=new");
        } else {
            builder = builder.with_head();
        }

        let config = builder
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-infobars")
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--disable-popup-blocking")
            .arg("--no-first-run")
            .arg("--lang=en-US")
            .arg("--window-size=1920,1080")
            .build()
            .map_err(|e| CrawlError::Browser(format!("Browser config error: {e}")))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| CrawlError::Browser(format!("Failed to launch browser: {e}")))?;

        // The CDP handler must be polled continuously for the connection to work.
        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    tracing::warn!("Browser CDP handler error: {event:?}");
                    break;
                }
            }
        });

        Ok(Self {
            browser: Arc::new(browser),
            timeout,
            stealth: AntiDetectionPolicy::default(),
        })
    }

    /// Tries to locate the real Chrome/Chromium binary.
    ///
    /// `CHROME_BIN` wins when it points at an existing file; otherwise a few
    /// well-known install paths are probed. `None` lets `chromiumoxide` do
    /// its own lookup.
    fn find_chrome_binary() -> Option<PathBuf> {
        let candidates: &[&str] = &[
            "/snap/chromium/current/usr/lib/chromium-browser/chrome",
            "/var/lib/flatpak/exports/bin/org.chromium.Chromium",
            "/usr/bin/google-chrome-stable",
            "/usr/bin/google-chrome",
            "/usr/bin/chromium",
            "/usr/bin/chromium-browser",
        ];

        if let Ok(p) = std::env::var("CHROME_BIN") {
            let path = PathBuf::from(&p);
            if path.exists() {
                return Some(path);
            }
        }

        candidates.iter().map(PathBuf::from).find(|p| p.exists())
    }

    async fn render(
        &self,
        page: &Page,
        url: &str,
        cookies: &CookieSet,
        identity: &RequestIdentity,
    ) -> Result<RenderedPage, CrawlError> {
        self.stealth.init_page(&CdpTab(page)).await;

        page.execute(SetUserAgentOverrideParams::new(identity.user_agent.clone()))
            .await
            .map_err(cdp("Failed to set user agent"))?;
        page.execute(SetExtraHttpHeadersParams::new(Headers::new(extra_headers(identity))))
            .await
            .map_err(cdp("Failed to set request headers"))?;

        let cookie_params = cookie_params(cookies, url);
        if !cookie_params.is_empty() {
            page.execute(SetCookiesParams::new(cookie_params))
                .await
                .map_err(cdp("Failed to set cookies"))?;
        }

        // Subscribe before navigating so the document response is not missed.
        let mut responses = page
            .event_listener::<EventResponseReceived>()
            .await
            .map_err(cdp("Failed to listen for responses"))?;

        page.goto(url)
            .await
            .map_err(cdp(&format!("Failed to navigate to {url}")))?;

        let final_url = page
            .url()
            .await
            .map_err(cdp("Failed to read page url"))?
            .unwrap_or_else(|| url.to_string());
        let main_frame = page.mainframe().await.ok().flatten();
        let status = check_status(
            document_status(&mut responses, main_frame.as_ref()).await,
            &final_url,
        )?;

        // <body> present is a minimal signal that the main content rendered.
        page.find_element("body")
            .await
            .map_err(cdp("Page did not render body"))?;

        let html = page
            .content()
            .await
            .map_err(cdp("Failed to read page content"))?;

        Ok(RenderedPage::new(url, html)
            .redirected_to(final_url)
            .with_status(status))
    }
}

impl Fetcher for BrowserFetcher {
    async fn fetch(
        &self,
        url: &str,
        cookies: &CookieSet,
        identity: &RequestIdentity,
    ) -> Result<RenderedPage, CrawlError> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .map_err(cdp("Failed to open tab"))?;

        let result = tokio::time::timeout(self.timeout, self.render(&page, url, cookies, identity))
            .await
            .unwrap_or(Err(CrawlError::Timeout(self.timeout.as_secs())));

        // Close the tab to free browser resources.
        let _ = page.close().await;
        result
    }
}

/// [`StealthTarget`] over a live tab.
struct CdpTab<'a>(&'a Page);

impl StealthTarget for CdpTab<'_> {
    async fn add_init_script(&self, source: &str) -> Result<(), CrawlError> {
        self.0
            .execute(AddScriptToEvaluateOnNewDocumentParams::new(source))
            .await
            .map(|_| ())
            .map_err(cdp("Failed to register init script"))
    }
}

/// Status of the main-frame document response, if one was seen.
///
/// Redirect hops do not emit `responseReceived`, so the first document
/// response in the main frame is the page that was finally loaded.
async fn document_status(
    responses: &mut EventStream<EventResponseReceived>,
    main_frame: Option<&FrameId>,
) -> Option<u16> {
    while let Ok(Some(event)) = tokio::time::timeout(STATUS_GRACE, responses.next()).await {
        let in_main_frame = main_frame.is_none() || event.frame_id.as_ref() == main_frame;
        if event.r#type == ResourceType::Document && in_main_frame {
            return u16::try_from(event.response.status).ok();
        }
    }
    None
}

/// Non-2xx documents become [`CrawlError::HttpStatus`], like the HTTP
/// transport, so the retry policy applies to rendered error pages too.
/// A missing status (served from cache, service worker) counts as 200.
fn check_status(status: Option<u16>, final_url: &str) -> Result<u16, CrawlError> {
    match status {
        None => {
            tracing::debug!(url = %final_url, "No document response seen, assuming 200");
            Ok(200)
        }
        Some(code) if (200..300).contains(&code) => Ok(code),
        Some(code) => Err(CrawlError::HttpStatus {
            status: code,
            url: final_url.to_string(),
        }),
    }
}

fn cdp<E: Display>(context: &str) -> impl Fn(E) -> CrawlError + '_ {
    move |e| CrawlError::Browser(format!("{context}: {e}"))
}

/// Identity headers for `Network.setExtraHTTPHeaders`. The user agent goes
/// through the emulation override instead.
fn extra_headers(identity: &RequestIdentity) -> serde_json::Value {
    let map: serde_json::Map<String, serde_json::Value> = identity
        .headers
        .iter()
        .filter(|(name, _)| !name.eq_ignore_ascii_case("user-agent"))
        .map(|(name, value)| (name.clone(), serde_json::Value::String(value.clone())))
        .collect();
    serde_json::Value::Object(map)
}

/// CDP cookie params for the cookies that apply to `url`.
///
/// Cookies without a domain are scoped to `url` itself. Expired cookies
/// are left out.
fn cookie_params(cookies: &CookieSet, url: &str) -> Vec<CookieParam> {
    let Ok(parsed) = url::Url::parse(url) else {
        return Vec::new();
    };

    cookies
        .iter()
        .filter(|c| !c.is_expired())
        .filter(|c| c.domain.is_empty() || c.matches(&parsed))
        .filter_map(|c| {
            let mut builder = CookieParam::builder()
                .name(c.name.clone())
                .value(c.value.clone())
                .path(c.path.clone());
            builder = if c.domain.is_empty() {
                builder.url(url)
            } else {
                builder.domain(c.domain.clone())
            };
            if let Some(secure) = c.secure {
                builder = builder.secure(secure);
            }
            if let Some(http_only) = c.http_only {
                builder = builder.http_only(http_only);
            }
            match builder.build() {
                Ok(param) => Some(param),
                Err(e) => {
                    tracing::warn!(cookie = %c.name, error = %e, "Skipping malformed cookie");
                    None
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use trawl_core::cookies::Cookie;

    use super::*;

    #[test]
    fn test_extra_headers_skip_user_agent() {
        let identity = RequestIdentity {
            user_agent: "UA".into(),
            headers: vec![
                ("User-Agent".into(), "UA".into()),
                ("Accept-Language".into(), "en-US,en;q=0.9".into()),
            ],
        };
        let headers = extra_headers(&identity);
        assert_eq!(headers["Accept-Language"], "en-US,en;q=0.9");
        assert!(headers.get("User-Agent").is_none());
    }

    #[test]
    fn test_error_document_status_is_http_status_error() {
        let policy = trawl_core::retry::RetryPolicy::default();
        let url = "https://quotes.toscrape.com/js/page/2/";

        let busy = check_status(Some(503), url).unwrap_err();
        assert!(matches!(busy, CrawlError::HttpStatus { status: 503, .. }));
        assert!(busy.is_retryable(&policy));

        let limited = check_status(Some(429), url).unwrap_err();
        assert!(limited.is_retryable(&policy));

        let gone = check_status(Some(404), url).unwrap_err();
        assert!(!gone.is_retryable(&policy));
    }

    #[test]
    fn test_success_or_unknown_document_status_passes() {
        let url = "https://quotes.toscrape.com/js/";
        assert_eq!(check_status(Some(200), url).unwrap(), 200);
        assert_eq!(check_status(Some(204), url).unwrap(), 204);
        assert_eq!(check_status(None, url).unwrap(), 200);
    }

    #[test]
    fn test_cookie_params_filter_by_domain() {
        let cookies = CookieSet::new(vec![
            Cookie::new("sid", "1", ".example.com"),
            Cookie::new("other", "2", "elsewhere.org"),
            Cookie::new("session", "abc", ""),
            Cookie {
                expires: Some(1_000_000_000.0),
                ..Cookie::new("stale", "0", ".example.com")
            },
        ]);

        let params = cookie_params(&cookies, "https://www.example.com/page/1/");
        let names: Vec<&str> = params.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["sid", "session"]);
        assert_eq!(params[1].url.as_deref(), Some("https://www.example.com/page/1/"));
    }
}
