use std::time::Duration;

use reqwest::Client;
use reqwest::header::{COOKIE, USER_AGENT};
use reqwest::redirect::Policy;
use trawl_core::cookies::CookieSet;
use trawl_core::error::CrawlError;
use trawl_core::models::{RenderedPage, RequestIdentity};
use trawl_core::traits::Fetcher;
use url::Url;

const MAX_REDIRECTS: usize = 10;

/// Plain HTTP fetcher using reqwest.
///
/// Sends the per-request identity and the session cookies that match the
/// URL, follows redirects, and reports the URL it finally landed on so the
/// engine can spot a bounce to the login page. Does not run page scripts.
#[derive(Clone)]
pub struct ReqwestFetcher {
    client: Client,
    timeout_secs: u64,
}

impl ReqwestFetcher {
    pub fn new() -> Result<Self, CrawlError> {
        Self::with_timeout(Duration::from_secs(30))
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, CrawlError> {
        let client = Client::builder()
            .timeout(timeout)
            .redirect(Policy::limited(MAX_REDIRECTS))
            .build()
            .map_err(|e| CrawlError::Network(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            timeout_secs: timeout.as_secs(),
        })
    }
}

impl Fetcher for ReqwestFetcher {
    async fn fetch(
        &self,
        url: &str,
        cookies: &CookieSet,
        identity: &RequestIdentity,
    ) -> Result<RenderedPage, CrawlError> {
        validate_url(url)?;

        let mut request = self
            .client
            .get(url)
            .header(USER_AGENT, identity.user_agent.as_str());
        for (name, value) in &identity.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(cookie_header) = cookies.header_for(url) {
            request = request.header(COOKIE, cookie_header);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                CrawlError::Timeout(self.timeout_secs)
            } else if e.is_connect() {
                CrawlError::Network(format!("Connection failed: {e}"))
            } else if e.is_redirect() {
                CrawlError::Network(format!("Too many redirects: {e}"))
            } else {
                CrawlError::Network(e.to_string())
            }
        })?;

        let status = response.status();
        let final_url = response.url().to_string();
        if !status.is_success() {
            return Err(CrawlError::HttpStatus {
                status: status.as_u16(),
                url: final_url,
            });
        }

        let html = response.text().await.map_err(|e| {
            if e.is_timeout() {
                CrawlError::Timeout(self.timeout_secs)
            } else {
                CrawlError::Network(format!("Failed to read response body: {e}"))
            }
        })?;

        Ok(RenderedPage::new(url, html)
            .redirected_to(final_url)
            .with_status(status.as_u16()))
    }
}

/// Only absolute `http`/`https` URLs are fetched.
fn validate_url(url: &str) -> Result<(), CrawlError> {
    let parsed = Url::parse(url).map_err(|e| CrawlError::Config(format!("Invalid URL '{url}': {e}")))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        scheme => Err(CrawlError::Config(format!(
            "URL scheme '{scheme}' is not allowed (only http/https)"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use trawl_core::cookies::Cookie;
    use trawl_core::retry::RetryPolicy;
    use trawl_core::stealth::AntiDetectionPolicy;
    use wiremock::matchers::{header, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn identity() -> RequestIdentity {
        AntiDetectionPolicy::default().next_identity()
    }

    #[tokio::test]
    async fn test_fetch_sends_identity_and_cookies() {
        let server = MockServer::start().await;
        let ident = identity();
        Mock::given(method("GET"))
            .and(path("/page/1/"))
            .and(header_exists("user-agent"))
            .and(header("cookie", "session=abc"))
            .and(header_exists("sec-fetch-mode"))
            .and(header_exists("accept-language"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>ok</html>"))
            .expect(1)
            .mount(&server)
            .await;

        let cookies = CookieSet::new(vec![Cookie::new("session", "abc", "127.0.0.1")]);
        let url = format!("{}/page/1/", server.uri());
        let page = ReqwestFetcher::new()
            .unwrap()
            .fetch(&url, &cookies, &ident)
            .await
            .unwrap();

        assert_eq!(page.html, "<html>ok</html>");
        assert_eq!(page.status, 200);
        assert_eq!(page.final_url, url);
        assert_eq!(page.requested_url, url);

        let received = server.received_requests().await.unwrap();
        let sent_ua = received[0].headers.get("user-agent").unwrap().to_str().unwrap();
        assert_eq!(sent_ua, ident.user_agent);
    }

    #[tokio::test]
    async fn test_fetch_reports_final_url_after_redirect() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/page/2/"))
            .respond_with(
                ResponseTemplate::new(302).insert_header("location", "/login?next=/page/2/"),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/login"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<form></form>"))
            .mount(&server)
            .await;

        let url = format!("{}/page/2/", server.uri());
        let page = ReqwestFetcher::new()
            .unwrap()
            .fetch(&url, &CookieSet::default(), &identity())
            .await
            .unwrap();

        assert_eq!(page.requested_url, url);
        assert!(page.final_url.contains("/login"));
    }

    #[tokio::test]
    async fn test_fetch_maps_status_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/busy"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/gone"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let fetcher = ReqwestFetcher::new().unwrap();
        let policy = RetryPolicy::default();

        let busy = fetcher
            .fetch(&format!("{}/busy", server.uri()), &CookieSet::default(), &identity())
            .await
            .unwrap_err();
        assert!(matches!(busy, CrawlError::HttpStatus { status: 503, .. }));
        assert!(busy.is_retryable(&policy));

        let gone = fetcher
            .fetch(&format!("{}/gone", server.uri()), &CookieSet::default(), &identity())
            .await
            .unwrap_err();
        assert!(matches!(gone, CrawlError::HttpStatus { status: 404, .. }));
        assert!(!gone.is_retryable(&policy));
    }

    #[tokio::test]
    async fn test_fetch_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("late")
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&server)
            .await;

        let fetcher = ReqwestFetcher::with_timeout(Duration::from_millis(200)).unwrap();
        let err = fetcher
            .fetch(&server.uri(), &CookieSet::default(), &identity())
            .await
            .unwrap_err();
        assert!(matches!(err, CrawlError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_fetch_connection_refused_is_network_error() {
        let fetcher = ReqwestFetcher::new().unwrap();
        let err = fetcher
            .fetch("http://127.0.0.1:1/", &CookieSet::default(), &identity())
            .await
            .unwrap_err();
        assert!(matches!(err, CrawlError::Network(_)));
    }

    #[tokio::test]
    async fn test_rejects_non_http_scheme() {
        let fetcher = ReqwestFetcher::new().unwrap();
        let err = fetcher
            .fetch("file:///etc/passwd", &CookieSet::default(), &identity())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not allowed"));
    }
}
