use std::collections::HashSet;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::checkpoint::CheckpointStore;
use crate::chunk::ChunkWriter;
use crate::config::SiteConfig;
use crate::cookies::CookieSet;
use crate::error::CrawlError;
use crate::models::{CrawlRunState, CrawlSummary, RenderedPage, TerminationReason};
use crate::registry::SiteStrategy;
use crate::stealth::AntiDetectionPolicy;
use crate::traits::Fetcher;

/// Events emitted by the engine for monitoring/logging.
#[derive(Debug, Clone)]
pub enum CrawlEvent<'a> {
    RunStarted {
        run_id: Uuid,
        alias: &'a str,
        start_url: &'a str,
        already_visited: usize,
    },
    Fetching {
        url: &'a str,
        request: u64,
    },
    FetchRetry {
        url: &'a str,
        attempt: u32,
        error: &'a str,
        delay: Duration,
    },
    PageExtracted {
        url: &'a str,
        items: usize,
    },
    PageSkipped {
        url: &'a str,
    },
    FollowingNext {
        url: &'a str,
        delay: Duration,
    },
    PaginationEnded {
        url: &'a str,
        reason: &'a str,
    },
    SessionExpired {
        alias: &'a str,
        url: &'a str,
        login_url: Option<&'a str>,
    },
    RunFinished {
        summary: &'a CrawlSummary,
    },
}

/// Trait for receiving engine events (decoupled logging).
pub trait CrawlReporter: Send + Sync {
    fn report(&self, event: CrawlEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingCrawlReporter;

impl CrawlReporter for TracingCrawlReporter {
    fn report(&self, event: CrawlEvent<'_>) {
        match event {
            CrawlEvent::RunStarted {
                run_id,
                alias,
                start_url,
                already_visited,
            } => {
                tracing::info!(%run_id, %alias, %start_url, %already_visited, "Crawl started");
            }
            CrawlEvent::Fetching { url, request } => {
                tracing::info!(%request, %url, "Fetching");
            }
            CrawlEvent::FetchRetry {
                url,
                attempt,
                error,
                delay,
            } => {
                tracing::warn!(%url, %attempt, %error, delay_ms = %delay.as_millis(), "Fetch failed, retrying");
            }
            CrawlEvent::PageExtracted { url, items } => {
                tracing::info!(%url, %items, "Page extracted and checkpointed");
            }
            CrawlEvent::PageSkipped { url } => {
                tracing::info!(%url, "Skipping already scraped page, following pagination only");
            }
            CrawlEvent::FollowingNext { url, delay } => {
                tracing::debug!(%url, delay_ms = %delay.as_millis(), "Waiting before next page");
            }
            CrawlEvent::PaginationEnded { url, reason } => {
                tracing::info!(%url, %reason, "Pagination ended");
            }
            CrawlEvent::SessionExpired {
                alias,
                url,
                login_url,
            } => {
                tracing::error!(%alias, %url, "Redirected to login page, cookies are invalid or expired");
                tracing::error!(
                    "Capture a fresh session for '{}' and save it as {}{}",
                    alias,
                    CookieSet::file_name(alias),
                    login_url
                        .map(|u| format!(" (log in at {u})"))
                        .unwrap_or_default()
                );
            }
            CrawlEvent::RunFinished { summary } => {
                tracing::info!(
                    alias = %summary.alias,
                    termination = %summary.termination,
                    requests = summary.requests,
                    items = summary.items,
                    chunks = summary.chunks_written,
                    "Crawl finished"
                );
            }
        }
    }
}

/// Why a fetch did not produce a page.
enum FetchAbort {
    Cancelled,
    Failed(CrawlError),
}

/// Drives the page-by-page chain for one site.
///
/// Strictly sequential: at most one fetch is in flight and there is a single
/// pending "next" URL, because each URL is only known from the page before it.
pub struct CrawlEngine<F, S>
where
    F: Fetcher,
    S: CheckpointStore,
{
    fetcher: F,
    checkpoints: S,
}

impl<F, S> CrawlEngine<F, S>
where
    F: Fetcher,
    S: CheckpointStore,
{
    pub fn new(fetcher: F, checkpoints: S) -> Self {
        Self {
            fetcher,
            checkpoints,
        }
    }

    /// Crawl `site` from its start URL until pagination ends or the run fails.
    ///
    /// Pages already in the checkpoint are fetched for their pagination link
    /// but not extracted again. Every ending, failures included, closes the
    /// chunk writer and saves the checkpoint before the summary is returned.
    pub async fn run<R: CrawlReporter>(
        &self,
        site: &SiteConfig,
        cookies: &CookieSet,
        strategy: &SiteStrategy,
        cancel_token: CancellationToken,
        reporter: &R,
    ) -> CrawlSummary {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let alias = site.alias.as_str();
        let policy = AntiDetectionPolicy::new(site.pacing.pacing);

        let mut visited = self.checkpoints.load(alias).await;
        let mut writer = ChunkWriter::open(&site.output_path, site.chunk_size);
        let mut state = CrawlRunState::default();
        // URLs fetched during this run; reaching one again means a loop.
        let mut reached: HashSet<String> = HashSet::new();
        let mut pending = Some(site.start_url.clone());

        reporter.report(CrawlEvent::RunStarted {
            run_id,
            alias,
            start_url: &site.start_url,
            already_visited: visited.len(),
        });

        let (termination, detail) = loop {
            let Some(url) = pending.take() else {
                break (TerminationReason::Completed, None);
            };
            if cancel_token.is_cancelled() {
                break (TerminationReason::Cancelled, None);
            }
            reached.insert(url.clone());

            let page = match self
                .fetch_with_retry(site, &url, cookies, &policy, &mut state, &cancel_token, reporter)
                .await
            {
                Ok(page) => page,
                Err(FetchAbort::Cancelled) => break (TerminationReason::Cancelled, None),
                Err(FetchAbort::Failed(e)) => {
                    tracing::error!(%alias, %url, error = %e, "Giving up on page");
                    break (TerminationReason::FetchFailed, Some(e.to_string()));
                }
            };

            if site.session_expired(&page) {
                reporter.report(CrawlEvent::SessionExpired {
                    alias,
                    url: &page.final_url,
                    login_url: site.login_url.as_deref(),
                });
                let err = CrawlError::SessionExpired {
                    alias: alias.to_string(),
                    url: page.final_url.clone(),
                };
                break (TerminationReason::SessionExpired, Some(err.to_string()));
            }

            if visited.contains(&url) {
                state.pages_skipped += 1;
                reporter.report(CrawlEvent::PageSkipped { url: &url });
            } else {
                let items = strategy.extractor.extract_items(&page);
                let count = items.len();
                for item in items {
                    writer.append(item).await;
                    state.items += 1;
                    if state.items % 10 == 0 {
                        tracing::info!(%alias, items = state.items, "Total items extracted so far");
                    }
                }
                state.pages_extracted += 1;

                visited.insert(url.clone());
                if let Err(e) = self.checkpoints.save(alias, &visited).await {
                    tracing::error!(%alias, %url, error = %e, "Failed to save checkpoint");
                }
                reporter.report(CrawlEvent::PageExtracted { url: &url, items: count });
            }

            match self.next_hop(site, strategy, &page, &reached) {
                Err(reason) => {
                    reporter.report(CrawlEvent::PaginationEnded { url: &url, reason });
                    break (TerminationReason::Completed, None);
                }
                Ok(next) => {
                    let delay = policy.next_delay();
                    reporter.report(CrawlEvent::FollowingNext { url: &next, delay });
                    if !sleep_or_cancel(delay, &cancel_token).await {
                        break (TerminationReason::Cancelled, None);
                    }
                    pending = Some(next);
                }
            }
        };

        if let Err(e) = writer.close().await {
            tracing::error!(%alias, error = %e, "Final flush failed, buffered items are lost");
        }
        if let Err(e) = self.checkpoints.save(alias, &visited).await {
            tracing::error!(%alias, error = %e, "Final checkpoint save failed");
        }

        let summary = CrawlSummary::from_state(
            run_id,
            alias,
            &state,
            writer.chunks_written(),
            termination,
            detail,
            started_at,
        );
        reporter.report(CrawlEvent::RunFinished { summary: &summary });
        summary
    }

    /// Next URL to follow, or why the chain stops here.
    fn next_hop(
        &self,
        site: &SiteConfig,
        strategy: &SiteStrategy,
        page: &RenderedPage,
        reached: &HashSet<String>,
    ) -> Result<String, &'static str> {
        let next = strategy
            .paginator
            .next_url(page)
            .ok_or("no next page")?;
        if reached.contains(&next) {
            return Err("next page already reached in this run");
        }
        if !site.is_allowed(&next) {
            return Err("next page is outside the allowed domains");
        }
        Ok(next)
    }

    /// Fetch `url` with a fresh identity per attempt, retrying transient
    /// failures with escalating delays.
    #[allow(clippy::too_many_arguments)]
    async fn fetch_with_retry<R: CrawlReporter>(
        &self,
        site: &SiteConfig,
        url: &str,
        cookies: &CookieSet,
        policy: &AntiDetectionPolicy,
        state: &mut CrawlRunState,
        cancel_token: &CancellationToken,
        reporter: &R,
    ) -> Result<RenderedPage, FetchAbort> {
        let retry = &site.pacing.retry;
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            state.requests += 1;
            reporter.report(CrawlEvent::Fetching {
                url,
                request: state.requests,
            });

            let identity = policy.next_identity();
            let fetch = self.fetcher.fetch(url, cookies, &identity);
            let result = match site.pacing.fetch_timeout {
                Some(limit) => tokio::time::timeout(limit, fetch)
                    .await
                    .unwrap_or(Err(CrawlError::Timeout(limit.as_secs()))),
                None => fetch.await,
            };

            let err = match result {
                Ok(page) => return Ok(page),
                Err(e) => e,
            };

            if attempt > retry.max_retries || !err.is_retryable(retry) {
                return Err(FetchAbort::Failed(CrawlError::FetchFailed {
                    url: url.to_string(),
                    attempts: attempt,
                    message: err.to_string(),
                }));
            }

            let delay = retry.delay_for_attempt(attempt);
            let message = err.to_string();
            reporter.report(CrawlEvent::FetchRetry {
                url,
                attempt,
                error: &message,
                delay,
            });
            if !sleep_or_cancel(delay, cancel_token).await {
                return Err(FetchAbort::Cancelled);
            }
        }
    }
}

/// Sleep for `delay` unless cancelled first. Returns `false` on cancellation.
async fn sleep_or_cancel(delay: Duration, cancel_token: &CancellationToken) -> bool {
    tokio::select! {
        () = tokio::time::sleep(delay) => true,
        () = cancel_token.cancelled() => false,
    }
}
