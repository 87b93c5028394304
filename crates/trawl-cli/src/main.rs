use std::fs::OpenOptions;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

use trawl_client::{ReqwestFetcher, register_builtin};
use trawl_core::checkpoint::FileCheckpointStore;
use trawl_core::config::{DEFAULT_SITE_LIST, SiteConfig, SiteList};
use trawl_core::cookies::CookieSet;
use trawl_core::engine::{CrawlEngine, TracingCrawlReporter};
use trawl_core::models::{CrawlSummary, TerminationReason};
use trawl_core::registry::{SiteRegistry, SiteStrategy};
use trawl_core::traits::Fetcher;

const EXIT_CONFIG: u8 = 1;
const EXIT_FETCH_FAILED: u8 = 2;
const EXIT_SESSION_EXPIRED: u8 = 3;

const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(
    name = "trawl",
    version,
    about = "Resumable paginated crawler that replays a captured browser session"
)]
struct Cli {
    /// Site alias to crawl; prompts for one when omitted
    alias: Option<String>,

    /// Site list (JSON array of site records)
    #[arg(short, long, env = "TRAWL_CONFIG", default_value = DEFAULT_SITE_LIST)]
    config: PathBuf,

    /// Directory holding `{alias}_scraped_pages.json` checkpoints
    #[arg(long, env = "TRAWL_STATE_DIR", default_value = ".trawl")]
    state_dir: PathBuf,

    /// Directory holding `{alias}_cookies.json` session captures
    #[arg(long, env = "TRAWL_COOKIES_DIR", default_value = ".")]
    cookies_dir: PathBuf,

    /// Items per output file, overriding the site's value (0 = single file)
    #[arg(long)]
    chunk_size: Option<usize>,

    /// Print the configured aliases and exit
    #[arg(long, default_value_t = false)]
    list: bool,

    /// How pages are fetched
    #[arg(short, long, value_enum, env = "TRAWL_TRANSPORT", default_value_t = Transport::Http)]
    transport: Transport,

    /// Show the browser window (browser transport only)
    #[arg(long, default_value_t = false)]
    headed: bool,

    /// Forget visited pages for this alias before crawling
    #[arg(long, default_value_t = false)]
    reset: bool,

    /// Also append logs to this file
    #[arg(long, env = "TRAWL_LOG_FILE")]
    log_file: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Transport {
    /// Plain HTTP requests, no page scripts
    Http,
    /// Headless Chromium with fingerprint masking
    Browser,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    if let Err(e) = init_tracing(cli.log_file.as_deref()) {
        eprintln!("Error: {e:#}");
        return ExitCode::from(EXIT_CONFIG);
    }

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::from(EXIT_CONFIG)
        }
    }
}

fn init_tracing(log_file: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::from_default_env().add_directive("trawl=info".parse()?);

    let file_layer = match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file: {}", path.display()))?;
            Some(
                fmt::layer()
                    .with_target(false)
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(file_layer)
        .init();
    Ok(())
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let sites = SiteList::load(&cli.config)
        .with_context(|| format!("Failed to load site list: {}", cli.config.display()))?;

    if cli.list {
        for site in sites.iter() {
            println!("{}\t{}", site.alias, site.start_url);
        }
        return Ok(ExitCode::SUCCESS);
    }

    let alias = match cli.alias.clone() {
        Some(alias) => alias,
        None => match select_site(&sites)? {
            Some(alias) => alias,
            None => {
                eprintln!("Cancelled.");
                return Ok(ExitCode::SUCCESS);
            }
        },
    };

    let mut site = sites.get(&alias)?.clone();
    if let Some(chunk_size) = cli.chunk_size {
        site.chunk_size = chunk_size;
    }

    let cookies = CookieSet::load(&cli.cookies_dir.join(CookieSet::file_name(&alias)));
    if cookies.is_empty() {
        tracing::warn!(
            %alias,
            "Capture a logged-in session into {} if the site requires one",
            CookieSet::file_name(&alias)
        );
    }

    let store = FileCheckpointStore::new(&cli.state_dir);
    if cli.reset && store.reset(&alias).await? {
        tracing::info!(%alias, "Checkpoint cleared");
    }

    let mut registry = SiteRegistry::new();
    register_builtin(&mut registry)?;
    let strategy = registry.resolve(&site);

    let cancel = CancellationToken::new();
    cancel_on_shutdown(cancel.clone()).context("Failed to install signal handlers")?;

    let timeout = site.pacing.fetch_timeout.unwrap_or(DEFAULT_FETCH_TIMEOUT);
    let summary = match cli.transport {
        Transport::Http => {
            let fetcher =
                ReqwestFetcher::with_timeout(timeout).context("Failed to create HTTP client")?;
            crawl(fetcher, store, &site, &cookies, &strategy, cancel).await
        }
        Transport::Browser => {
            #[cfg(feature = "browser")]
            {
                let fetcher = trawl_client::BrowserFetcher::launch(timeout, !cli.headed)
                    .await
                    .context("Failed to launch browser")?;
                crawl(fetcher, store, &site, &cookies, &strategy, cancel).await
            }
            #[cfg(not(feature = "browser"))]
            {
                let _ = cli.headed;
                bail!("This build has no browser support; rebuild with `--features browser`");
            }
        }
    };

    println!("{}", serde_json::to_string_pretty(&summary)?);

    if summary.termination == TerminationReason::SessionExpired {
        eprintln!("{}", session_hint(&site));
    }

    Ok(ExitCode::from(exit_code(&summary)))
}

async fn crawl<F: Fetcher>(
    fetcher: F,
    store: FileCheckpointStore,
    site: &SiteConfig,
    cookies: &CookieSet,
    strategy: &SiteStrategy,
    cancel: CancellationToken,
) -> CrawlSummary {
    CrawlEngine::new(fetcher, store)
        .run(site, cookies, strategy, cancel, &TracingCrawlReporter)
        .await
}

/// Cancel `cancel` on Ctrl-C, or on SIGTERM where there is one.
///
/// The SIGTERM handler is installed before returning, so a `kill` right
/// after startup already ends in a clean close and checkpoint save.
fn cancel_on_shutdown(cancel: CancellationToken) -> std::io::Result<()> {
    #[cfg(unix)]
    let mut terminate =
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::spawn(async move {
        #[cfg(unix)]
        let terminated = terminate.recv();
        #[cfg(not(unix))]
        let terminated = std::future::pending::<Option<()>>();

        tokio::select! {
            Ok(()) = tokio::signal::ctrl_c() => {
                tracing::warn!("Interrupted, finishing the current page and saving state");
            }
            _ = terminated => {
                tracing::warn!("Terminated, finishing the current page and saving state");
            }
            else => return,
        }
        cancel.cancel();
    });
    Ok(())
}

fn exit_code(summary: &CrawlSummary) -> u8 {
    match summary.termination {
        reason if reason.is_success() => 0,
        TerminationReason::SessionExpired => EXIT_SESSION_EXPIRED,
        _ => EXIT_FETCH_FAILED,
    }
}

fn session_hint(site: &SiteConfig) -> String {
    let login = site
        .login_url
        .as_deref()
        .map(|u| format!(", log in at {u}"))
        .unwrap_or_default();
    format!(
        "Session for '{}' has expired{}. Save fresh cookies to {} and rerun; the crawl resumes where it stopped.",
        site.alias,
        login,
        CookieSet::file_name(&site.alias)
    )
}

/// Print the site menu on stderr and read a choice from stdin.
///
/// `Ok(None)` means the user cancelled.
fn select_site(sites: &SiteList) -> Result<Option<String>> {
    if sites.is_empty() {
        bail!("No sites configured");
    }

    let mut err = std::io::stderr().lock();
    writeln!(err, "\n{}", "=".repeat(60))?;
    writeln!(err, "Select a website to crawl:")?;
    writeln!(err, "{}", "=".repeat(60))?;
    for (i, site) in sites.iter().enumerate() {
        writeln!(err, "  [{}] {}", i + 1, site.alias)?;
        writeln!(err, "      Start URL: {}", site.start_url)?;
        writeln!(err, "      Output: {}", site.output_path.display())?;
    }
    writeln!(err, "\n  [0] Cancel")?;
    writeln!(err, "{}", "-".repeat(60))?;
    write!(err, "Enter your choice (0-{}): ", sites.len())?;
    err.flush()?;

    let mut line = String::new();
    if std::io::stdin().lock().read_line(&mut line)? == 0 {
        return Ok(None);
    }

    match parse_choice(&line, sites.len())? {
        Some(index) => Ok(sites.iter().nth(index).map(|s| s.alias.clone())),
        None => Ok(None),
    }
}

/// Zero-based index for a menu answer, `None` for `0` (cancel).
fn parse_choice(input: &str, count: usize) -> Result<Option<usize>> {
    let choice: usize = input
        .trim()
        .parse()
        .with_context(|| format!("Please enter a number between 0 and {count}"))?;
    match choice {
        0 => Ok(None),
        n if n <= count => Ok(Some(n - 1)),
        _ => bail!("Invalid choice {choice}; expected a number between 0 and {count}"),
    }
}
