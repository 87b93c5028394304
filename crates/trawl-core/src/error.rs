use thiserror::Error;

use crate::retry::RetryPolicy;

/// Error types shared by the engine, its stores, and the transports.
#[derive(Error, Debug)]
pub enum CrawlError {
    /// Missing or invalid alias, malformed site list, bad override value.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The fetched page signals that the captured session is no longer valid.
    #[error("Session expired for '{alias}' (landed on {url})")]
    SessionExpired { alias: String, url: String },

    /// A fetch exhausted its retry budget or failed permanently.
    #[error("Fetch failed for {url} after {attempts} attempt(s): {message}")]
    FetchFailed {
        url: String,
        attempts: u32,
        message: String,
    },

    /// The server answered with a non-success status.
    #[error("HTTP {status} for {url}")]
    HttpStatus { status: u16, url: String },

    /// Network/connection error.
    #[error("Network error: {0}")]
    Network(String),

    /// Request timed out.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// Headless browser failed to launch, navigate or render.
    #[error("Browser error: {0}")]
    Browser(String),

    /// A checkpoint file exists but could not be read back.
    #[error("Checkpoint corrupt at {path}: {message}")]
    CheckpointCorrupt { path: String, message: String },

    /// A chunk flush could not be written.
    #[error("Failed to write {path}: {message}")]
    WriteFailed { path: String, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CrawlError {
    /// Returns true if this error is transient and the fetch is worth retrying.
    pub fn is_retryable(&self, policy: &RetryPolicy) -> bool {
        match self {
            CrawlError::Network(_) | CrawlError::Timeout(_) => true,
            CrawlError::HttpStatus { status, .. } => policy.is_retryable_status(*status),
            CrawlError::Browser(msg) => {
                msg.contains("timeout") || msg.contains("net::ERR") || msg.contains("reset")
            }
            _ => false,
        }
    }
}
