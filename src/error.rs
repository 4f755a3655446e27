//! Error types for the fetch and page-decoding layers.
//!
//! None of these reach the host ledger as failures: the resolver turns
//! [`FetchError`] and [`SourceError`] into a missing price. Only
//! [`TickerError`] (a caller handing us something we cannot parse) surfaces.

use std::fmt::Display;

use thiserror::Error;

/// Errors from the HTTP fetch layer, after retries were exhausted.
#[derive(Error, Debug)]
pub enum FetchError {
    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    /// Transport-level failure (DNS, connect, timeout, body read).
    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The server kept answering with a retryable status.
    #[error("{url} returned HTTP {status} after {attempts} attempts")]
    Server {
        url: String,
        status: u16,
        attempts: u32,
    },
}

/// Errors while turning a fetched page into observations.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// The page did not have the structure the source expects.
    #[error("malformed {format} page: {message}")]
    Malformed {
        format: &'static str,
        message: String,
    },

    /// The provider answered, but reported a failure in its payload.
    #[error("provider reported status {code}: {message}")]
    Status { code: i64, message: String },
}

impl SourceError {
    pub fn malformed(format: &'static str, message: impl Display) -> Self {
        Self::Malformed {
            format,
            message: message.to_string(),
        }
    }
}

/// A ticker string that a source cannot interpret.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid {provider} ticker '{ticker}': {reason}")]
pub struct TickerError {
    pub provider: &'static str,
    pub ticker: String,
    pub reason: String,
}

impl TickerError {
    pub fn new(provider: &'static str, ticker: &str, reason: impl Into<String>) -> Self {
        Self {
            provider,
            ticker: ticker.to_string(),
            reason: reason.into(),
        }
    }
}
