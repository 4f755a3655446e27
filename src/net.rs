//! Retrying HTTP fetch shared by every source.
//!
//! Client errors (4xx other than 429) mean "this page does not exist" and come
//! back as `Ok(None)`. Server errors, 429 and transport failures are retried
//! with exponential backoff before giving up with a [`FetchError`].

use std::borrow::Cow;
use std::time::Duration;

use reqwest::{Client, StatusCode, Url};
use tracing::{debug, info, warn};

use crate::config::HttpConfig;
use crate::error::FetchError;

/// Upper bound for a single backoff sleep.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Query parameters whose values never appear in logs.
const SECRET_PARAMS: &[&str] = &["app_id", "api_key", "apikey", "token"];

#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    max_retries: u32,
    retry_base_delay: Duration,
}

impl HttpFetcher {
    /// Creates a fetcher whose client honours the configured timeout and user agent.
    pub fn new(config: &HttpConfig) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(FetchError::Client)?;

        Ok(Self {
            client,
            max_retries: config.max_retries,
            retry_base_delay: config.retry_base_delay,
        })
    }

    /// Creates a fetcher around an existing client, with default retry settings.
    pub fn with_client(client: Client) -> Self {
        let defaults = HttpConfig::default();
        Self {
            client,
            max_retries: defaults.max_retries,
            retry_base_delay: defaults.retry_base_delay,
        }
    }

    pub fn with_retries(mut self, max_retries: u32, retry_base_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_base_delay = retry_base_delay;
        self
    }

    /// Fetches `url`, returning the body, `None` for a missing page, or an
    /// error once retries are exhausted.
    pub async fn fetch(&self, url: &str) -> Result<Option<Vec<u8>>, FetchError> {
        let shown = redact(url);
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            info!(url = %shown, attempt, "fetching");

            match self.client.get(url).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let body = response.bytes().await.map_err(|source| FetchError::Http {
                            url: shown.to_string(),
                            source,
                        })?;
                        debug!(url = %shown, bytes = body.len(), "fetched");
                        return Ok(Some(body.to_vec()));
                    }

                    if !Self::is_retryable(status) {
                        debug!(url = %shown, status = status.as_u16(), "page not available");
                        return Ok(None);
                    }

                    if attempt > self.max_retries {
                        return Err(FetchError::Server {
                            url: shown.to_string(),
                            status: status.as_u16(),
                            attempts: attempt,
                        });
                    }
                    warn!(url = %shown, status = status.as_u16(), attempt, "retryable HTTP status");
                }
                Err(source) => {
                    if attempt > self.max_retries {
                        return Err(FetchError::Http {
                            url: shown.to_string(),
                            source,
                        });
                    }
                    warn!(url = %shown, error = %source, attempt, "request failed");
                }
            }

            tokio::time::sleep(self.backoff(attempt)).await;
        }
    }

    fn is_retryable(status: StatusCode) -> bool {
        status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
    }

    /// Delay before retry number `attempt` (1-based): base, 2x base, 4x base, ...
    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.retry_base_delay
            .saturating_mul(factor)
            .min(MAX_BACKOFF)
    }
}

/// The URL with secret query parameter values masked, for logging.
pub fn redact(url: &str) -> Cow<'_, str> {
    let Ok(mut parsed) = Url::parse(url) else {
        return Cow::Borrowed(url);
    };

    let has_secret = parsed
        .query_pairs()
        .any(|(key, _)| SECRET_PARAMS.contains(&key.as_ref()));
    if !has_secret {
        return Cow::Borrowed(url);
    }

    let pairs: Vec<(String, String)> = parsed
        .query_pairs()
        .map(|(key, value)| {
            let value = if SECRET_PARAMS.contains(&key.as_ref()) {
                "***".to_string()
            } else {
                value.into_owned()
            };
            (key.into_owned(), value)
        })
        .collect();

    parsed.query_pairs_mut().clear().extend_pairs(pairs);
    Cow::Owned(parsed.to_string())
}
