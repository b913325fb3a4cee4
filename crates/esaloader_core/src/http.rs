use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use log::warn;
use reqwest::blocking::Client;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, RETRY_AFTER};
use reqwest::{StatusCode, Url};
use thiserror::Error;

use crate::config::EsaConfig;

/// Result of a single GET attempt, before any retry decision is made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HttpOutcome {
    Success(Vec<u8>),
    /// Carries the server-suggested wait in seconds, when one was sent.
    RateLimited(Option<u64>),
    Unauthorized,
    NotFound,
    ClientError(u16),
    ServerError(u16),
    NetworkError(String),
}

impl HttpOutcome {
    /// Map a non-success status to its outcome. Returns `None` for 2xx.
    pub fn from_status(status: StatusCode, retry_after: Option<u64>) -> Option<Self> {
        if status.is_success() {
            return None;
        }
        let outcome = match status {
            StatusCode::TOO_MANY_REQUESTS => Self::RateLimited(retry_after),
            StatusCode::UNAUTHORIZED => Self::Unauthorized,
            StatusCode::NOT_FOUND => Self::NotFound,
            status if status.is_server_error() => Self::ServerError(status.as_u16()),
            status => Self::ClientError(status.as_u16()),
        };
        Some(outcome)
    }
}

pub trait HttpTransport {
    fn get(&mut self, url: &Url, bearer_token: Option<&str>) -> HttpOutcome;
}

pub trait Sleeper {
    fn sleep(&mut self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&mut self, duration: Duration) {
        if !duration.is_zero() {
            thread::sleep(duration);
        }
    }
}

pub struct BlockingTransport {
    client: Client,
}

impl BlockingTransport {
    pub fn new(config: &EsaConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .user_agent(config.user_agent())
            .build()
            .context("failed to build esa HTTP client")?;
        Ok(Self { client })
    }
}

impl HttpTransport for BlockingTransport {
    fn get(&mut self, url: &Url, bearer_token: Option<&str>) -> HttpOutcome {
        let mut request = self.client.get(url.clone());
        if let Some(token) = bearer_token {
            request = request
                .header(AUTHORIZATION, format!("Bearer {token}"))
                .header(CONTENT_TYPE, "application/json");
        }

        let response = match request.send() {
            Ok(response) => response,
            Err(error) => return HttpOutcome::NetworkError(error.to_string()),
        };
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<u64>().ok());
        if let Some(outcome) = HttpOutcome::from_status(response.status(), retry_after) {
            return outcome;
        }

        match response.bytes() {
            Ok(body) => HttpOutcome::Success(body.to_vec()),
            Err(error) => HttpOutcome::NetworkError(format!("failed to read response body: {error}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts that may end in a server or network error. Rate-limited
    /// attempts are not counted.
    pub max_attempts: usize,
    pub initial_backoff: Duration,
    pub default_rate_limit_wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(1),
            default_rate_limit_wait: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Error)]
pub enum RequestError {
    #[error("authentication error: invalid access token ({url})")]
    Unauthorized { url: String },
    #[error("not found: {url}")]
    NotFound { url: String },
    #[error("HTTP {status} for {url}")]
    ClientError { status: u16, url: String },
    #[error("failed to fetch {url} after {attempts} attempts: {last_failure}")]
    RetriesExhausted {
        url: String,
        attempts: usize,
        last_failure: String,
    },
    #[error("invalid request URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
}

/// True when an authorization failure sits anywhere in the error chain.
pub fn is_unauthorized(error: &anyhow::Error) -> bool {
    error.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<RequestError>(),
            Some(RequestError::Unauthorized { .. })
        )
    })
}

/// Shared request primitive: one transport, one sleeper, one retry policy.
pub struct Requester {
    transport: Box<dyn HttpTransport>,
    sleeper: Box<dyn Sleeper>,
    policy: RetryPolicy,
    request_count: usize,
}

impl Requester {
    pub fn new(
        transport: Box<dyn HttpTransport>,
        sleeper: Box<dyn Sleeper>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            transport,
            sleeper,
            policy,
            request_count: 0,
        }
    }

    pub fn from_config(config: &EsaConfig) -> Result<Self> {
        Ok(Self::new(
            Box::new(BlockingTransport::new(config)?),
            Box::new(ThreadSleeper),
            config.retry_policy(),
        ))
    }

    pub fn request_count(&self) -> usize {
        self.request_count
    }

    pub fn get(&mut self, url: &Url, bearer_token: Option<&str>) -> Result<Vec<u8>, RequestError> {
        let mut attempts = 0usize;
        let mut backoff = self.policy.initial_backoff;

        loop {
            self.request_count += 1;
            let failure = match self.transport.get(url, bearer_token) {
                HttpOutcome::Success(body) => return Ok(body),
                HttpOutcome::RateLimited(retry_after) => {
                    let wait = retry_after
                        .map(Duration::from_secs)
                        .unwrap_or(self.policy.default_rate_limit_wait);
                    warn!("Rate limit exceeded. Waiting {} seconds...", wait.as_secs());
                    self.sleeper.sleep(wait);
                    continue;
                }
                HttpOutcome::Unauthorized => {
                    return Err(RequestError::Unauthorized {
                        url: url.to_string(),
                    });
                }
                HttpOutcome::NotFound => {
                    return Err(RequestError::NotFound {
                        url: url.to_string(),
                    });
                }
                HttpOutcome::ClientError(status) => {
                    return Err(RequestError::ClientError {
                        status,
                        url: url.to_string(),
                    });
                }
                HttpOutcome::ServerError(status) => format!("server error ({status})"),
                HttpOutcome::NetworkError(cause) => format!("network error: {cause}"),
            };

            attempts += 1;
            if attempts >= self.policy.max_attempts {
                return Err(RequestError::RetriesExhausted {
                    url: url.to_string(),
                    attempts,
                    last_failure: failure,
                });
            }
            warn!(
                "{failure} for {url}. Retrying in {:.1} seconds...",
                backoff.as_secs_f64()
            );
            self.sleeper.sleep(backoff);
            backoff = backoff.saturating_mul(2);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryParam {
    key: &'static str,
    value: String,
    free_text: bool,
}

impl QueryParam {
    pub fn plain(key: &'static str, value: impl ToString) -> Self {
        Self {
            key,
            value: value.to_string(),
            free_text: false,
        }
    }

    /// User-supplied text that may itself contain `&`, `=` or `+`.
    pub fn free_text(key: &'static str, value: impl ToString) -> Self {
        Self {
            key,
            value: value.to_string(),
            free_text: true,
        }
    }

    fn encoded_value(&self) -> String {
        if self.free_text {
            encode_strict(&self.value)
        } else {
            encode_plain(&self.value)
        }
    }
}

/// Percent-encode everything outside the unreserved set.
pub fn encode_strict(value: &str) -> String {
    urlencoding::encode(value).into_owned()
}

/// Percent-encode like `encode_strict` but keep `/` literal.
pub fn encode_plain(value: &str) -> String {
    encode_strict(value).replace("%2F", "/")
}

pub fn build_url(base_url: &str, endpoint: &str, params: &[QueryParam]) -> Result<Url, RequestError> {
    let mut raw = format!("{}{}", base_url.trim_end_matches('/'), endpoint);
    let query = params
        .iter()
        .filter(|param| !param.value.is_empty())
        .map(|param| format!("{}={}", param.key, param.encoded_value()))
        .collect::<Vec<_>>();
    if !query.is_empty() {
        raw.push('?');
        raw.push_str(&query.join("&"));
    }
    Url::parse(&raw).map_err(|error| RequestError::InvalidUrl {
        url: raw.clone(),
        reason: error.to_string(),
    })
}
