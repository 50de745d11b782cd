use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;
use tracing::{error, warn};

const BASE_URL: &str = "https://api.nysed.gov/rosa/V2";
const SEARCH_ENDPOINT: &str = "/byProfessionAndName";
const API_KEY_HEADER: &str = "x-oapi-key";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub const DEFAULT_PROFESSION_CODE: &str = "022";

/// One page of search results as returned by the registry.
///
/// `content` distinguishes a JSON `null` (None) from an empty list —
/// the pager only terminates on a literal `[]`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    #[serde(default)]
    pub content: Option<Vec<serde_json::Value>>,
    #[serde(default)]
    pub total_pages: Option<u32>,
}

#[derive(Debug, Error)]
pub enum FetchError {
    /// Non-2xx status outside the retryable set. Not retried.
    #[error("HTTP {status}: {body}")]
    Status { status: StatusCode, body: String },
    /// Every attempt came back with a retryable status.
    #[error("gave up after {attempts} attempts (last status {last_status})")]
    RetriesExhausted { attempts: u32, last_status: StatusCode },
    #[error(transparent)]
    Transport(#[from] reqwest::Error),
}

/// Bounded retry with linear backoff: wait = unit * (attempt + 1).
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_unit: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 5,
            backoff_unit: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn is_retryable(status: StatusCode) -> bool {
        matches!(status.as_u16(), 408 | 429 | 500 | 502 | 503 | 504)
    }

    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_unit * (attempt + 1)
    }
}

/// Transport seam: the pager and driver only see this trait, so tests run
/// against a scripted fake instead of the network.
pub trait FetchPage {
    fn fetch_page(&self, prefix: char, page_number: u32, page_size: u32)
        -> Result<Page, FetchError>;
}

pub struct RegistryClient {
    http: Client,
    base_url: String,
    profession_code: String,
    retry: RetryPolicy,
}

impl RegistryClient {
    pub fn new(api_key: &str, profession_code: &str) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/json, text/javascript, */*; q=0.01"),
        );
        headers.insert(
            API_KEY_HEADER,
            HeaderValue::from_str(api_key).context("API key is not a valid header value")?,
        );

        let http = Client::builder()
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(RegistryClient {
            http,
            base_url: BASE_URL.to_string(),
            profession_code: profession_code.to_string(),
            retry: RetryPolicy::default(),
        })
    }

    pub fn from_env(profession_code: &str) -> Result<Self> {
        let api_key = std::env::var("ROSA_API_KEY")
            .context("ROSA_API_KEY environment variable must be set")?;
        Self::new(&api_key, profession_code)
    }
}

impl FetchPage for RegistryClient {
    fn fetch_page(
        &self,
        prefix: char,
        page_number: u32,
        page_size: u32,
    ) -> Result<Page, FetchError> {
        let url = format!("{}{}", self.base_url, SEARCH_ENDPOINT);
        let name = prefix.to_ascii_lowercase().to_string();
        let page_number_param = page_number.to_string();
        let page_size_param = page_size.to_string();
        let mut last_status = StatusCode::OK;

        for attempt in 0..self.retry.max_attempts {
            let response = self
                .http
                .get(&url)
                .query(&[
                    ("name", name.as_str()),
                    ("professionCode", self.profession_code.as_str()),
                    ("pageNumber", page_number_param.as_str()),
                    ("pageSize", page_size_param.as_str()),
                ])
                .send()?;

            let status = response.status();
            if status.is_success() {
                return Ok(response.json::<Page>()?);
            }

            if !RetryPolicy::is_retryable(status) {
                let body = response.text().unwrap_or_default();
                error!(prefix = %prefix, page_number, %status, "non-retryable response");
                return Err(FetchError::Status { status, body });
            }

            last_status = status;
            if attempt + 1 < self.retry.max_attempts {
                let wait = self.retry.backoff(attempt);
                warn!(
                    prefix = %prefix,
                    page_number,
                    %status,
                    "transient status, retrying in {:.0}s",
                    wait.as_secs_f64()
                );
                std::thread::sleep(wait);
            }
        }

        Err(FetchError::RetriesExhausted {
            attempts: self.retry.max_attempts,
            last_status,
        })
    }
}

// ── Tests ──
