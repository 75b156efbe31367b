//! Feed fetching: the HTTP capability and the protocol clients built on it.
//!
//! The [`HttpClient`] trait is the only thing that talks to the network. [`ReqwestClient`]
//! implements it for production; tests substitute canned responses. On top of it the
//! [`Fetcher`] adds retries with exponential backoff and turns a [`Source`] plus an optional
//! resumption token into a [`Page`] of raw records:
//!
//! - [`oai`] - OAI-PMH `ListRecords` with resumption token paging
//! - [`feed`] - RSS 1.0/2.0 and Atom, fetched in one request
//! - [`openalex`] - the OpenAlex works API, for enriching harvested records
//!
//! # Examples
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use geoharvest::{
//!   clients::{Fetcher, ReqwestClient},
//!   config::HttpConfig,
//! };
//!
//! # async fn example(source: geoharvest::source::Source) -> Result<(), Box<dyn std::error::Error>> {
//! let config = HttpConfig::default();
//! let fetcher = Fetcher::new(Arc::new(ReqwestClient::from_config(&config)?), &config);
//!
//! let mut token = None;
//! loop {
//!   let page = fetcher.fetch(&source, token.as_deref()).await?;
//!   println!("{} records", page.records.len());
//!   match page.resumption_token {
//!     Some(next) => token = Some(next),
//!     None => break,
//!   }
//! }
//! # Ok(())
//! # }
//! ```

use reqwest::StatusCode;
use serde::de::DeserializeOwned;

use super::*;
use crate::config::HttpConfig;

pub mod feed;
pub mod oai;
pub mod openalex;

/// Basic auth credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
  /// User name
  pub username: String,
  /// Password, if any
  pub password: Option<String>,
}

/// A GET request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
  /// Absolute URL
  pub url:         String,
  /// Per-request timeout
  pub timeout:     Duration,
  /// Basic auth, sent only when set
  pub credentials: Option<Credentials>,
}

/// Status code and decoded body of a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
  /// HTTP status code
  pub status: u16,
  /// Response body as text
  pub body:   String,
}

impl HttpResponse {
  /// A `200 OK` response.
  pub fn ok(body: impl Into<String>) -> Self { Self { status: 200, body: body.into() } }

  /// Whether the status is 2xx.
  pub fn is_success(&self) -> bool { (200..300).contains(&self.status) }
}

/// The ability to perform an HTTP GET.
///
/// Implementations return `Ok` for any response the server sent, whatever its status, and
/// [`HarvestError::Network`] when no response arrived.
#[async_trait]
pub trait HttpClient: Send + Sync {
  /// Perform the request.
  async fn get(&self, request: &HttpRequest) -> Result<HttpResponse, HarvestError>;
}

/// [`HttpClient`] backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct ReqwestClient {
  client: reqwest::Client,
}

impl ReqwestClient {
  /// A client sending the given `User-Agent`.
  pub fn new(user_agent: &str) -> Result<Self, HarvestError> {
    let client = reqwest::Client::builder().user_agent(user_agent).build()?;
    Ok(Self { client })
  }

  /// A client configured from the `[http]` section.
  pub fn from_config(config: &HttpConfig) -> Result<Self, HarvestError> {
    Self::new(&config.user_agent)
  }
}

#[async_trait]
impl HttpClient for ReqwestClient {
  async fn get(&self, request: &HttpRequest) -> Result<HttpResponse, HarvestError> {
    let mut builder = self.client.get(&request.url).timeout(request.timeout);
    if let Some(credentials) = &request.credentials {
      builder = builder.basic_auth(&credentials.username, credentials.password.as_ref());
    }
    let response = builder.send().await?;
    let status = response.status().as_u16();
    let body = response.text().await?;
    Ok(HttpResponse { status, body })
  }
}

/// One fetched unit of a source: raw record payloads and where to continue.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Page {
  /// Raw `<record>`, `<item>` or `<entry>` elements, in document order
  pub records:          Vec<String>,
  /// OAI-PMH continuation; `None` when the list is exhausted
  pub resumption_token: Option<String>,
}

/// Fetches pages of raw records from sources, retrying transient network failures.
///
/// Holds no state between calls apart from its configuration; the caller carries the
/// resumption token.
#[derive(Clone)]
pub struct Fetcher {
  http:                 Arc<dyn HttpClient>,
  request_timeout:      Duration,
  landing_page_timeout: Duration,
  max_retries:          u32,
  retry_base_delay:     Duration,
  max_retry_delay:      Duration,
  oai_credentials:      Option<Credentials>,
}

impl Fetcher {
  /// A fetcher over `http` using the timeouts, retry policy and OAI credentials in `config`.
  pub fn new(http: Arc<dyn HttpClient>, config: &HttpConfig) -> Self {
    let oai_credentials = config
      .oai_username
      .as_ref()
      .map(|username| Credentials { username: username.clone(), password: config.oai_password.clone() });
    Self {
      http,
      request_timeout: config.request_timeout(),
      landing_page_timeout: config.landing_page_timeout(),
      max_retries: config.max_retries,
      retry_base_delay: config.retry_base_delay(),
      max_retry_delay: config.max_retry_delay(),
      oai_credentials,
    }
  }

  /// Fetch one page of `source`. For OAI-PMH, `resumption_token` continues a previous list;
  /// RSS/Atom sources ignore it and always return everything in one page.
  pub async fn fetch(&self, source: &Source, resumption_token: Option<&str>) -> Result<Page, HarvestError> {
    match source.config.feed_type {
      FeedType::OaiPmh => {
        let url = match resumption_token {
          Some(token) => oai::resumption_url(&source.config.url, token)?,
          None => oai::list_records_url(&source.config)?,
        };
        let body = self.get_text(url.as_str(), self.request_timeout, self.oai_credentials.clone()).await?;
        oai::parse_page(&body)
      },
      FeedType::Rss => {
        let body = self.get_text(&source.config.url, self.request_timeout, None).await?;
        feed::parse_feed(&body)
      },
    }
  }

  /// Fetch a landing page once, with the shorter landing page timeout and no retries.
  pub async fn landing_page(&self, url: &str) -> Result<String, HarvestError> {
    let request = HttpRequest { url: url.to_string(), timeout: self.landing_page_timeout, credentials: None };
    let response = self.http.get(&request).await?;
    if !response.is_success() {
      return Err(HarvestError::RemoteProtocol(format!("HTTP {} from {url}", response.status)));
    }
    Ok(response.body)
  }

  /// GET `url`, retrying transient network errors and `429 Too Many Requests` with exponential
  /// backoff. Any other non-success status is a protocol error and is not retried.
  pub async fn get_text(
    &self,
    url: &str,
    timeout: Duration,
    credentials: Option<Credentials>,
  ) -> Result<String, HarvestError> {
    let request = HttpRequest { url: url.to_string(), timeout, credentials };
    let response = self.get_with_retries(&request).await?;
    if !response.is_success() {
      return Err(HarvestError::RemoteProtocol(format!("HTTP {} from {url}", response.status)));
    }
    Ok(response.body)
  }

  /// GET a JSON document with the same retry policy as [`Fetcher::get_text`]. A `404` is
  /// `None`.
  pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<Option<T>, HarvestError> {
    let request = HttpRequest { url: url.to_string(), timeout: self.request_timeout, credentials: None };
    let response = self.get_with_retries(&request).await?;
    match response.status {
      404 => Ok(None),
      _ if response.is_success() => Ok(Some(serde_json::from_str(&response.body)?)),
      status => Err(HarvestError::RemoteProtocol(format!("HTTP {status} from {url}"))),
    }
  }

  /// The first response that is not `429`, or the last one once retries are used up.
  async fn get_with_retries(&self, request: &HttpRequest) -> Result<HttpResponse, HarvestError> {
    let url = &request.url;
    let mut attempt = 0;
    loop {
      debug!("GET {url} (attempt {})", attempt + 1);
      match self.http.get(request).await {
        Ok(response)
          if response.status == StatusCode::TOO_MANY_REQUESTS.as_u16() && attempt < self.max_retries => {},
        Ok(response) => return Ok(response),
        Err(e) if e.is_transient() && attempt < self.max_retries => {
          warn!("Request to {url} failed: {e}");
        },
        Err(e) => return Err(e),
      }
      let delay = self.backoff(attempt);
      attempt += 1;
      tokio::time::sleep(delay).await;
    }
  }

  /// Wait before retry `attempt + 1`: the base delay doubled per attempt, never more than the
  /// configured maximum.
  fn backoff(&self, attempt: u32) -> Duration {
    self.retry_base_delay.saturating_mul(2_u32.saturating_pow(attempt)).min(self.max_retry_delay)
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Mutex;

  use super::*;

  struct Scripted {
    responses: Mutex<Vec<HttpResponse>>,
    calls:     Mutex<usize>,
  }

  #[async_trait]
  impl HttpClient for Scripted {
    async fn get(&self, _request: &HttpRequest) -> Result<HttpResponse, HarvestError> {
      *self.calls.lock().unwrap() += 1;
      Ok(self.responses.lock().unwrap().remove(0))
    }
  }

  fn fetcher(responses: Vec<HttpResponse>) -> (Fetcher, Arc<Scripted>) {
    let http = Arc::new(Scripted { responses: Mutex::new(responses), calls: Mutex::new(0) });
    let config = HttpConfig { retry_base_delay_ms: 1, ..HttpConfig::default() };
    (Fetcher::new(http.clone(), &config), http)
  }

  #[traced_test]
  #[tokio::test]
  async fn test_too_many_requests_is_retried() {
    let (fetcher, http) = fetcher(vec![
      HttpResponse { status: 429, body: String::new() },
      HttpResponse::ok("<rss/>"),
    ]);
    let body = fetcher.get_text("http://example.org/feed", Duration::from_secs(1), None).await.unwrap();
    assert_eq!(body, "<rss/>");
    assert_eq!(*http.calls.lock().unwrap(), 2);
  }

  #[tokio::test]
  async fn test_server_error_is_not_retried() {
    let (fetcher, http) = fetcher(vec![HttpResponse { status: 503, body: String::new() }]);
    let err = fetcher.get_text("http://example.org/oai", Duration::from_secs(1), None).await.unwrap_err();
    assert!(matches!(err, HarvestError::RemoteProtocol(ref m) if m.contains("503")));
    assert_eq!(*http.calls.lock().unwrap(), 1);
  }

  #[tokio::test]
  async fn test_json_documents() {
    let (fetcher, _) = fetcher(vec![
      HttpResponse { status: 404, body: String::new() },
      HttpResponse::ok(r#"{"id": 7}"#),
      HttpResponse { status: 500, body: String::new() },
    ]);
    let url = "http://example.org/works/1";
    assert_eq!(fetcher.get_json::<serde_json::Value>(url).await.unwrap(), None);
    assert_eq!(fetcher.get_json::<serde_json::Value>(url).await.unwrap(), Some(serde_json::json!({"id": 7})));
    assert!(matches!(fetcher.get_json::<serde_json::Value>(url).await, Err(HarvestError::RemoteProtocol(_))));
  }

  #[test]
  fn test_backoff_is_capped() {
    let config = HttpConfig { retry_base_delay_ms: 100, max_retry_delay_ms: 1_000, ..HttpConfig::default() };
    let (_, http) = fetcher(vec![]);
    let fetcher = Fetcher::new(http, &config);
    assert_eq!(fetcher.backoff(0), Duration::from_millis(100));
    assert_eq!(fetcher.backoff(2), Duration::from_millis(400));
    assert_eq!(fetcher.backoff(4), Duration::from_millis(1_000));
    assert_eq!(fetcher.backoff(40), Duration::from_millis(1_000));
    assert_eq!(fetcher.backoff(u32::MAX), Duration::from_millis(1_000));
  }

  #[tokio::test]
  async fn test_retries_are_bounded() {
    let throttled = HttpResponse { status: 429, body: String::new() };
    let (fetcher, http) = fetcher(vec![throttled; 5]);
    assert!(fetcher.get_text("http://example.org/oai", Duration::from_secs(1), None).await.is_err());
    assert_eq!(*http.calls.lock().unwrap(), 4);
  }
}
