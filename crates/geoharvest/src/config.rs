//! Runtime configuration, read from a TOML file.
//!
//! Every field has a default, so an empty or missing file is a valid configuration:
//!
//! ```toml
//! database_path = "/var/lib/geoharvest/geoharvest.db"
//!
//! [http]
//! user_agent           = "geoharvest/0.1 (mailto:admin@example.org)"
//! request_timeout_secs = 30
//! max_retries          = 3
//! oai_username         = "harvester"
//! oai_password         = "secret"
//!
//! [harvest]
//! fetch_landing_pages    = true
//! extraction_concurrency = 8
//! source_concurrency     = 4
//! stale_event_minutes    = 1440
//!
//! [harvest.openalex]
//! enabled = true
//! mailto  = "admin@example.org"
//! ```

use std::path::{Path, PathBuf};

use super::*;
use crate::database::Database;

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
  /// SQLite database file
  pub database_path: PathBuf,
  /// HTTP behaviour
  pub http:          HttpConfig,
  /// Harvesting behaviour
  pub harvest:       HarvestConfig,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      database_path: Database::default_path(),
      http:          HttpConfig::default(),
      harvest:       HarvestConfig::default(),
    }
  }
}

/// Settings for outgoing requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
  /// `User-Agent` header sent with every request
  pub user_agent:                String,
  /// Timeout for feed and OAI-PMH requests
  pub request_timeout_secs:      u64,
  /// Timeout for landing page fetches
  pub landing_page_timeout_secs: u64,
  /// Attempts after the first one for transient network failures
  pub max_retries:               u32,
  /// Delay before the first retry; doubled for each further one
  pub retry_base_delay_ms:       u64,
  /// Upper bound for any single retry delay
  pub max_retry_delay_ms:        u64,
  /// Basic auth user for OAI-PMH endpoints
  pub oai_username:              Option<String>,
  /// Basic auth password for OAI-PMH endpoints
  pub oai_password:              Option<String>,
}

impl Default for HttpConfig {
  fn default() -> Self {
    Self {
      user_agent:                concat!("geoharvest/", env!("CARGO_PKG_VERSION")).to_string(),
      request_timeout_secs:      30,
      landing_page_timeout_secs: 10,
      max_retries:               3,
      retry_base_delay_ms:       500,
      max_retry_delay_ms:        30_000,
      oai_username:              None,
      oai_password:              None,
    }
  }
}

impl HttpConfig {
  /// Feed and OAI-PMH request timeout.
  pub fn request_timeout(&self) -> Duration { Duration::from_secs(self.request_timeout_secs) }

  /// Landing page request timeout.
  pub fn landing_page_timeout(&self) -> Duration {
    Duration::from_secs(self.landing_page_timeout_secs)
  }

  /// Delay before the first retry.
  pub fn retry_base_delay(&self) -> Duration { Duration::from_millis(self.retry_base_delay_ms) }

  /// Longest wait between two attempts.
  pub fn max_retry_delay(&self) -> Duration { Duration::from_millis(self.max_retry_delay_ms) }
}

/// Settings for harvesting runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarvestConfig {
  /// Scan landing pages for spatial/temporal meta tags
  pub fetch_landing_pages:    bool,
  /// Records extracted concurrently within one run
  pub extraction_concurrency: usize,
  /// Sources harvested concurrently by `harvest_due`
  pub source_concurrency:     usize,
  /// Cap applied when a run does not name one
  pub default_max_records:    Option<usize>,
  /// A run still pending or in progress this long after it started is considered abandoned
  /// and marked failed before the source is harvested again
  pub stale_event_minutes:    u64,
  /// Metadata enrichment from OpenAlex
  pub openalex:               OpenAlexConfig,
}

impl Default for HarvestConfig {
  fn default() -> Self {
    Self {
      fetch_landing_pages:    true,
      extraction_concurrency: 8,
      source_concurrency:     4,
      default_max_records:    None,
      stale_event_minutes:    24 * 60,
      openalex:               OpenAlexConfig::default(),
    }
  }
}

impl HarvestConfig {
  /// Age after which an unfinished run is abandoned.
  pub fn stale_after(&self) -> chrono::Duration {
    let minutes = i64::try_from(self.stale_event_minutes).unwrap_or(i64::MAX);
    chrono::Duration::try_minutes(minutes).unwrap_or(chrono::Duration::MAX)
  }
}

/// Settings for OpenAlex lookups of harvested records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenAlexConfig {
  /// Look records up by DOI, else by title and first author
  pub enabled:  bool,
  /// API root
  pub base_url: String,
  /// Contact address sent along for OpenAlex's polite pool
  pub mailto:   Option<String>,
}

impl Default for OpenAlexConfig {
  fn default() -> Self {
    Self { enabled: false, base_url: "https://api.openalex.org".to_string(), mailto: None }
  }
}

impl Config {
  /// `<config dir>/geoharvest/config.toml`
  pub fn default_path() -> PathBuf {
    dirs::config_dir().unwrap_or_else(|| PathBuf::from(".")).join("geoharvest").join("config.toml")
  }

  /// Parse configuration from TOML text.
  pub fn from_toml(text: &str) -> Result<Self, HarvestError> { Ok(toml::from_str(text)?) }

  /// Read a configuration file.
  pub fn load(path: impl AsRef<Path>) -> Result<Self, HarvestError> {
    let text = std::fs::read_to_string(path.as_ref())?;
    debug!("Loaded configuration from {}", path.as_ref().display());
    Self::from_toml(&text)
  }

  /// Read `path`, or the default location when `None`; a missing default file yields the
  /// default configuration.
  pub fn load_or_default(path: Option<&Path>) -> Result<Self, HarvestError> {
    match path {
      Some(path) => Self::load(path),
      None => {
        let path = Self::default_path();
        if path.exists() {
          Self::load(path)
        } else {
          trace!("No configuration at {}, using defaults", path.display());
          Ok(Self::default())
        }
      },
    }
  }
}
