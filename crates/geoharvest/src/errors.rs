//! Error types for the geoharvest library.
//!
//! A single [`HarvestError`] covers every failure mode of the core. The variants fall into
//! the groups the harvesting pipeline and the curation operations care about:
//! - run-level failures that end a [`HarvestingEvent`](crate::event::HarvestingEvent)
//!   ([`HarvestError::Network`], [`HarvestError::RemoteProtocol`])
//! - per-record failures that are counted and skipped ([`HarvestError::MalformedRecord`])
//! - guard violations surfaced to whoever asked for a lifecycle transition
//!   ([`HarvestError::PublishPrecondition`], [`HarvestError::InvalidTransition`], ...)
//! - storage, configuration and I/O errors wrapped transparently
//!
//! # Examples
//!
//! ```
//! use geoharvest::errors::HarvestError;
//!
//! fn explain(err: &HarvestError) -> &'static str {
//!   match err {
//!     e if e.is_transient() => "try again later",
//!     HarvestError::PublishPrecondition(_) => "add a geometry or time period first",
//!     _ => "failed",
//!   }
//! }
//! ```

use thiserror::Error;

use crate::work::Status;

/// Errors that can occur while harvesting, extracting or curating records.
#[derive(Error, Debug)]
pub enum HarvestError {
  /// A request could not be completed: connection refused, DNS failure, TLS error or
  /// timeout. These are retried with backoff by the fetcher before the run gives up.
  #[error("network error: {0}")]
  Network(#[from] reqwest::Error),

  /// The remote answered, but with an error: a non-success HTTP status or an OAI-PMH
  /// `<error>` envelope. Never retried; becomes the failure reason of the run.
  #[error("remote protocol error: {0}")]
  RemoteProtocol(String),

  /// A single record could not be turned into a candidate. The run continues.
  #[error("malformed record: {0}")]
  MalformedRecord(String),

  /// The publish guard failed: the record has neither geometry nor temporal extent.
  #[error("cannot publish: {0}")]
  PublishPrecondition(String),

  /// The requested lifecycle action is not defined for the record's current status.
  #[error("cannot {action} a record in status {from}")]
  InvalidTransition {
    /// Status the record was in
    from:   Status,
    /// The attempted action, e.g. "publish"
    action: &'static str,
  },

  /// A contribution was refused, e.g. because it would overwrite an existing extent.
  #[error("contribution rejected: {0}")]
  ContributionRejected(String),

  /// An administrative transition was requested by an actor without the admin role.
  #[error("{actor} is not allowed to {action}")]
  Forbidden {
    /// Name of the requesting actor
    actor:  String,
    /// The attempted action
    action: &'static str,
  },

  /// The record kept changing underneath a transition; the compare-and-swap gave up.
  #[error("record {0} was modified concurrently")]
  ConcurrentModification(i64),

  /// Two inserts raced for the same DOI and the retry as an update failed as well.
  #[error("duplicate key race on {0}")]
  DuplicateKeyRace(String),

  /// A harvesting run for this source is already pending or in progress.
  #[error("source {0} already has a harvesting run in progress")]
  HarvestInProgress(i64),

  /// A harvesting event was asked to move along an edge its state machine does not have.
  #[error("harvesting event cannot go from {from} to {to}")]
  InvalidEventTransition {
    /// Current event status
    from: String,
    /// Requested event status
    to:   String,
  },

  /// The requested entity does not exist.
  #[error("{0} not found")]
  NotFound(String),

  /// Geometry input (WKT, GeoJSON, GeoRSS) could not be parsed.
  #[error("invalid geometry: {0}")]
  InvalidGeometry(String),

  /// A stored status string did not match any lifecycle state.
  #[error("invalid status `{0}`")]
  InvalidStatus(String),

  /// A source definition is unusable: bad name, scheme, interval or work type.
  #[error("invalid source: {0}")]
  InvalidSource(String),

  /// A feed type string did not match `oai-pmh` or `rss`.
  #[error("invalid feed type `{0}`, expected `oai-pmh` or `rss`")]
  InvalidFeedType(String),

  /// Failed to parse a URL.
  #[error(transparent)]
  InvalidUrl(#[from] url::ParseError),

  /// JSON (de)serialization of a stored column failed.
  #[error(transparent)]
  Serde(#[from] serde_json::Error),

  /// The configuration or registry file is not valid TOML for our schema.
  #[error(transparent)]
  Config(#[from] toml::de::Error),

  /// A SQLite operation failed.
  #[error(transparent)]
  Sqlite(#[from] rusqlite::Error),

  /// An async SQLite operation failed.
  #[error(transparent)]
  AsyncSqlite(#[from] tokio_rusqlite::Error),

  /// A file system operation failed.
  #[error(transparent)]
  Path(#[from] std::io::Error),
}

impl HarvestError {
  /// Checks if this error is SQLite's unique constraint violation.
  ///
  /// Inserting a work whose DOI already exists, or opening a second active harvesting event
  /// for a source, both surface as this.
  pub fn is_duplicate_error(&self) -> bool {
    match self {
      HarvestError::AsyncSqlite(tokio_rusqlite::Error::Rusqlite(
        rusqlite::Error::SqliteFailure(error, _),
      ))
      | HarvestError::Sqlite(rusqlite::Error::SqliteFailure(error, _)) =>
        error.code == rusqlite::ErrorCode::ConstraintViolation,
      _ => false,
    }
  }

  /// Whether retrying the same request could plausibly succeed.
  pub fn is_transient(&self) -> bool {
    match self {
      HarvestError::Network(e) => e.is_timeout() || e.is_connect() || e.is_request(),
      HarvestError::ConcurrentModification(_) => true,
      _ => false,
    }
  }
}
