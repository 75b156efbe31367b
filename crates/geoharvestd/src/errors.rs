//! Error types for the geoharvestd CLI application.
//!
//! Everything the front end can run into is wrapped transparently, so the message shown to
//! the operator is the one produced where the failure happened: a refused lifecycle
//! transition, a protocol error from a source, an unreadable registry file.

use thiserror::Error;

/// Errors that can occur during CLI operations.
///
/// # Examples
///
/// ```ignore
/// fn example() -> Result<(), GeoharvestdErrors> {
///   std::fs::create_dir_all("some/path")?;
///   let confirmed = dialoguer::Confirm::new().with_prompt("Continue?").interact()?;
///   Ok(())
/// }
/// ```
#[derive(Error, Debug)]
pub enum GeoharvestdErrors {
  /// Errors from user interaction dialogs
  #[error(transparent)]
  Dialoguer(#[from] dialoguer::Error),

  /// Errors from the geoharvest library
  #[error(transparent)]
  Harvest(#[from] geoharvest::errors::HarvestError),

  /// File system and IO operation errors
  #[error(transparent)]
  IO(#[from] std::io::Error),

  /// Glob pattern matching errors
  #[error(transparent)]
  Glob(#[from] glob::PatternError),

  /// The log file could not be set up
  #[error(transparent)]
  LogFile(#[from] tracing_appender::rolling::InitError),

  /// Output could not be rendered as JSON
  #[error(transparent)]
  Json(#[from] serde_json::Error),
}
