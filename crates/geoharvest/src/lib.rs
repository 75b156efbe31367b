//! Harvesting and record lifecycle for a geospatial publication discovery portal.
//!
//! `geoharvest` ingests bibliographic records from OAI-PMH endpoints and RSS/Atom feeds,
//! extracts spatial and temporal coverage from structured fields and from the landing pages
//! those records link to, de-duplicates them against what is already stored, and moves each
//! record through a small publication workflow:
//!
//! ```text
//!            contribute              publish
//! Harvested ───────────► Contributed ───────► Published ──unpublish──► Draft
//!     └──────────────── publish (has extent) ──────┘
//!                 any state ──withdraw──► Withdrawn
//! ```
//!
//! # Example
//! ```rust,no_run
//! use geoharvest::{config::Config, database::Database, harvest::Harvester};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!   let config = Config::default();
//!   let db = Database::open(&config.database_path).await?;
//!   let harvester = Harvester::from_config(db, &config)?;
//!
//!   let event = harvester.harvest(1, Some(50)).await?;
//!   println!("{} new records", event.counts.created);
//!
//!   Ok(())
//! }
//! ```

#![warn(missing_docs)]
use std::{fmt, str::FromStr, sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, trace, warn};
#[cfg(test)] use tracing_test::traced_test;
use url::Url;

pub mod clients;
pub mod config;
pub mod curation;
pub mod database;
pub mod date;
pub mod dedup;
pub mod errors;
pub mod event;
pub mod extract;
pub mod format;
pub mod geometry;
pub mod harvest;
pub mod lifecycle;
pub mod notify;
pub mod source;
pub mod work;
#[cfg(test)] mod tests;

use clients::HttpClient;
use database::Store;
use date::PartialDate;
use errors::HarvestError;
use event::{EventCounts, EventStatus, HarvestingEvent};
use extract::CandidateRecord;
use geometry::{Geometry, GeometryCollection};
use source::{FeedType, Source, WorkType};
use work::{Actor, Status, TemporalExtent, Work};

/// Identifier of a stored [`Work`].
pub type WorkId = i64;
/// Identifier of a stored [`Source`].
pub type SourceId = i64;
/// Identifier of a stored [`HarvestingEvent`].
pub type EventId = i64;
