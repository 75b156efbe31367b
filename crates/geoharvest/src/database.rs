//! SQLite storage for sources, harvesting events and works.
//!
//! The pipeline and the curation operations only see the [`Store`] trait; [`Database`] is its
//! implementation on top of `tokio-rusqlite`. The schema lives in `migrations/init.sql` and is
//! applied every time a database is opened.
//!
//! Geometry and temporal extent are stored as JSON text. A work's bounding box and
//! publication year are kept in their own columns so listings can filter on them in SQL.
//! Every update of a work is a compare-and-swap on its `version` column.

use std::path::{Path, PathBuf};

use rusqlite::{params, params_from_iter, types::Value, OptionalExtension};
use tokio_rusqlite::Connection;

use super::*;
use crate::{dedup::DedupKey, geometry::BoundingBox, source::SourceConfig};

/// Filters for work listings. Unset fields do not filter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkFilter {
  /// Any of these statuses; empty means all
  pub statuses:  Vec<Status>,
  /// Owning source
  pub source_id: Option<SourceId>,
  /// Work type
  pub work_type: Option<WorkType>,
  /// Substring of title or abstract, case-insensitive
  pub text:      Option<String>,
  /// Earliest publication year
  pub year_from: Option<i32>,
  /// Latest publication year
  pub year_to:   Option<i32>,
  /// Geometry bounding box must intersect this one
  pub bbox:      Option<BoundingBox>,
  /// Page size
  pub limit:     Option<usize>,
  /// Rows to skip
  pub offset:    usize,
}

/// Persistence used by harvesting and curation.
#[async_trait]
pub trait Store: Send + Sync {
  /// Create a source.
  async fn add_source(&self, config: &SourceConfig) -> Result<Source, HarvestError>;

  /// Update the source with the same name, else the same endpoint URL, else create one.
  /// Returns the stored source and whether it was created.
  async fn upsert_source(&self, config: &SourceConfig) -> Result<(Source, bool), HarvestError>;

  /// A source by id.
  async fn get_source(&self, id: SourceId) -> Result<Option<Source>, HarvestError>;

  /// All sources ordered by id.
  async fn list_sources(&self) -> Result<Vec<Source>, HarvestError>;

  /// Record that a run of the source completed at `at`.
  async fn mark_harvested(&self, id: SourceId, at: DateTime<Utc>) -> Result<(), HarvestError>;

  /// Create a pending event. Fails with [`HarvestError::HarvestInProgress`] if the source
  /// already has a pending or running one.
  async fn create_event(&self, source_id: SourceId, at: DateTime<Utc>) -> Result<HarvestingEvent, HarvestError>;

  /// Mark runs of the source that are still pending or in progress but started before
  /// `started_before` as failed at `at`. Returns how many were abandoned.
  async fn fail_stale_events(
    &self,
    source_id: SourceId,
    started_before: DateTime<Utc>,
    at: DateTime<Utc>,
  ) -> Result<usize, HarvestError>;

  /// Write status, counts, completion time and error of an event.
  async fn save_event(&self, event: &HarvestingEvent) -> Result<(), HarvestError>;

  /// An event by id.
  async fn get_event(&self, id: EventId) -> Result<Option<HarvestingEvent>, HarvestError>;

  /// Events of a source, newest first.
  async fn list_events(&self, source_id: SourceId) -> Result<Vec<HarvestingEvent>, HarvestError>;

  /// Store a new work and return it with its id.
  async fn insert_work(&self, work: &Work) -> Result<Work, HarvestError>;

  /// A work by id.
  async fn get_work(&self, id: WorkId) -> Result<Option<Work>, HarvestError>;

  /// A work by normalized DOI.
  async fn find_by_doi(&self, doi: &str) -> Result<Option<Work>, HarvestError>;

  /// The oldest work with this normalized URL.
  async fn find_by_url(&self, url: &str) -> Result<Option<Work>, HarvestError>;

  /// Write `work` if the stored version still equals `work.version`. Returns the stored work
  /// with its new version, or `None` when someone else changed it first.
  async fn update_work(&self, work: &Work) -> Result<Option<Work>, HarvestError>;

  /// Works matching `filter`.
  async fn list_works(&self, filter: &WorkFilter) -> Result<Vec<Work>, HarvestError>;

  /// Sources due for a harvest at `now`.
  async fn due_sources(&self, now: DateTime<Utc>) -> Result<Vec<Source>, HarvestError> {
    Ok(self.list_sources().await?.into_iter().filter(|s| s.is_due(now)).collect())
  }

  /// The first work found under `keys`, tried in order: by DOI, then by URL.
  async fn find_existing(&self, keys: &[DedupKey]) -> Result<Option<Work>, HarvestError> {
    for key in keys {
      let found = match key {
        DedupKey::Doi(doi) => self.find_by_doi(doi).await?,
        DedupKey::Url(url) => self.find_by_url(url).await?,
      };
      if let Some(work) = found.filter(|w| key.accepts(keys, w)) {
        return Ok(Some(work));
      }
    }
    Ok(None)
  }

  /// Publicly visible works. Any status filter given is replaced by `published`.
  async fn list_published(&self, filter: &WorkFilter) -> Result<Vec<Work>, HarvestError> {
    let filter = WorkFilter { statuses: vec![Status::Published], ..filter.clone() };
    self.list_works(&filter).await
  }

  /// Harvested works still missing geometry or temporal extent, oldest first.
  async fn list_needing_contribution(&self) -> Result<Vec<Work>, HarvestError> {
    let filter = WorkFilter { statuses: vec![Status::Harvested], ..WorkFilter::default() };
    let mut works = self.list_works(&filter).await?;
    works.retain(Work::needs_contribution);
    works.sort_by_key(|w| (w.created_at, w.id));
    Ok(works)
  }
}

/// Database handle for geoharvest
#[derive(Clone)]
pub struct Database {
  conn: Connection,
}

const SOURCE_COLUMNS: &str = "id, name, url, feed_type, default_work_type, metadata_prefix, \
                              set_spec, openalex_id, issn_l, homepage_url, publisher_name, is_oa, \
                              is_preprint, harvest_interval_minutes, last_harvest, created_at, \
                              updated_at";

const EVENT_COLUMNS: &str =
  "id, source_id, status, started_at, completed_at, seen, created, updated, skipped, error";

const WORK_COLUMNS: &str = "id, status, title, abstract_text, publication_date, doi, url, \
                            work_type, geometry, temporal, source_id, event_id, provenance, \
                            created_at, updated_at, version, authors, keywords, openalex_id";

/// A `sources` row before its enum columns are parsed.
struct SourceRow {
  id:                       SourceId,
  name:                     String,
  url:                      String,
  feed_type:                String,
  default_work_type:        String,
  metadata_prefix:          String,
  set_spec:                 Option<String>,
  openalex_id:              Option<String>,
  issn_l:                   Option<String>,
  homepage_url:             Option<String>,
  publisher_name:           Option<String>,
  is_oa:                    bool,
  is_preprint:              bool,
  harvest_interval_minutes: i64,
  last_harvest:             Option<DateTime<Utc>>,
  created_at:               DateTime<Utc>,
  updated_at:               DateTime<Utc>,
}

impl SourceRow {
  fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id:                       row.get(0)?,
      name:                     row.get(1)?,
      url:                      row.get(2)?,
      feed_type:                row.get(3)?,
      default_work_type:        row.get(4)?,
      metadata_prefix:          row.get(5)?,
      set_spec:                 row.get(6)?,
      openalex_id:              row.get(7)?,
      issn_l:                   row.get(8)?,
      homepage_url:             row.get(9)?,
      publisher_name:           row.get(10)?,
      is_oa:                    row.get(11)?,
      is_preprint:              row.get(12)?,
      harvest_interval_minutes: row.get(13)?,
      last_harvest:             row.get(14)?,
      created_at:               row.get(15)?,
      updated_at:               row.get(16)?,
    })
  }

  fn into_source(self) -> Result<Source, HarvestError> {
    Ok(Source {
      id:           self.id,
      config:       SourceConfig {
        name:                     self.name,
        url:                      self.url,
        feed_type:                self.feed_type.parse()?,
        default_work_type:        self.default_work_type.parse()?,
        metadata_prefix:          self.metadata_prefix,
        set_spec:                 self.set_spec,
        openalex_id:              self.openalex_id,
        issn_l:                   self.issn_l,
        homepage_url:             self.homepage_url,
        publisher_name:           self.publisher_name,
        is_oa:                    self.is_oa,
        is_preprint:              self.is_preprint,
        harvest_interval_minutes: self.harvest_interval_minutes,
      },
      last_harvest: self.last_harvest,
      created_at:   self.created_at,
      updated_at:   self.updated_at,
    })
  }
}

/// A `harvesting_events` row before its status is parsed.
struct EventRow {
  id:           EventId,
  source_id:    SourceId,
  status:       String,
  started_at:   DateTime<Utc>,
  completed_at: Option<DateTime<Utc>>,
  counts:       [i64; 4],
  error:        Option<String>,
}

impl EventRow {
  fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id:           row.get(0)?,
      source_id:    row.get(1)?,
      status:       row.get(2)?,
      started_at:   row.get(3)?,
      completed_at: row.get(4)?,
      counts:       [row.get(5)?, row.get(6)?, row.get(7)?, row.get(8)?],
      error:        row.get(9)?,
    })
  }

  fn into_event(self) -> Result<HarvestingEvent, HarvestError> {
    let [seen, created, updated, skipped] = self.counts.map(|n| n.max(0) as u64);
    Ok(HarvestingEvent {
      id:           self.id,
      source_id:    self.source_id,
      status:       self.status.parse()?,
      started_at:   self.started_at,
      completed_at: self.completed_at,
      counts:       EventCounts { seen, created, updated, skipped },
      error:        self.error,
    })
  }
}

/// A `works` row before its text columns are decoded.
struct WorkRow {
  id:               WorkId,
  status:           String,
  title:            Option<String>,
  abstract_text:    Option<String>,
  publication_date: Option<String>,
  doi:              Option<String>,
  url:              Option<String>,
  work_type:        String,
  geometry:         String,
  temporal:         String,
  source_id:        Option<SourceId>,
  event_id:         Option<EventId>,
  provenance:       String,
  created_at:       DateTime<Utc>,
  updated_at:       DateTime<Utc>,
  version:          i64,
  authors:          String,
  keywords:         String,
  openalex_id:      Option<String>,
}

impl WorkRow {
  fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id:               row.get(0)?,
      status:           row.get(1)?,
      title:            row.get(2)?,
      abstract_text:    row.get(3)?,
      publication_date: row.get(4)?,
      doi:              row.get(5)?,
      url:              row.get(6)?,
      work_type:        row.get(7)?,
      geometry:         row.get(8)?,
      temporal:         row.get(9)?,
      source_id:        row.get(10)?,
      event_id:         row.get(11)?,
      provenance:       row.get(12)?,
      created_at:       row.get(13)?,
      updated_at:       row.get(14)?,
      version:          row.get(15)?,
      authors:          row.get(16)?,
      keywords:         row.get(17)?,
      openalex_id:      row.get(18)?,
    })
  }

  fn into_work(self) -> Result<Work, HarvestError> {
    Ok(Work {
      id:               self.id,
      status:           self.status.parse()?,
      title:            self.title,
      abstract_text:    self.abstract_text,
      publication_date: self.publication_date.as_deref().and_then(PartialDate::parse),
      doi:              self.doi,
      url:              self.url,
      work_type:        self.work_type.parse()?,
      authors:          serde_json::from_str(&self.authors)?,
      keywords:         serde_json::from_str(&self.keywords)?,
      openalex_id:      self.openalex_id,
      geometry:         serde_json::from_str(&self.geometry)?,
      temporal:         serde_json::from_str(&self.temporal)?,
      source_id:        self.source_id,
      event_id:         self.event_id,
      provenance:       self.provenance,
      created_at:       self.created_at,
      updated_at:       self.updated_at,
      version:          self.version,
    })
  }
}

/// Column values of a work as written by inserts and updates: `WORK_COLUMNS` from `status`
/// to `updated_at`, then publication year, bounding box, authors, keywords and OpenAlex id.
fn work_values(work: &Work) -> Result<Vec<Value>, HarvestError> {
  let text = |s: &Option<String>| s.clone().map_or(Value::Null, Value::Text);
  let bbox = work.geometry.bbox();
  let coordinate = |f: fn(&BoundingBox) -> f64| bbox.as_ref().map_or(Value::Null, |b| Value::Real(f(b)));
  Ok(vec![
    Value::Text(work.status.as_str().to_string()),
    text(&work.title),
    text(&work.abstract_text),
    work.publication_date.map_or(Value::Null, |d| Value::Text(d.to_string())),
    text(&work.doi),
    text(&work.url),
    Value::Text(work.work_type.as_str().to_string()),
    Value::Text(serde_json::to_string(&work.geometry)?),
    Value::Text(serde_json::to_string(&work.temporal)?),
    work.source_id.map_or(Value::Null, Value::Integer),
    work.event_id.map_or(Value::Null, Value::Integer),
    Value::Text(work.provenance.clone()),
    Value::Text(work.created_at.to_rfc3339()),
    Value::Text(work.updated_at.to_rfc3339()),
    work.publication_date.map_or(Value::Null, |d| Value::Integer(d.year().into())),
    coordinate(|b| b.min_x),
    coordinate(|b| b.min_y),
    coordinate(|b| b.max_x),
    coordinate(|b| b.max_y),
    Value::Text(serde_json::to_string(&work.authors)?),
    Value::Text(serde_json::to_string(&work.keywords)?),
    text(&work.openalex_id),
  ])
}

/// Column values of a source, in `SOURCE_COLUMNS` order from `name` to `harvest_interval_minutes`,
/// followed by the modification time.
fn source_values(config: &SourceConfig, now: DateTime<Utc>) -> Vec<Value> {
  let text = |s: &Option<String>| s.clone().map_or(Value::Null, Value::Text);
  vec![
    Value::Text(config.name.clone()),
    Value::Text(config.url.clone()),
    Value::Text(config.feed_type.to_string()),
    Value::Text(config.default_work_type.as_str().to_string()),
    Value::Text(config.metadata_prefix.clone()),
    text(&config.set_spec),
    text(&config.openalex_id),
    text(&config.issn_l),
    text(&config.homepage_url),
    text(&config.publisher_name),
    Value::Integer(config.is_oa.into()),
    Value::Integer(config.is_preprint.into()),
    Value::Integer(config.harvest_interval_minutes),
    Value::Text(now.to_rfc3339()),
  ]
}

impl Database {
  /// Open or create a database at the specified path
  pub async fn open(path: impl AsRef<Path>) -> Result<Self, HarvestError> {
    let conn = Connection::open(path.as_ref()).await?;

    conn
      .call(|conn| {
        conn.execute_batch(include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/migrations/init.sql")))?;
        Ok(())
      })
      .await?;

    debug!("Opened database at {}", path.as_ref().display());
    Ok(Self { conn })
  }

  /// Get default database path in user's data directory
  pub fn default_path() -> PathBuf {
    dirs::data_dir().unwrap_or_else(|| PathBuf::from(".")).join("geoharvest").join("geoharvest.db")
  }

  async fn query_works(&self, sql: String, values: Vec<Value>) -> Result<Vec<Work>, HarvestError> {
    let rows = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare_cached(&sql)?;
        let rows = stmt.query_map(params_from_iter(values.iter()), WorkRow::read)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
      })
      .await?;
    rows.into_iter().map(WorkRow::into_work).collect()
  }

  async fn query_work(&self, sql: String, values: Vec<Value>) -> Result<Option<Work>, HarvestError> {
    Ok(self.query_works(sql, values).await?.into_iter().next())
  }

  async fn write_source(&self, id: Option<SourceId>, config: &SourceConfig) -> Result<SourceId, HarvestError> {
    config.validate()?;
    let mut values = source_values(config, Utc::now());
    self
      .conn
      .call(move |conn| match id {
        Some(id) => {
          values.push(Value::Integer(id));
          let mut stmt = conn.prepare_cached(
            "UPDATE sources SET name = ?1, url = ?2, feed_type = ?3, default_work_type = ?4,
                metadata_prefix = ?5, set_spec = ?6, openalex_id = ?7, issn_l = ?8,
                homepage_url = ?9, publisher_name = ?10, is_oa = ?11, is_preprint = ?12,
                harvest_interval_minutes = ?13, updated_at = ?14
             WHERE id = ?15",
          )?;
          stmt.execute(params_from_iter(values.iter()))?;
          Ok(id)
        },
        None => {
          let mut stmt = conn.prepare_cached(
            "INSERT INTO sources (
                name, url, feed_type, default_work_type, metadata_prefix, set_spec,
                openalex_id, issn_l, homepage_url, publisher_name, is_oa, is_preprint,
                harvest_interval_minutes, created_at, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?14)
             RETURNING id",
          )?;
          Ok(stmt.query_row(params_from_iter(values.iter()), |row| row.get::<_, i64>(0))?)
        },
      })
      .await
      .map_err(HarvestError::from)
  }

  async fn require_source(&self, id: SourceId) -> Result<Source, HarvestError> {
    self.get_source(id).await?.ok_or_else(|| HarvestError::NotFound(format!("source {id}")))
  }

  async fn query_events(&self, sql: String, id: i64) -> Result<Vec<HarvestingEvent>, HarvestError> {
    let rows = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare_cached(&sql)?;
        let rows = stmt.query_map([id], EventRow::read)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
      })
      .await?;
    rows.into_iter().map(EventRow::into_event).collect()
  }
}

#[async_trait]
impl Store for Database {
  async fn add_source(&self, config: &SourceConfig) -> Result<Source, HarvestError> {
    let id = self.write_source(None, config).await?;
    debug!("Added source {id} ({})", config.name);
    self.require_source(id).await
  }

  async fn upsert_source(&self, config: &SourceConfig) -> Result<(Source, bool), HarvestError> {
    let (name, url) = (config.name.clone(), config.url.clone());
    let existing: Option<SourceId> = self
      .conn
      .call(move |conn| {
        let by_name =
          conn.query_row("SELECT id FROM sources WHERE name = ?1", [&name], |row| row.get::<_, i64>(0)).optional()?;
        match by_name {
          Some(id) => Ok(Some(id)),
          None => Ok(
            conn
              .query_row("SELECT id FROM sources WHERE url = ?1 ORDER BY id LIMIT 1", [&url], |row| {
                row.get::<_, i64>(0)
              })
              .optional()?,
          ),
        }
      })
      .await?;

    let id = self.write_source(existing, config).await?;
    Ok((self.require_source(id).await?, existing.is_none()))
  }

  async fn get_source(&self, id: SourceId) -> Result<Option<Source>, HarvestError> {
    let sql = format!("SELECT {SOURCE_COLUMNS} FROM sources WHERE id = ?1");
    let row = self
      .conn
      .call(move |conn| Ok(conn.query_row(&sql, [id], SourceRow::read).optional()?))
      .await?;
    row.map(SourceRow::into_source).transpose()
  }

  async fn list_sources(&self) -> Result<Vec<Source>, HarvestError> {
    let sql = format!("SELECT {SOURCE_COLUMNS} FROM sources ORDER BY id");
    let rows = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare_cached(&sql)?;
        let rows = stmt.query_map([], SourceRow::read)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
      })
      .await?;
    rows.into_iter().map(SourceRow::into_source).collect()
  }

  async fn mark_harvested(&self, id: SourceId, at: DateTime<Utc>) -> Result<(), HarvestError> {
    let changed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute("UPDATE sources SET last_harvest = ?1, updated_at = ?1 WHERE id = ?2", params![at, id])?)
      })
      .await?;
    if changed == 0 {
      return Err(HarvestError::NotFound(format!("source {id}")));
    }
    Ok(())
  }

  async fn create_event(&self, source_id: SourceId, at: DateTime<Utc>) -> Result<HarvestingEvent, HarvestError> {
    let mut event = HarvestingEvent::new(source_id, at);
    let status = event.status.as_str();
    let result = self
      .conn
      .call(move |conn| {
        Ok(conn.query_row(
          "INSERT INTO harvesting_events (source_id, status, started_at) VALUES (?1, ?2, ?3) RETURNING id",
          params![source_id, status, at],
          |row| row.get::<_, i64>(0),
        )?)
      })
      .await
      .map_err(HarvestError::from);

    match result {
      Ok(id) => {
        event.id = id;
        Ok(event)
      },
      Err(e) if e.is_duplicate_error() => Err(HarvestError::HarvestInProgress(source_id)),
      Err(e) => Err(e),
    }
  }

  async fn fail_stale_events(
    &self,
    source_id: SourceId,
    started_before: DateTime<Utc>,
    at: DateTime<Utc>,
  ) -> Result<usize, HarvestError> {
    let reason = format!("abandoned: still running at {}", at.to_rfc3339());
    let abandoned = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE harvesting_events
           SET status = 'failed', completed_at = ?1, error = ?2
           WHERE source_id = ?3 AND status IN ('pending', 'in_progress') AND started_at < ?4",
          params![at, reason, source_id, started_before],
        )?)
      })
      .await?;
    Ok(abandoned)
  }

  async fn save_event(&self, event: &HarvestingEvent) -> Result<(), HarvestError> {
    let event = event.clone();
    let changed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE harvesting_events
           SET status = ?1, completed_at = ?2, seen = ?3, created = ?4, updated = ?5, skipped = ?6,
               error = ?7
           WHERE id = ?8",
          params![
            event.status.as_str(),
            event.completed_at,
            event.counts.seen as i64,
            event.counts.created as i64,
            event.counts.updated as i64,
            event.counts.skipped as i64,
            event.error,
            event.id,
          ],
        )?)
      })
      .await?;
    if changed == 0 {
      return Err(HarvestError::NotFound(format!("harvesting event {}", event.id)));
    }
    Ok(())
  }

  async fn get_event(&self, id: EventId) -> Result<Option<HarvestingEvent>, HarvestError> {
    let sql = format!("SELECT {EVENT_COLUMNS} FROM harvesting_events WHERE id = ?1");
    Ok(self.query_events(sql, id).await?.into_iter().next())
  }

  async fn list_events(&self, source_id: SourceId) -> Result<Vec<HarvestingEvent>, HarvestError> {
    let sql = format!("SELECT {EVENT_COLUMNS} FROM harvesting_events WHERE source_id = ?1 ORDER BY id DESC");
    self.query_events(sql, source_id).await
  }

  async fn insert_work(&self, work: &Work) -> Result<Work, HarvestError> {
    work.validate()?;
    let values = work_values(work)?;
    let id = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare_cached(
          "INSERT INTO works (
              status, title, abstract_text, publication_date, doi, url, work_type, geometry,
              temporal, source_id, event_id, provenance, created_at, updated_at,
              publication_year, bbox_min_x, bbox_min_y, bbox_max_x, bbox_max_y, authors,
              keywords, openalex_id, version
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17,
                     ?18, ?19, ?20, ?21, ?22, 1)
           RETURNING id",
        )?;
        Ok(stmt.query_row(params_from_iter(values.iter()), |row| row.get::<_, i64>(0))?)
      })
      .await?;
    trace!("Inserted work {id}");
    Ok(Work { id, version: 1, ..work.clone() })
  }

  async fn get_work(&self, id: WorkId) -> Result<Option<Work>, HarvestError> {
    self.query_work(format!("SELECT {WORK_COLUMNS} FROM works WHERE id = ?1"), vec![Value::Integer(id)]).await
  }

  async fn find_by_doi(&self, doi: &str) -> Result<Option<Work>, HarvestError> {
    self
      .query_work(format!("SELECT {WORK_COLUMNS} FROM works WHERE doi = ?1"), vec![Value::Text(doi.to_string())])
      .await
  }

  async fn find_by_url(&self, url: &str) -> Result<Option<Work>, HarvestError> {
    self
      .query_work(
        format!("SELECT {WORK_COLUMNS} FROM works WHERE url = ?1 ORDER BY id LIMIT 1"),
        vec![Value::Text(url.to_string())],
      )
      .await
  }

  async fn update_work(&self, work: &Work) -> Result<Option<Work>, HarvestError> {
    work.validate()?;
    let mut values = work_values(work)?;
    values.push(Value::Integer(work.id));
    values.push(Value::Integer(work.version));
    let changed = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare_cached(
          "UPDATE works SET
              status = ?1, title = ?2, abstract_text = ?3, publication_date = ?4, doi = ?5,
              url = ?6, work_type = ?7, geometry = ?8, temporal = ?9, source_id = ?10,
              event_id = ?11, provenance = ?12, created_at = ?13, updated_at = ?14,
              publication_year = ?15, bbox_min_x = ?16, bbox_min_y = ?17, bbox_max_x = ?18,
              bbox_max_y = ?19, authors = ?20, keywords = ?21, openalex_id = ?22,
              version = version + 1
           WHERE id = ?23 AND version = ?24",
        )?;
        Ok(stmt.execute(params_from_iter(values.iter()))?)
      })
      .await?;

    if changed == 0 {
      trace!("Version check failed for work {} at version {}", work.id, work.version);
      return Ok(None);
    }
    Ok(Some(Work { version: work.version + 1, ..work.clone() }))
  }

  async fn list_works(&self, filter: &WorkFilter) -> Result<Vec<Work>, HarvestError> {
    let mut clauses = Vec::new();
    let mut values = Vec::new();

    if !filter.statuses.is_empty() {
      let placeholders = vec!["?"; filter.statuses.len()].join(", ");
      clauses.push(format!("status IN ({placeholders})"));
      values.extend(filter.statuses.iter().map(|s| Value::Text(s.as_str().to_string())));
    }
    if let Some(source_id) = filter.source_id {
      clauses.push("source_id = ?".to_string());
      values.push(Value::Integer(source_id));
    }
    if let Some(work_type) = filter.work_type {
      clauses.push("work_type = ?".to_string());
      values.push(Value::Text(work_type.as_str().to_string()));
    }
    if let Some(text) = filter.text.as_deref().filter(|t| !t.trim().is_empty()) {
      clauses.push("(title LIKE ? OR abstract_text LIKE ?)".to_string());
      let pattern = format!("%{}%", text.trim());
      values.push(Value::Text(pattern.clone()));
      values.push(Value::Text(pattern));
    }
    if let Some(year) = filter.year_from {
      clauses.push("publication_year >= ?".to_string());
      values.push(Value::Integer(year.into()));
    }
    if let Some(year) = filter.year_to {
      clauses.push("publication_year <= ?".to_string());
      values.push(Value::Integer(year.into()));
    }
    if let Some(bbox) = filter.bbox {
      clauses.push("bbox_min_x <= ? AND bbox_max_x >= ? AND bbox_min_y <= ? AND bbox_max_y >= ?".to_string());
      values.extend([bbox.max_x, bbox.min_x, bbox.max_y, bbox.min_y].map(Value::Real));
    }

    let mut sql = format!("SELECT {WORK_COLUMNS} FROM works");
    if !clauses.is_empty() {
      sql.push_str(" WHERE ");
      sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(" ORDER BY publication_year IS NULL, publication_year DESC, id DESC");
    if filter.limit.is_some() || filter.offset > 0 {
      sql.push_str(" LIMIT ? OFFSET ?");
      values.push(Value::Integer(filter.limit.map_or(-1, |l| l as i64)));
      values.push(Value::Integer(filter.offset as i64));
    }

    trace!("Listing works: {sql}");
    self.query_works(sql, values).await
  }
}
