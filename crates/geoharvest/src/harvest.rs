//! Harvesting runs: fetch, extract, deduplicate, store, account.
//!
//! [`Harvester::harvest`] is the unit of work a scheduler calls for one source. It opens a
//! [`HarvestingEvent`], pages through the source, extracts records concurrently (OpenAlex and
//! landing page lookups included) and then resolves and writes them one at a time in feed
//! order. The event ends `completed` with its counts, or `failed` with the error that stopped
//! the run. Records stored before a failure stay stored.

use futures::{stream, StreamExt};

use super::*;
use crate::{
  clients::{openalex::OpenAlex, Fetcher, ReqwestClient},
  config::{Config, HarvestConfig},
  dedup::{self, Resolution},
  extract,
  notify::{self, Notifier, TracingNotifier},
};

/// What happened to one extracted record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
  Created,
  Updated,
  Skipped,
}

/// Runs harvests against a [`Store`].
#[derive(Clone)]
pub struct Harvester {
  store:    Arc<dyn Store>,
  fetcher:  Fetcher,
  openalex: Option<OpenAlex>,
  options:  HarvestConfig,
  notifier: Arc<dyn Notifier>,
}

impl Harvester {
  /// A harvester logging its notifications.
  pub fn new(store: Arc<dyn Store>, fetcher: Fetcher, options: HarvestConfig) -> Self {
    let openalex = options.openalex.enabled.then(|| OpenAlex::new(fetcher.clone(), &options.openalex));
    Self { store, fetcher, openalex, options, notifier: Arc::new(TracingNotifier) }
  }

  /// A harvester using `reqwest` with the `[http]` and `[harvest]` settings of `config`.
  pub fn from_config(store: impl Store + 'static, config: &Config) -> Result<Self, HarvestError> {
    let http = Arc::new(ReqwestClient::from_config(&config.http)?);
    Ok(Self::new(Arc::new(store), Fetcher::new(http, &config.http), config.harvest.clone()))
  }

  /// Replace the notifier.
  pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
    self.notifier = notifier;
    self
  }

  /// The underlying store.
  pub fn store(&self) -> &Arc<dyn Store> { &self.store }

  /// Harvest one source, stopping after `max_records` records (or the configured default).
  ///
  /// Returns the finished event, whether it completed or failed. Errors are returned only
  /// when no run could be started (unknown source, or a run already in progress) or when
  /// not even the failure could be recorded. Runs left unfinished for longer than
  /// `stale_event_minutes` are marked failed first, so a crashed run does not block the
  /// source.
  pub async fn harvest(
    &self,
    source_id: SourceId,
    max_records: Option<usize>,
  ) -> Result<HarvestingEvent, HarvestError> {
    let source =
      self.store.get_source(source_id).await?.ok_or_else(|| HarvestError::NotFound(format!("source {source_id}")))?;
    let now = Utc::now();
    if let Some(cutoff) = now.checked_sub_signed(self.options.stale_after()) {
      let abandoned = self.store.fail_stale_events(source.id, cutoff, now).await?;
      if abandoned > 0 {
        warn!("Marked {abandoned} abandoned run(s) of {} as failed", source.config.name);
      }
    }
    let mut event = self.store.create_event(source.id, now).await?;

    let limit = max_records.or(self.options.default_max_records);
    let mut counts = EventCounts::default();
    let result = match self.begin(&source, &mut event).await {
      Ok(()) => self.run(&source, &mut event, limit, &mut counts).await,
      Err(e) => Err(e),
    };
    let result = match result {
      Ok(()) => self.finish(&source, &mut event, counts).await,
      Err(e) => Err(e),
    };

    if let Err(e) = result {
      error!("Harvesting {} failed: {e}", source.config.name);
      event.fail(counts, e.to_string(), Utc::now())?;
      self.store.save_event(&event).await?;
    }

    notify::harvest_finished(self.notifier.as_ref(), &source, &event).await;
    Ok(event)
  }

  async fn begin(&self, source: &Source, event: &mut HarvestingEvent) -> Result<(), HarvestError> {
    event.start()?;
    self.store.save_event(event).await?;
    info!("Harvesting {} via {} (event {})", source.config.name, source.config.feed_type.label(), event.id);
    Ok(())
  }

  /// Store the completed event. `event` only becomes completed once that write succeeded,
  /// so a failure here can still be recorded as a failed run.
  async fn finish(
    &self,
    source: &Source,
    event: &mut HarvestingEvent,
    counts: EventCounts,
  ) -> Result<(), HarvestError> {
    let now = Utc::now();
    let mut completed = event.clone();
    completed.complete(counts, now)?;
    self.store.save_event(&completed).await?;
    *event = completed;
    if let Err(e) = self.store.mark_harvested(source.id, now).await {
      warn!("Could not stamp last harvest of {}: {e}", source.config.name);
    }
    Ok(())
  }

  /// Harvest every source due at `now`, up to `source_concurrency` at a time. A source that
  /// cannot be started is logged and left for the next call.
  pub async fn harvest_due(&self, now: DateTime<Utc>) -> Result<Vec<HarvestingEvent>, HarvestError> {
    let due = self.store.due_sources(now).await?;
    debug!("{} sources due for harvesting", due.len());
    let events: Vec<HarvestingEvent> = stream::iter(due)
      .map(|source| async move {
        let result = self.harvest(source.id, None).await;
        (source, result)
      })
      .buffer_unordered(self.options.source_concurrency.max(1))
      .filter_map(|(source, result)| async move {
        match result {
          Ok(event) => Some(event),
          Err(e) => {
            warn!("Not harvesting {}: {e}", source.config.name);
            None
          },
        }
      })
      .collect()
      .await;
    Ok(events)
  }

  async fn run(
    &self,
    source: &Source,
    event: &mut HarvestingEvent,
    limit: Option<usize>,
    counts: &mut EventCounts,
  ) -> Result<(), HarvestError> {
    let mut token: Option<String> = None;
    loop {
      let page = self.fetcher.fetch(source, token.as_deref()).await?;
      let mut records = page.records;
      if let Some(limit) = limit {
        records.truncate(limit.saturating_sub(counts.seen as usize));
      }

      for extracted in self.extract_all(source, records).await {
        counts.seen += 1;
        let outcome = match extracted {
          Ok(candidate) => self.store_candidate(source, event.id, candidate).await?,
          Err(e) => {
            warn!("Skipping record from {}: {e}", source.config.name);
            Outcome::Skipped
          },
        };
        match outcome {
          Outcome::Created => counts.created += 1,
          Outcome::Updated => counts.updated += 1,
          Outcome::Skipped => counts.skipped += 1,
        }
      }

      event.counts = *counts;
      self.store.save_event(event).await?;

      if limit.is_some_and(|limit| counts.seen as usize >= limit) {
        debug!("Stopping {} after {} records", source.config.name, counts.seen);
        return Ok(());
      }
      match page.resumption_token {
        Some(next) => token = Some(next),
        None => return Ok(()),
      }
    }
  }

  /// Extract and enrich records concurrently, keeping feed order.
  async fn extract_all(
    &self,
    source: &Source,
    records: Vec<String>,
  ) -> Vec<Result<CandidateRecord, HarvestError>> {
    let fetch_landing_pages = self.options.fetch_landing_pages;
    let fetcher = &self.fetcher;
    let openalex = self.openalex.as_ref();
    stream::iter(records)
      .map(|raw| async move {
        let mut candidate = extract::extract_record(&raw, source)?;
        if let Some(openalex) = openalex {
          candidate = extract::enrich_from_openalex(openalex, candidate, source.config.default_work_type).await;
        }
        if fetch_landing_pages {
          Ok(extract::enrich_from_landing_page(fetcher, candidate).await)
        } else {
          Ok(candidate)
        }
      })
      .buffered(self.options.extraction_concurrency.max(1))
      .collect()
      .await
  }

  /// Resolve one candidate against the store and write the result.
  ///
  /// An insert that loses a race for its DOI, or an update that loses its version check, is
  /// resolved once more against the now stored record.
  async fn store_candidate(
    &self,
    source: &Source,
    event_id: EventId,
    candidate: CandidateRecord,
  ) -> Result<Outcome, HarvestError> {
    let keys = candidate.dedup_keys();
    for attempt in 0..2 {
      let existing = if keys.is_empty() { None } else { self.store.find_existing(&keys).await? };

      match dedup::resolve(&candidate, existing.as_ref()) {
        Resolution::Insert => {
          let work = candidate.clone().into_work(source, event_id, Utc::now());
          match self.store.insert_work(&work).await {
            Ok(stored) => {
              trace!("Created work {}: {}", stored.id, stored.label());
              return Ok(Outcome::Created);
            },
            Err(e) if e.is_duplicate_error() && attempt == 0 => {
              debug!("Insert of {} raced with another writer, retrying as update", work.label());
            },
            Err(e) if e.is_duplicate_error() =>
              return Err(HarvestError::DuplicateKeyRace(work.doi.clone().unwrap_or_else(|| work.label()))),
            Err(e) => return Err(e),
          }
        },
        Resolution::UpdateExisting { work, filled } => {
          let mut work = *work;
          let now = Utc::now();
          work.updated_at = now;
          work.append_provenance(
            now,
            &format!("Filled {} from harvest. {}", filled.join(", "), extract::harvest_note(source, event_id)),
          );
          match self.store.update_work(&work).await? {
            Some(stored) => {
              trace!("Updated work {} ({})", stored.id, filled.join(", "));
              return Ok(Outcome::Updated);
            },
            None if attempt == 0 => debug!("Work {} changed during harvest, resolving again", work.id),
            None => return Err(HarvestError::ConcurrentModification(work.id)),
          }
        },
        Resolution::Skip(reason) => {
          trace!("Skipping {:?}: {reason:?}", candidate.title);
          return Ok(Outcome::Skipped);
        },
      }
    }
    Err(HarvestError::DuplicateKeyRace(candidate.doi.unwrap_or_default()))
  }
}

#[cfg(test)]
mod tests {
  use std::sync::atomic::{AtomicUsize, Ordering};

  use tempfile::{tempdir, TempDir};

  use super::*;
  use crate::{
    config::HttpConfig,
    database::{Database, WorkFilter},
    dedup::DedupKey,
    source::SourceConfig,
    work::tests::work_fixture,
  };

  /// A store whose first `misses` lookups find nothing, as if another writer stored the
  /// work right after we looked.
  struct LateLookups {
    inner:  Database,
    misses: AtomicUsize,
  }

  #[async_trait]
  impl Store for LateLookups {
    async fn add_source(&self, config: &SourceConfig) -> Result<Source, HarvestError> {
      self.inner.add_source(config).await
    }

    async fn upsert_source(&self, config: &SourceConfig) -> Result<(Source, bool), HarvestError> {
      self.inner.upsert_source(config).await
    }

    async fn get_source(&self, id: SourceId) -> Result<Option<Source>, HarvestError> { self.inner.get_source(id).await }

    async fn list_sources(&self) -> Result<Vec<Source>, HarvestError> { self.inner.list_sources().await }

    async fn mark_harvested(&self, id: SourceId, at: DateTime<Utc>) -> Result<(), HarvestError> {
      self.inner.mark_harvested(id, at).await
    }

    async fn create_event(&self, source_id: SourceId, at: DateTime<Utc>) -> Result<HarvestingEvent, HarvestError> {
      self.inner.create_event(source_id, at).await
    }

    async fn fail_stale_events(
      &self,
      source_id: SourceId,
      started_before: DateTime<Utc>,
      at: DateTime<Utc>,
    ) -> Result<usize, HarvestError> {
      self.inner.fail_stale_events(source_id, started_before, at).await
    }

    async fn save_event(&self, event: &HarvestingEvent) -> Result<(), HarvestError> {
      self.inner.save_event(event).await
    }

    async fn get_event(&self, id: EventId) -> Result<Option<HarvestingEvent>, HarvestError> {
      self.inner.get_event(id).await
    }

    async fn list_events(&self, source_id: SourceId) -> Result<Vec<HarvestingEvent>, HarvestError> {
      self.inner.list_events(source_id).await
    }

    async fn insert_work(&self, work: &Work) -> Result<Work, HarvestError> { self.inner.insert_work(work).await }

    async fn get_work(&self, id: WorkId) -> Result<Option<Work>, HarvestError> { self.inner.get_work(id).await }

    async fn find_by_doi(&self, doi: &str) -> Result<Option<Work>, HarvestError> { self.inner.find_by_doi(doi).await }

    async fn find_by_url(&self, url: &str) -> Result<Option<Work>, HarvestError> { self.inner.find_by_url(url).await }

    async fn update_work(&self, work: &Work) -> Result<Option<Work>, HarvestError> {
      self.inner.update_work(work).await
    }

    async fn list_works(&self, filter: &WorkFilter) -> Result<Vec<Work>, HarvestError> {
      self.inner.list_works(filter).await
    }

    async fn find_existing(&self, keys: &[DedupKey]) -> Result<Option<Work>, HarvestError> {
      let missed = self.misses.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1)).is_ok();
      if missed {
        return Ok(None);
      }
      self.inner.find_existing(keys).await
    }
  }

  struct Race {
    harvester: Harvester,
    source:    Source,
    event_id:  EventId,
    stored:    Work,
    _dir:      TempDir,
  }

  /// A stored work with DOI `10.30909/vol.06.01.0112` and no abstract, seen through a store
  /// that misses it `misses` times.
  async fn race(misses: usize) -> Race {
    let dir = tempdir().unwrap();
    let db = Database::open(dir.path().join("race.db")).await.unwrap();
    let source = db
      .add_source(&SourceConfig::new("Volcanica", "https://volcanica.example/oai", FeedType::OaiPmh))
      .await
      .unwrap();
    let event_id = db.create_event(source.id, Utc::now()).await.unwrap().id;
    let mut work = work_fixture();
    work.source_id = Some(source.id);
    work.doi = Some("10.30909/vol.06.01.0112".into());
    let stored = db.insert_work(&work).await.unwrap();

    let store = LateLookups { inner: db, misses: AtomicUsize::new(misses) };
    let fetcher = Fetcher::new(Arc::new(ReqwestClient::new("test").unwrap()), &HttpConfig::default());
    let harvester = Harvester::new(Arc::new(store), fetcher, HarvestConfig::default());
    Race { harvester, source, event_id, stored, _dir: dir }
  }

  fn candidate() -> CandidateRecord {
    CandidateRecord {
      title: Some("Eruption Dynamics of Basaltic Fissures".into()),
      abstract_text: Some("Fountain heights from thermal video.".into()),
      doi: Some("10.30909/vol.06.01.0112".into()),
      ..Default::default()
    }
  }

  #[traced_test]
  #[tokio::test]
  async fn test_lost_insert_race_becomes_update() -> anyhow::Result<()> {
    let r = race(1).await;
    let outcome = r.harvester.store_candidate(&r.source, r.event_id, candidate()).await?;
    assert_eq!(outcome, Outcome::Updated);
    assert!(logs_contain("raced with another writer"));

    let work = r.harvester.store().get_work(r.stored.id).await?.unwrap();
    assert_eq!(work.abstract_text.as_deref(), Some("Fountain heights from thermal video."));
    assert_eq!(work.version, r.stored.version + 1);
    assert_eq!(r.harvester.store().list_works(&WorkFilter::default()).await?.len(), 1);
    Ok(())
  }

  #[tokio::test]
  async fn test_second_lost_race_is_an_error() -> anyhow::Result<()> {
    let r = race(2).await;
    let err = r.harvester.store_candidate(&r.source, r.event_id, candidate()).await.unwrap_err();
    assert!(matches!(err, HarvestError::DuplicateKeyRace(ref doi) if doi == "10.30909/vol.06.01.0112"));
    assert_eq!(r.harvester.store().get_work(r.stored.id).await?.unwrap(), r.stored);
    Ok(())
  }
}
