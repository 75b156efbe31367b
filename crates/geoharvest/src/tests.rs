use std::{collections::HashMap, sync::Mutex};

use tempfile::{tempdir, TempDir};

use super::*;
use crate::{
  clients::{oai, openalex::OpenAlex, Fetcher, HttpRequest, HttpResponse},
  config::{HarvestConfig, HttpConfig, OpenAlexConfig},
  curation::Curator,
  database::{Database, WorkFilter},
  harvest::Harvester,
  notify::Notifier,
  source::SourceConfig,
};

const OAI_ENDPOINT: &str = "https://volcanica.example/oai";
const RSS_URL: &str = "https://alpine.example/feed.xml";

fn fixture(name: &str) -> String {
  std::fs::read_to_string(format!("{}/fixtures/{name}", env!("CARGO_MANIFEST_DIR"))).unwrap()
}

/// Canned responses by URL; anything else is a 404.
#[derive(Default)]
struct MockHttp {
  routes:   Mutex<HashMap<String, HttpResponse>>,
  requests: Mutex<Vec<String>>,
}

impl MockHttp {
  fn route(&self, url: impl Into<String>, body: String) {
    self.routes.lock().unwrap().insert(url.into(), HttpResponse::ok(body));
  }

  fn requested(&self, url: &str) -> usize {
    self.requests.lock().unwrap().iter().filter(|r| r.as_str() == url).count()
  }
}

#[async_trait]
impl HttpClient for MockHttp {
  async fn get(&self, request: &HttpRequest) -> Result<HttpResponse, HarvestError> {
    self.requests.lock().unwrap().push(request.url.clone());
    let routes = self.routes.lock().unwrap();
    Ok(routes.get(&request.url).cloned().unwrap_or(HttpResponse { status: 404, body: String::new() }))
  }
}

/// Counts announcements.
#[derive(Default)]
struct RecordingNotifier {
  published: Mutex<Vec<WorkId>>,
  finished:  Mutex<Vec<EventId>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
  async fn works_published(&self, works: &[Work]) -> Result<(), HarvestError> {
    self.published.lock().unwrap().extend(works.iter().map(|w| w.id));
    Ok(())
  }

  async fn harvest_finished(&self, _source: &Source, event: &HarvestingEvent) -> Result<(), HarvestError> {
    self.finished.lock().unwrap().push(event.id);
    Ok(())
  }
}

struct Harness {
  db:        Arc<Database>,
  http:      Arc<MockHttp>,
  notifier:  Arc<RecordingNotifier>,
  harvester: Harvester,
  _dir:      TempDir,
}

async fn harness() -> Harness {
  let dir = tempdir().unwrap();
  let db = Arc::new(Database::open(dir.path().join("harvest.db")).await.unwrap());
  let http = Arc::new(MockHttp::default());
  let notifier = Arc::new(RecordingNotifier::default());
  let config = HttpConfig { retry_base_delay_ms: 1, ..Default::default() };
  let harvester = Harvester::new(db.clone(), Fetcher::new(http.clone(), &config), HarvestConfig::default())
    .with_notifier(notifier.clone());
  Harness { db, http, notifier, harvester, _dir: dir }
}

impl Harness {
  async fn volcanica(&self) -> Source {
    let config = SourceConfig::new("Volcanica", OAI_ENDPOINT, FeedType::OaiPmh);
    let first = oai::list_records_url(&config).unwrap();
    let second = oai::resumption_url(OAI_ENDPOINT, "page2").unwrap();
    self.http.route(first.as_str(), fixture("oai_page1.xml"));
    self.http.route(second.as_str(), fixture("oai_page2.xml"));
    self.db.add_source(&config).await.unwrap()
  }

  async fn works(&self) -> Vec<Work> { self.db.list_works(&WorkFilter::default()).await.unwrap() }
}

#[traced_test]
#[tokio::test]
async fn test_oai_harvest_and_publication_workflow() -> anyhow::Result<()> {
  let h = harness().await;
  let source = h.volcanica().await;

  let event = h.harvester.harvest(source.id, None).await?;
  assert_eq!(event.status, EventStatus::Completed);
  assert_eq!(event.counts, EventCounts { seen: 4, created: 3, updated: 0, skipped: 1 });
  assert!(logs_contain("Skipping record from Volcanica"));

  let works = h.works().await;
  assert_eq!(works.len(), 3);
  let eruption = h.db.find_by_doi("10.30909/vol.06.01.0112").await?.unwrap();
  assert_eq!(eruption.status, Status::Harvested);
  assert_eq!(eruption.title.as_deref(), Some("Eruption Dynamics of Basaltic Fissures"));
  assert!(eruption.has_geometry() && eruption.has_temporal());
  assert_eq!(eruption.source_id, Some(source.id));
  assert_eq!(eruption.event_id, Some(event.id));
  assert!(eruption.provenance.contains(&format!("HarvestingEvent ID: {}", event.id)));

  let stored = h.db.get_source(source.id).await?.unwrap();
  assert!(stored.last_harvest.is_some());
  assert_eq!(h.db.list_events(source.id).await?[0], event);
  assert_eq!(*h.notifier.finished.lock().unwrap(), vec![event.id]);

  let curator = Curator::new(h.db.clone()).with_notifier(h.notifier.clone());
  let admin = Actor::admin("editor");
  let published = curator.publish(eruption.id, &admin).await?;
  assert_eq!(published.status, Status::Published);
  assert!(published.provenance.contains("Status changed from harvested to published"));
  assert_eq!(*h.notifier.published.lock().unwrap(), vec![eruption.id]);

  // A second run finds nothing new and leaves the published record alone.
  let again = h.harvester.harvest(source.id, None).await?;
  assert_eq!(again.counts, EventCounts { seen: 4, created: 0, updated: 0, skipped: 4 });
  assert_eq!(h.db.get_work(eruption.id).await?.unwrap(), published);

  let draft = curator.unpublish(eruption.id, &admin).await?;
  assert_eq!(draft.status, Status::Draft);
  let public = h.db.list_published(&WorkFilter::default()).await?;
  assert!(public.is_empty());
  Ok(())
}

#[traced_test]
#[tokio::test]
async fn test_rss_harvest_reads_landing_pages() -> anyhow::Result<()> {
  let h = harness().await;
  h.http.route(RSS_URL, fixture("rss.xml"));
  h.http.route("https://alpine.example/articles/soil-moisture", fixture("landing.html"));
  let source = h.db.add_source(&SourceConfig::new("Alpine Geography", RSS_URL, FeedType::Rss)).await?;

  let event = h.harvester.harvest(source.id, None).await?;
  assert_eq!(event.counts, EventCounts { seen: 2, created: 2, updated: 0, skipped: 0 });

  let glacier = h.db.find_by_doi("10.5555/alpine.2024.001").await?.unwrap();
  assert_eq!(glacier.geometry.geometries, vec![Geometry::Point(vec![8.0, 46.5])]);
  assert!(!glacier.has_temporal());
  assert!(logs_contain("Could not scan landing page https://alpine.example/articles/glacier-retreat"));

  let soil = h.db.find_by_url("https://alpine.example/articles/soil-moisture").await?.unwrap();
  assert_eq!(soil.geometry.geometries, vec![Geometry::Point(vec![10.0, 50.0])]);
  assert_eq!(soil.temporal, vec![TemporalExtent::parse("2019-04-01/2022-03-31").unwrap()]);
  assert_eq!(soil.doi.as_deref(), Some("10.5555/alpine.2024.002"));
  assert_eq!(soil.publication_date, PartialDate::parse("2024-03-20"));
  Ok(())
}

#[traced_test]
#[tokio::test]
async fn test_openalex_fills_bibliographic_gaps() -> anyhow::Result<()> {
  let h = harness().await;
  let source = h.volcanica().await;
  let openalex =
    OpenAlexConfig { enabled: true, base_url: "https://openalex.example".into(), mailto: None };
  let client = OpenAlex::new(Fetcher::new(h.http.clone(), &HttpConfig::default()), &openalex);
  h.http.route(client.doi_url("10.30909/vol.06.01.0200")?.as_str(), fixture("openalex_work.json"));
  let search = client.search_url("Eruption Dynamics of Basaltic Fissures", Some("Jónsdóttir, Anna"))?;
  h.http.route(search.as_str(), fixture("openalex_search.json"));

  let options = HarvestConfig { openalex, ..Default::default() };
  let config = HttpConfig { retry_base_delay_ms: 1, ..Default::default() };
  let harvester = Harvester::new(h.db.clone(), Fetcher::new(h.http.clone(), &config), options);
  let event = harvester.harvest(source.id, None).await?;
  assert_eq!(event.counts, EventCounts { seen: 4, created: 3, updated: 0, skipped: 1 });

  let ascent = h.db.find_by_doi("10.30909/vol.06.01.0200").await?.unwrap();
  assert_eq!(ascent.openalex_id.as_deref(), Some("https://openalex.org/W4378201944"));
  assert_eq!(ascent.abstract_text.as_deref(), Some("Diffusion profiles in olivine constrain ascent to days."));
  assert_eq!(ascent.keywords, vec!["Olivine".to_string(), "Magma ascent".to_string()]);
  // The record's own byline wins.
  assert_eq!(ascent.authors, vec!["Moreau, Luc".to_string()]);
  assert_eq!(ascent.publication_date, Some(PartialDate::YearMonth(2023, 5)));

  // A search hit with a different title is not a match.
  let eruption = h.db.find_by_doi("10.30909/vol.06.01.0112").await?.unwrap();
  assert_eq!(h.http.requested(search.as_str()), 1);
  assert_eq!(eruption.openalex_id, None);
  assert_eq!(eruption.work_type, WorkType::Article);
  Ok(())
}

#[tokio::test]
async fn test_landing_pages_can_be_disabled() -> anyhow::Result<()> {
  let h = harness().await;
  h.http.route(RSS_URL, fixture("rss.xml"));
  let source = h.db.add_source(&SourceConfig::new("Alpine Geography", RSS_URL, FeedType::Rss)).await?;
  let options = HarvestConfig { fetch_landing_pages: false, ..Default::default() };
  let harvester = Harvester::new(h.db.clone(), Fetcher::new(h.http.clone(), &HttpConfig::default()), options);

  harvester.harvest(source.id, None).await?;
  assert_eq!(h.http.requested("https://alpine.example/articles/soil-moisture"), 0);
  assert_eq!(h.works().await.len(), 2);
  Ok(())
}

#[tokio::test]
async fn test_max_records_stops_early() -> anyhow::Result<()> {
  let h = harness().await;
  let source = h.volcanica().await;

  let event = h.harvester.harvest(source.id, Some(1)).await?;
  assert_eq!(event.status, EventStatus::Completed);
  assert_eq!(event.counts, EventCounts { seen: 1, created: 1, updated: 0, skipped: 0 });
  let second = oai::resumption_url(OAI_ENDPOINT, "page2")?;
  assert_eq!(h.http.requested(second.as_str()), 0);
  Ok(())
}

#[traced_test]
#[tokio::test]
async fn test_protocol_error_fails_run_but_keeps_records() -> anyhow::Result<()> {
  let h = harness().await;
  let source = h.volcanica().await;
  let second = oai::resumption_url(OAI_ENDPOINT, "page2")?;
  h.http.route(second.as_str(), fixture("oai_bad_token.xml"));

  let event = h.harvester.harvest(source.id, None).await?;
  assert_eq!(event.status, EventStatus::Failed);
  assert!(event.error.as_deref().unwrap_or_default().contains("badResumptionToken"));
  assert_eq!(event.counts, EventCounts { seen: 2, created: 2, updated: 0, skipped: 0 });
  assert!(event.completed_at.is_some());
  assert_eq!(h.works().await.len(), 2);
  assert!(h.db.get_source(source.id).await?.unwrap().last_harvest.is_none());

  // The failed run is terminal, so the source can be harvested again.
  h.http.route(second.as_str(), fixture("oai_page2.xml"));
  let retry = h.harvester.harvest(source.id, None).await?;
  assert_eq!(retry.status, EventStatus::Completed);
  assert_eq!(retry.counts.created, 1);
  Ok(())
}

#[tokio::test]
async fn test_unreachable_source_fails_run() -> anyhow::Result<()> {
  let h = harness().await;
  let source = h.db.add_source(&SourceConfig::new("Gone", "https://gone.example/oai", FeedType::OaiPmh)).await?;

  let event = h.harvester.harvest(source.id, None).await?;
  assert_eq!(event.status, EventStatus::Failed);
  assert!(event.error.as_deref().unwrap_or_default().contains("HTTP 404"));
  assert_eq!(event.counts, EventCounts::default());
  Ok(())
}

#[tokio::test]
async fn test_existing_records_are_filled_or_left_alone() -> anyhow::Result<()> {
  let h = harness().await;
  let source = h.volcanica().await;

  let mut published = crate::work::tests::work_fixture();
  published.source_id = None;
  published.doi = Some("10.30909/vol.06.01.0112".into());
  published.status = Status::Published;
  published.abstract_text = None;
  published.temporal = vec![TemporalExtent::parse("2014/2015").unwrap()];
  let published = h.db.insert_work(&published).await?;

  let mut sparse = crate::work::tests::work_fixture();
  sparse.source_id = None;
  sparse.doi = Some("10.30909/vol.06.02.0301".into());
  sparse.title = Some("Tephra Dispersal".into());
  let sparse = h.db.insert_work(&sparse).await?;

  let event = h.harvester.harvest(source.id, None).await?;
  assert_eq!(event.counts, EventCounts { seen: 4, created: 1, updated: 1, skipped: 2 });

  assert_eq!(h.db.get_work(published.id).await?.unwrap(), published);

  let filled = h.db.get_work(sparse.id).await?.unwrap();
  assert_eq!(filled.title.as_deref(), Some("Tephra Dispersal"));
  assert_eq!(filled.abstract_text.as_deref(), Some("Grain size distributions from 40 sampling sites."));
  assert!(filled.has_temporal());
  assert_eq!(filled.version, sparse.version + 1);
  assert!(filled.provenance.contains("Filled abstract"));
  assert!(filled.provenance.contains(&format!("HarvestingEvent ID: {}", event.id)));
  Ok(())
}

#[tokio::test]
async fn test_record_without_doi_is_matched_by_url() -> anyhow::Result<()> {
  let h = harness().await;
  let source = h.volcanica().await;

  let mut entered = crate::work::tests::work_fixture();
  entered.source_id = None;
  entered.doi = None;
  entered.url = Some("https://volcanica.example/article/view/112".into());
  let entered = h.db.insert_work(&entered).await?;

  let event = h.harvester.harvest(source.id, None).await?;
  assert_eq!(event.counts, EventCounts { seen: 4, created: 2, updated: 1, skipped: 1 });
  assert_eq!(h.works().await.len(), 3);

  let matched = h.db.get_work(entered.id).await?.unwrap();
  assert_eq!(matched.doi.as_deref(), Some("10.30909/vol.06.01.0112"));
  assert!(matched.has_geometry());
  assert!(matched.provenance.contains("DOI"));
  assert_eq!(h.db.find_by_doi("10.30909/vol.06.01.0112").await?.map(|w| w.id), Some(entered.id));
  Ok(())
}

#[traced_test]
#[tokio::test]
async fn test_abandoned_run_does_not_block_source() -> anyhow::Result<()> {
  let h = harness().await;
  let source = h.volcanica().await;

  let mut stuck = h.db.create_event(source.id, Utc::now() - chrono::Duration::days(2)).await?;
  stuck.start()?;
  h.db.save_event(&stuck).await?;

  let event = h.harvester.harvest(source.id, None).await?;
  assert_eq!(event.status, EventStatus::Completed);
  assert!(logs_contain("abandoned run"));
  let stuck = h.db.get_event(stuck.id).await?.unwrap();
  assert_eq!(stuck.status, EventStatus::Failed);
  assert!(stuck.error.unwrap_or_default().starts_with("abandoned"));

  // A run that started recently is still respected.
  let mut running = h.db.create_event(source.id, Utc::now()).await?;
  running.start()?;
  h.db.save_event(&running).await?;
  assert!(matches!(h.harvester.harvest(source.id, None).await, Err(HarvestError::HarvestInProgress(_))));
  assert_eq!(h.db.get_event(running.id).await?.unwrap().status, EventStatus::InProgress);
  Ok(())
}

#[tokio::test]
async fn test_harvest_due_skips_recent_sources() -> anyhow::Result<()> {
  let h = harness().await;
  let source = h.volcanica().await;

  let events = h.harvester.harvest_due(Utc::now()).await?;
  assert_eq!(events.len(), 1);
  assert_eq!(events[0].source_id, source.id);

  assert!(h.harvester.harvest_due(Utc::now()).await?.is_empty());
  let later = Utc::now() + chrono::Duration::minutes(source.config.harvest_interval_minutes + 1);
  assert_eq!(h.harvester.harvest_due(later).await?.len(), 1);
  Ok(())
}

#[tokio::test]
async fn test_unknown_source() {
  let h = harness().await;
  let err = h.harvester.harvest(42, None).await.unwrap_err();
  assert!(matches!(err, HarvestError::NotFound(_)));
}
