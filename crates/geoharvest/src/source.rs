//! Harvestable sources and the registry file that describes them.
//!
//! A [`Source`] is a journal, repository or feed we pull records from. It tells the fetcher
//! where and how to ask ([`FeedType`], metadata prefix, OAI set) and tells the extractor what a
//! record is when the record itself does not say ([`WorkType`]).
//!
//! Sources live in the database; a TOML registry file can be imported to create or update
//! them in bulk:
//!
//! ```toml
//! [[sources]]
//! name              = "Volcanica"
//! url               = "https://www.jvolcanica.org/ojs/index.php/volcanica/oai"
//! feed_type         = "oai-pmh"
//! default_work_type = "article"
//! is_oa             = true
//!
//! [[sources]]
//! name      = "Scientific Data"
//! url       = "https://www.nature.com/sdata.rss"
//! feed_type = "rss"
//! ```

use std::path::Path;

use super::*;

/// How a source publishes its records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FeedType {
  /// OAI-PMH `ListRecords` with Dublin Core metadata and resumption tokens
  #[serde(rename = "oai-pmh", alias = "oai", alias = "oaipmh")]
  OaiPmh,
  /// An RSS 2.0, RSS 1.0 (RDF) or Atom feed
  #[serde(rename = "rss", alias = "atom")]
  Rss,
}

impl FeedType {
  /// Human-readable protocol name used in provenance notes.
  pub fn label(&self) -> &'static str {
    match self {
      FeedType::OaiPmh => "OAI-PMH",
      FeedType::Rss => "RSS/Atom",
    }
  }
}

impl fmt::Display for FeedType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      FeedType::OaiPmh => write!(f, "oai-pmh"),
      FeedType::Rss => write!(f, "rss"),
    }
  }
}

impl FromStr for FeedType {
  type Err = HarvestError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match &s.to_lowercase() as &str {
      "oai-pmh" | "oai" | "oaipmh" => Ok(FeedType::OaiPmh),
      "rss" | "atom" => Ok(FeedType::Rss),
      s => Err(HarvestError::InvalidFeedType(s.to_owned())),
    }
  }
}

/// Controlled vocabulary of work types.
///
/// Loosely follows the OpenAlex/Crossref type lists; [`WorkType::recognize`] maps the many
/// spellings found in Dublin Core `dc:type` and feed categories onto it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorkType {
  /// Journal article
  #[default]
  Article,
  /// Monograph or edited book
  Book,
  /// Chapter in a book
  BookChapter,
  /// Published dataset
  Dataset,
  /// Thesis or dissertation
  Dissertation,
  /// Preprint or working paper
  Preprint,
  /// Technical or project report
  Report,
  /// Review article or book review
  Review,
  /// Editorial
  Editorial,
  /// Letter or comment
  Letter,
  /// Conference paper or proceedings contribution
  ConferencePaper,
  /// Software
  Software,
  /// Anything else
  Other,
}

impl WorkType {
  /// All vocabulary members.
  pub const ALL: [WorkType; 13] = [
    WorkType::Article,
    WorkType::Book,
    WorkType::BookChapter,
    WorkType::Dataset,
    WorkType::Dissertation,
    WorkType::Preprint,
    WorkType::Report,
    WorkType::Review,
    WorkType::Editorial,
    WorkType::Letter,
    WorkType::ConferencePaper,
    WorkType::Software,
    WorkType::Other,
  ];

  /// Canonical kebab-case name.
  pub fn as_str(&self) -> &'static str {
    match self {
      WorkType::Article => "article",
      WorkType::Book => "book",
      WorkType::BookChapter => "book-chapter",
      WorkType::Dataset => "dataset",
      WorkType::Dissertation => "dissertation",
      WorkType::Preprint => "preprint",
      WorkType::Report => "report",
      WorkType::Review => "review",
      WorkType::Editorial => "editorial",
      WorkType::Letter => "letter",
      WorkType::ConferencePaper => "conference-paper",
      WorkType::Software => "software",
      WorkType::Other => "other",
    }
  }

  /// Map a free-form type value onto the vocabulary.
  ///
  /// Handles `info:eu-repo/semantics/...` URIs, Crossref names such as `journal-article`,
  /// and case/spacing variants. Generic values like `Text` or `Peer-reviewed Article` that do
  /// not pin down a type, and anything unknown, return `None` so the caller keeps its default.
  pub fn recognize(value: &str) -> Option<Self> {
    let lowered = value.trim().to_lowercase();
    let term = lowered.rsplit(|c: char| matches!(c, '/' | ':' | '#')).next().unwrap_or(&lowered);
    let term = term.replace('_', "-").replace(' ', "-");

    Some(match term.as_str() {
      "article" | "journal-article" | "journalarticle" | "research-article" => WorkType::Article,
      "book" | "monograph" | "edited-book" | "reference-book" => WorkType::Book,
      "book-chapter" | "bookpart" | "book-part" | "booksection" | "book-section" | "chapter" =>
        WorkType::BookChapter,
      "dataset" | "data-set" | "data" => WorkType::Dataset,
      "dissertation" | "doctoralthesis" | "doctoral-thesis" | "masterthesis" | "master-thesis"
      | "bachelorthesis" | "thesis" => WorkType::Dissertation,
      "preprint" | "workingpaper" | "working-paper" | "posted-content" | "submittedversion" =>
        WorkType::Preprint,
      "report" | "technicalreport" | "technical-report" | "reportpart" => WorkType::Report,
      "review" | "bookreview" | "book-review" | "review-article" => WorkType::Review,
      "editorial" => WorkType::Editorial,
      "letter" | "comment" | "correspondence" | "contributiontoperiodical" => WorkType::Letter,
      "conferenceobject" | "conference-object" | "conferencepaper" | "conference-paper"
      | "proceedings-article" | "conferenceproceedings" => WorkType::ConferencePaper,
      "software" => WorkType::Software,
      "other" => WorkType::Other,
      _ => return None,
    })
  }
}

impl fmt::Display for WorkType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for WorkType {
  type Err = HarvestError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    WorkType::ALL
      .into_iter()
      .find(|t| t.as_str() == s.trim().to_lowercase())
      .ok_or_else(|| HarvestError::InvalidSource(format!("unknown work type `{s}`")))
  }
}

fn default_metadata_prefix() -> String { "oai_dc".to_string() }

fn default_harvest_interval() -> i64 { 60 * 24 * 3 }

/// Descriptive and protocol configuration of a source, without storage bookkeeping.
///
/// This is what the registry file and the `source add` command produce.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
  /// Display name, unique in practice
  pub name:                     String,
  /// Endpoint URL: the OAI-PMH base URL (optionally with query) or the feed URL
  pub url:                      String,
  /// Protocol
  pub feed_type:                FeedType,
  /// Work type assigned when a record does not state a recognized one
  #[serde(default)]
  pub default_work_type:        WorkType,
  /// OAI-PMH metadata prefix
  #[serde(default = "default_metadata_prefix")]
  pub metadata_prefix:          String,
  /// OAI-PMH set spec
  #[serde(default)]
  pub set_spec:                 Option<String>,
  /// OpenAlex source id
  #[serde(default)]
  pub openalex_id:              Option<String>,
  /// Linking ISSN
  #[serde(default)]
  pub issn_l:                   Option<String>,
  /// Journal homepage
  #[serde(default)]
  pub homepage_url:             Option<String>,
  /// Publisher
  #[serde(default)]
  pub publisher_name:           Option<String>,
  /// Whether the source is open access
  #[serde(default)]
  pub is_oa:                    bool,
  /// Whether the source is a preprint server
  #[serde(default)]
  pub is_preprint:              bool,
  /// Minutes between scheduled harvests
  #[serde(default = "default_harvest_interval")]
  pub harvest_interval_minutes: i64,
}

impl SourceConfig {
  /// A minimal configuration with defaults for everything optional.
  pub fn new(name: impl Into<String>, url: impl Into<String>, feed_type: FeedType) -> Self {
    Self {
      name: name.into(),
      url: url.into(),
      feed_type,
      default_work_type: WorkType::default(),
      metadata_prefix: default_metadata_prefix(),
      set_spec: None,
      openalex_id: None,
      issn_l: None,
      homepage_url: None,
      publisher_name: None,
      is_oa: false,
      is_preprint: false,
      harvest_interval_minutes: default_harvest_interval(),
    }
  }

  /// Checks the endpoint URL and interval.
  pub fn validate(&self) -> Result<(), HarvestError> {
    let url = Url::parse(&self.url)?;
    if !matches!(url.scheme(), "http" | "https") {
      return Err(HarvestError::InvalidSource(format!("unsupported scheme in {}", self.url)));
    }
    if self.name.trim().is_empty() {
      return Err(HarvestError::InvalidSource("source name must not be empty".into()));
    }
    if self.harvest_interval_minutes <= 0 {
      return Err(HarvestError::InvalidSource(format!(
        "harvest interval of {} must be positive",
        self.name
      )));
    }
    Ok(())
  }
}

/// A stored source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
  /// Database id
  pub id:           SourceId,
  /// Configuration
  #[serde(flatten)]
  pub config:       SourceConfig,
  /// When the last harvesting run completed
  pub last_harvest: Option<DateTime<Utc>>,
  /// Row creation time
  pub created_at:   DateTime<Utc>,
  /// Last modification time
  pub updated_at:   DateTime<Utc>,
}

impl Source {
  /// Whether the source should be harvested at `now`.
  pub fn is_due(&self, now: DateTime<Utc>) -> bool {
    match self.last_harvest {
      None => true,
      Some(last) => last + chrono::Duration::minutes(self.config.harvest_interval_minutes) <= now,
    }
  }
}

/// The contents of a registry file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceRegistry {
  /// Declared sources
  #[serde(default)]
  pub sources: Vec<SourceConfig>,
}

impl SourceRegistry {
  /// Parse a registry from TOML text and validate every entry.
  pub fn from_toml(text: &str) -> Result<Self, HarvestError> {
    let registry: SourceRegistry = toml::from_str(text)?;
    registry.sources.iter().try_for_each(SourceConfig::validate)?;
    Ok(registry)
  }

  /// Load a registry file from disk.
  pub fn load(path: impl AsRef<Path>) -> Result<Self, HarvestError> {
    let text = std::fs::read_to_string(path.as_ref())?;
    debug!("Loaded source registry from {}", path.as_ref().display());
    Self::from_toml(&text)
  }
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;

  use super::*;

  #[test]
  fn test_feed_type_parse() {
    assert_eq!("OAI-PMH".parse::<FeedType>().unwrap(), FeedType::OaiPmh);
    assert_eq!("atom".parse::<FeedType>().unwrap(), FeedType::Rss);
    assert!(matches!("ftp".parse::<FeedType>(), Err(HarvestError::InvalidFeedType(_))));
  }

  #[test]
  fn test_work_type_recognize() {
    assert_eq!(WorkType::recognize("info:eu-repo/semantics/article"), Some(WorkType::Article));
    assert_eq!(WorkType::recognize("journal-article"), Some(WorkType::Article));
    assert_eq!(WorkType::recognize("Dataset"), Some(WorkType::Dataset));
    assert_eq!(
      WorkType::recognize("info:eu-repo/semantics/doctoralThesis"),
      Some(WorkType::Dissertation)
    );
    assert_eq!(WorkType::recognize("Conference Paper"), Some(WorkType::ConferencePaper));
    assert_eq!(WorkType::recognize("Text"), None);
    assert_eq!(WorkType::recognize("Peer-reviewed Article"), None);
  }

  #[test]
  fn test_work_type_round_trip_names() {
    for t in WorkType::ALL {
      assert_eq!(t.as_str().parse::<WorkType>().unwrap(), t);
    }
  }

  #[test]
  fn test_registry_from_toml() {
    let registry = SourceRegistry::from_toml(
      r#"
        [[sources]]
        name = "Volcanica"
        url = "https://www.jvolcanica.org/ojs/index.php/volcanica/oai"
        feed_type = "oai-pmh"
        is_oa = true

        [[sources]]
        name = "Scientific Data"
        url = "https://www.nature.com/sdata.rss"
        feed_type = "rss"
        default_work_type = "dataset"
        harvest_interval_minutes = 10080
      "#,
    )
    .unwrap();

    assert_eq!(registry.sources.len(), 2);
    assert_eq!(registry.sources[0].metadata_prefix, "oai_dc");
    assert_eq!(registry.sources[0].harvest_interval_minutes, 4320);
    assert!(registry.sources[0].is_oa);
    assert_eq!(registry.sources[1].default_work_type, WorkType::Dataset);
  }

  #[test]
  fn test_registry_rejects_bad_url() {
    let result = SourceRegistry::from_toml(
      r#"
        [[sources]]
        name = "Broken"
        url = "not a url"
        feed_type = "rss"
      "#,
    );
    assert!(matches!(result, Err(HarvestError::InvalidUrl(_))));
  }

  #[test]
  fn test_is_due() {
    let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
    let mut source = Source {
      id:           1,
      config:       SourceConfig::new("x", "https://example.org/oai", FeedType::OaiPmh),
      last_harvest: None,
      created_at:   now,
      updated_at:   now,
    };
    assert!(source.is_due(now));

    source.last_harvest = Some(now - chrono::Duration::minutes(60));
    assert!(!source.is_due(now));

    source.last_harvest = Some(now - chrono::Duration::days(3));
    assert!(source.is_due(now));
  }
}
