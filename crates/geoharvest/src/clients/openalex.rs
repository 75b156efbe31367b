//! OpenAlex works API.
//!
//! Records are looked up by DOI first (`/works/doi:<doi>`); without a DOI match, a title
//! search narrowed by the first author is tried and only a near-identical title is
//! accepted. A lookup never fails a harvest: callers log errors and move on.

use std::collections::{BTreeMap, HashSet};

use super::*;
use crate::config::OpenAlexConfig;

/// How many search results are compared against the record's title.
const SEARCH_RESULTS: usize = 5;

/// Minimum word overlap between two titles to call them the same work.
const TITLE_SIMILARITY: f64 = 0.9;

/// The parts of an OpenAlex work record we use.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct OpenAlexWork {
  /// `https://openalex.org/W...`
  pub id:                      String,
  /// DOI as a resolver URL
  #[serde(default)]
  pub doi:                     Option<String>,
  /// Title
  #[serde(default)]
  pub title:                   Option<String>,
  /// OpenAlex work type, e.g. `article` or `dataset`
  #[serde(default, rename = "type")]
  pub work_type:               Option<String>,
  /// `YYYY-MM-DD`
  #[serde(default)]
  pub publication_date:        Option<String>,
  /// Authors in byline order
  #[serde(default)]
  pub authorships:             Vec<Authorship>,
  /// Keywords assigned by OpenAlex
  #[serde(default)]
  pub keywords:                Vec<Keyword>,
  /// Abstract as word to positions
  #[serde(default)]
  pub abstract_inverted_index: Option<BTreeMap<String, Vec<usize>>>,
}

/// One author of a work.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Authorship {
  /// The author
  #[serde(default)]
  pub author: AuthorRef,
}

/// Author summary inside an authorship.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct AuthorRef {
  /// Name as displayed by OpenAlex
  #[serde(default)]
  pub display_name: Option<String>,
}

/// A keyword of a work.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Keyword {
  /// Keyword text
  #[serde(default)]
  pub display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchResults {
  #[serde(default)]
  results: Vec<OpenAlexWork>,
}

impl OpenAlexWork {
  /// Author names, skipping authorships without one.
  pub fn authors(&self) -> Vec<String> {
    self.authorships.iter().filter_map(|a| a.author.display_name.as_deref()).filter_map(format::non_empty).collect()
  }

  /// Keyword names.
  pub fn keyword_names(&self) -> Vec<String> {
    self.keywords.iter().filter_map(|k| k.display_name.as_deref()).filter_map(format::non_empty).collect()
  }

  /// The abstract, rebuilt from its inverted index.
  pub fn abstract_text(&self) -> Option<String> {
    let index = self.abstract_inverted_index.as_ref()?;
    let mut words: Vec<(usize, &str)> =
      index.iter().flat_map(|(word, positions)| positions.iter().map(move |p| (*p, word.as_str()))).collect();
    words.sort_unstable();
    let text = words.into_iter().map(|(_, word)| word).collect::<Vec<_>>().join(" ");
    format::non_empty(&text)
  }
}

/// Whether two titles name the same work: equal after normalization, or sharing at least
/// 90% of their words.
pub fn titles_match(a: &str, b: &str) -> bool {
  fn words(title: &str) -> HashSet<String> {
    title
      .split(|c: char| !c.is_alphanumeric())
      .filter(|w| !w.is_empty())
      .map(str::to_lowercase)
      .collect()
  }
  let (a, b) = (words(a), words(b));
  if a.is_empty() || b.is_empty() {
    return false;
  }
  let shared = a.intersection(&b).count() as f64;
  shared / a.union(&b).count() as f64 >= TITLE_SIMILARITY
}

/// Client for the works endpoint.
#[derive(Clone)]
pub struct OpenAlex {
  fetcher:  Fetcher,
  base_url: String,
  mailto:   Option<String>,
}

impl OpenAlex {
  /// A client fetching through `fetcher`.
  pub fn new(fetcher: Fetcher, config: &OpenAlexConfig) -> Self {
    Self { fetcher, base_url: config.base_url.trim_end_matches('/').to_string(), mailto: config.mailto.clone() }
  }

  /// URL of the single work with `doi`.
  pub fn doi_url(&self, doi: &str) -> Result<Url, HarvestError> {
    let mut url = Url::parse(&format!("{}/works/doi:{doi}", self.base_url))?;
    self.polite(&mut url);
    Ok(url)
  }

  /// URL of a title search, narrowed by `author` when known.
  pub fn search_url(&self, title: &str, author: Option<&str>) -> Result<Url, HarvestError> {
    // Commas separate filters
    let mut filter = format!("title.search:{}", title.replace(',', " "));
    if let Some(author) = author {
      filter.push_str(&format!(",raw_author_name.search:{}", author.replace(',', " ")));
    }
    let mut url = Url::parse(&format!("{}/works", self.base_url))?;
    url.query_pairs_mut().append_pair("filter", &filter).append_pair("per-page", &SEARCH_RESULTS.to_string());
    self.polite(&mut url);
    Ok(url)
  }

  fn polite(&self, url: &mut Url) {
    if let Some(mailto) = &self.mailto {
      url.query_pairs_mut().append_pair("mailto", mailto);
    }
  }

  /// The work with `doi`, or `None` when OpenAlex does not know it.
  pub async fn by_doi(&self, doi: &str) -> Result<Option<OpenAlexWork>, HarvestError> {
    let url = self.doi_url(doi)?;
    match self.fetcher.get_json::<OpenAlexWork>(url.as_str()).await? {
      Some(work) if !work.id.is_empty() => Ok(Some(work)),
      _ => Ok(None),
    }
  }

  /// The best title match among the top search results, if its title is close enough.
  pub async fn by_title(&self, title: &str, author: Option<&str>) -> Result<Option<OpenAlexWork>, HarvestError> {
    let url = self.search_url(title, author)?;
    let Some(found) = self.fetcher.get_json::<SearchResults>(url.as_str()).await? else {
      return Ok(None);
    };
    trace!("{} OpenAlex results for {title:?}", found.results.len());
    Ok(found.results.into_iter().find(|w| w.title.as_deref().is_some_and(|t| titles_match(title, t))))
  }

  /// Match a record: by DOI, else by title and first author. Title searches without an
  /// author are too ambiguous and are not attempted.
  pub async fn lookup(
    &self,
    doi: Option<&str>,
    title: Option<&str>,
    first_author: Option<&str>,
  ) -> Result<Option<OpenAlexWork>, HarvestError> {
    if let Some(doi) = doi {
      if let Some(work) = self.by_doi(doi).await? {
        debug!("OpenAlex match by DOI {doi}: {}", work.id);
        return Ok(Some(work));
      }
    }
    match (title, first_author) {
      (Some(title), Some(author)) => {
        let found = self.by_title(title, Some(author)).await?;
        if let Some(work) = &found {
          debug!("OpenAlex match by title and author: {}", work.id);
        }
        Ok(found)
      },
      _ => Ok(None),
    }
  }
}
