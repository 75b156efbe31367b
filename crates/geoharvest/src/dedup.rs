//! Deduplication of harvested candidates against stored works.
//!
//! The store is searched by normalized DOI first, then by normalized landing page URL. Given
//! what was found, [`resolve`] decides without side effects:
//!
//! - nothing found: [`Resolution::Insert`]
//! - a `harvested` or `draft` work: fill its empty fields ([`Resolution::UpdateExisting`]), or
//!   [`Resolution::Skip`] if the candidate adds nothing
//! - a `contributed`, `published`, `testing` or `withdrawn` work: [`Resolution::Skip`]; curated
//!   records are never touched by harvesting

use super::*;

/// Normalize a DOI to its bare lower-case form, accepting `doi:` and resolver URL prefixes.
///
/// ```
/// use geoharvest::dedup::normalize_doi;
///
/// assert_eq!(normalize_doi("https://doi.org/10.5194/ESSD-13-1-2021"), Some("10.5194/essd-13-1-2021".into()));
/// assert_eq!(normalize_doi("not a doi"), None);
/// ```
pub fn normalize_doi(raw: &str) -> Option<String> { extract::find_doi(raw) }

/// Normalize a landing page URL: scheme and host lower-cased, fragment and trailing slash
/// dropped, `http` treated as `https`.
pub fn normalize_url(raw: &str) -> Option<String> {
  let mut url = Url::parse(raw.trim()).ok()?;
  if !matches!(url.scheme(), "http" | "https") {
    return None;
  }
  url.set_fragment(None);
  if url.scheme() == "http" {
    url.set_scheme("https").ok()?;
  }
  let mut normalized = url.to_string();
  while normalized.ends_with('/') && url.query().is_none() {
    normalized.pop();
  }
  Some(normalized)
}

/// How a record is looked up in the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DedupKey {
  /// Normalized DOI
  Doi(String),
  /// Normalized URL
  Url(String),
}

impl DedupKey {
  /// Lookup keys for a record with the given DOI and URL, in the order they are tried: the
  /// DOI first, then the URL.
  pub fn all(doi: Option<&str>, url: Option<&str>) -> Vec<Self> {
    doi
      .and_then(normalize_doi)
      .map(DedupKey::Doi)
      .into_iter()
      .chain(url.and_then(normalize_url).map(DedupKey::Url))
      .collect()
  }

  /// Whether a work found under this key is the record the keys describe. A URL match that
  /// already carries another DOI is a different work sharing a landing page.
  pub fn accepts(&self, keys: &[DedupKey], found: &Work) -> bool {
    let DedupKey::Url(_) = self else {
      return true;
    };
    let wanted = keys.iter().find_map(|k| match k {
      DedupKey::Doi(doi) => Some(doi.as_str()),
      DedupKey::Url(_) => None,
    });
    match (wanted, found.doi.as_deref().and_then(normalize_doi)) {
      (Some(wanted), Some(stored)) => wanted == stored,
      _ => true,
    }
  }
}

/// Why a candidate was not written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
  /// The match is curated and harvesting must not touch it
  Curated(Status),
  /// The match already has every value the candidate offers
  NothingNew,
}

/// Outcome of deduplication.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
  /// Store the candidate as a new work
  Insert,
  /// Store the merged work over the existing one
  UpdateExisting {
    /// Existing work with empty fields filled from the candidate
    work:   Box<Work>,
    /// Names of the filled fields
    filled: Vec<&'static str>,
  },
  /// Leave everything as is
  Skip(SkipReason),
}

fn fill<T: Clone>(slot: &mut Option<T>, value: &Option<T>, name: &'static str, filled: &mut Vec<&'static str>) {
  if slot.is_none() && value.is_some() {
    *slot = value.clone();
    filled.push(name);
  }
}

/// Decide what to do with `candidate` given the work `existing` found under its key.
pub fn resolve(candidate: &CandidateRecord, existing: Option<&Work>) -> Resolution {
  let Some(existing) = existing else {
    return Resolution::Insert;
  };
  if !existing.status.accepts_harvest_updates() {
    return Resolution::Skip(SkipReason::Curated(existing.status));
  }

  let mut work = existing.clone();
  let mut filled = Vec::new();
  fill(&mut work.title, &candidate.title, "title", &mut filled);
  fill(&mut work.abstract_text, &candidate.abstract_text, "abstract", &mut filled);
  fill(&mut work.publication_date, &candidate.publication_date, "publication date", &mut filled);
  fill(&mut work.doi, &candidate.doi, "DOI", &mut filled);
  fill(&mut work.url, &candidate.url, "URL", &mut filled);
  fill(&mut work.openalex_id, &candidate.openalex_id, "OpenAlex id", &mut filled);
  if work.authors.is_empty() && !candidate.authors.is_empty() {
    work.authors = candidate.authors.clone();
    filled.push("authors");
  }
  if work.keywords.is_empty() && !candidate.keywords.is_empty() {
    work.keywords = candidate.keywords.clone();
    filled.push("keywords");
  }
  if !work.has_geometry() && !candidate.geometry.is_empty() {
    work.geometry = candidate.geometry.clone();
    filled.push("geometry");
  }
  if !work.has_temporal() && !candidate.temporal.is_empty() {
    work.temporal = candidate.temporal.clone();
    filled.push("temporal extent");
  }

  if filled.is_empty() {
    Resolution::Skip(SkipReason::NothingNew)
  } else {
    Resolution::UpdateExisting { work: Box::new(work), filled }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::work::tests::work_fixture;

  fn candidate() -> CandidateRecord {
    CandidateRecord {
      title: Some("Eruption Dynamics of Basaltic Fissures".into()),
      doi: Some("10.5710/volcanica.12345".into()),
      ..Default::default()
    }
  }

  #[test]
  fn test_no_match_inserts() {
    assert_eq!(resolve(&candidate(), None), Resolution::Insert);
    let anonymous = CandidateRecord { title: Some("Untitled".into()), ..Default::default() };
    assert!(anonymous.dedup_keys().is_empty());
    assert_eq!(resolve(&anonymous, None), Resolution::Insert);
  }

  #[test]
  fn test_curated_matches_are_skipped() {
    for status in [Status::Contributed, Status::Published, Status::Testing, Status::Withdrawn] {
      let mut existing = work_fixture();
      existing.status = status;
      let mut richer = candidate();
      richer.abstract_text = Some("New abstract".into());
      assert_eq!(resolve(&richer, Some(&existing)), Resolution::Skip(SkipReason::Curated(status)));
    }
  }

  #[test]
  fn test_fills_only_empty_fields() {
    let existing = work_fixture();
    let mut richer = candidate();
    richer.title = Some("A different title".into());
    richer.abstract_text = Some("We model fissures.".into());
    richer.geometry = GeometryCollection::parse("POINT(-16.8 64.9)").unwrap();

    let Resolution::UpdateExisting { work, filled } = resolve(&richer, Some(&existing)) else {
      panic!("expected an update");
    };
    assert_eq!(filled, vec!["abstract", "geometry"]);
    assert_eq!(work.title, existing.title);
    assert_eq!(work.abstract_text.as_deref(), Some("We model fissures."));
    assert_eq!(work.status, Status::Harvested);
    assert_eq!(work.id, existing.id);
  }

  #[test]
  fn test_identical_payload_is_skipped() {
    assert_eq!(resolve(&candidate(), Some(&work_fixture())), Resolution::Skip(SkipReason::NothingNew));
  }

  #[test]
  fn test_url_match_with_other_doi_is_another_work() {
    let keys = DedupKey::all(Some("10.1000/abc"), Some("https://x.org/a"));
    let url_key = &keys[1];
    let mut found = work_fixture();
    found.doi = None;
    assert!(url_key.accepts(&keys, &found));
    found.doi = Some("10.1000/ABC".into());
    assert!(url_key.accepts(&keys, &found));
    found.doi = Some("10.1000/other".into());
    assert!(!url_key.accepts(&keys, &found));
    assert!(keys[0].accepts(&keys, &found));
  }

  #[test]
  fn test_keys() {
    assert_eq!(DedupKey::all(Some("doi:10.1000/ABC"), Some("https://x.org/a")), vec![
      DedupKey::Doi("10.1000/abc".into()),
      DedupKey::Url("https://x.org/a".into())
    ]);
    assert_eq!(DedupKey::all(None, Some("HTTP://Journal.org/article/7/#top")), vec![DedupKey::Url(
      "https://journal.org/article/7".into()
    )]);
    assert_eq!(normalize_url("https://journal.org/view?id=3"), Some("https://journal.org/view?id=3".into()));
    assert_eq!(normalize_url("ftp://journal.org/x"), None);
  }
}
