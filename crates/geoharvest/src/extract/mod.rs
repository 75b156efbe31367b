//! Metadata extraction: raw record payloads to normalized [`CandidateRecord`]s.
//!
//! One raw unit (an OAI-PMH `<record>`, an RSS `<item>` or an Atom `<entry>`) goes in, one
//! candidate or a [`HarvestError::MalformedRecord`] comes out. Spatial and temporal extent is
//! taken from structured fields first; [`enrich_from_landing_page`] then fills what is still
//! missing from the meta tags of the record's landing page. [`enrich_from_openalex`] can fill
//! bibliographic gaps (abstract, authors, keywords) from OpenAlex.
//!
//! - [`oai`] - Dublin Core inside OAI-PMH records
//! - [`feed`] - RSS 1.0/2.0 and Atom items, including GeoRSS and PRISM fields
//! - [`html`] - `DC.SpatialCoverage` / `DC.temporal` meta tags of landing pages

use quick_xml::{
  events::{BytesStart, Event},
  Reader,
};

use super::*;
use crate::{
  clients::{openalex::OpenAlex, Fetcher},
  dedup::DedupKey,
};

pub mod feed;
pub mod html;
pub mod oai;

lazy_static! {
  /// Crossref's recommended pattern, matched case-insensitively anywhere in a string.
  static ref DOI: Regex = Regex::new(r"(?i)10\.\d{4,9}/[-._;()/:A-Z0-9]+").unwrap();
}

/// Find the first DOI in `text` and return it lower-cased and bare.
///
/// ```
/// use geoharvest::extract::find_doi;
///
/// assert_eq!(find_doi("https://doi.org/10.5194/ESSD-13-1-2021."), Some("10.5194/essd-13-1-2021".into()));
/// assert_eq!(find_doi("urn:nbn:de:0000"), None);
/// ```
pub fn find_doi(text: &str) -> Option<String> {
  let found = DOI.find(text)?.as_str();
  let trimmed = found.trim_end_matches(|c: char| matches!(c, '.' | ',' | ';' | ':'));
  Some(trimmed.to_lowercase())
}

/// A record as extracted from a feed, before deduplication.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CandidateRecord {
  /// Title
  pub title:            Option<String>,
  /// Abstract as plain text
  pub abstract_text:    Option<String>,
  /// Publication date
  pub publication_date: Option<PartialDate>,
  /// Normalized DOI
  pub doi:              Option<String>,
  /// Landing page URL
  pub url:              Option<String>,
  /// Work type
  pub work_type:        WorkType,
  /// Author names in byline order
  pub authors:          Vec<String>,
  /// Subject keywords
  pub keywords:         Vec<String>,
  /// OpenAlex work id, when matched
  pub openalex_id:      Option<String>,
  /// Spatial extent
  pub geometry:         GeometryCollection,
  /// Temporal extent
  pub temporal:         Vec<TemporalExtent>,
}

impl CandidateRecord {
  /// A record must carry a title or a DOI.
  pub fn validate(&self) -> Result<(), HarvestError> {
    if self.title.is_none() && self.doi.is_none() {
      return Err(HarvestError::MalformedRecord("record has neither title nor DOI".into()));
    }
    Ok(())
  }

  /// Keys used to look the record up in the store, in lookup order.
  pub fn dedup_keys(&self) -> Vec<DedupKey> { DedupKey::all(self.doi.as_deref(), self.url.as_deref()) }

  /// Turn the candidate into a new harvested [`Work`] with a provenance note.
  pub fn into_work(self, source: &Source, event_id: EventId, at: DateTime<Utc>) -> Work {
    let mut work = Work {
      id:               0,
      status:           Status::Harvested,
      title:            self.title,
      abstract_text:    self.abstract_text,
      publication_date: self.publication_date,
      doi:              self.doi,
      url:              self.url,
      work_type:        self.work_type,
      authors:          self.authors,
      keywords:         self.keywords,
      openalex_id:      self.openalex_id,
      geometry:         self.geometry,
      temporal:         self.temporal,
      source_id:        Some(source.id),
      event_id:         Some(event_id),
      provenance:       String::new(),
      created_at:       at,
      updated_at:       at,
      version:          1,
    };
    work.append_provenance(at, &harvest_note(source, event_id));
    work
  }
}

/// Provenance line for a record created or updated by a harvesting run.
pub fn harvest_note(source: &Source, event_id: EventId) -> String {
  format!(
    "Harvested via {} from source {} ({}). HarvestingEvent ID: {event_id}.",
    source.config.feed_type.label(),
    source.config.name,
    source.config.url
  )
}

/// Extract a candidate from one raw record of `source`.
pub fn extract_record(raw: &str, source: &Source) -> Result<CandidateRecord, HarvestError> {
  let candidate = match source.config.feed_type {
    FeedType::OaiPmh => oai::parse_record(raw, source.config.default_work_type)?,
    FeedType::Rss => feed::parse_item(raw, source.config.default_work_type)?,
  };
  candidate.validate()?;
  Ok(candidate)
}

/// Fill missing geometry, temporal extent or DOI from the candidate's landing page.
///
/// Only fetched when something is missing. Failures are logged and leave the candidate as
/// it was.
pub async fn enrich_from_landing_page(fetcher: &Fetcher, mut candidate: CandidateRecord) -> CandidateRecord {
  if !candidate.geometry.is_empty() && !candidate.temporal.is_empty() {
    return candidate;
  }
  let url = match (&candidate.url, &candidate.doi) {
    (Some(url), _) => url.clone(),
    (None, Some(doi)) => format!("https://doi.org/{doi}"),
    (None, None) => return candidate,
  };

  let page = match fetcher.landing_page(&url).await {
    Ok(page) => page,
    Err(e) => {
      warn!("Could not scan landing page {url}: {e}");
      return candidate;
    },
  };

  let meta = html::scan(&page);
  if candidate.geometry.is_empty() {
    if let Some(geometry) = meta.geometry {
      debug!("Geometry {} from landing page {url}", geometry.describe());
      candidate.geometry = geometry;
    }
  }
  if candidate.temporal.is_empty() {
    if let Some(temporal) = meta.temporal {
      debug!("Temporal extent {temporal} from landing page {url}");
      candidate.temporal = vec![temporal];
    }
  }
  if candidate.doi.is_none() {
    candidate.doi = meta.doi;
  }
  candidate
}

/// Fill what the candidate lacks from its OpenAlex record: title, abstract, DOI, publication
/// date, authors, keywords. The OpenAlex work type only replaces the source's default type.
/// Failures are logged and leave the candidate as it was.
pub async fn enrich_from_openalex(
  openalex: &OpenAlex,
  mut candidate: CandidateRecord,
  default_type: WorkType,
) -> CandidateRecord {
  let first_author = candidate.authors.first().map(String::as_str);
  let work = match openalex.lookup(candidate.doi.as_deref(), candidate.title.as_deref(), first_author).await {
    Ok(Some(work)) => work,
    Ok(None) => {
      trace!("No OpenAlex match for {:?}", candidate.title);
      return candidate;
    },
    Err(e) => {
      warn!("OpenAlex lookup for {:?} failed: {e}", candidate.title);
      return candidate;
    },
  };

  if candidate.title.is_none() {
    candidate.title = work.title.as_deref().and_then(format::non_empty);
  }
  if candidate.abstract_text.is_none() {
    candidate.abstract_text = work.abstract_text();
  }
  if candidate.doi.is_none() {
    candidate.doi = work.doi.as_deref().and_then(find_doi);
  }
  if candidate.publication_date.is_none() {
    candidate.publication_date = work.publication_date.as_deref().and_then(PartialDate::parse);
  }
  if candidate.authors.is_empty() {
    candidate.authors = work.authors();
  }
  if candidate.keywords.is_empty() {
    candidate.keywords = work.keyword_names();
  }
  if candidate.work_type == default_type {
    if let Some(work_type) = work.work_type.as_deref().and_then(WorkType::recognize) {
      candidate.work_type = work_type;
    }
  }
  candidate.openalex_id = Some(work.id);
  candidate
}

/// A flattened XML element of a record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Element {
  /// Namespace prefix as written, e.g. `dc`
  pub prefix:     Option<String>,
  /// Local name, e.g. `title`
  pub name:       String,
  /// Attributes by local name
  pub attributes: Vec<(String, String)>,
  /// Concatenated text of the element and its descendants
  pub text:       String,
}

impl Element {
  fn from_start(start: &BytesStart) -> Self {
    let qname = start.name();
    let attributes = start
      .attributes()
      .filter_map(Result::ok)
      .map(|a| {
        (String::from_utf8_lossy(a.key.local_name().as_ref()).into_owned(), format::xml_text(&a.value))
      })
      .collect();
    Self {
      prefix: qname.prefix().map(|p| String::from_utf8_lossy(p.as_ref()).into_owned()),
      name: String::from_utf8_lossy(qname.local_name().as_ref()).into_owned(),
      attributes,
      text: String::new(),
    }
  }

  /// Attribute value by local name.
  pub fn attr(&self, name: &str) -> Option<&str> {
    self.attributes.iter().find(|(key, _)| key == name).map(|(_, value)| value.as_str())
  }

  fn is(&self, name: &str) -> bool { self.name.eq_ignore_ascii_case(name) }
}

/// All elements of a raw record, innermost first, in document order otherwise.
pub(crate) struct Elements(Vec<Element>);

impl Elements {
  /// Read every element of `raw`.
  pub fn parse(raw: &str) -> Result<Self, HarvestError> {
    let mut reader = Reader::from_str(raw);
    let mut open: Vec<Element> = Vec::new();
    let mut done = Vec::new();

    loop {
      match reader.read_event() {
        Ok(Event::Start(e)) => open.push(Element::from_start(&e)),
        Ok(Event::Empty(e)) => done.push(Element::from_start(&e)),
        Ok(Event::Text(t)) =>
          if let Some(current) = open.last_mut() {
            current.text.push_str(&format::xml_text(&t));
          },
        Ok(Event::CData(c)) =>
          if let Some(current) = open.last_mut() {
            current.text.push_str(&String::from_utf8_lossy(&c));
          },
        Ok(Event::End(_)) =>
          if let Some(element) = open.pop() {
            if let Some(parent) = open.last_mut() {
              parent.text.push(' ');
              parent.text.push_str(&element.text);
            }
            done.push(element);
          },
        Ok(Event::Eof) => break,
        Err(e) =>
          return Err(HarvestError::MalformedRecord(format!(
            "invalid XML at byte {}: {e}",
            reader.error_position()
          ))),
        _ => {},
      }
    }
    Ok(Self(done))
  }

  /// Elements with local name `name`, case-insensitively.
  pub fn named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
    self.0.iter().filter(move |e| e.is(name))
  }

  /// Elements with local name `name` under namespace prefix `prefix`.
  pub fn prefixed<'a>(&'a self, prefix: &'a str, name: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
    self.named(name).filter(move |e| e.prefix.as_deref() == Some(prefix))
  }

  /// Raw text of every element named in `names`, grouped by name in the order given.
  pub fn texts<'a>(&'a self, names: &'a [&'a str]) -> impl Iterator<Item = &'a str> + 'a {
    names.iter().flat_map(move |name| self.named(name).map(|e| e.text.as_str()))
  }

  /// First value among `names` that is non-empty after cleaning.
  pub fn first_text(&self, names: &[&str]) -> Option<String> {
    self.texts(names).find_map(format::non_empty)
  }
}

/// Every non-empty value after cleaning, without repeats, in order.
pub(crate) fn all_texts<'a>(values: impl IntoIterator<Item = &'a str>) -> Vec<String> {
  let mut texts: Vec<String> = Vec::new();
  for text in values.into_iter().filter_map(format::non_empty) {
    if !texts.contains(&text) {
      texts.push(text);
    }
  }
  texts
}

/// First recognizable date among `values`.
pub(crate) fn first_date<'a>(values: impl IntoIterator<Item = &'a str>) -> Option<PartialDate> {
  values.into_iter().find_map(PartialDate::parse)
}

/// First recognized work type among `values`, else `default`.
pub(crate) fn work_type<'a>(values: impl IntoIterator<Item = &'a str>, default: WorkType) -> WorkType {
  values.into_iter().find_map(WorkType::recognize).unwrap_or(default)
}

/// Every geometry that parses among `values`; the rest are ignored.
pub(crate) fn spatial<'a>(values: impl IntoIterator<Item = &'a str>) -> GeometryCollection {
  let mut collection = GeometryCollection::empty();
  for value in values {
    match GeometryCollection::parse(value) {
      Ok(parsed) => collection.geometries.extend(parsed.geometries),
      Err(e) => trace!("Not a geometry: {value:?} ({e})"),
    }
  }
  collection
}

/// Every temporal extent that parses among `values`.
pub(crate) fn temporal<'a>(values: impl IntoIterator<Item = &'a str>) -> Vec<TemporalExtent> {
  values.into_iter().filter_map(TemporalExtent::parse).collect()
}

/// `value` as a normalized web URL, unless it is not one or points at a DOI resolver.
pub(crate) fn landing_url(value: &str) -> Option<String> {
  let url = Url::parse(value.trim()).ok()?;
  if !matches!(url.scheme(), "http" | "https") {
    return None;
  }
  match url.host_str() {
    Some("doi.org" | "dx.doi.org" | "www.doi.org") => None,
    Some(_) => crate::dedup::normalize_url(url.as_str()),
    None => None,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_find_doi() {
    assert_eq!(find_doi("doi:10.1000/XYZ123"), Some("10.1000/xyz123".into()));
    assert_eq!(find_doi("see https://dx.doi.org/10.5194/essd-13-1-2021;"), Some("10.5194/essd-13-1-2021".into()));
    assert_eq!(find_doi("10.12/short-prefix"), None);
    assert_eq!(find_doi("no identifier here"), None);
  }

  #[test]
  fn test_elements_collect_text() {
    let elements = Elements::parse(
      r#"<item><dc:title>A &amp; B</dc:title><summary type="xhtml"><div>in <b>bold</b></div></summary><link href="http://x.org/1"/></item>"#,
    )
    .unwrap();
    assert_eq!(elements.first_text(&["title"]), Some("A & B".into()));
    assert_eq!(elements.first_text(&["summary"]), Some("in bold".into()));
    assert_eq!(elements.named("link").next().and_then(|l| l.attr("href")), Some("http://x.org/1"));
    assert_eq!(elements.prefixed("dc", "title").count(), 1);
    assert_eq!(elements.prefixed("prism", "title").count(), 0);
  }

  #[test]
  fn test_landing_url() {
    assert_eq!(landing_url("https://doi.org/10.1/x"), None);
    assert_eq!(landing_url("urn:isbn:123"), None);
    assert_eq!(landing_url(" https://journal.org/article/view/7 "), Some("https://journal.org/article/view/7".into()));
  }

  #[test]
  fn test_candidate_requires_title_or_doi() {
    let candidate = CandidateRecord::default();
    assert!(matches!(candidate.validate(), Err(HarvestError::MalformedRecord(_))));
    let candidate = CandidateRecord { doi: Some("10.1234/abc".into()), ..Default::default() };
    assert!(candidate.validate().is_ok());
  }
}
