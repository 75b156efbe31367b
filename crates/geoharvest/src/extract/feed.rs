//! RSS and Atom items, with the GeoRSS, PRISM and Dublin Core extensions journals use.

use super::*;

const GEORSS_KINDS: [&str; 4] = ["point", "line", "polygon", "box"];

/// Link of an item: RSS `<link>` text, else the Atom `alternate` link, else a URL-like
/// `guid`/`id`.
fn item_url(elements: &Elements) -> Option<String> {
  let rss = elements.named("link").find_map(|l| landing_url(&l.text));
  let atom = || {
    elements
      .named("link")
      .filter(|l| matches!(l.attr("rel"), None | Some("alternate")))
      .find_map(|l| l.attr("href").and_then(landing_url))
  };
  let fallback = || elements.texts(&["guid", "id"]).find_map(landing_url);
  rss.or_else(atom).or_else(fallback)
}

fn georss(elements: &Elements) -> GeometryCollection {
  let mut collection = GeometryCollection::empty();
  for kind in GEORSS_KINDS {
    for element in elements.prefixed("georss", kind) {
      match GeometryCollection::from_georss(kind, &element.text) {
        Ok(parsed) => collection.geometries.extend(parsed.geometries),
        Err(e) => debug!("Ignoring GeoRSS element: {e}"),
      }
    }
  }
  collection
}

/// RSS `<category>` text, Atom `category/@term` and `dc:subject`.
fn categories(elements: &Elements) -> Vec<String> {
  let terms = elements.named("category").map(|c| c.attr("term").unwrap_or(c.text.as_str()));
  all_texts(terms.chain(elements.texts(&["subject"])))
}

/// Parse one `<item>` or `<entry>`.
pub fn parse_item(raw: &str, default_type: WorkType) -> Result<CandidateRecord, HarvestError> {
  let elements = Elements::parse(raw)?;

  let doi = elements
    .prefixed("prism", "doi")
    .map(|e| e.text.as_str())
    .chain(elements.texts(&["doi", "identifier", "guid", "id", "link"]))
    .find_map(find_doi);

  let mut geometry = georss(&elements);
  geometry.geometries.extend(spatial(elements.texts(&["coverage", "spatial"])).geometries);

  let candidate = CandidateRecord {
    title: elements.first_text(&["title"]),
    abstract_text: elements.first_text(&["description", "summary", "abstract", "encoded", "content"]),
    publication_date: first_date(elements.texts(&[
      "pubDate",
      "date",
      "publicationDate",
      "published",
      "issued",
      "updated",
    ])),
    doi,
    url: item_url(&elements),
    work_type: work_type(elements.texts(&["type"]), default_type),
    authors: all_texts(elements.texts(&["creator", "name"])),
    keywords: categories(&elements),
    geometry,
    temporal: temporal(elements.texts(&["coverage", "temporal"])),
    ..Default::default()
  };
  trace!("Extracted feed candidate {:?}", candidate.title);
  Ok(candidate)
}
