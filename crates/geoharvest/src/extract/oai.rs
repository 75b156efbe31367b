//! Dublin Core records from OAI-PMH `ListRecords` responses.

use super::*;

/// Parse one `<record>` element carrying `oai_dc` (or any Dublin Core flavoured) metadata.
///
/// Records whose header is marked `status="deleted"` carry no metadata and are rejected as
/// malformed.
pub fn parse_record(raw: &str, default_type: WorkType) -> Result<CandidateRecord, HarvestError> {
  let elements = Elements::parse(raw)?;

  if elements.named("header").any(|h| h.attr("status") == Some("deleted")) {
    let id = elements.named("identifier").next().map(|e| e.text.trim().to_string()).unwrap_or_default();
    return Err(HarvestError::MalformedRecord(format!("record {id} is marked deleted")));
  }

  // The header identifier is an `oai:` URI; only metadata identifiers are of interest.
  let identifiers: Vec<&str> = elements
    .named("identifier")
    .map(|e| e.text.trim())
    .filter(|id| !id.starts_with("oai:"))
    .collect();

  let doi = identifiers
    .iter()
    .copied()
    .chain(elements.texts(&["relation"]))
    .find_map(find_doi);
  let url = identifiers.iter().find_map(|id| landing_url(id));

  let candidate = CandidateRecord {
    title: elements.first_text(&["title"]),
    abstract_text: elements.first_text(&["description", "abstract"]),
    publication_date: first_date(elements.texts(&["date", "issued", "created"])),
    doi,
    url,
    work_type: work_type(elements.texts(&["type"]), default_type),
    authors: all_texts(elements.texts(&["creator"])),
    keywords: all_texts(elements.texts(&["subject"])),
    geometry: spatial(elements.texts(&["coverage", "spatial"])),
    temporal: temporal(elements.texts(&["coverage", "temporal"])),
    ..Default::default()
  };
  trace!("Extracted OAI-PMH candidate {:?}", candidate.title);
  Ok(candidate)
}
