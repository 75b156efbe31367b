//! OAI-PMH `ListRecords` paging.
//!
//! A first request asks for `verb=ListRecords` with the source's metadata prefix and set.
//! Every response either carries records and an optional `<resumptionToken>`, or an `<error>`
//! envelope. `noRecordsMatch`, `badResumptionToken` and friends all end the run as protocol
//! errors. Continuation requests carry only the verb and the token, as the protocol requires.

use quick_xml::{events::Event, Reader};

use super::*;
use crate::source::SourceConfig;

/// URL of the first `ListRecords` request for a source.
///
/// An endpoint URL that already names a `verb` is used as is, so a registry entry can pin a
/// complete request.
pub fn list_records_url(config: &SourceConfig) -> Result<Url, HarvestError> {
  let mut url = Url::parse(&config.url)?;
  if url.query_pairs().any(|(key, _)| key == "verb") {
    return Ok(url);
  }
  {
    let mut query = url.query_pairs_mut();
    query.append_pair("verb", "ListRecords").append_pair("metadataPrefix", &config.metadata_prefix);
    if let Some(set) = &config.set_spec {
      query.append_pair("set", set);
    }
  }
  Ok(url)
}

/// URL continuing a list with `token`.
pub fn resumption_url(endpoint: &str, token: &str) -> Result<Url, HarvestError> {
  let mut url = Url::parse(endpoint)?;
  url.set_query(None);
  url.query_pairs_mut().append_pair("verb", "ListRecords").append_pair("resumptionToken", token);
  Ok(url)
}

fn invalid(reader: &Reader<&[u8]>, e: impl fmt::Display) -> HarvestError {
  HarvestError::RemoteProtocol(format!(
    "invalid OAI-PMH response at byte {}: {e}",
    reader.error_position()
  ))
}

/// Split a `ListRecords` response into raw `<record>` elements and the resumption token.
pub fn parse_page(xml: &str) -> Result<Page, HarvestError> {
  let mut reader = Reader::from_str(xml);
  let mut page = Page::default();
  let mut saw_root = false;
  let mut record_start: Option<usize> = None;
  let mut error: Option<(String, String)> = None;
  let mut in_error = false;
  let mut in_token = false;
  let mut token = String::new();

  loop {
    let before = reader.buffer_position() as usize;
    match reader.read_event() {
      Ok(Event::Start(e)) => match e.local_name().as_ref() {
        b"OAI-PMH" => saw_root = true,
        b"record" if record_start.is_none() => record_start = Some(before),
        b"error" => {
          let code = e
            .try_get_attribute("code")
            .map_err(|err| invalid(&reader, err))?
            .map(|a| format::xml_text(&a.value))
            .unwrap_or_default();
          error = Some((code, String::new()));
          in_error = true;
        },
        b"resumptionToken" if record_start.is_none() => in_token = true,
        _ => {},
      },
      Ok(Event::Empty(e)) => {
        if e.local_name().as_ref() == b"error" {
          let code = e
            .try_get_attribute("code")
            .map_err(|err| invalid(&reader, err))?
            .map(|a| format::xml_text(&a.value))
            .unwrap_or_default();
          error = Some((code, String::new()));
        }
      },
      Ok(Event::Text(t)) => {
        if in_error {
          if let Some((_, message)) = error.as_mut() {
            message.push_str(&format::xml_text(&t));
          }
        } else if in_token {
          token.push_str(&format::xml_text(&t));
        }
      },
      Ok(Event::End(e)) => match e.local_name().as_ref() {
        b"record" =>
          if let Some(start) = record_start.take() {
            let end = reader.buffer_position() as usize;
            page.records.push(xml[start..end].to_string());
          },
        b"error" => in_error = false,
        b"resumptionToken" => in_token = false,
        _ => {},
      },
      Ok(Event::Eof) => break,
      Err(e) => return Err(invalid(&reader, e)),
      _ => {},
    }
  }

  if let Some((code, message)) = error {
    return Err(HarvestError::RemoteProtocol(format!("OAI-PMH error {code}: {}", message.trim())));
  }
  if !saw_root {
    return Err(HarvestError::RemoteProtocol("response is not an OAI-PMH document".into()));
  }

  let token = token.trim();
  page.resumption_token = (!token.is_empty()).then(|| token.to_string());
  trace!("OAI-PMH page with {} records, token {:?}", page.records.len(), page.resumption_token);
  Ok(page)
}
