//! RSS and Atom feeds, fetched in a single request.

use quick_xml::{events::Event, Reader};

use super::*;

/// Split an RSS 1.0 (RDF), RSS 2.0 or Atom document into raw `<item>`/`<entry>` elements.
pub fn parse_feed(xml: &str) -> Result<Page, HarvestError> {
  let mut reader = Reader::from_str(xml);
  let mut page = Page::default();
  let mut root: Option<Vec<u8>> = None;
  let mut item_start: Option<usize> = None;

  loop {
    let before = reader.buffer_position() as usize;
    match reader.read_event() {
      Ok(Event::Start(e)) => {
        let name = e.local_name();
        if root.is_none() {
          root = Some(name.as_ref().to_vec());
        }
        if item_start.is_none() && matches!(name.as_ref(), b"item" | b"entry") {
          item_start = Some(before);
        }
      },
      Ok(Event::Empty(e)) if root.is_none() => root = Some(e.local_name().as_ref().to_vec()),
      Ok(Event::End(e)) =>
        if matches!(e.local_name().as_ref(), b"item" | b"entry") {
          if let Some(start) = item_start.take() {
            page.records.push(xml[start..reader.buffer_position() as usize].to_string());
          }
        },
      Ok(Event::Eof) => break,
      Err(e) =>
        return Err(HarvestError::RemoteProtocol(format!(
          "invalid feed at byte {}: {e}",
          reader.error_position()
        ))),
      _ => {},
    }
  }

  match root.as_deref() {
    Some(b"rss" | b"RDF" | b"feed") => {
      trace!("Feed with {} items", page.records.len());
      Ok(page)
    },
    Some(other) => Err(HarvestError::RemoteProtocol(format!(
      "expected an RSS or Atom document, found <{}>",
      String::from_utf8_lossy(other)
    ))),
    None => Err(HarvestError::RemoteProtocol("empty feed document".into())),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_rss_items() {
    let xml = r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>Journal</title>
  <item><title>One</title></item>
  <item><title>Two</title></item>
</channel></rss>"#;
    let page = parse_feed(xml).unwrap();
    assert_eq!(page.records, vec!["<item><title>One</title></item>", "<item><title>Two</title></item>"]);
    assert_eq!(page.resumption_token, None);
  }

  #[test]
  fn test_atom_and_rdf() {
    let atom = r#"<feed xmlns="http://www.w3.org/2005/Atom"><entry><id>x</id></entry></feed>"#;
    assert_eq!(parse_feed(atom).unwrap().records.len(), 1);

    let rdf = r#"<rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#"><channel/><item rdf:about="x"><title>t</title></item></rdf:RDF>"#;
    assert_eq!(parse_feed(rdf).unwrap().records.len(), 1);
  }

  #[test]
  fn test_not_a_feed() {
    assert!(matches!(parse_feed("<html><body/></html>"), Err(HarvestError::RemoteProtocol(_))));
    assert!(matches!(parse_feed(""), Err(HarvestError::RemoteProtocol(_))));
  }
}
