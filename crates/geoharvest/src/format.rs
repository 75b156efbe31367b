//! Text normalization for harvested metadata.
//!
//! Feed payloads routinely carry HTML inside text fields: abstracts wrapped in `<p>`, escaped
//! entities such as `&amp;nbsp;`, hard line breaks from the publishing system. The helpers
//! here turn that into plain single-spaced text, and shorten titles for log lines and listings.
//!
//! # Examples
//!
//! ```
//! use geoharvest::format;
//!
//! assert_eq!(format::clean_text("<p>Lava&nbsp;flows &amp; ash</p>"), "Lava flows & ash");
//! assert_eq!(format::clip_title("Eruption Dynamics of Basaltic Fissures", 20), "Eruption Dynamics of…");
//! ```

use std::borrow::Cow;

use quick_xml::escape::unescape_with;

use super::*;

lazy_static! {
  static ref TAG: Regex = Regex::new(r"(?s)<[^>]*>").unwrap();
}

/// Named HTML entities that show up in journal feeds. Numeric references are handled by the
/// unescaper itself.
fn html_entity(name: &str) -> Option<&'static str> {
  Some(match name {
    "amp" => "&",
    "lt" => "<",
    "gt" => ">",
    "quot" => "\"",
    "apos" => "'",
    "nbsp" => " ",
    "ndash" => "–",
    "mdash" => "—",
    "hellip" => "…",
    "lsquo" => "‘",
    "rsquo" => "’",
    "ldquo" => "“",
    "rdquo" => "”",
    "deg" => "°",
    "copy" => "©",
    "reg" => "®",
    "times" => "×",
    "minus" => "−",
    "plusmn" => "±",
    "micro" => "µ",
    _ => return None,
  })
}

/// Unescape HTML entities, leaving the text alone if it contains an unknown one.
pub fn unescape_html(text: &str) -> Cow<'_, str> {
  match unescape_with(text, html_entity) {
    Ok(unescaped) => unescaped,
    Err(e) => {
      trace!("Leaving text escaped: {e}");
      Cow::Borrowed(text)
    },
  }
}

/// Decode the raw bytes of an XML text node, unescaping entities.
pub fn xml_text(raw: &[u8]) -> String { unescape_html(&String::from_utf8_lossy(raw)).into_owned() }

/// Strip markup, unescape entities and collapse whitespace into single spaces.
///
/// Tags are replaced by a space before unescaping, so `a<br>b` becomes `a b` and text that
/// was double escaped (`&lt;p&gt;`) is not turned back into markup.
pub fn clean_text(text: &str) -> String {
  let stripped = TAG.replace_all(text, " ");
  let unescaped = unescape_html(&stripped);
  unescaped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// [`clean_text`], returning `None` when nothing is left.
pub fn non_empty(text: &str) -> Option<String> {
  let cleaned = clean_text(text);
  (!cleaned.is_empty()).then_some(cleaned)
}

/// Shorten a title to at most `max_length` characters, cutting at a word boundary and
/// appending an ellipsis when anything was dropped.
///
/// Whitespace runs are collapsed first. A single word longer than the limit is cut inside the
/// word rather than returned empty.
pub fn clip_title(title: &str, max_length: usize) -> String {
  let words: Vec<&str> = title.split_whitespace().collect();
  let joined = words.join(" ");
  if joined.chars().count() <= max_length {
    return joined;
  }

  let mut result = String::new();
  for word in words {
    let extra = if result.is_empty() { 0 } else { 1 };
    if result.chars().count() + extra + word.chars().count() > max_length {
      break;
    }
    if extra == 1 {
      result.push(' ');
    }
    result.push_str(word);
  }

  if result.is_empty() {
    result = joined.chars().take(max_length).collect();
  }
  result.push('…');
  result
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_clean_text() {
    assert_eq!(clean_text("Hello   World"), "Hello World");
    assert_eq!(clean_text("<p>First</p>\n<p>Second&nbsp;para</p>"), "First Second para");
    assert_eq!(clean_text("Temperature &#x2191; by 2&deg;C"), "Temperature ↑ by 2°C");
    assert_eq!(clean_text("a<br/>b"), "a b");
  }

  #[test]
  fn test_unknown_entity_is_left_alone() {
    assert_eq!(clean_text("fish &chips; tonight"), "fish &chips; tonight");
  }

  #[test]
  fn test_non_empty() {
    assert_eq!(non_empty("  <p> </p> "), None);
    assert_eq!(non_empty(" text "), Some("text".to_string()));
  }

  #[test]
  fn test_clip_title() {
    assert_eq!(clip_title("Short title", 50), "Short title");
    assert_eq!(clip_title("This Is A Very Long Title Indeed", 20), "This Is A Very Long…");
    assert_eq!(clip_title("No    Extra    Spaces", 50), "No Extra Spaces");
    assert_eq!(clip_title("Supercalifragilistic", 5), "Super…");
  }
}
