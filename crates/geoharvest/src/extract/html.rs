//! Landing page meta tags.
//!
//! Journals running OJS with the geoMetadata plugin (and anything else following the
//! Dublin Core in HTML convention) describe coverage in `<meta>` tags:
//!
//! ```html
//! <meta name="DC.SpatialCoverage" content='{"type":"FeatureCollection","features":[...]}'>
//! <meta name="DC.temporal" scheme="ISO8601" content="2015-01-01/2016-12-31">
//! ```

use super::*;

lazy_static! {
  static ref META_TAG: Regex = Regex::new(r"(?is)<meta\b[^>]*>").unwrap();
  static ref ATTRIBUTE: Regex =
    Regex::new(r#"(?is)([a-z_:][-a-z0-9_:.]*)\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>/]+))"#).unwrap();
}

/// What a landing page says about a record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LandingMeta {
  /// From `DC.SpatialCoverage`
  pub geometry: Option<GeometryCollection>,
  /// From `DC.temporal` or `DC.PeriodOfTime`
  pub temporal: Option<TemporalExtent>,
  /// From `citation_doi`, `DC.Identifier` or `DC.Identifier.DOI`
  pub doi:      Option<String>,
}

/// `(name or property, content)` of every `<meta>` tag, entities unescaped.
pub fn meta_tags(html: &str) -> Vec<(String, String)> {
  META_TAG
    .find_iter(html)
    .filter_map(|tag| {
      let mut name = None;
      let mut content = None;
      for caps in ATTRIBUTE.captures_iter(tag.as_str()) {
        let value = caps.get(2).or(caps.get(3)).or(caps.get(4)).map_or("", |m| m.as_str());
        match caps[1].to_lowercase().as_str() {
          "name" | "property" => name = Some(value.to_string()),
          "content" => content = Some(format::unescape_html(value).into_owned()),
          _ => {},
        }
      }
      Some((name?, content?))
    })
    .collect()
}

/// Scan a landing page for spatial, temporal and DOI meta tags. The first usable value of
/// each wins; unparseable values are skipped.
pub fn scan(html: &str) -> LandingMeta {
  let mut meta = LandingMeta::default();
  for (name, content) in meta_tags(html) {
    match name.to_lowercase().as_str() {
      "dc.spatialcoverage" if meta.geometry.is_none() => match GeometryCollection::parse(&content) {
        Ok(geometry) if !geometry.is_empty() => meta.geometry = Some(geometry),
        Ok(_) => {},
        Err(e) => debug!("Unusable DC.SpatialCoverage: {e}"),
      },
      "dc.temporal" | "dc.periodoftime" if meta.temporal.is_none() =>
        meta.temporal = TemporalExtent::parse(&content),
      "citation_doi" | "dc.identifier" | "dc.identifier.doi" if meta.doi.is_none() =>
        meta.doi = find_doi(&content),
      _ => {},
    }
  }
  meta
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_wkt_and_period() {
    let html = r#"<html><head>
      <meta name="DC.SpatialCoverage" content="POINT(10 50)">
      <meta name="DC.temporal" scheme="ISO8601" content="2015-01-01/2016-12-31" />
      <meta name="citation_doi" content="10.5194/essd-13-4349-2021">
    </head></html>"#;
    let meta = scan(html);
    assert_eq!(meta.geometry.unwrap().geometries, vec![Geometry::Point(vec![10.0, 50.0])]);
    assert_eq!(meta.temporal.unwrap().end, Some(PartialDate::parse("2016-12-31").unwrap()));
    assert_eq!(meta.doi.as_deref(), Some("10.5194/essd-13-4349-2021"));
  }

  #[test]
  fn test_geojson_feature_collection() {
    let html = r#"<meta content='{"type":"FeatureCollection","features":[{"type":"Feature","properties":{},"geometry":{"type":"Polygon","coordinates":[[[5,47],[15,47],[15,55],[5,55],[5,47]]]}}]}' name="DC.SpatialCoverage">"#;
    let geometry = scan(html).geometry.unwrap();
    assert_eq!(geometry.describe(), "Polygon");
  }

  #[test]
  fn test_escaped_content_and_garbage() {
    let html = r#"<meta name="dc.spatialcoverage" content="{&quot;type&quot;:&quot;Point&quot;,&quot;coordinates&quot;:[1,2]}">
      <meta name="DC.PeriodOfTime" content="whenever">
      <meta charset="utf-8">"#;
    let meta = scan(html);
    assert_eq!(meta.geometry.unwrap().geometries, vec![Geometry::Point(vec![1.0, 2.0])]);
    assert_eq!(meta.temporal, None);
    assert_eq!(meta.doi, None);
  }

  #[test]
  fn test_no_meta() {
    assert_eq!(scan("<html><body>nothing</body></html>"), LandingMeta::default());
  }
}
