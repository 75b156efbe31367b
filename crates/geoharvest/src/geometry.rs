//! Spatial coverage of a work.
//!
//! Every work carries a [`GeometryCollection`] (possibly empty) in WGS 84 longitude/latitude
//! order. Geometries arrive in three spellings and all of them end up here:
//! - WKT, e.g. `POINT(10 50)` or `SRID=4326;POLYGON((...))`, from `dc:coverage` and landing
//!   page meta tags,
//! - GeoJSON (bare geometry, `Feature`, `FeatureCollection` or `GeometryCollection`), which is
//!   what journal platforms put in `DC.SpatialCoverage`,
//! - GeoRSS simple (`georss:point` and friends), latitude first.
//!
//! Storage and the read API use the GeoJSON form.
//!
//! ```
//! use geoharvest::geometry::GeometryCollection;
//!
//! let geometry = GeometryCollection::parse("POINT(10 50)").unwrap();
//! assert_eq!(geometry.geometries[0].to_string(), "POINT(10 50)");
//! ```

use serde_json::Value;

use super::*;

/// A coordinate tuple: `[x, y]` or `[x, y, z]`, longitude first.
pub type Position = Vec<f64>;

/// A single simple-features geometry, serialized as a GeoJSON geometry object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "coordinates")]
pub enum Geometry {
  /// A single position
  Point(Position),
  /// An ordered list of two or more positions
  LineString(Vec<Position>),
  /// An exterior ring followed by optional holes
  Polygon(Vec<Vec<Position>>),
  /// Several points
  MultiPoint(Vec<Position>),
  /// Several line strings
  MultiLineString(Vec<Vec<Position>>),
  /// Several polygons
  MultiPolygon(Vec<Vec<Vec<Position>>>),
}

/// Axis-aligned bounding box in longitude/latitude.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
  /// Western edge
  pub min_x: f64,
  /// Southern edge
  pub min_y: f64,
  /// Eastern edge
  pub max_x: f64,
  /// Northern edge
  pub max_y: f64,
}

impl BoundingBox {
  /// Whether two boxes share at least one point.
  pub fn intersects(&self, other: &BoundingBox) -> bool {
    self.min_x <= other.max_x
      && other.min_x <= self.max_x
      && self.min_y <= other.max_y
      && other.min_y <= self.max_y
  }

  fn expand(&mut self, p: &[f64]) {
    self.min_x = self.min_x.min(p[0]);
    self.min_y = self.min_y.min(p[1]);
    self.max_x = self.max_x.max(p[0]);
    self.max_y = self.max_y.max(p[1]);
  }

  /// The box as a closed, counter-clockwise polygon.
  pub fn to_polygon(&self) -> Geometry {
    Geometry::Polygon(vec![vec![
      vec![self.min_x, self.min_y],
      vec![self.max_x, self.min_y],
      vec![self.max_x, self.max_y],
      vec![self.min_x, self.max_y],
      vec![self.min_x, self.min_y],
    ]])
  }

  fn around(p: &[f64]) -> Self { Self { min_x: p[0], min_y: p[1], max_x: p[0], max_y: p[1] } }
}

impl FromStr for BoundingBox {
  type Err = HarvestError;

  /// Parses `min_x,min_y,max_x,max_y`.
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let parts = s
      .split(',')
      .map(|p| p.trim().parse::<f64>())
      .collect::<Result<Vec<_>, _>>()
      .map_err(|e| HarvestError::InvalidGeometry(format!("bbox {s:?}: {e}")))?;
    match parts[..] {
      [min_x, min_y, max_x, max_y] if min_x <= max_x && min_y <= max_y =>
        Ok(Self { min_x, min_y, max_x, max_y }),
      _ => Err(HarvestError::InvalidGeometry(format!("bbox {s:?} must be min_x,min_y,max_x,max_y"))),
    }
  }
}

impl Geometry {
  /// The OGC type name, e.g. `"Polygon"`.
  pub fn type_name(&self) -> &'static str {
    match self {
      Geometry::Point(_) => "Point",
      Geometry::LineString(_) => "LineString",
      Geometry::Polygon(_) => "Polygon",
      Geometry::MultiPoint(_) => "MultiPoint",
      Geometry::MultiLineString(_) => "MultiLineString",
      Geometry::MultiPolygon(_) => "MultiPolygon",
    }
  }

  /// All positions of the geometry, in order.
  pub fn positions(&self) -> Box<dyn Iterator<Item = &Position> + '_> {
    match self {
      Geometry::Point(p) => Box::new(std::iter::once(p)),
      Geometry::LineString(ps) | Geometry::MultiPoint(ps) => Box::new(ps.iter()),
      Geometry::Polygon(rings) | Geometry::MultiLineString(rings) =>
        Box::new(rings.iter().flatten()),
      Geometry::MultiPolygon(polys) => Box::new(polys.iter().flatten().flatten()),
    }
  }

  /// Bounding box of all positions.
  pub fn bbox(&self) -> Option<BoundingBox> {
    let mut positions = self.positions();
    let mut bbox = BoundingBox::around(positions.next()?);
    positions.for_each(|p| bbox.expand(p));
    Some(bbox)
  }

  /// Checks coordinate arity, finiteness and minimum sizes.
  pub fn validate(&self) -> Result<(), HarvestError> {
    fn line(ps: &[Position], min: usize, what: &str) -> Result<(), HarvestError> {
      if ps.len() < min {
        return Err(HarvestError::InvalidGeometry(format!("{what} needs at least {min} positions")));
      }
      Ok(())
    }

    for p in self.positions() {
      if p.len() < 2 || p.iter().any(|c| !c.is_finite()) {
        return Err(HarvestError::InvalidGeometry(format!("bad position {p:?}")));
      }
    }
    fn members<T>(items: &[T], what: &str) -> Result<(), HarvestError> {
      if items.is_empty() {
        return Err(HarvestError::InvalidGeometry(format!("{what} has no members")));
      }
      Ok(())
    }
    fn polygon(rings: &[Vec<Position>]) -> Result<(), HarvestError> {
      members(rings, "polygon")?;
      rings.iter().try_for_each(|r| line(r, 4, "polygon ring"))
    }

    match self {
      Geometry::Point(_) => Ok(()),
      Geometry::MultiPoint(ps) => line(ps, 1, "multipoint"),
      Geometry::LineString(ps) => line(ps, 2, "linestring"),
      Geometry::MultiLineString(lines) => {
        members(lines, "multilinestring")?;
        lines.iter().try_for_each(|l| line(l, 2, "linestring"))
      },
      Geometry::Polygon(rings) => polygon(rings),
      Geometry::MultiPolygon(polys) => {
        members(polys, "multipolygon")?;
        polys.iter().try_for_each(|rings| polygon(rings))
      },
    }
  }
}

impl fmt::Display for Geometry {
  /// Writes the geometry as WKT.
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    fn pos(p: &Position) -> String {
      p.iter().map(|c| c.to_string()).collect::<Vec<_>>().join(" ")
    }
    fn list(ps: &[Position]) -> String {
      format!("({})", ps.iter().map(pos).collect::<Vec<_>>().join(", "))
    }
    fn rings(rs: &[Vec<Position>]) -> String {
      format!("({})", rs.iter().map(|r| list(r)).collect::<Vec<_>>().join(", "))
    }

    match self {
      Geometry::Point(p) => write!(f, "POINT({})", pos(p)),
      Geometry::LineString(ps) => write!(f, "LINESTRING{}", list(ps)),
      Geometry::Polygon(rs) => write!(f, "POLYGON{}", rings(rs)),
      Geometry::MultiPoint(ps) => write!(f, "MULTIPOINT{}", list(ps)),
      Geometry::MultiLineString(rs) => write!(f, "MULTILINESTRING{}", rings(rs)),
      Geometry::MultiPolygon(ps) => write!(
        f,
        "MULTIPOLYGON({})",
        ps.iter().map(|p| rings(p)).collect::<Vec<_>>().join(", ")
      ),
    }
  }
}

/// The spatial extent of a work: zero or more geometries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "GeometryCollection")]
pub struct GeometryCollection {
  /// Member geometries; nested collections are flattened on parse.
  pub geometries: Vec<Geometry>,
}

lazy_static! {
  static ref SRID_PREFIX: Regex = Regex::new(r"(?i)^\s*SRID=\d+\s*;").unwrap();
}

impl GeometryCollection {
  /// An empty collection.
  pub fn empty() -> Self { Self::default() }

  /// Wraps a single geometry.
  pub fn single(geometry: Geometry) -> Self { Self { geometries: vec![geometry] } }

  /// Whether the collection holds no position at all. Members without coordinates do not
  /// count as spatial extent.
  pub fn is_empty(&self) -> bool { self.geometries.iter().all(|g| g.positions().next().is_none()) }

  /// Parse a bounding box `min_x,min_y,max_x,max_y` as its polygon, else WKT or GeoJSON.
  /// This is the form accepted from people; feed values go through [`Self::parse`].
  pub fn parse_input(input: &str) -> Result<Self, HarvestError> {
    match input.parse::<BoundingBox>() {
      Ok(bbox) => Ok(Self::single(bbox.to_polygon())),
      Err(_) => Self::parse(input),
    }
  }

  /// Parse WKT or GeoJSON, whichever the input looks like.
  pub fn parse(input: &str) -> Result<Self, HarvestError> {
    let trimmed = input.trim();
    if trimmed.starts_with('{') {
      let value: Value = serde_json::from_str(trimmed)
        .map_err(|e| HarvestError::InvalidGeometry(format!("invalid GeoJSON: {e}")))?;
      Self::from_geojson(&value)
    } else {
      Self::from_wkt(trimmed)
    }
  }

  /// Read any GeoJSON object that can carry geometry.
  pub fn from_geojson(value: &Value) -> Result<Self, HarvestError> {
    let mut geometries = Vec::new();
    collect_geojson(value, 0, &mut geometries)?;
    let collection = Self { geometries };
    collection.validate()?;
    Ok(collection)
  }

  /// Read WKT; a `GEOMETRYCOLLECTION` is flattened into this collection.
  pub fn from_wkt(input: &str) -> Result<Self, HarvestError> {
    let stripped = SRID_PREFIX.replace(input, "");
    let mut parser = WktParser::new(&stripped)?;
    let mut geometries = Vec::new();
    parser.geometry(&mut geometries)?;
    if parser.peek().is_some() {
      return Err(HarvestError::InvalidGeometry(format!("trailing input in WKT {input:?}")));
    }
    let collection = Self { geometries };
    collection.validate()?;
    Ok(collection)
  }

  /// Read a GeoRSS-simple element. `kind` is the local element name (`point`, `line`,
  /// `polygon`, `box`); coordinates are whitespace separated latitude/longitude pairs.
  pub fn from_georss(kind: &str, text: &str) -> Result<Self, HarvestError> {
    let numbers = text
      .split(|c: char| c.is_whitespace() || c == ',')
      .filter(|t| !t.is_empty())
      .map(str::parse::<f64>)
      .collect::<Result<Vec<_>, _>>()
      .map_err(|e| HarvestError::InvalidGeometry(format!("georss:{kind} {text:?}: {e}")))?;
    if numbers.len() % 2 != 0 {
      return Err(HarvestError::InvalidGeometry(format!("georss:{kind} has an odd coordinate count")));
    }
    let positions: Vec<Position> = numbers.chunks(2).map(|ll| vec![ll[1], ll[0]]).collect();

    let geometry = match (kind, positions.len()) {
      ("point", 1) => Geometry::Point(positions[0].clone()),
      ("line", n) if n >= 2 => Geometry::LineString(positions),
      ("polygon", n) if n >= 4 => Geometry::Polygon(vec![positions]),
      ("box", 2) => {
        let (sw, ne) = (&positions[0], &positions[1]);
        BoundingBox { min_x: sw[0], min_y: sw[1], max_x: ne[0], max_y: ne[1] }.to_polygon()
      },
      _ => return Err(HarvestError::InvalidGeometry(format!("unsupported georss:{kind} {text:?}"))),
    };
    let collection = Self::single(geometry);
    collection.validate()?;
    Ok(collection)
  }

  /// Validate every member.
  pub fn validate(&self) -> Result<(), HarvestError> {
    self.geometries.iter().try_for_each(Geometry::validate)
  }

  /// Bounding box over all members.
  pub fn bbox(&self) -> Option<BoundingBox> {
    self.geometries.iter().filter_map(Geometry::bbox).reduce(|mut acc, b| {
      acc.expand(&[b.min_x, b.min_y]);
      acc.expand(&[b.max_x, b.max_y]);
      acc
    })
  }

  /// Comma separated member type names, for provenance notes.
  pub fn describe(&self) -> String {
    if self.is_empty() {
      return "empty".to_string();
    }
    self.geometries.iter().map(Geometry::type_name).collect::<Vec<_>>().join(", ")
  }
}

/// Walks GeoJSON objects and pushes every geometry found.
fn collect_geojson(value: &Value, depth: usize, out: &mut Vec<Geometry>) -> Result<(), HarvestError> {
  if depth > MAX_NESTING {
    return Err(HarvestError::InvalidGeometry(format!("GeoJSON nested deeper than {MAX_NESTING}")));
  }
  let kind = value
    .get("type")
    .and_then(Value::as_str)
    .ok_or_else(|| HarvestError::InvalidGeometry("GeoJSON object without `type`".into()))?;

  match kind {
    "FeatureCollection" => value
      .get("features")
      .and_then(Value::as_array)
      .into_iter()
      .flatten()
      .try_for_each(|feature| collect_geojson(feature, depth + 1, out)),
    "Feature" => match value.get("geometry") {
      Some(Value::Null) | None => Ok(()),
      Some(geometry) => collect_geojson(geometry, depth + 1, out),
    },
    "GeometryCollection" => value
      .get("geometries")
      .and_then(Value::as_array)
      .into_iter()
      .flatten()
      .try_for_each(|g| collect_geojson(g, depth + 1, out)),
    _ => {
      let geometry: Geometry = serde_json::from_value(value.clone())
        .map_err(|e| HarvestError::InvalidGeometry(format!("GeoJSON {kind}: {e}")))?;
      out.push(geometry);
      Ok(())
    },
  }
}

/// Lexical tokens of WKT.
#[derive(Debug, Clone, PartialEq)]
enum Token {
  Word(String),
  Number(f64),
  Open,
  Close,
  Comma,
}

/// Deepest `GEOMETRYCOLLECTION` nesting accepted from WKT and GeoJSON.
const MAX_NESTING: usize = 16;

/// Small recursive-descent reader for the WKT subset we accept.
struct WktParser {
  tokens: Vec<Token>,
  pos:    usize,
  depth:  usize,
}

impl WktParser {
  fn new(input: &str) -> Result<Self, HarvestError> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();
    while let Some(&c) = chars.peek() {
      match c {
        c if c.is_whitespace() => {
          chars.next();
        },
        '(' => {
          chars.next();
          tokens.push(Token::Open);
        },
        ')' => {
          chars.next();
          tokens.push(Token::Close);
        },
        ',' => {
          chars.next();
          tokens.push(Token::Comma);
        },
        c if c.is_ascii_alphabetic() => {
          let mut word = String::new();
          while let Some(&c) = chars.peek().filter(|c| c.is_ascii_alphabetic()) {
            word.push(c.to_ascii_uppercase());
            chars.next();
          }
          tokens.push(Token::Word(word));
        },
        c if c.is_ascii_digit() || c == '-' || c == '+' || c == '.' => {
          let mut number = String::new();
          while let Some(&c) = chars
            .peek()
            .filter(|c| c.is_ascii_digit() || matches!(**c, '-' | '+' | '.' | 'e' | 'E'))
          {
            number.push(c);
            chars.next();
          }
          let value = number
            .parse()
            .map_err(|_| HarvestError::InvalidGeometry(format!("bad number {number:?} in WKT")))?;
          tokens.push(Token::Number(value));
        },
        other => return Err(HarvestError::InvalidGeometry(format!("unexpected {other:?} in WKT"))),
      }
    }
    Ok(Self { tokens, pos: 0, depth: 0 })
  }

  fn peek(&self) -> Option<&Token> { self.tokens.get(self.pos) }

  fn next(&mut self) -> Option<Token> {
    let token = self.tokens.get(self.pos).cloned();
    self.pos += 1;
    token
  }

  fn expect(&mut self, expected: Token) -> Result<(), HarvestError> {
    match self.next() {
      Some(t) if t == expected => Ok(()),
      other => Err(HarvestError::InvalidGeometry(format!("expected {expected:?}, found {other:?}"))),
    }
  }

  /// Consumes an optional dimension marker and `EMPTY`. Returns true if the geometry is empty.
  fn header(&mut self) -> Result<bool, HarvestError> {
    if let Some(Token::Word(w)) = self.peek() {
      if matches!(w.as_str(), "Z" | "M" | "ZM") {
        self.pos += 1;
      }
    }
    if let Some(Token::Word(w)) = self.peek() {
      if w == "EMPTY" {
        self.pos += 1;
        return Ok(true);
      }
      return Err(HarvestError::InvalidGeometry(format!("unexpected word {w} in WKT")));
    }
    Ok(false)
  }

  fn geometry(&mut self, out: &mut Vec<Geometry>) -> Result<(), HarvestError> {
    let kind = match self.next() {
      Some(Token::Word(w)) => w,
      other => return Err(HarvestError::InvalidGeometry(format!("expected geometry type, found {other:?}"))),
    };
    if self.header()? {
      return Ok(());
    }

    let geometry = match kind.as_str() {
      "POINT" => {
        self.expect(Token::Open)?;
        let p = self.position()?;
        self.expect(Token::Close)?;
        Geometry::Point(p)
      },
      "LINESTRING" => Geometry::LineString(self.position_list()?),
      "POLYGON" => Geometry::Polygon(self.nested(Self::position_list)?),
      "MULTIPOINT" => Geometry::MultiPoint(self.multipoint()?),
      "MULTILINESTRING" => Geometry::MultiLineString(self.nested(Self::position_list)?),
      "MULTIPOLYGON" =>
        Geometry::MultiPolygon(self.nested(|p| p.nested(Self::position_list))?),
      "GEOMETRYCOLLECTION" => {
        if self.depth >= MAX_NESTING {
          return Err(HarvestError::InvalidGeometry(format!("collections nested deeper than {MAX_NESTING}")));
        }
        self.depth += 1;
        self.expect(Token::Open)?;
        loop {
          self.geometry(out)?;
          match self.next() {
            Some(Token::Comma) => continue,
            Some(Token::Close) => break,
            other =>
              return Err(HarvestError::InvalidGeometry(format!("expected , or ), found {other:?}"))),
          }
        }
        self.depth -= 1;
        return Ok(());
      },
      other => return Err(HarvestError::InvalidGeometry(format!("unsupported WKT type {other}"))),
    };
    out.push(geometry);
    Ok(())
  }

  fn position(&mut self) -> Result<Position, HarvestError> {
    let mut p = Vec::with_capacity(2);
    while let Some(Token::Number(n)) = self.peek() {
      p.push(*n);
      self.pos += 1;
    }
    if !(2..=4).contains(&p.len()) {
      return Err(HarvestError::InvalidGeometry(format!("position with {} ordinates", p.len())));
    }
    p.truncate(3);
    Ok(p)
  }

  fn position_list(&mut self) -> Result<Vec<Position>, HarvestError> {
    self.nested(Self::position)
  }

  /// `( item , item , ... )`
  fn nested<T>(
    &mut self,
    mut item: impl FnMut(&mut Self) -> Result<T, HarvestError>,
  ) -> Result<Vec<T>, HarvestError> {
    self.expect(Token::Open)?;
    let mut items = vec![item(self)?];
    loop {
      match self.next() {
        Some(Token::Comma) => items.push(item(self)?),
        Some(Token::Close) => return Ok(items),
        other =>
          return Err(HarvestError::InvalidGeometry(format!("expected , or ), found {other:?}"))),
      }
    }
  }

  /// MULTIPOINT accepts both `(1 2, 3 4)` and `((1 2), (3 4))`.
  fn multipoint(&mut self) -> Result<Vec<Position>, HarvestError> {
    self.nested(|p| {
      if p.peek() == Some(&Token::Open) {
        p.pos += 1;
        let pos = p.position()?;
        p.expect(Token::Close)?;
        Ok(pos)
      } else {
        p.position()
      }
    })
  }
}
