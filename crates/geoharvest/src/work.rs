//! Bibliographic records ("works") and their publication status.
//!
//! A [`Work`] is created by harvesting (status [`Status::Harvested`]) or manual entry
//! ([`Status::Draft`]) and is never deleted; removal from public view is
//! [`Status::Withdrawn`]. The transitions between statuses live in [`crate::lifecycle`].

use super::*;

/// Publication status of a work.
///
/// Only [`Status::Published`] is visible to the public. [`Status::Harvested`] and
/// [`Status::Contributed`] show up in the contribution queue only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
  /// Manually entered or unpublished; not visible
  Draft,
  /// Created by a harvesting run; waiting for spatial/temporal extent or review
  Harvested,
  /// A user has contributed an extent; waiting for review
  Contributed,
  /// Publicly visible
  Published,
  /// Test record; never visible
  Testing,
  /// Administratively removed from view
  Withdrawn,
}

impl Status {
  /// All statuses.
  pub const ALL: [Status; 6] = [
    Status::Draft,
    Status::Harvested,
    Status::Contributed,
    Status::Published,
    Status::Testing,
    Status::Withdrawn,
  ];

  /// Stored name.
  pub fn as_str(&self) -> &'static str {
    match self {
      Status::Draft => "draft",
      Status::Harvested => "harvested",
      Status::Contributed => "contributed",
      Status::Published => "published",
      Status::Testing => "testing",
      Status::Withdrawn => "withdrawn",
    }
  }

  /// Visible in public listings, feeds and the public API.
  pub fn is_public(&self) -> bool { matches!(self, Status::Published) }

  /// Visible in the crowdsourcing/contribution queue.
  pub fn in_contribution_queue(&self) -> bool {
    matches!(self, Status::Harvested | Status::Contributed)
  }

  /// Re-harvesting may fill empty fields of records in this status.
  pub fn accepts_harvest_updates(&self) -> bool { matches!(self, Status::Harvested | Status::Draft) }
}

impl fmt::Display for Status {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for Status {
  type Err = HarvestError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let lowered = s.trim().to_lowercase();
    Status::ALL
      .into_iter()
      .find(|status| status.as_str() == lowered)
      .ok_or_else(|| HarvestError::InvalidStatus(s.to_owned()))
  }
}

/// Role of whoever asks for a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
  /// Signed-in user; may contribute
  User,
  /// Administrator; may publish, unpublish and withdraw
  Admin,
}

/// The person or process behind a change, recorded in provenance notes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
  /// User name or process name
  pub name: String,
  /// Role
  pub role: Role,
}

impl Actor {
  /// A regular user.
  pub fn user(name: impl Into<String>) -> Self { Self { name: name.into(), role: Role::User } }

  /// An administrator.
  pub fn admin(name: impl Into<String>) -> Self { Self { name: name.into(), role: Role::Admin } }

  /// Whether the actor holds the admin role.
  pub fn is_admin(&self) -> bool { self.role == Role::Admin }
}

impl fmt::Display for Actor {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self.role {
      Role::Admin => write!(f, "admin {}", self.name),
      Role::User => write!(f, "user {}", self.name),
    }
  }
}

lazy_static! {
  static ref DCMI_PERIOD_PART: Regex =
    Regex::new(r"(?i)\b(start|end)\s*=\s*([^;]+)").unwrap();
}

/// A time period the work's subject or data covers. Either bound may be open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TemporalExtent {
  /// First covered date
  pub start: Option<PartialDate>,
  /// Last covered date
  pub end:   Option<PartialDate>,
}

impl TemporalExtent {
  /// Build an extent, rejecting one whose start lies after its end.
  pub fn new(start: Option<PartialDate>, end: Option<PartialDate>) -> Result<Self, HarvestError> {
    if let (Some(s), Some(e)) = (start, end) {
      if s.first_day() > e.first_day() {
        return Err(HarvestError::MalformedRecord(format!("period starts ({s}) after it ends ({e})")));
      }
    }
    Ok(Self { start, end })
  }

  /// Parse an ISO 8601 interval (`2010/2015-06`), a DCMI Period
  /// (`start=2010; end=2015; scheme=W3C-DTF`) or a single date (open end).
  ///
  /// Returns `None` when nothing usable is found, including when start lies after end.
  pub fn parse(text: &str) -> Option<Self> {
    let text = text.trim();
    if text.is_empty() {
      return None;
    }

    let (start, end) = if DCMI_PERIOD_PART.is_match(text) {
      let mut start = None;
      let mut end = None;
      for caps in DCMI_PERIOD_PART.captures_iter(text) {
        let value = PartialDate::parse(&caps[2]);
        match caps[1].to_lowercase().as_str() {
          "start" => start = value,
          _ => end = value,
        }
      }
      (start, end)
    } else if let Some((s, e)) = text.split_once('/') {
      (PartialDate::parse(s), PartialDate::parse(e))
    } else {
      (PartialDate::parse(text), None)
    };

    let extent = Self::new(start, end).ok()?;
    (!extent.is_empty()).then_some(extent)
  }

  /// Whether both bounds are open.
  pub fn is_empty(&self) -> bool { self.start.is_none() && self.end.is_none() }
}

impl fmt::Display for TemporalExtent {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let bound = |d: &Option<PartialDate>| d.map(|d| d.to_string()).unwrap_or_else(|| "..".into());
    write!(f, "{}/{}", bound(&self.start), bound(&self.end))
  }
}

/// A bibliographic record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Work {
  /// Database id; `0` for a work that has not been stored yet
  pub id:               WorkId,
  /// Lifecycle status
  pub status:           Status,
  /// Title
  pub title:            Option<String>,
  /// Abstract as plain text
  pub abstract_text:    Option<String>,
  /// Publication date at whatever precision is known
  pub publication_date: Option<PartialDate>,
  /// Normalized bare DOI, lower case
  pub doi:              Option<String>,
  /// Landing page URL
  pub url:              Option<String>,
  /// Work type
  pub work_type:        WorkType,
  /// Author names in byline order
  #[serde(default)]
  pub authors:          Vec<String>,
  /// Subject keywords
  #[serde(default)]
  pub keywords:         Vec<String>,
  /// OpenAlex work id, once the record has been matched
  #[serde(default)]
  pub openalex_id:      Option<String>,
  /// Spatial extent
  pub geometry:         GeometryCollection,
  /// Temporal extent(s)
  pub temporal:         Vec<TemporalExtent>,
  /// Owning source
  pub source_id:        Option<SourceId>,
  /// Harvesting event that created the record
  pub event_id:         Option<EventId>,
  /// Append-only log of how fields were set
  pub provenance:       String,
  /// Creation time
  pub created_at:       DateTime<Utc>,
  /// Last modification time
  pub updated_at:       DateTime<Utc>,
  /// Optimistic concurrency token, bumped on every stored change
  pub version:          i64,
}

impl Work {
  /// Has a non-empty spatial extent.
  pub fn has_geometry(&self) -> bool { !self.geometry.is_empty() }

  /// Has at least one non-empty temporal extent.
  pub fn has_temporal(&self) -> bool { self.temporal.iter().any(|t| !t.is_empty()) }

  /// Has spatial or temporal extent, the precondition for publishing.
  pub fn has_extent(&self) -> bool { self.has_geometry() || self.has_temporal() }

  /// Harvested and still missing geometry or temporal extent.
  pub fn needs_contribution(&self) -> bool {
    self.status == Status::Harvested && !(self.has_geometry() && self.has_temporal())
  }

  /// A work must be identifiable by title or DOI.
  pub fn validate(&self) -> Result<(), HarvestError> {
    let has_title = self.title.as_deref().is_some_and(|t| !t.trim().is_empty());
    let has_doi = self.doi.as_deref().is_some_and(|d| !d.trim().is_empty());
    if !has_title && !has_doi {
      return Err(HarvestError::MalformedRecord("record has neither title nor DOI".into()));
    }
    Ok(())
  }

  /// Append a timestamped line to the provenance log.
  pub fn append_provenance(&mut self, at: DateTime<Utc>, note: &str) {
    if !self.provenance.is_empty() {
      self.provenance.push('\n');
    }
    self.provenance.push_str(&format!("[{}] {}", at.format("%Y-%m-%dT%H:%M:%SZ"), note));
  }

  /// Title or DOI, whichever is there, for log lines.
  pub fn label(&self) -> String {
    match (&self.title, &self.doi) {
      (Some(title), _) => format::clip_title(title, 50),
      (None, Some(doi)) => doi.clone(),
      (None, None) => format!("work {}", self.id),
    }
  }
}
