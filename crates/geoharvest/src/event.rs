//! Harvesting events: one row per harvesting run of one source.
//!
//! An event moves `pending → in_progress → completed | failed` and never back. A failed run
//! keeps whatever records it stored before failing; its counts say how far it got.

use super::*;

/// State of a harvesting run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
  /// Created, not started
  Pending,
  /// Fetching and storing records
  InProgress,
  /// Finished normally
  Completed,
  /// Ended by a network or protocol error
  Failed,
}

impl EventStatus {
  /// Stored name.
  pub fn as_str(&self) -> &'static str {
    match self {
      EventStatus::Pending => "pending",
      EventStatus::InProgress => "in_progress",
      EventStatus::Completed => "completed",
      EventStatus::Failed => "failed",
    }
  }

  /// Completed or failed.
  pub fn is_terminal(&self) -> bool { matches!(self, EventStatus::Completed | EventStatus::Failed) }

  fn can_become(&self, next: EventStatus) -> bool {
    matches!(
      (self, next),
      (EventStatus::Pending, EventStatus::InProgress)
        | (EventStatus::Pending, EventStatus::Failed)
        | (EventStatus::InProgress, EventStatus::Completed)
        | (EventStatus::InProgress, EventStatus::Failed)
    )
  }
}

impl fmt::Display for EventStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for EventStatus {
  type Err = HarvestError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "pending" => Ok(EventStatus::Pending),
      "in_progress" => Ok(EventStatus::InProgress),
      "completed" => Ok(EventStatus::Completed),
      "failed" => Ok(EventStatus::Failed),
      other => Err(HarvestError::InvalidStatus(other.to_owned())),
    }
  }
}

/// Per-run record counts.
///
/// Every record the fetcher yields is `seen`, and ends up in exactly one of `created`,
/// `updated` or `skipped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EventCounts {
  /// Records received from the source
  pub seen:    u64,
  /// New works stored
  pub created: u64,
  /// Existing works that had empty fields filled
  pub updated: u64,
  /// Duplicates with nothing new, and malformed records
  pub skipped: u64,
}

impl fmt::Display for EventCounts {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "{} seen, {} created, {} updated, {} skipped",
      self.seen, self.created, self.updated, self.skipped
    )
  }
}

/// One harvesting run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarvestingEvent {
  /// Database id
  pub id:           EventId,
  /// Harvested source
  pub source_id:    SourceId,
  /// Run state
  pub status:       EventStatus,
  /// When the run was created
  pub started_at:   DateTime<Utc>,
  /// When the run reached a terminal state
  pub completed_at: Option<DateTime<Utc>>,
  /// Record counts so far
  pub counts:       EventCounts,
  /// Why the run failed
  pub error:        Option<String>,
}

impl HarvestingEvent {
  /// A pending event; `id` is assigned by the database.
  pub fn new(source_id: SourceId, at: DateTime<Utc>) -> Self {
    Self {
      id: 0,
      source_id,
      status: EventStatus::Pending,
      started_at: at,
      completed_at: None,
      counts: EventCounts::default(),
      error: None,
    }
  }

  fn transition(&mut self, next: EventStatus) -> Result<(), HarvestError> {
    if !self.status.can_become(next) {
      return Err(HarvestError::InvalidEventTransition {
        from: self.status.to_string(),
        to:   next.to_string(),
      });
    }
    self.status = next;
    Ok(())
  }

  /// `pending → in_progress`.
  pub fn start(&mut self) -> Result<(), HarvestError> { self.transition(EventStatus::InProgress) }

  /// `in_progress → completed`.
  pub fn complete(&mut self, counts: EventCounts, at: DateTime<Utc>) -> Result<(), HarvestError> {
    self.transition(EventStatus::Completed)?;
    self.counts = counts;
    self.completed_at = Some(at);
    Ok(())
  }

  /// `pending | in_progress → failed`, keeping the counts reached so far.
  pub fn fail(
    &mut self,
    counts: EventCounts,
    reason: impl Into<String>,
    at: DateTime<Utc>,
  ) -> Result<(), HarvestError> {
    let reason = reason.into();
    if reason.trim().is_empty() {
      return Err(HarvestError::InvalidEventTransition {
        from: self.status.to_string(),
        to:   "failed without a reason".into(),
      });
    }
    self.transition(EventStatus::Failed)?;
    self.counts = counts;
    self.error = Some(reason);
    self.completed_at = Some(at);
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_event_happy_path() {
    let mut event = HarvestingEvent::new(3, Utc::now());
    assert_eq!(event.status, EventStatus::Pending);
    event.start().unwrap();
    let counts = EventCounts { seen: 2, created: 1, updated: 0, skipped: 1 };
    event.complete(counts, Utc::now()).unwrap();
    assert_eq!(event.status, EventStatus::Completed);
    assert_eq!(event.counts, counts);
    assert!(event.completed_at.is_some());
    assert_eq!(counts.to_string(), "2 seen, 1 created, 0 updated, 1 skipped");
  }

  #[test]
  fn test_event_never_moves_backwards() {
    let mut event = HarvestingEvent::new(3, Utc::now());
    assert!(matches!(
      event.complete(EventCounts::default(), Utc::now()),
      Err(HarvestError::InvalidEventTransition { .. })
    ));

    event.start().unwrap();
    assert!(event.fail(EventCounts::default(), " ", Utc::now()).is_err());
    event.fail(EventCounts::default(), "OAI-PMH error badResumptionToken", Utc::now()).unwrap();
    assert!(event.status.is_terminal());
    assert!(event.start().is_err());
    assert_eq!(event.error.as_deref(), Some("OAI-PMH error badResumptionToken"));
  }

  #[test]
  fn test_status_names() {
    for status in
      [EventStatus::Pending, EventStatus::InProgress, EventStatus::Completed, EventStatus::Failed]
    {
      assert_eq!(status.as_str().parse::<EventStatus>().unwrap(), status);
    }
  }
}
