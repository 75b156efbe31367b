//! The publication workflow as pure functions.
//!
//! Each transition takes the current [`Work`], the [`Actor`] asking for it and the time, and
//! returns the next version of the work or the guard that refused it. Nothing here touches
//! storage; [`crate::curation`] loads, applies and writes back with a version check.
//!
//! | action     | from                                   | to          | who   |
//! |------------|----------------------------------------|-------------|-------|
//! | contribute | harvested                              | contributed | any   |
//! | publish    | contributed, or harvested with extent  | published   | admin |
//! | unpublish  | published                              | draft       | admin |
//! | withdraw   | anything but withdrawn                 | withdrawn   | admin |

use super::*;

/// A lifecycle action, named as in error messages and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
  /// Supply geometry and/or temporal extent
  Contribute,
  /// Make public
  Publish,
  /// Take back to draft
  Unpublish,
  /// Remove from view
  Withdraw,
}

impl Action {
  /// Verb used in messages.
  pub fn as_str(&self) -> &'static str {
    match self {
      Action::Contribute => "contribute",
      Action::Publish => "publish",
      Action::Unpublish => "unpublish",
      Action::Withdraw => "withdraw",
    }
  }
}

impl fmt::Display for Action {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// Extent supplied by a contributor. Empty members count as not supplied.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Contribution {
  /// Spatial extent
  pub geometry: Option<GeometryCollection>,
  /// Temporal extent
  pub temporal: Option<TemporalExtent>,
}

impl Contribution {
  fn geometry(&self) -> Option<&GeometryCollection> {
    self.geometry.as_ref().filter(|g| !g.is_empty())
  }

  fn temporal(&self) -> Option<&TemporalExtent> { self.temporal.as_ref().filter(|t| !t.is_empty()) }

  /// Whether anything usable was supplied.
  pub fn is_empty(&self) -> bool { self.geometry().is_none() && self.temporal().is_none() }
}

fn require_admin(actor: &Actor, action: Action) -> Result<(), HarvestError> {
  if actor.is_admin() {
    Ok(())
  } else {
    Err(HarvestError::Forbidden { actor: actor.name.clone(), action: action.as_str() })
  }
}

fn transitioned(work: &Work, to: Status, at: DateTime<Utc>, note: &str) -> Work {
  let mut next = work.clone();
  next.status = to;
  next.updated_at = at;
  next.append_provenance(at, note);
  next
}

/// Attach a contributed extent to a harvested work, moving it to [`Status::Contributed`].
///
/// Returns `Ok(None)` when the contribution carries nothing, which is not a transition.
/// Existing geometry or temporal extent is never overwritten.
pub fn contribute(
  work: &Work,
  contribution: &Contribution,
  actor: &Actor,
  at: DateTime<Utc>,
) -> Result<Option<Work>, HarvestError> {
  if contribution.is_empty() {
    return Ok(None);
  }
  if work.status != Status::Harvested {
    return Err(HarvestError::InvalidTransition { from: work.status, action: Action::Contribute.as_str() });
  }

  let mut changes = Vec::new();
  if let Some(geometry) = contribution.geometry() {
    if work.has_geometry() {
      return Err(HarvestError::ContributionRejected(format!(
        "{} already has a spatial extent",
        work.label()
      )));
    }
    geometry.validate()?;
    changes.push(format!("Changed geometry from empty to {}.", geometry.describe()));
  }
  if let Some(temporal) = contribution.temporal() {
    if work.has_temporal() {
      return Err(HarvestError::ContributionRejected(format!(
        "{} already has a temporal extent",
        work.label()
      )));
    }
    TemporalExtent::new(temporal.start, temporal.end)?;
    changes.push(format!("Set temporal extent to {temporal}."));
  }

  let note = format!(
    "Contribution by {actor}. {} Status changed from {} to {}.",
    changes.join(" "),
    work.status,
    Status::Contributed
  );
  let mut next = transitioned(work, Status::Contributed, at, &note);
  if let Some(geometry) = contribution.geometry() {
    next.geometry = geometry.clone();
  }
  if let Some(temporal) = contribution.temporal() {
    next.temporal = vec![*temporal];
  }
  Ok(Some(next))
}

/// Make a work public.
///
/// Allowed from [`Status::Contributed`], or from [`Status::Harvested`] when the work already
/// has an extent. A work without geometry and without temporal extent is never published.
pub fn publish(work: &Work, actor: &Actor, at: DateTime<Utc>) -> Result<Work, HarvestError> {
  require_admin(actor, Action::Publish)?;
  if !matches!(work.status, Status::Contributed | Status::Harvested) {
    return Err(HarvestError::InvalidTransition { from: work.status, action: Action::Publish.as_str() });
  }
  if !work.has_extent() {
    return Err(HarvestError::PublishPrecondition(format!(
      "{} has neither geometry nor temporal extent",
      work.label()
    )));
  }

  let note = format!("Published by {actor}. Status changed from {} to {}.", work.status, Status::Published);
  Ok(transitioned(work, Status::Published, at, &note))
}

/// Take a published work back to [`Status::Draft`].
pub fn unpublish(work: &Work, actor: &Actor, at: DateTime<Utc>) -> Result<Work, HarvestError> {
  require_admin(actor, Action::Unpublish)?;
  if work.status != Status::Published {
    return Err(HarvestError::InvalidTransition { from: work.status, action: Action::Unpublish.as_str() });
  }
  let note = format!("Unpublished by {actor}. Status changed from {} to {}.", work.status, Status::Draft);
  Ok(transitioned(work, Status::Draft, at, &note))
}

/// Remove a work from view. The record itself is kept.
pub fn withdraw(work: &Work, actor: &Actor, at: DateTime<Utc>) -> Result<Work, HarvestError> {
  require_admin(actor, Action::Withdraw)?;
  if work.status == Status::Withdrawn {
    return Err(HarvestError::InvalidTransition { from: work.status, action: Action::Withdraw.as_str() });
  }
  let note = format!("Withdrawn by {actor}. Status changed from {} to {}.", work.status, Status::Withdrawn);
  Ok(transitioned(work, Status::Withdrawn, at, &note))
}
