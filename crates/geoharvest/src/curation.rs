//! Curation operations: contribute, publish, unpublish, withdraw.
//!
//! Each operation loads the work, applies the matching [`lifecycle`] transition and writes
//! the result back with a version check. If another writer got there first, the transition is
//! re-applied to the fresh record a bounded number of times before giving up with
//! [`HarvestError::ConcurrentModification`]. Two concurrent publishes therefore end with one
//! success and one [`HarvestError::InvalidTransition`].

use super::*;
use crate::{
  lifecycle::{self, Contribution},
  notify::{self, Notifier, TracingNotifier},
};

const MAX_ATTEMPTS: u32 = 3;

/// Applies lifecycle transitions to stored works.
#[derive(Clone)]
pub struct Curator {
  store:    Arc<dyn Store>,
  notifier: Arc<dyn Notifier>,
}

impl Curator {
  /// A curator logging its notifications.
  pub fn new(store: Arc<dyn Store>) -> Self { Self { store, notifier: Arc::new(TracingNotifier) } }

  /// Replace the notifier.
  pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
    self.notifier = notifier;
    self
  }

  /// Attach a geometry and/or temporal extent to a harvested work.
  ///
  /// A contribution with neither returns the work unchanged.
  pub async fn contribute(
    &self,
    work_id: WorkId,
    geometry: Option<GeometryCollection>,
    temporal: Option<TemporalExtent>,
    actor: &Actor,
  ) -> Result<Work, HarvestError> {
    let contribution = Contribution { geometry, temporal };
    let work = self
      .apply(work_id, |work, at| lifecycle::contribute(work, &contribution, actor, at))
      .await?;
    debug!("Work {work_id} is now {}", work.status);
    Ok(work)
  }

  /// Make a work public and announce it.
  pub async fn publish(&self, work_id: WorkId, actor: &Actor) -> Result<Work, HarvestError> {
    let work = self.apply(work_id, |work, at| lifecycle::publish(work, actor, at).map(Some)).await?;
    notify::published(self.notifier.as_ref(), std::slice::from_ref(&work)).await;
    Ok(work)
  }

  /// Take a published work back to draft.
  pub async fn unpublish(&self, work_id: WorkId, actor: &Actor) -> Result<Work, HarvestError> {
    self.apply(work_id, |work, at| lifecycle::unpublish(work, actor, at).map(Some)).await
  }

  /// Remove a work from view.
  pub async fn withdraw(&self, work_id: WorkId, actor: &Actor) -> Result<Work, HarvestError> {
    self.apply(work_id, |work, at| lifecycle::withdraw(work, actor, at).map(Some)).await
  }

  async fn apply<F>(&self, work_id: WorkId, transition: F) -> Result<Work, HarvestError>
  where F: Fn(&Work, DateTime<Utc>) -> Result<Option<Work>, HarvestError> + Send + Sync {
    for attempt in 1..=MAX_ATTEMPTS {
      let current =
        self.store.get_work(work_id).await?.ok_or_else(|| HarvestError::NotFound(format!("work {work_id}")))?;
      let Some(next) = transition(&current, Utc::now())? else {
        return Ok(current);
      };
      match self.store.update_work(&next).await? {
        Some(saved) => {
          trace!("Work {work_id}: {} -> {}", current.status, saved.status);
          return Ok(saved);
        },
        None => debug!("Work {work_id} changed during attempt {attempt}, retrying"),
      }
    }
    Err(HarvestError::ConcurrentModification(work_id))
  }
}

#[cfg(test)]
mod tests {
  use tempfile::{tempdir, TempDir};

  use super::*;
  use crate::{database::Database, work::tests::work_fixture};

  async fn setup() -> (Curator, Arc<Database>, TempDir) {
    let dir = tempdir().unwrap();
    let db = Arc::new(Database::open(dir.path().join("curation.db")).await.unwrap());
    (Curator::new(db.clone()), db, dir)
  }

  async fn stored(db: &Database, mut work: Work) -> Work {
    work.source_id = None;
    db.insert_work(&work).await.unwrap()
  }

  #[traced_test]
  #[tokio::test]
  async fn test_contribute_publish_unpublish() -> anyhow::Result<()> {
    let (curator, db, _dir) = setup().await;
    let work = stored(&db, work_fixture()).await;
    let admin = Actor::admin("root");

    let err = curator.publish(work.id, &admin).await.unwrap_err();
    assert!(matches!(err, HarvestError::PublishPrecondition(_)));

    let geometry = GeometryCollection::parse("POINT(-19.6 63.6)")?;
    let contributed = curator.contribute(work.id, Some(geometry), None, &Actor::user("alice")).await?;
    assert_eq!(contributed.status, Status::Contributed);
    assert_eq!(contributed.version, 2);

    let published = curator.publish(work.id, &admin).await?;
    assert_eq!(published.status, Status::Published);
    assert!(logs_contain("Published work"));

    let err = curator.publish(work.id, &admin).await.unwrap_err();
    assert!(matches!(err, HarvestError::InvalidTransition { from: Status::Published, .. }));

    let draft = curator.unpublish(work.id, &admin).await?;
    assert_eq!(draft.status, Status::Draft);
    let stored = db.get_work(work.id).await?.unwrap();
    assert_eq!(stored.version, 4);
    assert!(stored.provenance.contains("Unpublished by admin root"));
    Ok(())
  }

  #[tokio::test]
  async fn test_empty_contribution_is_a_no_op() -> anyhow::Result<()> {
    let (curator, db, _dir) = setup().await;
    let work = stored(&db, work_fixture()).await;

    let same = curator.contribute(work.id, None, None, &Actor::user("alice")).await?;
    assert_eq!(same.status, Status::Harvested);
    assert_eq!(same.version, work.version);
    Ok(())
  }

  #[tokio::test]
  async fn test_guards_surface() -> anyhow::Result<()> {
    let (curator, db, _dir) = setup().await;
    let work = stored(&db, work_fixture()).await;

    let err = curator.withdraw(work.id, &Actor::user("mallory")).await.unwrap_err();
    assert!(matches!(err, HarvestError::Forbidden { .. }));

    let err = curator.publish(999, &Actor::admin("root")).await.unwrap_err();
    assert!(matches!(err, HarvestError::NotFound(_)));

    let withdrawn = curator.withdraw(work.id, &Actor::admin("root")).await?;
    assert_eq!(withdrawn.status, Status::Withdrawn);
    let err = curator
      .contribute(work.id, None, TemporalExtent::parse("2020/2021"), &Actor::user("alice"))
      .await
      .unwrap_err();
    assert!(matches!(err, HarvestError::InvalidTransition { from: Status::Withdrawn, .. }));
    Ok(())
  }

  #[tokio::test]
  async fn test_concurrent_publish_has_one_winner() -> anyhow::Result<()> {
    let (curator, db, _dir) = setup().await;
    let mut work = work_fixture();
    work.temporal = vec![TemporalExtent::parse("2021-03/2021-09").unwrap()];
    let work = stored(&db, work).await;

    let admin = Actor::admin("root");
    let (a, b) = tokio::join!(curator.publish(work.id, &admin), curator.publish(work.id, &admin));
    let outcomes = [a, b];
    assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(outcomes
      .iter()
      .any(|r| matches!(r, Err(HarvestError::InvalidTransition { from: Status::Published, .. }))));
    Ok(())
  }
}
