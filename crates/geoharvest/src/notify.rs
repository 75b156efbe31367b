//! Notification dispatch.
//!
//! Delivery (e-mail digests, feeds, webhooks) happens elsewhere; the core only announces
//! newly published works and finished harvesting runs through a [`Notifier`]. Notifications
//! are fire-and-forget: a failing notifier is logged and never fails the operation that
//! triggered it.

use super::*;

/// Receives announcements from harvesting and curation.
#[async_trait]
pub trait Notifier: Send + Sync {
  /// Works just became public.
  async fn works_published(&self, works: &[Work]) -> Result<(), HarvestError>;

  /// A harvesting run reached a terminal state.
  async fn harvest_finished(&self, source: &Source, event: &HarvestingEvent) -> Result<(), HarvestError>;
}

/// Writes announcements to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
  async fn works_published(&self, works: &[Work]) -> Result<(), HarvestError> {
    for work in works {
      info!("Published work {}: {}", work.id, work.label());
    }
    Ok(())
  }

  async fn harvest_finished(&self, source: &Source, event: &HarvestingEvent) -> Result<(), HarvestError> {
    match &event.error {
      Some(reason) => warn!(
        "Harvesting {} (event {}) failed after {}: {reason}",
        source.config.name, event.id, event.counts
      ),
      None => info!("Harvesting {} (event {}) finished: {}", source.config.name, event.id, event.counts),
    }
    Ok(())
  }
}

/// Announce published works, logging a failing notifier.
pub(crate) async fn published(notifier: &dyn Notifier, works: &[Work]) {
  if let Err(e) = notifier.works_published(works).await {
    error!("Failed to announce {} published works: {e}", works.len());
  }
}

/// Announce a finished run, logging a failing notifier.
pub(crate) async fn harvest_finished(notifier: &dyn Notifier, source: &Source, event: &HarvestingEvent) {
  if let Err(e) = notifier.harvest_finished(source, event).await {
    error!("Failed to announce harvesting event {}: {e}", event.id);
  }
}
