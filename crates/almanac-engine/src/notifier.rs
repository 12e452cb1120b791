//! Notification collaborator.
//!
//! Informed of occurrence-linked alarms as they are created or removed.
//! Fire-and-forget: delivery is not part of the engine's correctness
//! contract, so these methods cannot fail.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Receiver for alarm lifecycle notifications.
pub trait Notifier: Send + Sync {
    /// Called after an occurrence with alarm instants was committed.
    fn alarms_created(&self, occurrence_id: Uuid, instants: &[DateTime<Utc>]);

    /// Called after an occurrence's alarms were removed.
    fn alarms_removed(&self, occurrence_id: Uuid);
}

/// Notifier that drops everything; the default collaborator.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn alarms_created(&self, occurrence_id: Uuid, instants: &[DateTime<Utc>]) {
        tracing::trace!(%occurrence_id, count = instants.len(), "alarms created");
    }

    fn alarms_removed(&self, occurrence_id: Uuid) {
        tracing::trace!(%occurrence_id, "alarms removed");
    }
}
