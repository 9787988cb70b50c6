use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What a cascading deletion (or repair sweep) actually changed.
///
/// Re-running a finished cascade yields an empty report.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CascadeReport {
    pub lots_deleted: Vec<Uuid>,

    /// Batches removed because none of their allocations survived
    pub batches_deleted: Vec<Uuid>,

    /// Batches that lost some allocations and were saved with the rest
    pub batches_trimmed: Vec<Uuid>,

    /// Dividend allocations removed, including those of deleted batches
    pub allocations_removed: usize,

    /// Dividend allocations re-pointed at their lot's current account
    #[serde(default)]
    pub allocations_relinked: usize,

    pub account_deleted: Option<Uuid>,
}

impl CascadeReport {
    pub fn merge(&mut self, other: CascadeReport) {
        self.lots_deleted.extend(other.lots_deleted);
        for id in other.batches_deleted {
            self.batches_trimmed.retain(|t| *t != id);
            if !self.batches_deleted.contains(&id) {
                self.batches_deleted.push(id);
            }
        }
        for id in other.batches_trimmed {
            if !self.batches_trimmed.contains(&id) && !self.batches_deleted.contains(&id) {
                self.batches_trimmed.push(id);
            }
        }
        self.allocations_removed += other.allocations_removed;
        self.allocations_relinked += other.allocations_relinked;
        if other.account_deleted.is_some() {
            self.account_deleted = other.account_deleted;
        }
    }

    /// True when the cascade found nothing left to do.
    pub fn is_noop(&self) -> bool {
        self.lots_deleted.is_empty()
            && self.batches_deleted.is_empty()
            && self.batches_trimmed.is_empty()
            && self.allocations_removed == 0
            && self.allocations_relinked == 0
            && self.account_deleted.is_none()
    }
}
