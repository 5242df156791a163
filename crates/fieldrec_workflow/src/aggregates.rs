//! Derived views over the version log: approved/submitted listings and
//! per-status counters.
//!
//! These are caches. The per-entity version records are canonical and the
//! views can always be recomputed from them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{now, VersionRecord, VersionRef, VersionStatus};

/// Number of versions in each status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounters {
    pub draft: u64,
    pub submitted: u64,
    pub approved: u64,
    pub rejected: u64,
    pub returned_for_revision: u64,
}

impl StatusCounters {
    fn slot(&mut self, status: VersionStatus) -> &mut u64 {
        match status {
            VersionStatus::Draft => &mut self.draft,
            VersionStatus::Submitted => &mut self.submitted,
            VersionStatus::Approved => &mut self.approved,
            VersionStatus::Rejected => &mut self.rejected,
            VersionStatus::ReturnedForRevision => &mut self.returned_for_revision,
        }
    }

    pub fn get(&self, status: VersionStatus) -> u64 {
        match status {
            VersionStatus::Draft => self.draft,
            VersionStatus::Submitted => self.submitted,
            VersionStatus::Approved => self.approved,
            VersionStatus::Rejected => self.rejected,
            VersionStatus::ReturnedForRevision => self.returned_for_revision,
        }
    }

    pub fn increment(&mut self, status: VersionStatus) {
        *self.slot(status) += 1;
    }

    /// Saturates at zero; the cache may already be off.
    pub fn decrement(&mut self, status: VersionStatus) {
        let slot = self.slot(status);
        *slot = slot.saturating_sub(1);
    }

    pub fn total(&self) -> u64 {
        VersionStatus::ALL.iter().map(|s| self.get(*s)).sum()
    }
}

/// Approved and submitted listings plus counters, as of `computed_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateSnapshot {
    pub approved: Vec<VersionRef>,
    pub submitted: Vec<VersionRef>,
    pub counters: StatusCounters,
    pub computed_at: DateTime<Utc>,
}

impl AggregateSnapshot {
    pub fn empty() -> Self {
        Self {
            approved: Vec::new(),
            submitted: Vec::new(),
            counters: StatusCounters::default(),
            computed_at: now(),
        }
    }

    /// Full recomputation from version records.
    pub fn from_versions<'a>(versions: impl IntoIterator<Item = &'a VersionRecord>) -> Self {
        let mut snapshot = Self::empty();
        for version in versions {
            snapshot.counters.increment(version.status);
            match version.status {
                VersionStatus::Approved => snapshot.approved.push(version.into()),
                VersionStatus::Submitted => snapshot.submitted.push(version.into()),
                _ => {}
            }
        }
        snapshot.approved.sort();
        snapshot.submitted.sort();
        snapshot
    }

    /// Incremental update for one status change; `from` is `None` for a new
    /// version.
    pub fn apply(&mut self, version: VersionRef, from: Option<VersionStatus>, to: VersionStatus) {
        if let Some(from) = from {
            self.counters.decrement(from);
            match from {
                VersionStatus::Approved => self.approved.retain(|v| v != &version),
                VersionStatus::Submitted => self.submitted.retain(|v| v != &version),
                _ => {}
            }
        }
        self.counters.increment(to);
        let list = match to {
            VersionStatus::Approved => Some(&mut self.approved),
            VersionStatus::Submitted => Some(&mut self.submitted),
            _ => None,
        };
        if let Some(list) = list {
            if let Err(pos) = list.binary_search(&version) {
                list.insert(pos, version);
            }
        }
        self.computed_at = now();
    }
}

/// What a reconciliation sweep found and changed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub entities_scanned: usize,
    pub versions_scanned: usize,
    /// Versions whose published record existed while the version itself was
    /// not yet marked approved.
    pub repaired: Vec<VersionRef>,
    pub snapshot: AggregateSnapshot,
}
