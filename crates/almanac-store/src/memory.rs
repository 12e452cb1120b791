//! In-memory reference implementation of [`ExpansionStore`].
//!
//! Batches apply under a single lock, so a commit is trivially atomic.
//! Query shapes mirror what an indexed engine would provide; performance
//! is not the point here, the engine's own interval cache is what keeps
//! window queries sub-linear.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use almanac_core::occurrence::Occurrence;
use almanac_core::timespan::Timespan;

use crate::error::{StoreError, StoreResult};
use crate::state::SeriesExpansionState;
use crate::store::{CommitBatch, ExpansionStore};

#[derive(Default)]
struct Inner {
    occurrences: HashMap<Uuid, Occurrence>,
    states: HashMap<Uuid, SeriesExpansionState>,
}

/// Lock-guarded in-memory store.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    fail_commits: AtomicU32,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` commits fail with a transient error.
    ///
    /// Test support for exercising retry paths; failed commits apply
    /// nothing, matching the atomicity contract.
    pub fn inject_commit_failures(&self, count: u32) {
        self.fail_commits.store(count, Ordering::SeqCst);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of stored occurrences, for assertions in tests.
    #[must_use]
    pub fn occurrence_count(&self) -> usize {
        self.lock().occurrences.len()
    }
}

fn sorted_by_start(mut occurrences: Vec<Occurrence>) -> Vec<Occurrence> {
    occurrences.sort_by_key(|occ| (occ.start, occ.id));
    occurrences
}

impl ExpansionStore for MemoryStore {
    fn commit(&self, batch: CommitBatch) -> StoreResult<()> {
        if self.fail_commits.load(Ordering::SeqCst) > 0 {
            self.fail_commits.fetch_sub(1, Ordering::SeqCst);
            tracing::debug!("injected commit failure");
            return Err(StoreError::Transient("injected failure".to_string()));
        }

        let mut inner = self.lock();
        for series_id in &batch.remove_series {
            inner.occurrences.retain(|_, occ| occ.series_id != *series_id);
            inner.states.remove(series_id);
        }
        for id in &batch.remove_occurrences {
            inner.occurrences.remove(id);
        }
        for occ in batch.put_occurrences {
            inner.occurrences.insert(occ.id, occ);
        }
        for state in batch.put_states {
            inner.states.insert(state.series_id, state);
        }
        Ok(())
    }

    fn expansion_state(&self, series_id: Uuid) -> StoreResult<Option<SeriesExpansionState>> {
        Ok(self.lock().states.get(&series_id).cloned())
    }

    fn occurrences_in(&self, span: &Timespan) -> StoreResult<Vec<Occurrence>> {
        let inner = self.lock();
        let hits = inner
            .occurrences
            .values()
            .filter(|occ| span.overlaps(&occ.span()) || span.contains_instant(occ.start))
            .cloned()
            .collect();
        Ok(sorted_by_start(hits))
    }

    fn occurrences_of_series(&self, series_id: Uuid) -> StoreResult<Vec<Occurrence>> {
        let inner = self.lock();
        let hits = inner
            .occurrences
            .values()
            .filter(|occ| occ.series_id == series_id)
            .cloned()
            .collect();
        Ok(sorted_by_start(hits))
    }

    fn scan_page(
        &self,
        span: &Timespan,
        resume_after: Option<(DateTime<Utc>, Uuid)>,
        limit: usize,
    ) -> StoreResult<Vec<Occurrence>> {
        let mut hits = self.occurrences_in(span)?;
        if let Some(after) = resume_after {
            hits.retain(|occ| (occ.start, occ.id) > after);
        }
        hits.truncate(limit);
        Ok(hits)
    }
}
