//! The persistence contract the engine commits through.
//!
//! Implementations provide atomic multi-entity commits, indexed range
//! queries keyed by occurrence start, and paged scans. The engine never
//! sees a storage engine's own cursor API; incremental reads go through
//! [`RangeScan`], an explicit iterator over pages.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use almanac_core::occurrence::Occurrence;
use almanac_core::timespan::Timespan;

use crate::error::StoreResult;
use crate::state::SeriesExpansionState;

/// A named set of entity mutations applied all-or-nothing.
///
/// One expansion trigger commits occurrences, updated expansion states,
/// and series removals as a single batch; a failed commit writes nothing.
#[derive(Debug, Default)]
pub struct CommitBatch {
    /// Occurrences to insert or replace (upsert by id).
    pub put_occurrences: Vec<Occurrence>,
    /// Occurrence ids to delete.
    pub remove_occurrences: Vec<Uuid>,
    /// Expansion states to insert or replace (upsert by series id).
    pub put_states: Vec<SeriesExpansionState>,
    /// Series whose occurrences and expansion state are all deleted.
    pub remove_series: Vec<Uuid>,
}

impl CommitBatch {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.put_occurrences.is_empty()
            && self.remove_occurrences.is_empty()
            && self.put_states.is_empty()
            && self.remove_series.is_empty()
    }

    /// Folds another batch into this one, preserving order.
    pub fn merge(&mut self, other: Self) {
        self.put_occurrences.extend(other.put_occurrences);
        self.remove_occurrences.extend(other.remove_occurrences);
        self.put_states.extend(other.put_states);
        self.remove_series.extend(other.remove_series);
    }
}

/// Atomic, indexed persistence for occurrences and expansion state.
///
/// Mutation is single-threaded by the engine's cooperative model; the
/// contract only requires that `commit` is all-or-nothing and that range
/// queries return occurrences ordered by start.
pub trait ExpansionStore {
    /// ## Summary
    /// Applies a batch atomically: either every mutation lands or none.
    ///
    /// ## Errors
    /// `StoreError::Transient` on a retryable failure; no partial state
    /// is ever visible afterwards.
    fn commit(&self, batch: CommitBatch) -> StoreResult<()>;

    /// ## Summary
    /// Loads the expansion state for a series, `None` if never expanded.
    ///
    /// ## Errors
    /// `StoreError::Corrupt` if the persisted record fails to decode.
    fn expansion_state(&self, series_id: Uuid) -> StoreResult<Option<SeriesExpansionState>>;

    /// ## Summary
    /// Returns occurrences overlapping `span`, ordered by start.
    ///
    /// ## Errors
    /// `StoreError::Transient` on a retryable failure.
    fn occurrences_in(&self, span: &Timespan) -> StoreResult<Vec<Occurrence>>;

    /// ## Summary
    /// Returns every occurrence of one series, ordered by start.
    ///
    /// ## Errors
    /// `StoreError::Transient` on a retryable failure.
    fn occurrences_of_series(&self, series_id: Uuid) -> StoreResult<Vec<Occurrence>>;

    /// ## Summary
    /// Reads one page of occurrences overlapping `span`, ordered by
    /// `(start, id)`, strictly after `resume_after`. Backing method for
    /// [`RangeScan`]; callers normally use [`RangeScan::new`] instead.
    ///
    /// ## Errors
    /// `StoreError::Transient` on a retryable failure.
    fn scan_page(
        &self,
        span: &Timespan,
        resume_after: Option<(DateTime<Utc>, Uuid)>,
        limit: usize,
    ) -> StoreResult<Vec<Occurrence>>;
}

/// Paged iterator over occurrences in a span.
///
/// Decouples incremental reads from any storage engine's cursor API: the
/// scan itself carries the resume key and pulls pages on demand.
pub struct RangeScan<'s> {
    store: &'s dyn ExpansionStore,
    span: Timespan,
    page_size: usize,
    resume_after: Option<(DateTime<Utc>, Uuid)>,
    buffer: VecDeque<Occurrence>,
    done: bool,
}

impl<'s> RangeScan<'s> {
    #[must_use]
    pub fn new(store: &'s dyn ExpansionStore, span: Timespan, page_size: usize) -> Self {
        Self {
            store,
            span,
            page_size: page_size.max(1),
            resume_after: None,
            buffer: VecDeque::new(),
            done: false,
        }
    }

    fn refill(&mut self) -> StoreResult<()> {
        let page = self
            .store
            .scan_page(&self.span, self.resume_after, self.page_size)?;
        if page.len() < self.page_size {
            self.done = true;
        }
        if let Some(last) = page.last() {
            self.resume_after = Some((last.start, last.id));
        }
        self.buffer.extend(page);
        Ok(())
    }
}

impl Iterator for RangeScan<'_> {
    type Item = StoreResult<Occurrence>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() {
            if self.done {
                return None;
            }
            if let Err(err) = self.refill() {
                self.done = true;
                return Some(Err(err));
            }
        }
        self.buffer.pop_front().map(Ok)
    }
}
