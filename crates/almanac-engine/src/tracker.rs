//! Per-series bookkeeping of which spans have already been expanded.
//!
//! `delta` answers "how much of this request is new work"; `merge` folds
//! freshly expanded coverage back in. Merge runs to a fixed point, so the
//! persisted span list stays sorted and pairwise non-overlapping, and
//! merging the same span twice is a no-op, so retried commits are safe.

use uuid::Uuid;

use almanac_core::timespan::{Timespan, TrimOutcome};
use almanac_store::{ExpansionStore, SeriesExpansionState};

use crate::error::EngineResult;

pub struct SeriesExpansionTracker<'s> {
    store: &'s dyn ExpansionStore,
}

impl<'s> SeriesExpansionTracker<'s> {
    #[must_use]
    pub fn new(store: &'s dyn ExpansionStore) -> Self {
        Self { store }
    }

    /// ## Summary
    /// Computes the uncovered portion of `target` for a series, together
    /// with the persisted state the caller will later merge into.
    ///
    /// A series never expanded yields `delta == target` exactly. A fully
    /// covered target yields `None`. When a persisted span splits the
    /// residual in two, the full residual is returned instead; loading a
    /// covered region twice is safe because merges are idempotent.
    ///
    /// ## Errors
    /// Propagates store failures.
    pub fn delta(
        &self,
        series_id: Uuid,
        target: &Timespan,
    ) -> EngineResult<(SeriesExpansionState, Option<Timespan>)> {
        let state = self
            .store
            .expansion_state(series_id)?
            .unwrap_or_else(|| SeriesExpansionState::new(series_id));

        if state.spans.is_empty() {
            return Ok((state, Some(*target)));
        }

        let mut residual = *target;
        for covered in &state.spans {
            match covered.trim_overlap(&residual) {
                TrimOutcome::Consumed => {
                    tracing::trace!(%series_id, %target, "target fully covered");
                    return Ok((state, None));
                }
                TrimOutcome::Trimmed(remainder) => residual = remainder,
                TrimOutcome::Straddles => {
                    // No single span describes the uncovered part; fall
                    // back to the whole residual.
                    tracing::debug!(%series_id, %residual, "straddling coverage, requesting full residual");
                    return Ok((state, Some(residual)));
                }
                TrimOutcome::Disjoint => {}
            }
        }

        tracing::trace!(%series_id, %target, delta = %residual, "computed delta");
        Ok((state, Some(residual)))
    }

    /// ## Summary
    /// Merges a newly expanded span into the persisted set: append, sort
    /// by start, then repeatedly combine adjacent pairs until a full scan
    /// produces zero merges. A single left-to-right pass is not enough:
    /// one combination can make an earlier pair combinable.
    pub fn merge(state: &mut SeriesExpansionState, new_span: Timespan) {
        state.spans.push(new_span);
        state.spans.sort_by_key(Timespan::start);

        loop {
            let mut merged_any = false;
            let mut i = 0;
            while i + 1 < state.spans.len() {
                if let Some(combined) = state.spans[i].combine(&state.spans[i + 1]) {
                    state.spans[i] = combined;
                    state.spans.remove(i + 1);
                    merged_any = true;
                } else {
                    i += 1;
                }
            }
            if !merged_any {
                break;
            }
        }
    }
}
