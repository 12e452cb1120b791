//! Decides *when* expansion runs and commits its results.
//!
//! Three triggers: navigation (debounced; each new navigation cancels the
//! pending scheduled expansion and only the latest survives), post-sync
//! (unconditional re-expansion of the current window), and lazy
//! ensure-expanded (retried a bounded number of passes). One trigger's
//! results (occurrences, updated expansion states, derived alarms)
//! commit as a single atomic batch; one series failing to expand does not
//! block the others, and the first error is reported after all
//! independent work finishes.
//!
//! A scheduled-but-unfired expansion is cancelled by aborting its task.
//! An expansion that is already running is never aborted mid-commit: a
//! late result for a superseded navigation step is still applied, trading
//! strict recency for eventual correctness of the cache.

use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use almanac_core::config::ExpansionConfig;
use almanac_core::occurrence::Series;
use almanac_core::timespan::Timespan;
use almanac_store::{CommitBatch, ExpansionStore};

use crate::engine::EngineState;
use crate::error::{EngineError, EngineResult};
use crate::expander::{RecurrenceExpander, RecurrenceSource};
use crate::notifier::Notifier;
use crate::tracker::SeriesExpansionTracker;

/// Everything an expansion pass needs, cheap to clone into a task.
#[derive(Clone)]
pub(crate) struct ExpansionDeps {
    pub store: Arc<dyn ExpansionStore + Send + Sync>,
    pub source: Arc<dyn RecurrenceSource>,
    pub notifier: Arc<dyn Notifier>,
    pub state: Arc<StdMutex<EngineState>>,
    pub config: ExpansionConfig,
}

pub struct ExpansionOrchestrator {
    deps: ExpansionDeps,
    /// Monotonic id for scheduled expansions; formalizes the change-token
    /// staleness guards of older designs as explicit generations.
    generation: AtomicU64,
    scheduled: StdMutex<Option<tokio::task::JoinHandle<()>>>,
}

impl ExpansionOrchestrator {
    pub(crate) fn new(deps: ExpansionDeps) -> Self {
        Self {
            deps,
            generation: AtomicU64::new(0),
            scheduled: StdMutex::new(None),
        }
    }

    /// Generation of the most recently scheduled expansion.
    #[must_use]
    pub fn scheduled_generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// ## Summary
    /// Schedules a debounced expansion toward `target`, cancelling any
    /// expansion still waiting on its timer. Must run inside a tokio
    /// runtime.
    pub fn schedule_navigation(&self, target: Timespan) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let deps = self.deps.clone();
        let delay = Duration::from_millis(deps.config.debounce_ms);

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            tracing::debug!(generation, %target, "debounced expansion firing");
            // Past this point the expansion is committing and is never
            // cancelled, even if another navigation superseded it.
            if let Err(err) = run_expansion(&deps, &target) {
                tracing::warn!(generation, %err, "navigation expansion failed; next trigger retries");
            }
        });

        let mut slot = self
            .scheduled
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(previous) = slot.replace(handle) {
            previous.abort();
            tracing::trace!(superseded = generation - 1, "cancelled pending expansion");
        }
    }

    /// ## Summary
    /// Post-sync trigger: registers series the sync introduced, then
    /// re-expands the current window unconditionally and immediately.
    ///
    /// ## Errors
    /// Surfaces the first per-series error or a commit failure; partial
    /// per-series failures do not block the rest.
    pub fn post_sync(&self, new_series: Vec<Series>) -> EngineResult<()> {
        let target = {
            let mut state = self
                .deps
                .state
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            for series in new_series {
                state.series.insert(series.id, series);
            }
            state
                .window
                .current_span()
                .unwrap_or_else(|| Timespan::month_of(Utc::now()))
                .padded(self.deps.config.pad_days)
        };
        run_expansion(&self.deps, &target)
    }

    /// ## Summary
    /// Ensures every series is expanded up to `until`, running passes
    /// until coverage is complete. Each pass can be cut short by the emit
    /// limit, and expanding one series can reveal more work, so the loop
    /// is bounded by `max_passes` to guarantee termination.
    ///
    /// ## Errors
    /// `EngineError::ExpansionExhausted` when coverage is still incomplete
    /// after the final pass; the cache remains usable with whatever
    /// coverage exists. Transient pass failures are retried within the
    /// same budget.
    pub fn ensure_expanded(&self, until: DateTime<Utc>) -> EngineResult<()> {
        let from = {
            let state = self
                .deps
                .state
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            state
                .window
                .current_span()
                .map_or_else(|| Timespan::month_of(Utc::now()).start(), |span| span.start())
        };
        let target = if until >= from {
            Timespan::new(from, until)?
        } else {
            Timespan::new(until, from)?
        };

        let max_passes = self.deps.config.max_passes;
        for pass in 1..=max_passes {
            if !uncovered_remains(&self.deps, &target)? {
                tracing::debug!(pass, %target, "coverage complete");
                return Ok(());
            }
            if let Err(err) = run_expansion(&self.deps, &target) {
                tracing::warn!(pass, %err, "expansion pass failed");
            }
        }

        if uncovered_remains(&self.deps, &target)? {
            Err(EngineError::ExpansionExhausted { passes: max_passes })
        } else {
            Ok(())
        }
    }
}

impl Drop for ExpansionOrchestrator {
    fn drop(&mut self) {
        let mut slot = self
            .scheduled
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(handle) = slot.take() {
            handle.abort();
        }
    }
}

/// True while any registered series still has an uncovered delta.
fn uncovered_remains(deps: &ExpansionDeps, target: &Timespan) -> EngineResult<bool> {
    let series_ids: Vec<_> = {
        let state = deps
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        state.series.keys().copied().collect()
    };
    let tracker = SeriesExpansionTracker::new(deps.store.as_ref());
    for series_id in series_ids {
        let (_, delta) = tracker.delta(series_id, target)?;
        if delta.is_some() {
            return Ok(true);
        }
    }
    Ok(false)
}

/// ## Summary
/// One expansion pass: per registered series, compute the uncovered
/// delta, expand it, and fold the results into a single atomic commit.
/// Newly committed occurrences inside the loaded window enter the
/// interval cache, and alarm creation is reported to the notifier.
///
/// ## Errors
/// A commit failure, or the first per-series expansion error; other
/// series' work still commits.
pub(crate) fn run_expansion(deps: &ExpansionDeps, target: &Timespan) -> EngineResult<()> {
    let series_list: Vec<Series> = {
        let state = deps
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        state.series.values().cloned().collect()
    };

    let tracker = SeriesExpansionTracker::new(deps.store.as_ref());
    let expander = RecurrenceExpander::new(deps.source.as_ref(), deps.config.emit_limit);

    let mut batch = CommitBatch::default();
    let mut first_error: Option<EngineError> = None;

    for series in &series_list {
        match expand_one(&tracker, &expander, series, target) {
            Ok(Some((occurrences, state))) => {
                batch.put_occurrences.extend(occurrences);
                batch.put_states.push(state);
            }
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(series_id = %series.id, %err, "series expansion failed");
                first_error.get_or_insert(err);
            }
        }
    }

    if batch.is_empty() {
        return first_error.map_or(Ok(()), Err);
    }

    let committed = batch.put_occurrences.clone();
    deps.store.commit(batch)?;

    let mut state = deps
        .state
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    let loaded: Vec<Timespan> = state.window.loaded_spans().to_vec();
    for occ in committed {
        if !occ.alarms.is_empty() {
            deps.notifier.alarms_created(occ.id, &occ.alarms);
        }
        let in_window = loaded
            .iter()
            .any(|span| occ.start <= span.end() && occ.end >= span.start());
        if in_window {
            state.cache.add(occ);
        }
    }

    first_error.map_or(Ok(()), Err)
}

type SeriesWork = (Vec<almanac_core::occurrence::Occurrence>, almanac_store::SeriesExpansionState);

/// Expands one series' delta; `None` when the target is already covered.
fn expand_one(
    tracker: &SeriesExpansionTracker<'_>,
    expander: &RecurrenceExpander<'_>,
    series: &Series,
    target: &Timespan,
) -> EngineResult<Option<SeriesWork>> {
    let (mut state, delta) = tracker.delta(series.id, target)?;
    let Some(delta) = delta else {
        return Ok(None);
    };

    let mut expansion = expander.expand(series, &delta, state.cursor)?;
    // A straddling delta re-iterates spans already expanded and
    // committed; drop those instants instead of committing duplicates
    // under fresh ids.
    let already_covered = state.spans.clone();
    expansion
        .occurrences
        .retain(|occ| !already_covered.iter().any(|span| span.contains_instant(occ.start)));
    SeriesExpansionTracker::merge(&mut state, expansion.covered);
    if let Some(cursor) = expansion.cursor {
        state.cursor = Some(cursor);
    }
    Ok(Some((expansion.occurrences, state)))
}
