//! Public facade over the window manager, interval cache, and
//! orchestrator.
//!
//! All mutable state lives behind one lock and is only touched from
//! completion callbacks that never hold it across a suspension point;
//! the cooperative single-thread model of the design maps onto tokio
//! tasks that lock, mutate, and release.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use tokio::sync::mpsc::UnboundedReceiver;
use uuid::Uuid;

use almanac_core::config::Settings;
use almanac_core::occurrence::{Occurrence, Series};
use almanac_core::timespan::Timespan;
use almanac_core::types::Scale;
use almanac_store::{CommitBatch, ExpansionStore};

use crate::error::{EngineError, EngineResult};
use crate::events::{EngineEvent, EventBus};
use crate::expander::RecurrenceSource;
use crate::interval::IntervalCollection;
use crate::notifier::Notifier;
use crate::orchestrator::{ExpansionDeps, ExpansionOrchestrator};
use crate::window::WindowManager;

pub(crate) struct EngineState {
    pub window: WindowManager,
    pub cache: IntervalCollection,
    pub bus: EventBus,
    pub series: HashMap<Uuid, Series>,
}

/// The expansion and caching engine.
pub struct Almanac {
    state: Arc<Mutex<EngineState>>,
    store: Arc<dyn ExpansionStore + Send + Sync>,
    notifier: Arc<dyn Notifier>,
    orchestrator: ExpansionOrchestrator,
    pad_days: i64,
}

impl Almanac {
    #[must_use]
    pub fn new(
        store: Arc<dyn ExpansionStore + Send + Sync>,
        source: Arc<dyn RecurrenceSource>,
        notifier: Arc<dyn Notifier>,
        settings: &Settings,
    ) -> Self {
        let state = Arc::new(Mutex::new(EngineState {
            window: WindowManager::new(settings.window.max_spans),
            cache: IntervalCollection::new(),
            bus: EventBus::new(),
            series: HashMap::new(),
        }));
        let orchestrator = ExpansionOrchestrator::new(ExpansionDeps {
            store: Arc::clone(&store),
            source,
            notifier: Arc::clone(&notifier),
            state: Arc::clone(&state),
            config: settings.expansion.clone(),
        });
        Self {
            state,
            store,
            notifier,
            orchestrator,
            pad_days: settings.expansion.pad_days,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a subscriber for engine events.
    pub fn subscribe(&self) -> UnboundedReceiver<EngineEvent> {
        self.lock().bus.subscribe()
    }

    /// Makes a series known to the engine; it participates in every
    /// subsequent expansion trigger.
    pub fn register_series(&self, series: Series) {
        self.lock().series.insert(series.id, series);
    }

    /// ## Summary
    /// Navigation entry point. Updates focus and direction, plans which
    /// spans to load, issues the loads (priority order: current span,
    /// adjacent future, adjacent past), and schedules the debounced
    /// expansion for the focused month padded on both sides.
    ///
    /// Loads settle asynchronously; consolidation and `LoadingComplete`
    /// fire once the pending count reaches zero. Must run inside a tokio
    /// runtime.
    pub fn move_to(&self, date: DateTime<Utc>) {
        let regions: Vec<Timespan> = {
            let mut state = self.lock();
            let EngineState { window, bus, .. } = &mut *state;
            window.move_to(date, bus);
            let plan = window.plan_navigation(date);
            plan.into_iter()
                .filter_map(|span| {
                    let region = window.record_span(span)?;
                    window.begin_load();
                    Some(region)
                })
                .collect()
        };

        if regions.is_empty() {
            // Nothing outstanding; the step settles trivially, but still
            // consolidates so the window bound holds unconditionally.
            let mut state = self.lock();
            let EngineState { window, cache, bus, .. } = &mut *state;
            window.consolidate(cache, bus);
            bus.emit(&EngineEvent::LoadingComplete);
        } else {
            for region in regions {
                self.spawn_load(region);
            }
        }

        self.orchestrator
            .schedule_navigation(Timespan::month_of(date).padded(self.pad_days));
    }

    /// Issues one async load of persisted occurrences into the cache.
    /// Loads may settle in any order; only "pending count reaches zero"
    /// gates consolidation.
    fn spawn_load(&self, region: Timespan) {
        let store = Arc::clone(&self.store);
        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            let loaded = store.occurrences_in(&region);
            let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
            match loaded {
                Ok(occurrences) => {
                    tracing::trace!(%region, count = occurrences.len(), "span load settled");
                    for occ in occurrences {
                        state.cache.add(occ);
                    }
                }
                Err(err) => {
                    tracing::warn!(%region, %err, "span load failed; next trigger retries");
                }
            }
            if state.window.load_settled() {
                let EngineState { window, cache, bus, .. } = &mut *state;
                window.consolidate(cache, bus);
                bus.emit(&EngineEvent::LoadingComplete);
            }
        });
    }

    /// Changes the view scale.
    pub fn set_scale(&self, scale: Scale) {
        let mut state = self.lock();
        let EngineState { window, bus, .. } = &mut *state;
        window.set_scale(scale, bus);
    }

    /// Returns cached occurrences overlapping `span`, ordered by start.
    #[must_use]
    pub fn query_window(&self, span: &Timespan) -> Vec<Occurrence> {
        self.lock().cache.query(span)
    }

    /// ## Summary
    /// Ensures expansion coverage up to `until` for every registered
    /// series, retrying passes up to the configured budget.
    ///
    /// ## Errors
    /// `EngineError::ExpansionExhausted` if coverage is still incomplete
    /// after the final pass.
    pub fn ensure_expanded(&self, until: DateTime<Utc>) -> EngineResult<()> {
        self.orchestrator.ensure_expanded(until)
    }

    /// ## Summary
    /// Post-sync trigger. A failed sync surfaces `SourceUnavailable`;
    /// a successful one registers the delivered series and re-expands the
    /// current window unconditionally.
    ///
    /// ## Errors
    /// `EngineError::SourceUnavailable` on a failed sync, otherwise any
    /// error from the re-expansion pass.
    pub fn on_sync_completed(
        &self,
        outcome: Result<Vec<Series>, String>,
    ) -> EngineResult<()> {
        match outcome {
            Ok(new_series) => self.orchestrator.post_sync(new_series),
            Err(reason) => Err(EngineError::SourceUnavailable(reason)),
        }
    }

    /// ## Summary
    /// Creates a non-recurring occurrence directly: committed to the
    /// store, cached when it falls inside the loaded window, and its
    /// alarms reported to the notifier.
    ///
    /// ## Errors
    /// Propagates a failed commit; nothing is cached in that case.
    pub fn create_event(&self, occurrence: Occurrence) -> EngineResult<()> {
        self.store.commit(CommitBatch {
            put_occurrences: vec![occurrence.clone()],
            ..CommitBatch::default()
        })?;

        if !occurrence.alarms.is_empty() {
            self.notifier.alarms_created(occurrence.id, &occurrence.alarms);
        }
        let mut state = self.lock();
        let in_window = state
            .window
            .loaded_spans()
            .iter()
            .any(|span| occurrence.start <= span.end() && occurrence.end >= span.start());
        if in_window {
            state.cache.add(occurrence);
        }
        Ok(())
    }

    /// ## Summary
    /// Deletes a series: its occurrences, expansion state, and alarms go
    /// atomically, and its cached occurrences are evicted.
    ///
    /// ## Errors
    /// Propagates a failed commit; the cache is untouched in that case.
    pub fn delete_series(&self, series_id: Uuid) -> EngineResult<()> {
        let owned = self.store.occurrences_of_series(series_id)?;
        self.store.commit(CommitBatch {
            remove_series: vec![series_id],
            ..CommitBatch::default()
        })?;

        for occ in &owned {
            if !occ.alarms.is_empty() {
                self.notifier.alarms_removed(occ.id);
            }
        }
        let mut state = self.lock();
        state.series.remove(&series_id);
        state.cache.remove_series(series_id);
        Ok(())
    }

    /// Generation of the most recently scheduled navigation expansion.
    #[must_use]
    pub fn scheduled_generation(&self) -> u64 {
        self.orchestrator.scheduled_generation()
    }
}
