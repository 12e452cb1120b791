//! Tracks which timespans are loaded and decides what to load or evict
//! as the user navigates.
//!
//! The cache window is an ordered-by-start list of month spans, bounded
//! to `max_spans` once consolidated. `current_span` marks the last span
//! *requested* (not necessarily last loaded); consolidation anchors on it
//! and is biased toward the direction of travel. Consolidation runs only
//! once every pending load for the navigation step has settled; the
//! pending count is the sole ordering guarantee, and loads complete in
//! any order.

use chrono::{DateTime, Datelike, Utc};

use almanac_core::timespan::{Timespan, TrimOutcome};
use almanac_core::types::{Direction, Scale};

use crate::events::{EngineEvent, EventBus};
use crate::interval::IntervalCollection;

#[derive(Debug)]
pub struct WindowManager {
    position: Option<DateTime<Utc>>,
    direction: Direction,
    scale: Scale,
    current_span: Option<Timespan>,
    /// Sorted ascending by start, unique starts.
    loaded_spans: Vec<Timespan>,
    max_spans: usize,
    pending_loads: usize,
    month_marker: Option<(i32, u32)>,
    day_marker: Option<(i32, u32, u32)>,
}

impl WindowManager {
    #[must_use]
    pub fn new(max_spans: usize) -> Self {
        Self {
            position: None,
            direction: Direction::default(),
            scale: Scale::default(),
            current_span: None,
            loaded_spans: Vec::new(),
            max_spans: max_spans.max(1),
            pending_loads: 0,
            month_marker: None,
            day_marker: None,
        }
    }

    #[must_use]
    pub fn direction(&self) -> Direction {
        self.direction
    }

    #[must_use]
    pub fn current_span(&self) -> Option<Timespan> {
        self.current_span
    }

    #[must_use]
    pub fn loaded_spans(&self) -> &[Timespan] {
        &self.loaded_spans
    }

    #[must_use]
    pub fn pending_loads(&self) -> usize {
        self.pending_loads
    }

    /// ## Summary
    /// Moves the focus date: updates direction relative to the prior
    /// position (future on the first move and on equal dates) and the
    /// derived month/day markers, emitting a change event only when the
    /// value actually differs from the cached one. The no-op suppression
    /// is an invariant consumers rely on, not an optimization.
    pub fn move_to(&mut self, date: DateTime<Utc>, bus: &mut EventBus) {
        self.direction = match self.position {
            Some(prev) if date < prev => Direction::Past,
            _ => Direction::Future,
        };
        self.position = Some(date);

        let month = (date.year(), date.month());
        if self.month_marker != Some(month) {
            self.month_marker = Some(month);
            bus.emit(&EngineEvent::MonthChange {
                year: month.0,
                month: month.1,
            });
        }
        let day = (date.year(), date.month(), date.day());
        if self.day_marker != Some(day) {
            self.day_marker = Some(day);
            bus.emit(&EngineEvent::DayChange {
                year: day.0,
                month: day.1,
                day: day.2,
            });
        }
    }

    /// Changes the view scale, emitting only on an actual change.
    pub fn set_scale(&mut self, scale: Scale, bus: &mut EventBus) {
        if self.scale != scale {
            self.scale = scale;
            bus.emit(&EngineEvent::ScaleChange(scale));
        }
    }

    #[must_use]
    pub fn scale(&self) -> Scale {
        self.scale
    }

    /// ## Summary
    /// Computes the spans to request for a navigation to `date`.
    ///
    /// If the month span of `date` is not loaded, this is an initial
    /// load: the current span first (perceived responsiveness), then the
    /// adjacent future span, then the adjacent past span. Otherwise only
    /// the single next span at the travel-direction edge of the window.
    pub fn plan_navigation(&mut self, date: DateTime<Utc>) -> Vec<Timespan> {
        let span = Timespan::month_of(date);
        self.current_span = Some(span);

        let already_loaded = self
            .loaded_spans
            .binary_search_by_key(&span.start(), Timespan::start)
            .is_ok();
        if !already_loaded || self.loaded_spans.is_empty() {
            return vec![span, span.next_month(), span.prev_month()];
        }

        let next = match self.direction {
            Direction::Future => self
                .loaded_spans
                .last()
                .map_or_else(|| span.next_month(), Timespan::next_month),
            Direction::Past => self
                .loaded_spans
                .first()
                .map_or_else(|| span.prev_month(), Timespan::prev_month),
        };
        vec![next]
    }

    /// ## Summary
    /// Records a span in the cache window and returns the region that
    /// actually needs loading, if any.
    ///
    /// An exact start match is a no-op. Otherwise the span is trimmed
    /// against its immediate neighbors so already-cached regions are not
    /// re-loaded; the *original* span is inserted in sorted order and the
    /// *trimmed* region returned. `Consumed` means fully covered (no
    /// load); an indeterminate trim falls back to the full original span.
    pub fn record_span(&mut self, span: Timespan) -> Option<Timespan> {
        let idx = match self
            .loaded_spans
            .binary_search_by_key(&span.start(), Timespan::start)
        {
            Ok(_) => {
                tracing::trace!(%span, "span already recorded");
                return None;
            }
            Err(idx) => idx,
        };

        let mut remaining = span;
        let mut consumed = false;
        let mut indeterminate = false;
        let left = idx.checked_sub(1).and_then(|i| self.loaded_spans.get(i));
        let right = self.loaded_spans.get(idx);
        for neighbor in [left, right].into_iter().flatten() {
            match neighbor.trim_overlap(&remaining) {
                TrimOutcome::Consumed => {
                    consumed = true;
                    break;
                }
                TrimOutcome::Trimmed(rest) => remaining = rest,
                TrimOutcome::Straddles => {
                    indeterminate = true;
                    break;
                }
                TrimOutcome::Disjoint => {}
            }
        }

        self.loaded_spans.insert(idx, span);
        if consumed {
            tracing::trace!(%span, "span already covered by neighbors, skipping load");
            return None;
        }
        let load = if indeterminate { span } else { remaining };
        tracing::trace!(%span, %load, "recorded span");
        Some(load)
    }

    /// Marks one async load as issued.
    pub fn begin_load(&mut self) {
        self.pending_loads += 1;
    }

    /// Marks one load as settled; true when it was the last outstanding
    /// one for this navigation step.
    pub fn load_settled(&mut self) -> bool {
        self.pending_loads = self.pending_loads.saturating_sub(1);
        self.pending_loads == 0
    }

    /// ## Summary
    /// Shrinks the window to `max_spans` spans anchored on the current
    /// span and biased by direction: moving future keeps one span behind
    /// and the remainder ahead; moving past mirrors that. Dropped spans
    /// purge the occurrence cache of anything outside the kept union and
    /// emit one `Purge` event each.
    ///
    /// Must only be called once every pending load for the navigation
    /// step has settled.
    pub fn consolidate(
        &mut self,
        cache: &mut IntervalCollection,
        bus: &mut EventBus,
    ) -> Vec<Timespan> {
        if self.loaded_spans.len() <= self.max_spans {
            return Vec::new();
        }

        let anchor = self.anchor_index();
        let start = match self.direction {
            Direction::Future => anchor.saturating_sub(1),
            Direction::Past => (anchor + 2).saturating_sub(self.max_spans),
        };
        let start = start.min(self.loaded_spans.len() - self.max_spans);

        let kept: Vec<Timespan> = self.loaded_spans[start..start + self.max_spans].to_vec();
        let dropped: Vec<Timespan> = self
            .loaded_spans
            .iter()
            .copied()
            .filter(|span| !kept.contains(span))
            .collect();
        self.loaded_spans = kept;

        let purged = cache.purge_outside(&self.loaded_spans);
        tracing::debug!(
            kept = self.loaded_spans.len(),
            dropped = dropped.len(),
            purged,
            direction = %self.direction,
            "consolidated cache window"
        );
        for span in &dropped {
            bus.emit(&EngineEvent::Purge(*span));
        }
        dropped
    }

    /// Index of the span the keep-window anchors on: the current span's
    /// exact start when loaded, otherwise its insertion position clamped
    /// to the array.
    fn anchor_index(&self) -> usize {
        let Some(current) = self.current_span else {
            return 0;
        };
        match self
            .loaded_spans
            .binary_search_by_key(&current.start(), Timespan::start)
        {
            Ok(idx) => idx,
            Err(idx) => idx.min(self.loaded_spans.len() - 1),
        }
    }
}
