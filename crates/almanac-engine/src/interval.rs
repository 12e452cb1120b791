//! Interval-indexed cache of materialized occurrences.
//!
//! Backing is a vec sorted by `(start, id)` with binary-search lookup.
//! Range queries stay sub-linear by tracking the longest occurrence seen,
//! which bounds how far left of a query span an overlapping entry can
//! start. Mutation is single-threaded by the engine's cooperative model.

use std::collections::HashMap;

use chrono::{DateTime, TimeDelta, Utc};
use uuid::Uuid;

use almanac_core::occurrence::Occurrence;
use almanac_core::timespan::Timespan;

#[derive(Debug)]
pub struct IntervalCollection {
    /// Sorted ascending by `(start, id)`.
    entries: Vec<Occurrence>,
    /// Id to sort key, for O(log n) removal and duplicate rejection.
    keys: HashMap<Uuid, (DateTime<Utc>, Uuid)>,
    /// Longest duration ever held. Only grows; a stale upper bound just
    /// widens the query scan, never loses a hit.
    max_duration: TimeDelta,
}

impl Default for IntervalCollection {
    fn default() -> Self {
        Self::new()
    }
}

impl IntervalCollection {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            keys: HashMap::new(),
            max_duration: TimeDelta::zero(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// ## Summary
    /// Inserts an occurrence in sort order. Returns false (and leaves the
    /// cache unchanged) when an entry with the same id already exists.
    pub fn add(&mut self, occurrence: Occurrence) -> bool {
        if self.keys.contains_key(&occurrence.id) {
            return false;
        }
        let key = (occurrence.start, occurrence.id);
        let idx = self.entries.partition_point(|o| (o.start, o.id) < key);
        self.max_duration = self.max_duration.max(occurrence.end - occurrence.start);
        self.keys.insert(occurrence.id, key);
        self.entries.insert(idx, occurrence);
        true
    }

    /// Removes an occurrence by id, returning it if present.
    pub fn remove(&mut self, id: Uuid) -> Option<Occurrence> {
        let key = self.keys.remove(&id)?;
        let idx = self.entries.partition_point(|o| (o.start, o.id) < key);
        if self.entries.get(idx).map(|o| o.id) == Some(id) {
            Some(self.entries.remove(idx))
        } else {
            None
        }
    }

    /// Removes every occurrence of a series, returning the removed set.
    pub fn remove_series(&mut self, series_id: Uuid) -> Vec<Occurrence> {
        let ids: Vec<Uuid> = self
            .entries
            .iter()
            .filter(|o| o.series_id == series_id)
            .map(|o| o.id)
            .collect();
        ids.into_iter().filter_map(|id| self.remove(id)).collect()
    }

    /// ## Summary
    /// Returns occurrences overlapping `span` (inclusive bounds), ordered
    /// by start. Sub-linear: binary search bounds the scan window.
    #[must_use]
    pub fn query(&self, span: &Timespan) -> Vec<Occurrence> {
        let earliest_start = span.start() - self.max_duration;
        let from = self
            .entries
            .partition_point(|o| o.start < earliest_start);
        self.entries[from..]
            .iter()
            .take_while(|o| o.start <= span.end())
            .filter(|o| o.end >= span.start())
            .cloned()
            .collect()
    }

    /// Removes occurrences lying entirely before `point`.
    pub fn purge_before(&mut self, point: DateTime<Utc>) -> usize {
        self.purge_where(|o| o.end < point)
    }

    /// Removes occurrences lying entirely after `point`.
    pub fn purge_after(&mut self, point: DateTime<Utc>) -> usize {
        self.purge_where(|o| o.start > point)
    }

    /// ## Summary
    /// Removes occurrences strictly outside every span in `kept`,
    /// returning how many were dropped. Used when the cache window
    /// consolidates and evicts stale spans.
    pub fn purge_outside(&mut self, kept: &[Timespan]) -> usize {
        self.purge_where(|o| {
            !kept
                .iter()
                .any(|span| o.start <= span.end() && o.end >= span.start())
        })
    }

    fn purge_where(&mut self, drop: impl Fn(&Occurrence) -> bool) -> usize {
        let before = self.entries.len();
        self.entries.retain(|o| !drop(o));
        let dropped = before - self.entries.len();
        if dropped > 0 {
            self.keys.clear();
            for occ in &self.entries {
                self.keys.insert(occ.id, (occ.start, occ.id));
            }
        }
        dropped
    }
}
