//! Persisted per-series expansion coverage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use almanac_core::timespan::Timespan;

/// Opaque, serializable cursor into a series' recurrence iteration.
///
/// Lets a later expansion call resume where the previous one stopped
/// instead of re-deriving every prior candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IteratorCursor {
    /// The last instant the iterator emitted.
    pub last_emitted: DateTime<Utc>,
    /// Total candidates emitted so far for this series.
    pub emitted_count: u64,
}

/// Per-series record of which spans have already been expanded.
///
/// Invariant: `spans` is sorted ascending by start and pairwise
/// non-overlapping; the tracker maintains this through its merge
/// fixed-point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesExpansionState {
    pub series_id: Uuid,
    pub spans: Vec<Timespan>,
    pub cursor: Option<IteratorCursor>,
}

impl SeriesExpansionState {
    /// Fresh state for a series that has never been expanded.
    #[must_use]
    pub const fn new(series_id: Uuid) -> Self {
        Self {
            series_id,
            spans: Vec::new(),
            cursor: None,
        }
    }

    /// Whether `target` is already fully covered by expanded spans.
    #[must_use]
    pub fn covers(&self, target: &Timespan) -> bool {
        self.spans.iter().any(|span| span.contains_span(target))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_state_round_trips_through_json() {
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap();
        let state = SeriesExpansionState {
            series_id: Uuid::new_v4(),
            spans: vec![Timespan::new(start, end).unwrap()],
            cursor: Some(IteratorCursor {
                last_emitted: start,
                emitted_count: 42,
            }),
        };

        let json = serde_json::to_string(&state).expect("serialize");
        let restored: SeriesExpansionState = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(restored, state);
    }

    #[test]
    fn test_covers() {
        let span = |s: u32, e: u32| {
            Timespan::new(
                Utc.with_ymd_and_hms(2026, s, 1, 0, 0, 0).unwrap(),
                Utc.with_ymd_and_hms(2026, e, 1, 0, 0, 0).unwrap(),
            )
            .unwrap()
        };
        let mut state = SeriesExpansionState::new(Uuid::new_v4());
        assert!(!state.covers(&span(1, 2)));
        state.spans.push(span(1, 4));
        assert!(state.covers(&span(2, 3)));
        assert!(!state.covers(&span(3, 6)));
    }
}
