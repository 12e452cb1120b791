//! Closed, millisecond-resolution time intervals and their algebra.
//!
//! `Timespan` is the unit of everything the engine caches and expands:
//! window spans, expansion deltas, and persisted coverage records are all
//! timespans. All operations are pure; none mutates an operand.

use chrono::{DateTime, Datelike, Months, NaiveDate, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::MERGE_TOLERANCE_MS;
use crate::error::{CoreError, CoreResult};

/// A closed interval `[start, end]` of absolute time at millisecond
/// resolution. Invariant: `start <= end`, enforced at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timespan {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

/// Result of trimming a requested span against an already-covered one.
///
/// The covered span is `self`; the requested span is `other`. The source
/// this design replaces collapsed "no overlap" and "fully covered" into a
/// single null, forcing callers to guess; these outcomes are distinct here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrimOutcome {
    /// The spans do not overlap; the requested span is unchanged.
    Disjoint,
    /// One end of the requested span was covered; the uncovered remainder.
    Trimmed(Timespan),
    /// The requested span lies entirely inside the covered one.
    Consumed,
    /// The requested span sticks out on both sides of the covered one, so
    /// no single residual span describes the uncovered part. Callers fall
    /// back to the full requested span.
    Straddles,
}

impl Timespan {
    /// ## Summary
    /// Creates a timespan from two instants.
    ///
    /// ## Errors
    /// Returns `CoreError::InvalidTimespan` if `start > end`.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> CoreResult<Self> {
        if start > end {
            return Err(CoreError::InvalidTimespan { start, end });
        }
        Ok(Self { start, end })
    }

    /// Creates a timespan covering a single instant.
    #[must_use]
    pub const fn instant(at: DateTime<Utc>) -> Self {
        Self { start: at, end: at }
    }

    #[must_use]
    pub const fn start(&self) -> DateTime<Utc> {
        self.start
    }

    #[must_use]
    pub const fn end(&self) -> DateTime<Utc> {
        self.end
    }

    #[must_use]
    pub fn duration(&self) -> TimeDelta {
        self.end - self.start
    }

    /// ## Summary
    /// Returns true iff either span's start lies within the other's
    /// half-open `[start, end)`. Symmetric: `a.overlaps(b) == b.overlaps(a)`.
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        (self.start <= other.start && other.start < self.end)
            || (other.start <= self.start && self.start < other.end)
    }

    /// Inclusive-bounds test for a single instant.
    #[must_use]
    pub fn contains_instant(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at <= self.end
    }

    /// Inclusive-bounds test for a whole sub-span.
    #[must_use]
    pub fn contains_span(&self, other: &Self) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// ## Summary
    /// Trims `other` (a requested span) against `self` (an already-covered
    /// span), returning the portion of `other` that `self` does not cover.
    ///
    /// Neither operand is modified; see [`TrimOutcome`] for the four cases.
    #[must_use]
    pub fn trim_overlap(&self, other: &Self) -> TrimOutcome {
        if self.contains_span(other) {
            return TrimOutcome::Consumed;
        }
        if !self.overlaps(other) {
            return TrimOutcome::Disjoint;
        }
        if other.start < self.start && self.end < other.end {
            return TrimOutcome::Straddles;
        }
        let step = TimeDelta::milliseconds(1);
        if other.start >= self.start {
            // Head of `other` covered; remainder trails past `self`.
            TrimOutcome::Trimmed(Self {
                start: self.end + step,
                end: other.end,
            })
        } else {
            // Tail of `other` covered; remainder precedes `self`.
            TrimOutcome::Trimmed(Self {
                start: other.start,
                end: self.start - step,
            })
        }
    }

    /// ## Summary
    /// Combines two spans into the minimal span covering both, provided
    /// they overlap or their gap is within [`MERGE_TOLERANCE_MS`].
    ///
    /// The tolerance test widens a *copy* of `self`; neither operand is
    /// mutated. Returns `None` when the spans are too far apart to merge.
    #[must_use]
    pub fn combine(&self, other: &Self) -> Option<Self> {
        let slack = TimeDelta::milliseconds(MERGE_TOLERANCE_MS);
        let widened = Self {
            start: self.start - slack,
            end: self.end + slack,
        };
        if widened.overlaps(other) || widened.contains_span(other) {
            Some(Self {
                start: self.start.min(other.start),
                end: self.end.max(other.end),
            })
        } else {
            None
        }
    }

    /// ## Summary
    /// Returns the month-granularity span enclosing `at`: from the first
    /// instant of the month through the last millisecond before the next
    /// month begins.
    #[must_use]
    pub fn month_of(at: DateTime<Utc>) -> Self {
        let month_start = first_instant_of_month(at);
        let next_start = month_start + Months::new(1);
        Self {
            start: month_start,
            end: next_start - TimeDelta::milliseconds(1),
        }
    }

    /// The month span immediately after this one.
    #[must_use]
    pub fn next_month(&self) -> Self {
        Self::month_of(self.end + TimeDelta::milliseconds(1))
    }

    /// The month span immediately before this one.
    #[must_use]
    pub fn prev_month(&self) -> Self {
        Self::month_of(self.start - TimeDelta::milliseconds(1))
    }

    /// This span widened by `days` on each side.
    #[must_use]
    pub fn padded(&self, days: i64) -> Self {
        let pad = TimeDelta::days(days);
        Self {
            start: self.start - pad,
            end: self.end + pad,
        }
    }
}

impl std::fmt::Display for Timespan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}

fn first_instant_of_month(at: DateTime<Utc>) -> DateTime<Utc> {
    let date = at.date_naive();
    // Day 1 always exists, so the fallback is unreachable.
    let first = NaiveDate::from_ymd_opt(date.year(), date.month(), 1).unwrap_or(date);
    first
        .and_hms_opt(0, 0, 0)
        .unwrap_or_default()
        .and_utc()
}
