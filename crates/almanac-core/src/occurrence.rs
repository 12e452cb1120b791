//! Occurrence and series models.

use chrono::{DateTime, TimeDelta, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::timespan::Timespan;

/// One concrete instance of a (possibly recurring) event.
///
/// Owned by the interval cache and the store; produced by recurrence
/// expansion or by direct non-recurring creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Occurrence {
    pub id: Uuid,
    /// The series (or standalone event) this instance belongs to.
    pub series_id: Uuid,
    /// Start instant in UTC.
    pub start: DateTime<Utc>,
    /// End instant in UTC.
    pub end: DateTime<Utc>,
    /// Whether this is an all-day instance.
    pub all_day: bool,
    /// UTC offset in seconds at `start`, captured at expansion time so
    /// later local-time rendering is correct across DST boundaries.
    pub utc_offset_seconds: i32,
    /// Concrete alarm instants derived from the series' alarm offsets.
    pub alarms: Vec<DateTime<Utc>>,
}

impl Occurrence {
    /// The span this occurrence covers.
    #[must_use]
    pub fn span(&self) -> Timespan {
        Timespan::new(self.start, self.end).unwrap_or_else(|_| Timespan::instant(self.start))
    }
}

/// How an overridden instance replaces the one the rule would generate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OverrideKind {
    /// The instance is cancelled outright.
    Cancelled,
    /// The instance is replaced with different concrete bounds.
    Replaced {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        all_day: bool,
    },
}

/// An exception to a recurrence rule, keyed by the instant the rule would
/// have generated (the recurrence id).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OccurrenceOverride {
    pub recurrence_id: DateTime<Utc>,
    pub kind: OverrideKind,
}

/// A recurring event's definition: the rule, its anchor, and everything
/// needed to turn raw rule candidates into concrete occurrences.
#[derive(Debug, Clone)]
pub struct Series {
    pub id: Uuid,
    /// RRULE text, e.g. `FREQ=WEEKLY;BYDAY=MO`.
    pub rrule: String,
    /// DTSTART of the series, in UTC.
    pub anchor: DateTime<Utc>,
    /// Zone the series is defined in; used to capture per-instant offsets.
    pub zone: Tz,
    /// Duration of each instance.
    pub duration: TimeDelta,
    pub all_day: bool,
    /// Instants excluded from the rule's output.
    pub exdates: Vec<DateTime<Utc>>,
    /// Instances substituted or cancelled, keyed by recurrence id.
    pub overrides: Vec<OccurrenceOverride>,
    /// Alarm lead times before each instance start.
    pub alarm_offsets: Vec<TimeDelta>,
}

impl Series {
    /// ## Summary
    /// Builds a concrete occurrence for one expanded instant, carrying the
    /// UTC offset in effect at that instant in the series' zone.
    #[must_use]
    pub fn occurrence_at(&self, start: DateTime<Utc>, end: DateTime<Utc>, all_day: bool) -> Occurrence {
        use chrono::Offset;
        let offset = start.with_timezone(&self.zone).offset().fix().local_minus_utc();
        let alarms = self
            .alarm_offsets
            .iter()
            .map(|lead| start - *lead)
            .collect();
        Occurrence {
            id: Uuid::new_v4(),
            series_id: self.id,
            start,
            end,
            all_day,
            utc_offset_seconds: offset,
            alarms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn test_series(zone: Tz) -> Series {
        Series {
            id: Uuid::new_v4(),
            rrule: "FREQ=DAILY".to_string(),
            anchor: Utc.with_ymd_and_hms(2026, 1, 1, 10, 0, 0).unwrap(),
            zone,
            duration: TimeDelta::hours(1),
            all_day: false,
            exdates: vec![],
            overrides: vec![],
            alarm_offsets: vec![TimeDelta::minutes(15)],
        }
    }

    #[test]
    fn test_occurrence_carries_offset_across_dst() {
        let series = test_series(chrono_tz::America::New_York);

        // January: EST, UTC-5.
        let winter = Utc.with_ymd_and_hms(2026, 1, 15, 15, 0, 0).unwrap();
        let occ = series.occurrence_at(winter, winter + TimeDelta::hours(1), false);
        assert_eq!(occ.utc_offset_seconds, -5 * 3600);

        // July: EDT, UTC-4.
        let summer = Utc.with_ymd_and_hms(2026, 7, 15, 14, 0, 0).unwrap();
        let occ = series.occurrence_at(summer, summer + TimeDelta::hours(1), false);
        assert_eq!(occ.utc_offset_seconds, -4 * 3600);
    }

    #[test]
    fn test_occurrence_derives_alarm_instants() {
        let series = test_series(chrono_tz::UTC);
        let start = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
        let occ = series.occurrence_at(start, start + TimeDelta::hours(1), false);
        assert_eq!(occ.alarms, vec![start - TimeDelta::minutes(15)]);
    }
}
