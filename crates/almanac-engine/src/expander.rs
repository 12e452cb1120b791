//! Pull-based, resumable expansion of a series into concrete occurrences.
//!
//! The raw candidate stream comes from a [`RecurrenceSource`] (backed by
//! the `rrule` crate); exception dates and overridden instances are
//! reconciled here, one layer above the iterator. A call is bounded by
//! `[min, max]` and by an emit limit; when the limit stops a call early a
//! cursor is handed back so the next call resumes instead of restarting.

use chrono::{DateTime, TimeDelta, Utc, Weekday};

use almanac_core::occurrence::{Occurrence, OverrideKind, Series};
use almanac_core::timespan::Timespan;
use almanac_store::IteratorCursor;

use crate::error::{EngineError, EngineResult};

/// Pull-based recurrence-rule collaborator.
///
/// Yields successive candidate instants on demand, starting at the first
/// candidate at or after `from`. Exceptions are deliberately not its
/// concern; it produces the rule's raw output.
pub trait RecurrenceSource: Send + Sync {
    /// ## Summary
    /// Opens a candidate stream for `series` starting at `from`.
    ///
    /// ## Errors
    /// `EngineError::InvalidRule` if the rule cannot be parsed or built.
    fn candidates(
        &self,
        series: &Series,
        from: DateTime<Utc>,
    ) -> EngineResult<Box<dyn Iterator<Item = DateTime<Utc>>>>;
}

/// `rrule`-crate backed [`RecurrenceSource`].
#[derive(Debug, Default, Clone, Copy)]
pub struct RruleSource;

impl RecurrenceSource for RruleSource {
    fn candidates(
        &self,
        series: &Series,
        from: DateTime<Utc>,
    ) -> EngineResult<Box<dyn Iterator<Item = DateTime<Utc>>>> {
        let rrule = series
            .rrule
            .parse::<rrule::RRule<rrule::Unvalidated>>()
            .map_err(|err| EngineError::InvalidRule(err.to_string()))?;
        let dt_start = series.anchor.with_timezone(&rrule::Tz::UTC);
        let rrule_set = rrule
            .build(dt_start)
            .map_err(|err| EngineError::InvalidRule(err.to_string()))?;

        Ok(Box::new(
            rrule_set
                .into_iter()
                .map(|dt| dt.with_timezone(&Utc))
                .skip_while(move |dt| *dt < from),
        ))
    }
}

/// Result of one expansion call.
#[derive(Debug)]
pub struct Expansion {
    /// Concrete occurrences within bounds, in rule order.
    pub occurrences: Vec<Occurrence>,
    /// The portion of the requested bounds this call actually covered.
    /// Equal to the bounds unless the emit limit stopped the call early.
    pub covered: Timespan,
    /// Cursor to resume from, when anything was emitted.
    pub cursor: Option<IteratorCursor>,
    /// Whether the emit limit cut iteration short of `max`.
    pub hit_emit_limit: bool,
}

pub struct RecurrenceExpander<'src> {
    source: &'src dyn RecurrenceSource,
    emit_limit: usize,
}

impl<'src> RecurrenceExpander<'src> {
    #[must_use]
    pub fn new(source: &'src dyn RecurrenceSource, emit_limit: usize) -> Self {
        Self {
            source,
            emit_limit: emit_limit.max(1),
        }
    }

    /// ## Summary
    /// Expands `series` over `bounds`, resuming from `cursor` when one is
    /// valid and applicable.
    ///
    /// Candidates before `bounds.start` are consumed silently; iteration
    /// stops at (and does not emit) the first candidate past `bounds.end`,
    /// or once the emit limit is reached; in the latter case the returned
    /// coverage ends at the last emitted instant and the cursor lets a
    /// later call pick up there.
    ///
    /// A cursor that fails validation or whose resume attempt errors is
    /// discarded and expansion restarts from the derived starting point;
    /// that recovery never surfaces to the caller.
    ///
    /// ## Errors
    /// `EngineError::InvalidRule` if the rule itself is unusable.
    pub fn expand(
        &self,
        series: &Series,
        bounds: &Timespan,
        cursor: Option<IteratorCursor>,
    ) -> EngineResult<Expansion> {
        let (iter, base_count) = self.open_stream(series, bounds, cursor)?;
        self.drain(series, bounds, iter, base_count)
    }

    /// Opens the candidate stream, preferring a resumable cursor and
    /// falling back to the derived starting point.
    fn open_stream(
        &self,
        series: &Series,
        bounds: &Timespan,
        cursor: Option<IteratorCursor>,
    ) -> EngineResult<(Box<dyn Iterator<Item = DateTime<Utc>>>, u64)> {
        if let Some(cursor) = cursor.filter(|c| cursor_applicable(c, series, bounds)) {
            let resume_from = cursor.last_emitted + TimeDelta::milliseconds(1);
            match self.source.candidates(series, resume_from) {
                Ok(iter) => return Ok((iter, cursor.emitted_count)),
                Err(err) => {
                    tracing::warn!(
                        series_id = %series.id,
                        %err,
                        "cursor resume failed, restarting from derived start"
                    );
                }
            }
        }

        let from = derive_start(series, bounds.start());
        Ok((self.source.candidates(series, from)?, 0))
    }

    fn drain(
        &self,
        series: &Series,
        bounds: &Timespan,
        iter: Box<dyn Iterator<Item = DateTime<Utc>>>,
        base_count: u64,
    ) -> EngineResult<Expansion> {
        let mut occurrences = Vec::new();
        let mut total = base_count;
        let mut last_emitted = None;
        let mut hit_emit_limit = false;

        for candidate in iter {
            if candidate > bounds.end() {
                break;
            }
            if candidate < bounds.start() {
                continue;
            }
            let Some(occurrence) = reconcile(series, candidate) else {
                continue;
            };
            occurrences.push(occurrence);
            total += 1;
            last_emitted = Some(candidate);
            if occurrences.len() >= self.emit_limit {
                hit_emit_limit = true;
                break;
            }
        }

        let covered = match (hit_emit_limit, last_emitted) {
            (true, Some(last)) => Timespan::new(bounds.start(), last)?,
            _ => *bounds,
        };
        let cursor = last_emitted.map(|last| IteratorCursor {
            last_emitted: last,
            emitted_count: total,
        });

        tracing::debug!(
            series_id = %series.id,
            emitted = occurrences.len(),
            %covered,
            hit_emit_limit,
            "expansion call finished"
        );
        Ok(Expansion {
            occurrences,
            covered,
            cursor,
            hit_emit_limit,
        })
    }
}

/// Applies exception dates and overridden instances to one raw candidate.
/// Returns `None` when the instance is excluded or cancelled.
fn reconcile(series: &Series, candidate: DateTime<Utc>) -> Option<Occurrence> {
    if series.exdates.contains(&candidate) {
        return None;
    }
    if let Some(ovr) = series
        .overrides
        .iter()
        .find(|o| o.recurrence_id == candidate)
    {
        return match ovr.kind {
            OverrideKind::Cancelled => None,
            OverrideKind::Replaced {
                start,
                end,
                all_day,
            } => Some(series.occurrence_at(start, end, all_day)),
        };
    }
    Some(series.occurrence_at(candidate, candidate + series.duration, series.all_day))
}

/// A cursor is usable when its fields are self-consistent and the whole
/// request lies at or after it. A request starting before the cursor
/// (behind it entirely, or a straddling delta whose head is uncovered)
/// restarts from the derived starting point instead; resuming would skip
/// the head and record it as covered without ever emitting it.
fn cursor_applicable(cursor: &IteratorCursor, series: &Series, bounds: &Timespan) -> bool {
    if cursor.emitted_count == 0 || cursor.last_emitted < series.anchor {
        tracing::warn!(series_id = %series.id, ?cursor, "discarding corrupt cursor");
        return false;
    }
    cursor.last_emitted <= bounds.start()
}

/// ## Summary
/// Derives where candidate iteration should begin for a request starting
/// at `min`, walking back to the most recent instant consistent with the
/// rule's frequency.
///
/// Daily rules step back one period; weekly and monthly rules with an
/// interval of 1 snap to the start of the enclosing week or month. Any
/// other frequency or interval falls back to the series anchor, a known
/// limitation, logged rather than silently approximated.
#[must_use]
pub fn derive_start(series: &Series, min: DateTime<Utc>) -> DateTime<Utc> {
    let (freq, interval) = parse_freq_interval(&series.rrule);
    let derived = match (freq.as_deref(), interval) {
        (Some("DAILY"), n) => Some(min - TimeDelta::days(i64::from(n))),
        (Some("WEEKLY"), 1) => {
            let week_start = min.date_naive().week(Weekday::Mon).first_day();
            week_start.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc())
        }
        (Some("MONTHLY"), 1) => Some(Timespan::month_of(min).start()),
        _ => None,
    };

    match derived {
        Some(at) if at >= series.anchor => at,
        Some(_) => series.anchor,
        None => {
            tracing::debug!(
                series_id = %series.id,
                rrule = %series.rrule,
                "no walk-back for this frequency/interval, starting at anchor"
            );
            series.anchor
        }
    }
}

fn parse_freq_interval(rrule: &str) -> (Option<String>, u32) {
    let mut freq = None;
    let mut interval = 1;
    for part in rrule.split(';') {
        if let Some((key, value)) = part.split_once('=') {
            match key.trim().to_ascii_uppercase().as_str() {
                "FREQ" => freq = Some(value.trim().to_ascii_uppercase()),
                "INTERVAL" => interval = value.trim().parse().unwrap_or(1),
                _ => {}
            }
        }
    }
    (freq, interval)
}
