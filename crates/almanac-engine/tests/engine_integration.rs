//! End-to-end tests driving the engine facade the way a calendar UI
//! would: navigate, wait for loads to settle, let the debounce fire, and
//! observe the cache and events.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use tokio::sync::mpsc::UnboundedReceiver;
use uuid::Uuid;

use almanac_core::config::Settings;
use almanac_core::occurrence::{Occurrence, Series};
use almanac_core::timespan::Timespan;
use almanac_engine::error::EngineError;
use almanac_engine::events::EngineEvent;
use almanac_engine::expander::{RecurrenceSource, RruleSource};
use almanac_engine::notifier::{Notifier, NullNotifier};
use almanac_engine::Almanac;
use almanac_store::{ExpansionStore, MemoryStore};

/// Source wrapper counting how many expansion calls actually opened a
/// candidate stream.
struct CountingSource {
    inner: RruleSource,
    calls: AtomicU32,
}

impl CountingSource {
    fn new() -> Self {
        Self {
            inner: RruleSource,
            calls: AtomicU32::new(0),
        }
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl RecurrenceSource for CountingSource {
    fn candidates(
        &self,
        series: &Series,
        from: DateTime<Utc>,
    ) -> almanac_engine::EngineResult<Box<dyn Iterator<Item = DateTime<Utc>>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.candidates(series, from)
    }
}

/// Notifier recording how many alarm creations it saw.
#[derive(Default)]
struct RecordingNotifier {
    created: AtomicU32,
    removed: AtomicU32,
}

impl Notifier for RecordingNotifier {
    fn alarms_created(&self, _occurrence_id: Uuid, _instants: &[DateTime<Utc>]) {
        self.created.fetch_add(1, Ordering::SeqCst);
    }

    fn alarms_removed(&self, _occurrence_id: Uuid) {
        self.removed.fetch_add(1, Ordering::SeqCst);
    }
}

fn daily_series(anchor: DateTime<Utc>) -> Series {
    Series {
        id: Uuid::new_v4(),
        rrule: "FREQ=DAILY".to_string(),
        anchor,
        zone: chrono_tz::UTC,
        duration: TimeDelta::hours(1),
        all_day: false,
        exdates: vec![],
        overrides: vec![],
        alarm_offsets: vec![],
    }
}

fn ymd(y: i32, m: u32, d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, 9, 0, 0).unwrap()
}

struct Harness {
    engine: Almanac,
    store: Arc<MemoryStore>,
    source: Arc<CountingSource>,
    events: UnboundedReceiver<EngineEvent>,
}

fn harness(settings: &Settings) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let source = Arc::new(CountingSource::new());
    let engine = Almanac::new(
        Arc::clone(&store) as Arc<dyn ExpansionStore + Send + Sync>,
        Arc::clone(&source) as Arc<dyn RecurrenceSource>,
        Arc::new(NullNotifier),
        settings,
    );
    let events = engine.subscribe();
    Harness {
        engine,
        store,
        source,
        events,
    }
}

/// Drains events up to the next `LoadingComplete`, collecting any purges
/// seen along the way.
async fn wait_loading_complete(
    events: &mut UnboundedReceiver<EngineEvent>,
    purged: &mut Vec<Timespan>,
) {
    loop {
        match events.recv().await {
            Some(EngineEvent::LoadingComplete) | None => break,
            Some(EngineEvent::Purge(span)) => purged.push(span),
            Some(_) => {}
        }
    }
}

/// Past the debounce window plus slack so the scheduled expansion task
/// has run to completion under paused time.
async fn let_debounce_fire() {
    tokio::time::sleep(Duration::from_millis(800)).await;
    tokio::task::yield_now().await;
}

#[test_log::test(tokio::test(start_paused = true))]
async fn rapid_navigation_fires_exactly_one_expansion() {
    let settings = Settings::default();
    let mut h = harness(&settings);
    h.engine.register_series(daily_series(ymd(2020, 1, 1)));

    // January, off to September, back to January, all within the
    // debounce window: only the final resting state expands.
    h.engine.move_to(ymd(2026, 1, 15));
    tokio::time::sleep(Duration::from_millis(100)).await;
    h.engine.move_to(ymd(2026, 9, 15));
    tokio::time::sleep(Duration::from_millis(100)).await;
    h.engine.move_to(ymd(2026, 1, 15));
    assert_eq!(h.engine.scheduled_generation(), 3);

    let_debounce_fire().await;

    assert_eq!(h.source.calls(), 1, "only the surviving expansion ran");
    // Everything committed sits around January; nothing near September.
    let sept = Timespan::month_of(ymd(2026, 9, 15));
    assert!(h.store.occurrences_in(&sept).expect("query").is_empty());
    let jan = Timespan::month_of(ymd(2026, 1, 15));
    assert!(!h.store.occurrences_in(&jan).expect("query").is_empty());
}

#[test_log::test(tokio::test(start_paused = true))]
async fn navigation_loads_settle_and_window_stays_bounded() {
    let settings = Settings::default();
    let mut h = harness(&settings);
    h.engine.register_series(daily_series(ymd(2020, 1, 1)));

    let mut purged = Vec::new();
    for month in 1..=9u32 {
        h.engine.move_to(ymd(2026, month, 10));
        wait_loading_complete(&mut h.events, &mut purged).await;
        let_debounce_fire().await;
    }
    while let Ok(event) = h.events.try_recv() {
        if let EngineEvent::Purge(span) = event {
            purged.push(span);
        }
    }

    assert!(!purged.is_empty(), "older spans were evicted");
    // An evicted early month no longer has cached occurrences...
    let january = Timespan::month_of(ymd(2026, 1, 10));
    assert!(purged.contains(&january));
    assert!(h.engine.query_window(&january).is_empty());
    // ...while the resting month does.
    let september = Timespan::month_of(ymd(2026, 9, 10));
    assert!(!h.engine.query_window(&september).is_empty());
}

#[test_log::test(tokio::test(start_paused = true))]
async fn overlapping_requests_expand_only_the_remainder() {
    let settings = Settings::default();
    let h = harness(&settings);
    let series = daily_series(ymd(2026, 1, 1));
    let series_id = series.id;
    h.engine.register_series(series);
    // Pin the current span so both requests start from January.
    h.engine.move_to(ymd(2026, 1, 15));

    h.engine.ensure_expanded(ymd(2026, 2, 28)).expect("first window");
    let after_first = h.store.occurrences_of_series(series_id).expect("query").len();

    // Second request overlaps the first; only the March tail is new.
    h.engine.ensure_expanded(ymd(2026, 3, 31)).expect("second window");
    let all = h.store.occurrences_of_series(series_id).expect("query");

    let mut starts: Vec<_> = all.iter().map(|o| o.start).collect();
    starts.sort_unstable();
    starts.dedup();
    assert_eq!(starts.len(), all.len(), "no duplicate instants were committed");
    assert!(all.len() > after_first);
    assert!(all.iter().any(|o| o.start >= ymd(2026, 3, 1)));
}

#[test_log::test(tokio::test(start_paused = true))]
async fn navigation_after_narrow_coverage_backfills_the_head() {
    // A narrow ensure-expanded coverage sits strictly inside the padded
    // navigation target that follows. The head of the target (before the
    // covered span) must still be expanded, and the covered middle must
    // not be committed a second time.
    let settings = Settings::default();
    let h = harness(&settings);
    let series = daily_series(ymd(2026, 1, 1));
    let series_id = series.id;
    h.engine.register_series(series);

    h.engine.move_to(ymd(2026, 6, 10));
    h.engine.ensure_expanded(ymd(2026, 6, 30)).expect("narrow coverage");
    let june = Timespan::month_of(ymd(2026, 6, 10));
    let june_before = h.store.occurrences_in(&june).expect("query").len();
    assert_eq!(june_before, 30);

    let_debounce_fire().await;

    // The padded June target reaches back into March.
    let march = Timespan::month_of(ymd(2026, 3, 10));
    assert!(!h.store.occurrences_in(&march).expect("query").is_empty());
    // June was already covered; nothing there was duplicated.
    assert_eq!(h.store.occurrences_in(&june).expect("query").len(), june_before);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn ensure_expanded_spans_multiple_passes() {
    // A two-year daily range needs several emit-limited passes.
    let settings = Settings::default();
    let h = harness(&settings);
    let series = daily_series(ymd(2026, 1, 1));
    let series_id = series.id;
    h.engine.register_series(series);
    h.engine.move_to(ymd(2026, 1, 15));

    h.engine.ensure_expanded(ymd(2027, 12, 31)).expect("coverage");

    let all = h.store.occurrences_of_series(series_id).expect("query");
    assert!(all.len() > 700, "two years of daily occurrences, got {}", all.len());
    assert!(all.iter().any(|o| o.start >= ymd(2027, 12, 30)));
}

#[test_log::test(tokio::test(start_paused = true))]
async fn ensure_expanded_surfaces_exhaustion() {
    let mut settings = Settings::default();
    settings.expansion.emit_limit = 5;
    settings.expansion.max_passes = 2;
    let h = harness(&settings);
    h.engine.register_series(daily_series(ymd(2026, 1, 1)));
    h.engine.move_to(ymd(2026, 1, 15));

    let err = h
        .engine
        .ensure_expanded(ymd(2026, 12, 31))
        .expect_err("cannot finish in two passes of five");
    assert!(matches!(err, EngineError::ExpansionExhausted { passes: 2 }));

    // The cache remains usable with partial coverage.
    let jan = Timespan::new(ymd(2026, 1, 1), ymd(2026, 1, 5)).unwrap();
    assert!(!h.store.occurrences_in(&jan).expect("query").is_empty());
}

#[test_log::test(tokio::test(start_paused = true))]
async fn transient_commit_failure_is_retried_next_pass() {
    let settings = Settings::default();
    let h = harness(&settings);
    let series = daily_series(ymd(2026, 1, 1));
    let series_id = series.id;
    h.engine.register_series(series);
    h.engine.move_to(ymd(2026, 1, 15));

    h.store.inject_commit_failures(1);
    h.engine
        .ensure_expanded(ymd(2026, 1, 31))
        .expect("a later pass retries the failed commit");

    assert!(!h.store.occurrences_of_series(series_id).expect("query").is_empty());
}

#[test_log::test(tokio::test(start_paused = true))]
async fn post_sync_expands_newly_introduced_series() {
    let settings = Settings::default();
    let mut h = harness(&settings);

    h.engine.move_to(ymd(2026, 5, 10));
    wait_loading_complete(&mut h.events, &mut Vec::new()).await;

    // No series yet, so nothing is cached.
    let may = Timespan::month_of(ymd(2026, 5, 10));
    assert!(h.engine.query_window(&may).is_empty());

    h.engine
        .on_sync_completed(Ok(vec![daily_series(ymd(2026, 1, 1))]))
        .expect("post-sync expansion");

    assert!(!h.engine.query_window(&may).is_empty());
}

#[test_log::test(tokio::test(start_paused = true))]
async fn failed_sync_surfaces_source_unavailable() {
    let settings = Settings::default();
    let h = harness(&settings);
    h.engine.register_series(daily_series(ymd(2026, 1, 1)));

    let err = h
        .engine
        .on_sync_completed(Err("provider timeout".to_string()))
        .expect_err("sync failed");
    assert!(matches!(err, EngineError::SourceUnavailable(_)));

    // Purely local expansion still works afterwards.
    h.engine.ensure_expanded(ymd(2026, 1, 31)).expect("local expansion");
}

#[test_log::test(tokio::test(start_paused = true))]
async fn direct_event_and_series_deletion() {
    let settings = Settings::default();
    let notifier = Arc::new(RecordingNotifier::default());
    let store = Arc::new(MemoryStore::new());
    let engine = Almanac::new(
        Arc::clone(&store) as Arc<dyn ExpansionStore + Send + Sync>,
        Arc::new(RruleSource),
        Arc::clone(&notifier) as Arc<dyn Notifier>,
        &settings,
    );

    let mut series = daily_series(ymd(2026, 6, 1));
    series.alarm_offsets = vec![TimeDelta::minutes(10)];
    let series_id = series.id;
    engine.register_series(series);
    engine.move_to(ymd(2026, 6, 10));
    let_debounce_fire().await;

    let june = Timespan::month_of(ymd(2026, 6, 10));
    assert!(!engine.query_window(&june).is_empty());
    assert!(notifier.created.load(Ordering::SeqCst) > 0);

    // A one-off event committed directly, no expander involved.
    let start = ymd(2026, 6, 20);
    let one_off = Occurrence {
        id: Uuid::new_v4(),
        series_id: Uuid::new_v4(),
        start,
        end: start + TimeDelta::hours(2),
        all_day: false,
        utc_offset_seconds: 0,
        alarms: vec![],
    };
    engine.create_event(one_off.clone()).expect("create");
    assert!(engine.query_window(&june).iter().any(|o| o.id == one_off.id));

    // Deleting the recurring series removes everything it owned.
    engine.delete_series(series_id).expect("delete");
    assert!(store.occurrences_of_series(series_id).expect("query").is_empty());
    assert!(store.expansion_state(series_id).expect("state").is_none());
    let remaining = engine.query_window(&june);
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, one_off.id);
    assert!(notifier.removed.load(Ordering::SeqCst) > 0);
}
