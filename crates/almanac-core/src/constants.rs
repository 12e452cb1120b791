/// Tuning constants shared across crates.
///
/// Each value here is also the default for the corresponding
/// [`crate::config::Settings`] field.

/// Maximum number of spans the cache window retains once consolidated.
pub const MAX_SPANS: usize = 6;

/// Delay before a navigation-triggered expansion fires. Every navigation
/// inside this window cancels and reschedules the pending expansion.
pub const DEBOUNCE_MS: u64 = 750;

/// Padding on either side of the focused month for expansion targets,
/// sized to exceed the widest concurrently rendered view.
pub const EXPANSION_PAD_DAYS: i64 = 85;

/// Maximum occurrences emitted by a single expander call before the
/// cursor is persisted and the call yields.
pub const EMIT_LIMIT: usize = 200;

/// Maximum ensure-expanded passes before giving up with
/// an exhaustion error.
pub const MAX_EXPANSION_PASSES: u32 = 25;

/// Two spans whose gap is at most this many milliseconds are considered
/// combinable by `Timespan::combine`.
pub const MERGE_TOLERANCE_MS: i64 = 1_000;
