//! Incremental recurrence expansion and window caching.
//!
//! Keeps a bounded in-memory cache of calendar occurrences consistent
//! with a growing store of recurrence definitions as a consumer navigates
//! through time: spans are loaded and evicted by a [`window::WindowManager`],
//! already-expanded coverage is tracked per series by a
//! [`tracker::SeriesExpansionTracker`], and new coverage is produced in
//! bounded, resumable calls by a [`expander::RecurrenceExpander`]. The
//! [`engine::Almanac`] facade ties them together behind the
//! [`orchestrator::ExpansionOrchestrator`]'s triggers.

pub mod engine;
pub mod error;
pub mod events;
pub mod expander;
pub mod interval;
pub mod notifier;
pub mod orchestrator;
pub mod tracker;
pub mod window;

pub use engine::Almanac;
pub use error::{EngineError, EngineResult};
pub use events::{EngineEvent, EventBus};
pub use expander::{Expansion, RecurrenceExpander, RecurrenceSource, RruleSource};
pub use interval::IntervalCollection;
pub use notifier::{Notifier, NullNotifier};
pub use orchestrator::ExpansionOrchestrator;
pub use tracker::SeriesExpansionTracker;
pub use window::WindowManager;
