//! Persistence collaborator for the almanac engine.
//!
//! Defines the [`store::ExpansionStore`] contract the engine commits
//! through (atomic multi-entity batches, indexed range queries, and an
//! explicit range-scan iterator) together with the persisted
//! [`state::SeriesExpansionState`] model and an in-memory reference
//! implementation.

pub mod error;
pub mod memory;
pub mod state;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use state::{IteratorCursor, SeriesExpansionState};
pub use store::{CommitBatch, ExpansionStore, RangeScan};
