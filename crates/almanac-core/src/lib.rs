//! Core value types for the almanac expansion engine.
//!
//! Leaf types with no dependencies on the store or engine layers:
//! timespans and their trim/combine algebra, occurrence and series models,
//! configuration, and the shared tuning constants.

pub mod config;
pub mod constants;
pub mod error;
pub mod occurrence;
pub mod timespan;
pub mod types;
