//! Cascade Models
//!
//! Model schemas are authored elsewhere and ingested in bulk; handlers
//! consult them at execution time. This crate provides the read-through
//! cache in front of the store's model table: schema lookups hit memory
//! after the first load, and a sync invalidates what it replaces.

mod cache;
mod search;

pub use cache::{ModelCache, ModelInfo};
pub use search::fuzzy_score;
