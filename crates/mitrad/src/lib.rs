//! Mitra daemon library - exposes modules for testing.

pub mod breaker;
pub mod config;
pub mod delivery;
pub mod detect;
pub mod embedding;
pub mod fallback;
pub mod inference;
pub mod lexical;
pub mod metrics;
pub mod orchestrator;
pub mod retrieval;
pub mod speech;
pub mod store;
