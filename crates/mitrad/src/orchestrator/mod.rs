//! Request orchestration: the per-request state machine that sequences
//! transcription, language detection, answer resolution, synthesis and
//! delivery, degrading at each stage instead of failing where a fallback
//! exists.

pub mod engine;

pub use engine::{Orchestrator, OrchestratorSettings};
