//! Mitra Common - shared domain types for the Mitra assistant core.
//!
//! Request/response model, knowledge corpus types, supported languages with
//! their stop-word sets, and the localized message catalog. No I/O lives
//! here; the daemon crate owns every network and file boundary.

pub mod error;
pub mod knowledge;
pub mod language;
pub mod messages;
pub mod request;

pub use error::MitraError;
pub use knowledge::{KnowledgeCorpus, KnowledgeEntry};
pub use language::Language;
pub use request::{
    DeliveryPayload, InboundRequest, LanguageSource, RequestContext, RequestStatus,
    ResponseMode, Stage,
};
