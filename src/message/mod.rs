//! Captured traffic data model.
//!
//! # Data Flow
//! ```text
//! request capture  → Message (incomplete, responseBody = NO_RESPONSE)
//! response capture → same Message completed in place (same sequenceNumber)
//!     → breakpoint gate → bus → viewer queue → filter
//! ```
//!
//! # Design Decisions
//! - `sequenceNumber` is the only total order; it comes from an injected
//!   `SequenceAllocator`, never a global
//! - Bodies are a tagged union so "string vs. parsed JSON" survives the wire

pub mod model;
pub mod sequence;

pub use model::{collect_headers, now_millis, Body, Headers, Message, NO_RESPONSE};
pub use sequence::SequenceAllocator;
