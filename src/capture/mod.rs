//! Capture subsystem.
//!
//! # Data Flow
//! ```text
//! Request body read
//!     → request.rs (RequestCapture, endpoint, body shaping)
//!     → correlator.rs begin() → PendingCapture (request-only Message)
//!
//! Upstream response read
//!     → response.rs (decompress, JSON or {"body": raw})
//!     → correlator.rs correlate() → Correlation::{Complete, Failed}
//!
//! Decoder records (gRPC, Mongo, Redis, MySQL, logs)
//!     → external.rs (ExternalRecord)
//!     → correlator.rs record() → Message
//! ```
//!
//! # Design Decisions
//! - One sequence allocator for every source of Messages
//! - Parse failures are not errors: the raw text is wrapped
//! - Errors become Messages with the same shape as real traffic

pub mod correlator;
pub mod external;
pub mod request;
pub mod response;

pub use correlator::{Correlation, CorrelationState, MessageCorrelator, PendingCapture};
pub use external::ExternalRecord;
pub use request::RequestCapture;
pub use response::ResponseCapture;
