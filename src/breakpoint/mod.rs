//! Breakpoints: one-shot holds on completed captures.
//!
//! # Data Flow
//! ```text
//! Correlation::Complete
//!     → gate.rs offer(Message)
//!         → store.rs first_match (FilterExpression per breakpoint)
//!         → no match: PassThrough
//!         → match: broadcast `breakpoint` → wait for `resume`
//!     → approve(seq, edited body?) → breakpoint disarmed → Approved
//! ```
//!
//! # Design Decisions
//! - Breakpoints use the same filter engine as display filters
//! - A breakpoint disarms itself when the operator approves the hold
//! - The wait has an optional timeout (off by default) that releases the
//!   response unmodified and annotates the Message

pub mod gate;
pub mod store;

pub use gate::{BreakpointGate, GateDecision};
pub use store::{Breakpoint, BreakpointStore};
