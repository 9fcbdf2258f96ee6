//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (path, absolute URI)
//!     → router.rs (snapshot of the RouteTable)
//!     → matcher.rs (longest prefix among HTTP-family rules)
//!     → forward-proxy rule synthesized for absolute URIs
//!     → Return: RouteRule or RouteNotFound
//!
//! Configuration push:
//!     RouteRule[] (full set)
//!     → RouteTable::replace (atomic swap)
//! ```
//!
//! # Design Decisions
//! - No partial updates: every push replaces the whole set
//! - Deterministic: same input always matches same route
//! - Non-HTTP rules are selected by listen port, never by path

pub mod matcher;
pub mod router;
pub mod rule;

pub use router::RouteTable;
pub use rule::{Protocol, RouteRule};
