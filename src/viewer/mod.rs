//! Viewer side of the push channel.
//!
//! # Data Flow
//! ```text
//! /_viewer/ws
//!     → client.rs (ViewerClient: decode events, ack batches)
//!     → queue.rs (OrderedMessageQueue: merge, order, bound, split tabs)
//!     → FilterExpression (cached visibility per entry)
//! ```
//!
//! # Design Decisions
//! - Batches are acknowledged on receipt; pacing is the proxy's job
//! - The queue is owned by one task and needs no locking

pub mod client;
pub mod queue;

pub use client::{ViewerClient, ViewerError};
pub use queue::{InsertReport, OrderedMessageQueue, SortKey, Tab, DEFAULT_QUEUE_LIMIT};
