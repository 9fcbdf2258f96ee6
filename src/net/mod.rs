//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! --listen [host:]port
//!     → listener.rs (parse, resolve, bind)
//!     → tls.rs (optional HTTPS certificate)
//!     → Hand off to HTTP layer
//!
//! Relayed route rules (grpc/mongo/redis/mysql/tcp)
//!     → relay.rs (listen on the rule's port, relay bytes, record exchanges)
//! ```
//!
//! # Design Decisions
//! - One listener, HTTP or HTTPS, selected at startup
//! - Relays follow the route set; a route replace re-syncs them

pub mod listener;
pub mod relay;
pub mod tls;

pub use listener::{ListenAddress, ListenerError};
pub use relay::RelaySupervisor;
